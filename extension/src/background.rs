// Background service worker logic
// Routes messages addressed to SERVICE_WORKER: dApp requests go into the
// approval queue, keepalive pings are acknowledged, and closing the approval
// window answers every pending request so no dApp is left hanging.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::approval::{respond_to_app, Resolution};
use crate::keepalive::PING_METHOD;
use crate::message::{ErrorEnvelope, Message, MessageResponse, TabRef, WindowRef};
use crate::queue::{QueueError, RequestQueue, RequestQueueEntry};
use crate::services::storage::{load, KeyValueStore};
use crate::transport::{Envelope, Transport};

pub const REQUEST_APP: &str = "requestApp";
pub const WINDOW_REMOVED: &str = "windowRemoved";
pub const USER_ACCOUNTS_KEY: &str = "userAccounts";

const MISSING_ACCOUNT_MESSAGE: &str = "Wallet not initialized. Please create or import a wallet.";

/// Payload of a `requestApp` message, as forwarded by the content relay
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct AppRequest {
    origin: String,
    #[serde(default)]
    request_id: Option<Uuid>,
    method: String,
    #[serde(default)]
    params: Value,
}

pub struct ServiceWorker {
    queue: Arc<RequestQueue>,
    store: Arc<dyn KeyValueStore>,
    transport: Arc<dyn Transport>,
}

impl ServiceWorker {
    pub fn new(
        queue: Arc<RequestQueue>,
        store: Arc<dyn KeyValueStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            queue,
            store,
            transport,
        }
    }

    /// Serve the worker's inbox until every sender is gone
    ///
    /// Each message is handled on its own task so a slow enqueue never
    /// delays a keepalive ping.
    pub async fn run(self: Arc<Self>, mut inbox: mpsc::Receiver<Envelope>) {
        tracing::info!("🚀 Service worker listening");

        while let Some(envelope) = inbox.recv().await {
            let worker = self.clone();
            tokio::spawn(async move {
                let (message, reply) = envelope.into_parts();
                let response = worker.handle_message(message).await;
                if reply.send(response).is_err() {
                    tracing::debug!("Sender went away before the reply");
                }
            });
        }

        tracing::info!("Service worker inbox closed");
    }

    /// Handle one message addressed to the service worker
    ///
    /// For `requestApp` the message's `tab_id` is the sending tab.
    pub async fn handle_message(&self, message: Message) -> MessageResponse {
        let id = message.correlation_id;
        tracing::debug!("service worker message {} ({})", message.method, id);

        match message.method.as_str() {
            PING_METHOD => MessageResponse::empty(id),
            REQUEST_APP => self.handle_request_app(message).await,
            WINDOW_REMOVED => match message
                .payload
                .as_u64()
                .and_then(|window_id| WindowRef::try_from(window_id).ok())
            {
                Some(window_id) => {
                    self.handle_window_removed(window_id).await;
                    MessageResponse::empty(id)
                }
                None => MessageResponse::failure(
                    id,
                    ErrorEnvelope::invalid_request("windowRemoved expects a window id"),
                ),
            },
            other => MessageResponse::failure(
                id,
                ErrorEnvelope::invalid_request(format!("Unsupported method: {}", other)),
            ),
        }
    }

    async fn handle_request_app(&self, message: Message) -> MessageResponse {
        let id = message.correlation_id;
        let request: AppRequest = match serde_json::from_value(message.payload) {
            Ok(request) => request,
            Err(e) => {
                return MessageResponse::failure(
                    id,
                    ErrorEnvelope::invalid_request(format!("Malformed request: {}", e)),
                )
            }
        };

        let entry = RequestQueueEntry {
            id: request.request_id.unwrap_or_else(Uuid::new_v4),
            ..RequestQueueEntry::new(request.origin, request.method, request.params, message.tab_id)
        };

        if !self.has_account().await {
            tracing::warn!("Request from {} with no wallet set up", entry.origin);
            self.answer(
                &entry.origin,
                entry.id,
                entry.tab_id,
                ErrorEnvelope::invalid_request(MISSING_ACCOUNT_MESSAGE),
            )
            .await;
            return MessageResponse::empty(id);
        }

        match self.queue.enqueue(entry.clone()).await {
            Ok(_) => MessageResponse::empty(id),
            Err(QueueError::Surface(reason)) => {
                tracing::error!("Approval UI could not be shown: {}", reason);
                self.reject_pending(ErrorEnvelope::internal()).await;
                MessageResponse::empty(id)
            }
            Err(e) => {
                tracing::error!("Failed to queue request {}: {}", entry.id, e);
                self.answer(&entry.origin, entry.id, entry.tab_id, ErrorEnvelope::internal())
                    .await;
                MessageResponse::failure(id, ErrorEnvelope::internal())
            }
        }
    }

    /// The user closed a window; if it was the approval popup, every queued
    /// request is answered with an error and the queue is cleared.
    pub async fn handle_window_removed(&self, window_id: WindowRef) {
        let owned = match self.queue.owns_window(window_id).await {
            Ok(owned) => owned,
            Err(e) => {
                tracing::error!("Failed to read request queue: {}", e);
                return;
            }
        };

        if let Err(e) = self.queue.forget_window().await {
            tracing::warn!("Failed to clear current window: {}", e);
        }

        if owned {
            tracing::info!("Approval window {} closed by user", window_id);
            self.reject_pending(ErrorEnvelope::invalid_input()).await;
        }
    }

    async fn reject_pending(&self, error: ErrorEnvelope) {
        let drained = match self.queue.drain().await {
            Ok(drained) => drained,
            Err(e) => {
                tracing::error!("Failed to drain request queue: {}", e);
                return;
            }
        };

        for entry in drained {
            self.answer(&entry.origin, entry.id, entry.tab_id, error.clone())
                .await;
        }
    }

    async fn answer(&self, origin: &str, request_id: Uuid, tab_id: Option<TabRef>, error: ErrorEnvelope) {
        if let Err(e) = respond_to_app(
            self.transport.as_ref(),
            origin,
            request_id,
            tab_id,
            Resolution::Rejected(error),
        )
        .await
        {
            tracing::warn!("Could not answer {} at {}: {}", request_id, origin, e);
        }
    }

    async fn has_account(&self) -> bool {
        match load::<Vec<Value>>(self.store.as_ref(), USER_ACCOUNTS_KEY).await {
            Ok(accounts) => !accounts.is_empty(),
            Err(e) => {
                tracing::warn!("Could not read accounts: {}", e);
                false
            }
        }
    }
}
