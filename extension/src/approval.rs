// UI-side approval flow
// The popup / side panel resolves the head request, answers the dApp and
// dequeues, in that order.

use std::sync::Arc;

use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::message::{ContextId, ErrorEnvelope, Message, TabRef};
use crate::queue::{QueueError, RequestQueue, RequestQueueEntry};
use crate::transport::{Transport, TransportError};

pub const RESPONSE_APP: &str = "responseApp";

/// Terminal outcome the user (or the signing step) reached for a request
#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Approved(Value),
    Rejected(ErrorEnvelope),
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("request {requested} is not the current request (head: {head:?})")]
    NotHead { requested: Uuid, head: Option<Uuid> },

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Deliver a `responseApp` to the content script that asked
///
/// Without a known tab the response is broadcast to every matching tab.
pub async fn respond_to_app(
    transport: &dyn Transport,
    origin: &str,
    request_id: Uuid,
    tab_id: Option<TabRef>,
    resolution: Resolution,
) -> Result<(), TransportError> {
    let params = match resolution {
        Resolution::Approved(result) => json!({ "id": request_id, "result": result }),
        Resolution::Rejected(error) => json!({ "id": request_id, "error": error }),
    };

    let message = Message::new(
        ContextId::Content,
        RESPONSE_APP,
        json!({ "origin": origin, "requestId": request_id, "params": params }),
    )
    .with_tab(tab_id);

    transport.send(message).await.map(|_| ())
}

pub struct ApprovalController {
    queue: Arc<RequestQueue>,
    transport: Arc<dyn Transport>,
}

impl ApprovalController {
    pub fn new(queue: Arc<RequestQueue>, transport: Arc<dyn Transport>) -> Self {
        Self { queue, transport }
    }

    /// The only request the UI may act on
    pub async fn current(&self) -> Result<Option<RequestQueueEntry>, ApprovalError> {
        Ok(self.queue.peek_head().await?)
    }

    /// Answer the head request and dequeue it; returns the next request to render
    ///
    /// The head is dequeued even if the answer cannot be delivered so that one
    /// unreachable tab never blocks the queue. If the queue was drained while
    /// the answer was in flight, a newer head is left in place.
    pub async fn resolve(
        &self,
        request_id: Uuid,
        resolution: Resolution,
    ) -> Result<Option<RequestQueueEntry>, ApprovalError> {
        let head = self.queue.peek_head().await?;
        let entry = match head {
            Some(entry) if entry.id == request_id => entry,
            other => {
                return Err(ApprovalError::NotHead {
                    requested: request_id,
                    head: other.map(|e| e.id),
                })
            }
        };

        let approved = matches!(resolution, Resolution::Approved(_));
        if let Err(e) = respond_to_app(
            self.transport.as_ref(),
            &entry.origin,
            entry.id,
            entry.tab_id,
            resolution,
        )
        .await
        {
            tracing::warn!(
                "Could not deliver response for {} to {}: {}",
                entry.id,
                entry.origin,
                e
            );
        }

        tracing::info!(
            "{} request {} ({} from {})",
            if approved { "✅ Approved" } else { "Rejected" },
            entry.id,
            entry.method,
            entry.origin
        );

        Ok(self.queue.dequeue_if_head(entry.id).await?)
    }

    pub async fn approve(
        &self,
        request_id: Uuid,
        result: Value,
    ) -> Result<Option<RequestQueueEntry>, ApprovalError> {
        self.resolve(request_id, Resolution::Approved(result)).await
    }

    pub async fn reject(&self, request_id: Uuid) -> Result<Option<RequestQueueEntry>, ApprovalError> {
        self.resolve(request_id, Resolution::Rejected(ErrorEnvelope::user_rejected()))
            .await
    }
}
