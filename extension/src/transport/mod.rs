// Cross-context transport
//
// UnicastTransport: service worker and explicitly targeted tabs (exactly one recipient)
// BroadcastTransport: CONTENT without a tab (every matching tab, last reply wins)
// MessageRouter: picks one of the two per message
//
// No retries happen here; callers own retry policy.

mod broadcast;
mod hub;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{ContextId, Message, MessageResponse, TabRef};

pub use broadcast::BroadcastTransport;
pub use hub::{matches_url_filter, Envelope, LocalHub};

/// Default bound on a single request/response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum TransportError {
    /// Destination gone (tab navigated away, handler dropped)
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// No response within the bound; remote state is unknown
    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("message for {0:?} requires a tab id")]
    MissingTab(ContextId),
}

/// The host platform's inter-context messaging primitive
///
/// Implemented by the browser bindings in production and by [`LocalHub`]
/// for in-process hosting and tests.
#[async_trait]
pub trait HostChannel: Send + Sync {
    /// Deliver to the background context
    async fn send_to_runtime(&self, message: Message) -> Result<MessageResponse, TransportError>;

    /// Deliver to the content script of a single tab
    async fn send_to_tab(
        &self,
        tab: TabRef,
        message: Message,
    ) -> Result<MessageResponse, TransportError>;

    /// Tabs whose URL matches the filter (e.g. `*://*/*`)
    async fn query_tabs(&self, url_filter: &str) -> Result<Vec<TabRef>, TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: Message) -> Result<MessageResponse, TransportError>;
}

pub(crate) enum Destination {
    Runtime,
    Tab(TabRef),
}

/// Single delivery with timeout and correlation check
pub(crate) async fn deliver(
    channel: &dyn HostChannel,
    destination: Destination,
    message: Message,
    timeout: Duration,
) -> Result<MessageResponse, TransportError> {
    let correlation_id = message.correlation_id;

    let exchange = async {
        match destination {
            Destination::Runtime => channel.send_to_runtime(message).await,
            Destination::Tab(tab) => channel.send_to_tab(tab, message).await,
        }
    };

    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| TransportError::Timeout(timeout))??;

    if response.correlation_id != correlation_id {
        tracing::warn!(
            "Discarding reply {} for request {}",
            response.correlation_id,
            correlation_id
        );
        return Err(TransportError::ChannelClosed(
            "reply correlation id mismatch".to_string(),
        ));
    }

    Ok(response)
}

/// Exactly-one-recipient delivery
pub struct UnicastTransport {
    channel: Arc<dyn HostChannel>,
    timeout: Duration,
}

impl UnicastTransport {
    pub fn new(channel: Arc<dyn HostChannel>, timeout: Duration) -> Self {
        Self { channel, timeout }
    }
}

#[async_trait]
impl Transport for UnicastTransport {
    async fn send(&self, message: Message) -> Result<MessageResponse, TransportError> {
        let destination = match (message.target, message.tab_id) {
            (ContextId::ServiceWorker, _) => Destination::Runtime,
            (_, Some(tab)) => Destination::Tab(tab),
            (target, None) => return Err(TransportError::MissingTab(target)),
        };

        tracing::debug!(
            "→ {:?} {} ({})",
            message.target,
            message.method,
            message.correlation_id
        );

        deliver(self.channel.as_ref(), destination, message, self.timeout).await
    }
}

/// Routes CONTENT messages without a tab to the broadcast path, everything
/// else to unicast
pub struct MessageRouter {
    unicast: UnicastTransport,
    broadcast: BroadcastTransport,
}

impl MessageRouter {
    pub fn new(channel: Arc<dyn HostChannel>, origin_filter: String, timeout: Duration) -> Self {
        Self {
            unicast: UnicastTransport::new(channel.clone(), timeout),
            broadcast: BroadcastTransport::new(channel, origin_filter, timeout),
        }
    }
}

#[async_trait]
impl Transport for MessageRouter {
    async fn send(&self, message: Message) -> Result<MessageResponse, TransportError> {
        if message.target == ContextId::Content && message.tab_id.is_none() {
            self.broadcast.send(message).await
        } else {
            self.unicast.send(message).await
        }
    }
}
