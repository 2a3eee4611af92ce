use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};

use super::{deliver, Destination, HostChannel, Transport, TransportError};
use crate::message::{Message, MessageResponse};

/// Multicast to every tab matching the origin filter, collapsed to one reply
///
/// - zero matching tabs resolves to an empty (null) success
/// - otherwise the reply that arrives last wins
/// - tabs that fail are skipped; only if every tab fails is the last error returned
pub struct BroadcastTransport {
    channel: Arc<dyn HostChannel>,
    origin_filter: String,
    timeout: Duration,
}

impl BroadcastTransport {
    pub fn new(channel: Arc<dyn HostChannel>, origin_filter: String, timeout: Duration) -> Self {
        Self {
            channel,
            origin_filter,
            timeout,
        }
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    async fn send(&self, message: Message) -> Result<MessageResponse, TransportError> {
        let tabs = self.channel.query_tabs(&self.origin_filter).await?;

        if tabs.is_empty() {
            tracing::debug!(
                "No tabs match {}, {} dropped",
                self.origin_filter,
                message.method
            );
            return Ok(MessageResponse::empty(message.correlation_id));
        }

        tracing::debug!("Broadcasting {} to {} tabs", message.method, tabs.len());

        let mut pending: FuturesUnordered<_> = tabs
            .into_iter()
            .map(|tab| {
                let per_tab = message.clone().with_tab(Some(tab));
                let channel = self.channel.clone();
                let timeout = self.timeout;
                async move {
                    let result =
                        deliver(channel.as_ref(), Destination::Tab(tab), per_tab, timeout).await;
                    (tab, result)
                }
            })
            .collect();

        let mut last_reply = None;
        let mut last_error = None;

        while let Some((tab, result)) = pending.next().await {
            match result {
                Ok(response) => last_reply = Some(response),
                Err(e) => {
                    tracing::debug!("Tab {} did not answer broadcast: {}", tab, e);
                    last_error = Some(e);
                }
            }
        }

        match (last_reply, last_error) {
            (Some(response), _) => Ok(response),
            (None, Some(e)) => Err(e),
            (None, None) => Ok(MessageResponse::empty(message.correlation_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ContextId;
    use crate::transport::LocalHub;
    use serde_json::{json, Value};

    fn broadcast(hub: &Arc<LocalHub>) -> BroadcastTransport {
        BroadcastTransport::new(hub.clone(), "*://*/*".to_string(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_zero_tabs_resolves_to_null() {
        let hub = Arc::new(LocalHub::new());
        let msg = Message::new(ContextId::Content, "responseApp", json!({"id": "x"}));
        let id = msg.correlation_id;

        let resp = broadcast(&hub).send(msg).await.unwrap();

        assert!(resp.ok);
        assert_eq!(resp.result, None);
        assert_eq!(resp.correlation_id, id);
    }

    #[tokio::test]
    async fn test_tabs_outside_filter_are_skipped() {
        let hub = Arc::new(LocalHub::new());
        let mut rx = hub.register_tab(1, "chrome://settings");

        let msg = Message::new(ContextId::Content, "responseApp", Value::Null);
        let resp = broadcast(&hub).send(msg).await.unwrap();

        assert_eq!(resp.result, None);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_last_responder_wins() {
        let hub = Arc::new(LocalHub::new());
        let mut fast = hub.register_tab(1, "https://a.example/");
        let mut slow = hub.register_tab(2, "https://b.example/");

        tokio::spawn(async move {
            let envelope = fast.recv().await.unwrap();
            let id = envelope.message().correlation_id;
            envelope.respond(MessageResponse::success(id, json!("fast")));
        });
        tokio::spawn(async move {
            let envelope = slow.recv().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let id = envelope.message().correlation_id;
            envelope.respond(MessageResponse::success(id, json!("slow")));
        });

        let msg = Message::new(ContextId::Content, "responseApp", Value::Null);
        let resp = broadcast(&hub).send(msg).await.unwrap();

        assert_eq!(resp.result, Some(json!("slow")));
    }

    #[tokio::test]
    async fn test_every_tab_gets_its_own_tab_id() {
        let hub = Arc::new(LocalHub::new());
        let a = hub.register_tab(10, "https://a.example/");
        let b = hub.register_tab(11, "https://b.example/");

        let echo = |mut rx: tokio::sync::mpsc::Receiver<crate::transport::Envelope>| async move {
            let envelope = rx.recv().await.unwrap();
            let msg = envelope.message().clone();
            envelope.respond(MessageResponse::success(msg.correlation_id, json!(msg.tab_id)));
            msg.tab_id
        };

        let transport = broadcast(&hub);
        let msg = Message::new(ContextId::Content, "responseApp", Value::Null);
        let (_, seen_a, seen_b) = tokio::join!(transport.send(msg), echo(a), echo(b));

        assert_eq!(seen_a, Some(10));
        assert_eq!(seen_b, Some(11));
    }

    #[tokio::test]
    async fn test_all_tabs_closed_surfaces_error() {
        let hub = Arc::new(LocalHub::new());
        drop(hub.register_tab(1, "https://a.example/"));
        drop(hub.register_tab(2, "https://b.example/"));

        let msg = Message::new(ContextId::Content, "responseApp", Value::Null);
        let err = broadcast(&hub).send(msg).await.unwrap_err();

        assert!(matches!(err, TransportError::ChannelClosed(_)));
    }
}
