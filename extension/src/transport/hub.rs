// In-process host channel
// Each context registers an inbox; senders get the reply over a oneshot

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{HostChannel, TransportError};
use crate::message::{Message, MessageResponse, TabRef};

const INBOX_CAPACITY: usize = 64;

/// A delivered message plus the slot for its single reply
#[derive(Debug)]
pub struct Envelope {
    message: Message,
    reply: oneshot::Sender<MessageResponse>,
}

impl Envelope {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn into_parts(self) -> (Message, oneshot::Sender<MessageResponse>) {
        (self.message, self.reply)
    }

    /// Answer the sender; a sender that already gave up is ignored
    pub fn respond(self, response: MessageResponse) {
        if self.reply.send(response).is_err() {
            tracing::debug!("Reply dropped: sender no longer waiting");
        }
    }
}

struct TabEntry {
    url: String,
    inbox: mpsc::Sender<Envelope>,
}

#[derive(Default)]
pub struct LocalHub {
    runtime: Mutex<Option<mpsc::Sender<Envelope>>>,
    tabs: Mutex<HashMap<TabRef, TabEntry>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the background context; replaces any previous registration
    pub fn register_runtime(&self) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        if let Ok(mut runtime) = self.runtime.lock() {
            *runtime = Some(tx);
        }
        rx
    }

    /// Register a tab's content script under its page URL
    pub fn register_tab(&self, tab: TabRef, url: impl Into<String>) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.insert(
                tab,
                TabEntry {
                    url: url.into(),
                    inbox: tx,
                },
            );
        }
        rx
    }

    pub fn remove_tab(&self, tab: TabRef) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.remove(&tab);
        }
    }

    fn runtime_inbox(&self) -> Option<mpsc::Sender<Envelope>> {
        self.runtime.lock().ok().and_then(|runtime| runtime.clone())
    }

    fn tab_inbox(&self, tab: TabRef) -> Option<mpsc::Sender<Envelope>> {
        self.tabs
            .lock()
            .ok()
            .and_then(|tabs| tabs.get(&tab).map(|entry| entry.inbox.clone()))
    }

    async fn exchange(
        inbox: mpsc::Sender<Envelope>,
        message: Message,
    ) -> Result<MessageResponse, TransportError> {
        let (reply, response) = oneshot::channel();

        inbox
            .send(Envelope { message, reply })
            .await
            .map_err(|_| TransportError::ChannelClosed("receiving end dropped".to_string()))?;

        response
            .await
            .map_err(|_| TransportError::ChannelClosed("handler dropped the reply".to_string()))
    }
}

#[async_trait]
impl HostChannel for LocalHub {
    async fn send_to_runtime(&self, message: Message) -> Result<MessageResponse, TransportError> {
        let inbox = self
            .runtime_inbox()
            .ok_or_else(|| TransportError::ChannelClosed("no service worker".to_string()))?;
        Self::exchange(inbox, message).await
    }

    async fn send_to_tab(
        &self,
        tab: TabRef,
        message: Message,
    ) -> Result<MessageResponse, TransportError> {
        let inbox = self
            .tab_inbox(tab)
            .ok_or_else(|| TransportError::ChannelClosed(format!("no such tab {}", tab)))?;
        Self::exchange(inbox, message).await
    }

    async fn query_tabs(&self, url_filter: &str) -> Result<Vec<TabRef>, TransportError> {
        let tabs = self
            .tabs
            .lock()
            .map_err(|_| TransportError::ChannelClosed("tab registry poisoned".to_string()))?;

        let mut matched: Vec<TabRef> = tabs
            .iter()
            .filter(|(_, entry)| matches_url_filter(url_filter, &entry.url))
            .map(|(tab, _)| *tab)
            .collect();
        matched.sort_unstable();
        Ok(matched)
    }
}

/// Glob match where `*` spans any run of characters
pub fn matches_url_filter(pattern: &str, url: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == url;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !url.starts_with(first) || url.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &url[first.len()..];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }

    rest.ends_with(last)
}
