// Approval request queue
//
// One FIFO of interactive requests per extension instance, persisted in the
// extension store under `requestQueue`. The UI only ever acts on the head.
//
//   Idle --enqueue--> Active            show approval surface
//   Active --dequeue (more left)--> Active   promote next head
//   Active --dequeue (last)--> Idle     close popup / reset side panel

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::message::{TabRef, WindowRef};
use crate::services::storage::{load, modify, KeyValueStore, StoreError};

pub const REQUEST_QUEUE_KEY: &str = "requestQueue";
pub const CURRENT_WINDOW_KEY: &str = "currentWindowId";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestQueueEntry {
    pub id: Uuid,
    pub origin: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    /// Milliseconds since the Unix epoch
    pub enqueued_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<WindowRef>,
}

impl RequestQueueEntry {
    pub fn new(
        origin: impl Into<String>,
        method: impl Into<String>,
        params: Value,
        tab_id: Option<TabRef>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin: origin.into(),
            method: method.into(),
            params,
            enqueued_at: now_millis(),
            tab_id,
            window_id: None,
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Transient popup window, closed when the queue drains
    Popup,
    /// Persistent side panel, navigated home when the queue drains
    SidePanel,
}

/// Window-management capability driven by the queue
#[async_trait]
pub trait ApprovalSurface: Send + Sync {
    async fn kind(&self) -> SurfaceKind;

    /// Open or focus the approval UI. Returns the popup window when one is used.
    async fn show(&self) -> anyhow::Result<Option<WindowRef>>;

    async fn close_popup(&self, window: Option<WindowRef>) -> anyhow::Result<()>;

    async fn navigate_home(&self) -> anyhow::Result<()>;

    /// Pending-request count on the extension badge (0 clears it)
    async fn set_badge(&self, count: usize);
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("approval surface unavailable: {0}")]
    Surface(String),
}

/// State change caused by a queue operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Idle -> Active
    Activated,
    /// Active -> Active, head unchanged (enqueue behind the head)
    Appended,
    /// Active -> Active, new head promoted
    Promoted,
    /// Active -> Idle
    Drained,
    /// Dequeue on an already empty queue
    Unchanged,
}

pub struct RequestQueue {
    store: Arc<dyn KeyValueStore>,
    surface: Arc<dyn ApprovalSurface>,
}

impl RequestQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, surface: Arc<dyn ApprovalSurface>) -> Self {
        Self { store, surface }
    }

    /// Append to the tail; surfaces the approval UI on Idle -> Active
    pub async fn enqueue(&self, entry: RequestQueueEntry) -> Result<Transition, QueueError> {
        let id = entry.id;
        let (was_empty, len) = modify(
            self.store.as_ref(),
            REQUEST_QUEUE_KEY,
            move |queue: &mut Vec<RequestQueueEntry>| {
                let was_empty = queue.is_empty();
                queue.push(entry);
                (was_empty, queue.len())
            },
        )
        .await?;

        tracing::info!("Queued request {} ({} pending)", id, len);
        self.surface.set_badge(len).await;

        if !was_empty {
            return Ok(Transition::Appended);
        }

        let window = self
            .surface
            .show()
            .await
            .map_err(|e| QueueError::Surface(format!("{:#}", e)))?;

        if let Some(window_id) = window {
            self.bind_window(window_id).await?;
        }

        Ok(Transition::Activated)
    }

    /// Remove exactly the head entry and return the new head, if any
    pub async fn dequeue_head(&self) -> Result<Option<RequestQueueEntry>, QueueError> {
        self.dequeue_matching(|_| true).await
    }

    /// Remove the head only while it is still `id`; returns the head afterwards
    ///
    /// The check runs inside the store update, so a head that was drained and
    /// replaced in the meantime is left alone.
    pub async fn dequeue_if_head(
        &self,
        id: Uuid,
    ) -> Result<Option<RequestQueueEntry>, QueueError> {
        self.dequeue_matching(move |head| head.id == id).await
    }

    async fn dequeue_matching<F>(
        &self,
        is_target: F,
    ) -> Result<Option<RequestQueueEntry>, QueueError>
    where
        F: Fn(&RequestQueueEntry) -> bool + Send,
    {
        let (removed, next, remaining) = modify(
            self.store.as_ref(),
            REQUEST_QUEUE_KEY,
            move |queue: &mut Vec<RequestQueueEntry>| {
                let removed = match queue.first() {
                    Some(head) if is_target(head) => Some(queue.remove(0)),
                    _ => None,
                };
                (removed, queue.first().cloned(), queue.len())
            },
        )
        .await?;

        let transition = match (&removed, &next) {
            (None, _) => Transition::Unchanged,
            (Some(_), Some(_)) => Transition::Promoted,
            (Some(_), None) => Transition::Drained,
        };

        self.surface.set_badge(remaining).await;

        if transition == Transition::Drained {
            let window = removed.as_ref().and_then(|entry| entry.window_id);
            self.teardown(window).await;
        }

        tracing::debug!("Dequeued head, transition {:?}", transition);
        Ok(next)
    }

    pub async fn peek_head(&self) -> Result<Option<RequestQueueEntry>, QueueError> {
        let queue: Vec<RequestQueueEntry> = load(self.store.as_ref(), REQUEST_QUEUE_KEY).await?;
        Ok(queue.into_iter().next())
    }

    pub async fn entries(&self) -> Result<Vec<RequestQueueEntry>, QueueError> {
        Ok(load(self.store.as_ref(), REQUEST_QUEUE_KEY).await?)
    }

    pub async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.entries().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Take every queued entry without touching the UI
    ///
    /// The caller answers each drained request; used when the approval window
    /// was closed by the user or could not be opened at all.
    pub async fn drain(&self) -> Result<Vec<RequestQueueEntry>, QueueError> {
        let drained = modify(
            self.store.as_ref(),
            REQUEST_QUEUE_KEY,
            |queue: &mut Vec<RequestQueueEntry>| std::mem::take(queue),
        )
        .await?;

        self.surface.set_badge(0).await;
        Ok(drained)
    }

    /// Whether `window_id` is the approval popup of this queue
    pub async fn owns_window(&self, window_id: WindowRef) -> Result<bool, QueueError> {
        let current: Option<WindowRef> = load(self.store.as_ref(), CURRENT_WINDOW_KEY).await?;
        if current == Some(window_id) {
            return Ok(true);
        }

        Ok(self
            .entries()
            .await?
            .iter()
            .any(|entry| entry.window_id == Some(window_id)))
    }

    pub async fn forget_window(&self) -> Result<(), QueueError> {
        self.store.set(CURRENT_WINDOW_KEY, Value::Null).await?;
        Ok(())
    }

    async fn bind_window(&self, window_id: WindowRef) -> Result<(), QueueError> {
        self.store
            .set(CURRENT_WINDOW_KEY, Value::from(window_id))
            .await?;

        modify(
            self.store.as_ref(),
            REQUEST_QUEUE_KEY,
            move |queue: &mut Vec<RequestQueueEntry>| {
                for entry in queue.iter_mut().filter(|e| e.window_id.is_none()) {
                    entry.window_id = Some(window_id);
                }
            },
        )
        .await?;
        Ok(())
    }

    /// Active -> Idle side effect; failures are logged, the entry is already gone
    async fn teardown(&self, window: Option<WindowRef>) {
        let result = match self.surface.kind().await {
            SurfaceKind::Popup => {
                let window = match window {
                    Some(window) => Some(window),
                    None => load(self.store.as_ref(), CURRENT_WINDOW_KEY)
                        .await
                        .unwrap_or_default(),
                };
                self.surface.close_popup(window).await
            }
            SurfaceKind::SidePanel => self.surface.navigate_home().await,
        };

        if let Err(e) = result {
            tracing::warn!("Failed to tear down approval surface: {:#}", e);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{RecordingSurface, SurfaceCall};
    use super::*;
    use crate::services::storage::MemoryStore;
    use serde_json::json;

    fn queue_with(surface: Arc<RecordingSurface>) -> (RequestQueue, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (RequestQueue::new(store.clone(), surface), store)
    }

    fn entry(origin: &str, method: &str) -> RequestQueueEntry {
        RequestQueueEntry::new(origin, method, json!([]), Some(1))
    }

    #[tokio::test]
    async fn test_entries_become_current_in_enqueue_order() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface.clone());

        let mut ids = Vec::new();
        for i in 0..5 {
            let e = entry(&format!("https://d{}.example", i), "eth_sendTransaction");
            ids.push(e.id);
            queue.enqueue(e).await.unwrap();
        }

        let mut served = vec![queue.peek_head().await.unwrap().unwrap().id];
        while let Some(next) = queue.dequeue_head().await.unwrap() {
            served.push(next.id);
        }

        assert_eq!(served, ids);
    }

    #[tokio::test]
    async fn test_duplicate_requests_get_independent_slots() {
        let surface = Arc::new(RecordingSurface::side_panel());
        let (queue, _) = queue_with(surface);

        queue.enqueue(entry("https://a.example", "personal_sign")).await.unwrap();
        queue.enqueue(entry("https://a.example", "personal_sign")).await.unwrap();

        assert_eq!(queue.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_show_only_on_first_enqueue() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface.clone());

        assert_eq!(
            queue.enqueue(entry("https://a.example", "m")).await.unwrap(),
            Transition::Activated
        );
        assert_eq!(
            queue.enqueue(entry("https://b.example", "m")).await.unwrap(),
            Transition::Appended
        );

        assert_eq!(surface.calls(), vec![SurfaceCall::Show]);
        assert_eq!(surface.badge(), Some(2));
    }

    #[tokio::test]
    async fn test_popup_window_is_bound_to_entries() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface);

        queue.enqueue(entry("https://a.example", "m")).await.unwrap();

        let head = queue.peek_head().await.unwrap().unwrap();
        assert_eq!(head.window_id, Some(40));
        assert!(queue.owns_window(40).await.unwrap());
        assert!(!queue.owns_window(41).await.unwrap());
    }

    #[tokio::test]
    async fn test_popup_closed_only_when_last_entry_dequeued() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface.clone());

        queue.enqueue(entry("https://a.example", "m")).await.unwrap();
        queue.enqueue(entry("https://b.example", "m")).await.unwrap();

        let next = queue.dequeue_head().await.unwrap();
        assert_eq!(next.unwrap().origin, "https://b.example");
        assert_eq!(surface.calls(), vec![SurfaceCall::Show]);

        let next = queue.dequeue_head().await.unwrap();
        assert!(next.is_none());
        assert_eq!(
            surface.calls(),
            vec![SurfaceCall::Show, SurfaceCall::ClosePopup(Some(40))]
        );
        assert_eq!(surface.badge(), Some(0));

        // Already idle: no second teardown
        assert!(queue.dequeue_head().await.unwrap().is_none());
        assert_eq!(surface.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_side_panel_navigates_home_instead_of_closing() {
        let surface = Arc::new(RecordingSurface::side_panel());
        let (queue, _) = queue_with(surface.clone());

        queue.enqueue(entry("https://a.example", "m")).await.unwrap();
        queue.dequeue_head().await.unwrap();

        assert_eq!(
            surface.calls(),
            vec![SurfaceCall::Show, SurfaceCall::NavigateHome]
        );
    }

    #[tokio::test]
    async fn test_enqueue_racing_dequeue_is_not_lost() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface);
        let queue = Arc::new(queue);

        queue.enqueue(entry("https://a.example", "m")).await.unwrap();

        let late = entry("https://late.example", "m");
        let late_id = late.id;

        let dequeuer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_head().await.unwrap() })
        };
        let enqueuer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(late).await.unwrap() })
        };
        dequeuer.await.unwrap();
        enqueuer.await.unwrap();

        let remaining = queue.entries().await.unwrap();
        assert!(remaining.iter().any(|e| e.id == late_id));
    }

    #[tokio::test]
    async fn test_failed_show_is_surface_error_but_entry_kept() {
        let mut surface = RecordingSurface::popup(40);
        surface.fail_show = true;
        let (queue, _) = queue_with(Arc::new(surface));

        let err = queue
            .enqueue(entry("https://a.example", "m"))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::Surface(_)));
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drain_empties_queue_and_clears_badge() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface.clone());

        queue.enqueue(entry("https://a.example", "m")).await.unwrap();
        queue.enqueue(entry("https://b.example", "m")).await.unwrap();

        let drained = queue.drain().await.unwrap();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty().await.unwrap());
        assert_eq!(surface.badge(), Some(0));
    }

    #[tokio::test]
    async fn test_dequeue_if_head_leaves_a_replaced_head() {
        let surface = Arc::new(RecordingSurface::popup(40));
        let (queue, _) = queue_with(surface.clone());

        let first = entry("https://a.example", "m");
        queue.enqueue(first.clone()).await.unwrap();
        queue.drain().await.unwrap();

        let second = entry("https://b.example", "m");
        queue.enqueue(second.clone()).await.unwrap();

        let head = queue.dequeue_if_head(first.id).await.unwrap();
        assert_eq!(head.map(|e| e.id), Some(second.id));
        assert_eq!(queue.len().await.unwrap(), 1);

        assert!(queue.dequeue_if_head(second.id).await.unwrap().is_none());
        assert!(queue.is_empty().await.unwrap());
    }
}
