// Headless approval surface
// The native host has no window manager: the approval UI is a side panel that
// is "opened" by logging, and the badge is a log line.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use wallet_extension_core::{ApprovalSurface, SurfaceKind, WindowRef};

#[derive(Default)]
pub struct HeadlessSurface {
    badge: AtomicUsize,
}

impl HeadlessSurface {
    pub fn badge(&self) -> usize {
        self.badge.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ApprovalSurface for HeadlessSurface {
    async fn kind(&self) -> SurfaceKind {
        SurfaceKind::SidePanel
    }

    async fn show(&self) -> anyhow::Result<Option<WindowRef>> {
        tracing::info!("🔔 Approval requested ({} pending)", self.badge());
        Ok(None)
    }

    async fn close_popup(&self, _window: Option<WindowRef>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn navigate_home(&self) -> anyhow::Result<()> {
        tracing::info!("Approval queue empty");
        Ok(())
    }

    async fn set_badge(&self, count: usize) {
        self.badge.store(count, Ordering::SeqCst);
        tracing::debug!("badge: {}", count);
    }
}
