// Wallet extension core
// Context-independent pieces of the browser wallet: cross-context messaging,
// the approval request queue, service-worker keepalive and durable state.

pub mod approval;
pub mod background;
pub mod config;
pub mod keepalive;
pub mod message;
pub mod queue;
pub mod services;
pub mod tracker;
pub mod transport;

pub use approval::{respond_to_app, ApprovalController, ApprovalError, Resolution};
pub use background::ServiceWorker;
pub use config::{KeepaliveConfig, StorageConfig, TransportConfig};
pub use keepalive::KeepAlive;
pub use message::{ContextId, ErrorEnvelope, Message, MessageResponse, TabRef, WindowRef};
pub use queue::{
    now_millis, ApprovalSurface, QueueError, RequestQueue, RequestQueueEntry, SurfaceKind,
    Transition,
};
pub use services::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use tracker::{TrackedTx, TxKind, TxTracker};
pub use transport::{
    BroadcastTransport, HostChannel, LocalHub, MessageRouter, Transport, TransportError,
    UnicastTransport,
};
