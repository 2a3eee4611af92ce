pub mod storage;

pub use storage::{load, modify, FileStore, KeyValueStore, MemoryStore, StoreError, UpdateFn};
