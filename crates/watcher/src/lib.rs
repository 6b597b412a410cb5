//! File system event subscriptions for fsstream
//!
//! This crate provides:
//! - The subscription lifecycle (create, start, stop, teardown)
//! - A weak-reference bridge from native callbacks to handlers
//! - Native sources: FSEvents on macOS, a `notify` emulation elsewhere
//! - A tokio channel adapter

pub mod backend;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod native;
pub mod subscription;

// Re-exports
pub use backend::{default_source, DefaultSource};
pub use channel::{subscribe, subscribe_with, Delivery};
pub use config::{DispatchMode, DispatchTarget, SubscriptionConfig, WatchSettings};
pub use dispatch::BatchSink;
pub use error::{CreationFailure, Error, Result};
pub use native::{NativeSource, NativeStream, StreamRequest};
pub use subscription::{State, Subscription, SubscriptionId, SubscriptionRef};
