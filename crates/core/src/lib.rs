//! Event taxonomy and flag decoding for fsstream
//!
//! This crate provides:
//! - Raw flag bitsets shared with the native notification source
//! - The semantic event taxonomy
//! - The stateless decoder from raw notifications to semantic events

pub mod decode;
pub mod event;
pub mod flags;

// Re-exports
pub use decode::{decode, Decoded, Decoder, RawBatch, RawEvent};
pub use event::{FsEvent, ItemEvent, ItemType, Origin, ScanReason};
pub use flags::{CreateFlags, CreateOption, EventFlags, EventId, UnknownOption};
