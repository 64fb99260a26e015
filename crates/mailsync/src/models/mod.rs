//! Domain models for synced mail entities

mod label;
mod message;
mod sync_state;

pub use label::LabelAssignment;
pub use message::{Message, MessageBuilder, MessageId, ThreadId};
pub use sync_state::{SYNC_STATE_ID, SyncState};
