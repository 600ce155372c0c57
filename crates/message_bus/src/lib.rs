//! Canonical message log and patch bus.
//!
//! Every user-visible mutation in the system flows through [`MessageBus::publish_patch`]:
//! agents stream LLM deltas as patches, the research-tree store emits action
//! messages as patches, and the SSE layer forwards patches to connected
//! clients. The bus owns the ordered message log, enforces the
//! single-generating-message discipline and fans patches out to bounded
//! subscriber queues.

mod bus;
mod error;
mod message;
mod patch;
mod sink;

pub use bus::{MessageBus, PatchReceiver, SUBSCRIBER_QUEUE_CAPACITY};
pub use error::BusError;
pub use message::{FrontendMessage, Message, MessageStatus, Role};
pub use patch::{FrontendPatch, Patch, BROADCAST_MESSAGE_ID};
pub use sink::{PatchSink, SnapshotProvider, SnapshotView};
