//! Shared ids, task data model, and wire protocol for Melty.
//!
//! This crate is the relational foundation: typed ids, the task/conversation
//! data model, and the envelope + typed method surface both sides of the
//! bridge speak. It has **no internal melty dependencies** — a pure leaf
//! crate that other crates build on.
//!
//! # Key Types
//!
//! |------------------|-----------------------------------------------|
//! | Type             | Purpose                                       |
//! |------------------|-----------------------------------------------|
//! | [`TaskId`]       | Which task (UUIDv7)                           |
//! | [`TaskSnapshot`] | Immutable full task state, wire + store shape |
//! | [`TaskPreview`]  | Listing shape for task pickers                |
//! | [`Conversation`] | Append-only joule transcript                  |
//! | [`Joule`]        | One turn (human, bot, or error)               |
//! | [`Changeset`]    | Per-turn file modification map                |
//! | [`Envelope`]     | One wire message (call / result / push)       |
//! | [`Request`]      | Typed union of every accepted method          |
//! | [`Notification`] | Typed union of every push                     |

pub mod changeset;
pub mod conversation;
pub mod ids;
pub mod protocol;
pub mod task;

// Re-export primary types at crate root for convenience.
pub use changeset::{Changeset, FileEdit};
pub use conversation::{Conversation, Joule, JouleAuthor};
pub use ids::TaskId;
pub use protocol::{
    CallFrame, Envelope, Notification, ProtocolError, Request, ResultFrame, RpcCall,
};
pub use task::{TaskMode, TaskPhase, TaskPreview, TaskSnapshot};

pub use conversation::now_millis;
