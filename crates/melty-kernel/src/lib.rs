//! The Melty task engine.
//!
//! Everything behind the RPC surface lives here: the task registry and
//! lifecycle, the chat turn pipeline, the git adapter, the model provider
//! trait, and the SQLite task store. The host crate wires an [`Engine`] to
//! a transport; this crate never touches the wire.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`engine`] | Facade composing every collaborator |
//! | [`tasks`] | Task handles, registry, error taxonomy |
//! | [`chat`] | One chat turn: stream, commit, finalize |
//! | [`git`] | Single-handle repository adapter |
//! | [`llm`] | Provider trait + scripted provider |
//! | [`store`] | Dehydrated task persistence |
//! | [`workspace`] | Ignore-aware file listing |
//! | [`events`] | Outbound snapshot/status sink |

pub mod chat;
pub mod engine;
pub mod events;
pub mod git;
pub mod llm;
pub mod store;
pub mod tasks;
pub mod workspace;

pub use engine::Engine;
pub use events::{EventSink, NullSink};
pub use git::{Git, GitError, GitRepo};
pub use llm::{CompletionRequest, LlmError, LlmProvider, ScriptedProvider, StreamEvent};
pub use store::{StoreError, TaskStore};
pub use tasks::{TaskError, TaskHandle};
pub use workspace::Workspace;
