//! Request/response bridge between a Melty host and its UI.
//!
//! # Architecture
//!
//! ```text
//!   UI side                                host side
//!   ┌────────┐   call frames    ┌───────────┐
//!   │ Caller │ ───────────────▶ │ Responder │──▶ spawned handler tasks
//!   │        │ ◀─────────────── │           │
//!   └────────┘   result frames  └───────────┘
//!        ▲                            │
//!        │        push frames    ┌──────────┐
//!        └─────────────────────  │ Notifier │
//!                                └──────────┘
//! ```
//!
//! All three speak [`melty_types::Envelope`] over a [`Transport`]. One
//! transport end is single-consumer on the receive side and FIFO on the
//! send side; the responder and notifier share the host end, which is what
//! makes "every progress push precedes the call's resolution" hold.

pub mod caller;
pub mod notifier;
pub mod responder;
pub mod transport;

pub use caller::{CallError, Caller};
pub use notifier::Notifier;
pub use responder::{RequestHandler, Responder};
pub use transport::{ChannelTransport, LineTransport, Transport, TransportError, channel_pair};
