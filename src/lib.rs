//! Widget Viewer - client side of the out-of-process widget protocol.
//!
//! A homescreen (the viewer) shows widgets rendered by a separate provider
//! daemon. This crate keeps the viewer's side of that conversation: it
//! queues and paces requests, tracks which instances exist and who is
//! looking at them, binds rendered surfaces, and turns provider push events
//! into completions and handler calls.
//!
//! # Architecture
//!
//! - **Viewer** - Session object, owns all state, driven by `tick`
//! - **CommandQueue** - Paced outbound requests with TTL retry
//! - **InstanceStore** - Shared instances and per-subscriber handles
//! - **Transport** - Byte channel to the provider (Unix socket bundled)
//! - **desc** - Descriptor replay for text-type content
//!
//! # Modules
//!
//! - [`viewer`] - Session, public operations and event dispatch
//! - [`rpc`] - Command queue
//! - [`instance`] - Instance model
//! - [`desc`] - Descriptor parser
//! - [`config`] - Configuration loading and runtime options

// Library modules
pub mod desc;
pub mod fb;
pub mod handlers;
pub mod instance;
pub mod rpc;
pub mod transport;
pub mod viewer;

pub mod config;
pub mod constants;
pub mod error;
pub mod framing;
pub mod packet;
pub mod protocol;
pub mod service;

// Re-export commonly used types
pub use config::{Config, Options, ViewerOption};
pub use desc::ScriptOperators;
pub use error::{Result, ViewerError};
pub use fb::Framebuffer;
pub use handlers::{Event, Fault, HandlerToken};
pub use instance::{Completion, ContentType, InstanceState, Op, Visibility, WidgetHandle};
pub use packet::{Packet, Value};
pub use protocol::{AccessAction, DeleteType, Generation, KeyAction, MouseEvent, Surface};
pub use service::{DefaultService, SizeType, WidgetService};
pub use transport::{Inbound, RequestId, Transport, UnixTransport};

// Re-export Viewer
pub use viewer::{PackageCompletion, SessionState, Viewer};
