//! Unix socket server
//!
//! Accepts one message per connection, hands it to the success callback and
//! lets the callback reply on the same connection. The socket file is
//! guarded against stale leftovers on startup and recreated if it is deleted
//! while the server runs.

mod accept;
mod handler;
mod listener;
mod monitor;
mod resolver;
mod service;

pub use handler::{BoxFuture, FailureCallback, ReplyWriter, SuccessCallback};
pub use resolver::{inspect, resolve, PathState};
pub use service::{Server, ServerBuilder, ServerHandle};
