pub mod client;
pub mod config;
pub mod error;
pub mod server;

pub use client::{is_listening, send, Client};
pub use config::AppConfig;
pub use error::{Error, Result};
pub use server::{PathState, ReplyWriter, Server, ServerBuilder, ServerHandle};
