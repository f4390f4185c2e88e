//! Request/response and push-event plumbing towards the plugin backend.
//!
//! The panel never does real work itself: downloads, logins and launches all
//! live in the backend. Everything goes through two seams:
//! - [`CommandBridge`]: `call(command, args)` and await one result
//! - [`EventBridge`]: subscribe to unsolicited backend notifications

pub mod process;

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::Value;

/// Listener callback. Receives one event payload per invocation.
pub type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Handle returned by [`EventBridge::add_listener`]; closures have no identity,
/// so removal goes through this id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("backend connection closed")]
    Closed,
    #[error("backend did not answer in time")]
    Timeout,
    #[error("backend error: {0}")]
    Remote(String),
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid backend message: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to spawn backend: {0}")]
    Spawn(String),
}

pub trait CommandBridge: Send + Sync {
    fn call<'a>(&'a self, command: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Value, BridgeError>>;
}

pub trait EventBridge: Send + Sync {
    fn add_listener(&self, event: &str, handler: EventHandler) -> ListenerId;
    fn remove_listener(&self, event: &str, id: ListenerId);
}
