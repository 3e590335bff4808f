pub mod attachments;
pub mod auth;
pub mod config;
pub mod conversations;
pub mod error;
pub mod identity;
pub mod messages;
pub mod middleware;
pub mod profiles;
pub mod reconcile;
pub mod router;
pub mod state;
pub mod storage;
pub mod webhook;

pub use router::router;
pub use state::{AppState, AppStateInner};
