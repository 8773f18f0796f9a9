//! Session state and its durable storage.

mod state;
mod store;

pub use state::{DEFAULT_TITLE, SessionState};
pub use store::SessionStore;
