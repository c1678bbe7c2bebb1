//! In-memory adapters for the backend and session-store ports

pub mod backend;
pub mod session;

pub use backend::InMemoryBackend;
pub use session::{InMemorySessionStore, NoopSessionStore};
