//!  Storage is organized through [session_store::JsonFileStore].
//!  The basic idea is:
//!   - All sessions live in a single JSON object keyed by session id.
//!   - Every write replaces the whole file atomically, so readers never see a torn file.
//!   - Entries carry app and task explicitly, the key is only an identifier.

pub mod entities;
pub mod session_store;

pub use entities::{DisplaySession, Session, SessionId};
pub use session_store::{JsonFileStore, SessionStore};
