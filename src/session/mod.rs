//! Sessions and their storage
//!
//! This module holds the session record, its accumulated result, and the
//! store implementations.

pub mod file_store;
pub mod model;
pub mod result;
pub mod store;

pub use file_store::FileStore;
pub use model::{PollStatus, RunId, Session, SessionId, SessionStatus};
pub use result::{ResultField, ResultItem, SessionResult, StageOutput};
pub use store::{MemoryStore, SessionFilter, SessionStore};
