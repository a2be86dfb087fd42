//! # Sessions
//!
//! - **model**: `Session`, `Interaction`, status/type enums, per-type lifetimes
//! - **store**: `SessionStore`, the cached, expiry-aware registry over a `SessionRepository`

pub mod model;
pub mod store;

pub use model::{
    Interaction, InteractionKind, Session, SessionDurations, SessionStatus, SessionType,
    SessionUpdate,
};
pub use store::{CleanupReport, SessionStore, SessionStoreStats};
