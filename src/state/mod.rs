//! Session Manifest State Module
//!
//! Handles the lifecycle of `agents/sessions/{slug}/state.json`:
//! - Phase state machine (spec → plan → build → docs → complete)
//! - Build checkpoint tracking
//! - Atomic persistence with a post-save callback hook
//! - Bootstrapping new session directories

mod bootstrap;
mod error;
mod manager;

pub use bootstrap::{init_session, NewSession, SESSION_SUBDIRS};
pub use error::{StateError, StateResult};
pub use manager::{SaveCallback, StateManager};
