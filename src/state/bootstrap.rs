//! New session directories

use super::error::{StateError, StateResult};
use super::manager::{SaveCallback, StateManager};
use crate::models::{generate_session_id, SessionManifest, SessionType};
use crate::sync::session_dir;
use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::info;

/// Working subdirectories created inside every new session
pub const SESSION_SUBDIRS: [&str; 3] = ["research", "context", "debug"];

#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub topic: String,
    pub description: Option<String>,
    pub session_type: SessionType,
    /// Generated from the topic when absent
    pub session_id: Option<String>,
}

impl NewSession {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }
}

/// Create `agents/sessions/{id}/` with its subdirectories and a fresh manifest.
///
/// Fails with [`StateError::AlreadyExists`] if the session directory exists.
pub fn init_session(
    project_root: &Path,
    request: NewSession,
    on_save: Option<SaveCallback>,
) -> StateResult<StateManager> {
    if request.topic.trim().is_empty() {
        return Err(StateError::Validation("topic must not be empty".to_string()));
    }

    let session_id = match request.session_id {
        Some(id) => {
            validate_session_id(&id)?;
            id
        }
        None => generate_session_id(&request.topic, Utc::now()),
    };

    let dir = session_dir(project_root, &session_id);
    if dir.exists() {
        return Err(StateError::AlreadyExists(dir));
    }

    for sub in SESSION_SUBDIRS {
        fs::create_dir_all(dir.join(sub))?;
    }

    let mut manifest = SessionManifest::new(
        session_id.as_str(),
        request.topic,
        request.description,
        request.session_type,
    );
    manifest
        .extra
        .insert("key_decisions".to_string(), Value::Array(Vec::new()));

    let mut manager = StateManager::new(&dir);
    if let Some(callback) = on_save {
        manager = manager.with_save_callback(callback);
    }
    manager.create(manifest)?;

    info!(session = %session_id, path = %dir.display(), "Initialized session");
    Ok(manager)
}

/// A session id becomes a single directory name
fn validate_session_id(id: &str) -> StateResult<()> {
    let invalid = id.trim().is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\']);
    if invalid {
        return Err(StateError::Validation(format!("invalid session id '{}'", id)));
    }
    Ok(())
}
