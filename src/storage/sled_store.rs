//! # Sled Storage Backend
//!
//! Embedded key-value persistence for sessions and voice profiles.
//!
//! ## Layout:
//! - tree `sessions`: session id → JSON `Session` (interactions inline)
//! - tree `voice_profiles`: user id → JSON `VoiceProfile`
//!
//! sled calls block, so every operation runs on tokio's blocking pool through
//! [`blocking`]. Read-modify-write operations are additionally serialized by an async
//! mutex, so two concurrent appends to the same session cannot lose each other's
//! interaction, and a status check is never separated from the write it guards.

use crate::biometrics::VoiceProfile;
use crate::error::SpeechError;
use crate::session::model::{Interaction, Session, SessionStatus, SessionUpdate};
use crate::storage::{
    ensure_open, newest_first, session_not_found, should_mark_expired, should_purge,
    SessionRepository, SessionStats, VoiceProfileRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::info;

const SESSIONS_TREE: &str = "sessions";
const PROFILES_TREE: &str = "voice_profiles";

pub struct SledStore {
    db: sled::Db,
    sessions: sled::Tree,
    profiles: sled::Tree,
    write_lock: Mutex<()>,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SpeechError> {
        let db = sled::open(path.as_ref())?;
        let store = Self::from_db(db)?;
        info!(path = %path.as_ref().display(), "Opened sled store");
        Ok(store)
    }

    fn from_db(db: sled::Db) -> Result<Self, SpeechError> {
        let sessions = db.open_tree(SESSIONS_TREE)?;
        let profiles = db.open_tree(PROFILES_TREE)?;
        Ok(Self {
            db,
            sessions,
            profiles,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn flush(&self) -> Result<(), SpeechError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

/// Run sled work on the blocking pool. `sled::Tree` is a cheap handle, so callers move a
/// clone into `work`.
async fn blocking<T, F>(work: F) -> Result<T, SpeechError>
where
    F: FnOnce() -> Result<T, SpeechError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SpeechError::Internal(format!("storage task failed: {}", e)))?
}

fn load_session(tree: &sled::Tree, id: &str) -> Result<Option<Session>, SpeechError> {
    match tree.get(id.as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn store_session(tree: &sled::Tree, session: &Session) -> Result<(), SpeechError> {
    let bytes = serde_json::to_vec(session)?;
    tree.insert(session.id.as_bytes(), bytes)?;
    Ok(())
}

fn all_sessions(tree: &sled::Tree) -> Result<Vec<Session>, SpeechError> {
    tree.iter()
        .values()
        .map(|value| -> Result<Session, SpeechError> {
            let bytes = value?;
            Ok(serde_json::from_slice(&bytes)?)
        })
        .collect()
}

#[async_trait]
impl SessionRepository for SledStore {
    async fn create(&self, session: &Session) -> Result<(), SpeechError> {
        let _guard = self.write_lock.lock().await;
        let tree = self.sessions.clone();
        let session = session.clone();
        blocking(move || store_session(&tree, &session)).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>, SpeechError> {
        let tree = self.sessions.clone();
        let id = id.to_string();
        blocking(move || load_session(&tree, &id)).await
    }

    async fn update_fields(
        &self,
        id: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Session, SpeechError> {
        let _guard = self.write_lock.lock().await;
        let tree = self.sessions.clone();
        let id = id.to_string();
        let update = update.clone();
        blocking(move || {
            let mut session = load_session(&tree, &id)?.ok_or_else(|| session_not_found(&id))?;
            ensure_open(&session)?;
            update.apply(&mut session, now);
            store_session(&tree, &session)?;
            Ok(session)
        })
        .await
    }

    async fn append_interaction(&self, id: &str, interaction: &Interaction) -> Result<Session, SpeechError> {
        let _guard = self.write_lock.lock().await;
        let tree = self.sessions.clone();
        let id = id.to_string();
        let interaction = interaction.clone();
        blocking(move || {
            let mut session = load_session(&tree, &id)?.ok_or_else(|| session_not_found(&id))?;
            ensure_open(&session)?;
            session.updated_at = interaction.timestamp.max(session.updated_at);
            session.interactions.push(interaction);
            store_session(&tree, &session)?;
            Ok(session)
        })
        .await
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, SpeechError> {
        let _guard = self.write_lock.lock().await;
        let tree = self.sessions.clone();
        blocking(move || {
            let mut expired = Vec::new();
            for mut session in all_sessions(&tree)? {
                if should_mark_expired(&session, now) {
                    session.status = SessionStatus::Expired;
                    session.updated_at = now;
                    store_session(&tree, &session)?;
                    expired.push(session.id);
                }
            }
            Ok(expired)
        })
        .await
    }

    async fn delete_expired_older_than(&self, threshold: DateTime<Utc>) -> Result<usize, SpeechError> {
        let _guard = self.write_lock.lock().await;
        let tree = self.sessions.clone();
        blocking(move || {
            let mut deleted = 0;
            for session in all_sessions(&tree)? {
                if should_purge(&session, threshold) {
                    tree.remove(session.id.as_bytes())?;
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
        .await
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError> {
        let tree = self.sessions.clone();
        let user_id = user_id.to_string();
        blocking(move || {
            let owned = all_sessions(&tree)?
                .into_iter()
                .filter(|session| session.user_id == user_id)
                .collect();
            Ok(newest_first(owned, limit))
        })
        .await
    }

    async fn stats(&self) -> Result<SessionStats, SpeechError> {
        let tree = self.sessions.clone();
        blocking(move || {
            let mut stats = SessionStats::default();
            for session in all_sessions(&tree)? {
                stats.record(&session);
            }
            Ok(stats)
        })
        .await
    }
}

#[async_trait]
impl VoiceProfileRepository for SledStore {
    async fn get_by_user(&self, user_id: &str) -> Result<Option<VoiceProfile>, SpeechError> {
        let tree = self.profiles.clone();
        let user_id = user_id.to_string();
        blocking(move || match tree.get(user_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        })
        .await
    }

    async fn upsert(&self, profile: &VoiceProfile) -> Result<(), SpeechError> {
        let tree = self.profiles.clone();
        let bytes = serde_json::to_vec(profile)?;
        let key = profile.user_id.clone();
        blocking(move || {
            tree.insert(key.as_bytes(), bytes)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, user_id: &str) -> Result<bool, SpeechError> {
        let tree = self.profiles.clone();
        let user_id = user_id.to_string();
        blocking(move || Ok(tree.remove(user_id.as_bytes())?.is_some())).await
    }

    async fn count(&self) -> Result<usize, SpeechError> {
        let tree = self.profiles.clone();
        blocking(move || Ok(tree.len())).await
    }
}
