//! In-process repositories backed by `tokio::sync::RwLock<HashMap<..>>`.

use crate::biometrics::VoiceProfile;
use crate::error::SpeechError;
use crate::session::model::{Interaction, Session, SessionStatus, SessionUpdate};
use crate::storage::{
    ensure_open, newest_first, session_not_found, should_mark_expired, should_purge, SessionRepository,
    SessionStats, VoiceProfileRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Sessions and voice profiles held in memory. Lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    profiles: RwLock<HashMap<String, VoiceProfile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemoryStore {
    async fn create(&self, session: &Session) -> Result<(), SpeechError> {
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>, SpeechError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn update_fields(
        &self,
        id: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Session, SpeechError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| session_not_found(id))?;
        ensure_open(session)?;
        update.apply(session, now);
        Ok(session.clone())
    }

    async fn append_interaction(&self, id: &str, interaction: &Interaction) -> Result<Session, SpeechError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(id).ok_or_else(|| session_not_found(id))?;
        ensure_open(session)?;
        session.interactions.push(interaction.clone());
        session.updated_at = interaction.timestamp.max(session.updated_at);
        Ok(session.clone())
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, SpeechError> {
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for session in sessions.values_mut() {
            if should_mark_expired(session, now) {
                session.status = SessionStatus::Expired;
                session.updated_at = now;
                expired.push(session.id.clone());
            }
        }
        Ok(expired)
    }

    async fn delete_expired_older_than(&self, threshold: DateTime<Utc>) -> Result<usize, SpeechError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !should_purge(session, threshold));
        Ok(before - sessions.len())
    }

    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError> {
        let owned = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| session.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(owned, limit))
    }

    async fn stats(&self) -> Result<SessionStats, SpeechError> {
        let mut stats = SessionStats::default();
        for session in self.sessions.read().await.values() {
            stats.record(session);
        }
        Ok(stats)
    }
}

#[async_trait]
impl VoiceProfileRepository for MemoryStore {
    async fn get_by_user(&self, user_id: &str) -> Result<Option<VoiceProfile>, SpeechError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn upsert(&self, profile: &VoiceProfile) -> Result<(), SpeechError> {
        self.profiles
            .write()
            .await
            .insert(profile.user_id.clone(), profile.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, SpeechError> {
        Ok(self.profiles.write().await.remove(user_id).is_some())
    }

    async fn count(&self) -> Result<usize, SpeechError> {
        Ok(self.profiles.read().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::conformance;

    #[tokio::test]
    async fn test_session_repository_contract() {
        conformance::session_repository(&MemoryStore::new()).await;
    }

    #[tokio::test]
    async fn test_profile_repository_contract() {
        conformance::profile_repository(&MemoryStore::new()).await;
    }
}
