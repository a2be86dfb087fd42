//! # Durable Storage
//!
//! Repository contracts for sessions and voice profiles, and two implementations:
//!
//! - **memory**: `tokio::sync::RwLock`-guarded maps, for tests and single-process setups
//! - **sled_store**: an embedded `sled` database, one tree per record type, JSON values
//!
//! The repositories are the source of truth. `SessionStore` keeps its own cache in front of
//! the session repository; the authenticator reads profiles straight from here.

pub mod memory;
pub mod sled_store;

use crate::biometrics::VoiceProfile;
use crate::error::SpeechError;
use crate::session::model::{Interaction, Session, SessionStatus, SessionType, SessionUpdate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), SpeechError>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>, SpeechError>;

    /// Apply `update` and return the stored result. `NotFound` if the id is unknown;
    /// `SessionExpired` / `SessionClosed` if the stored session is already terminal.
    async fn update_fields(
        &self,
        id: &str,
        update: &SessionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Session, SpeechError>;

    /// Append to the session's interaction list and return the stored result.
    /// `NotFound` if the id is unknown; `SessionExpired` / `SessionClosed` if the stored
    /// session is already terminal. The status check and the write are one atomic step.
    async fn append_interaction(&self, id: &str, interaction: &Interaction) -> Result<Session, SpeechError>;

    /// Flip every non-terminal session with `expires_at < now` to `Expired`. Returns their ids.
    async fn mark_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, SpeechError>;

    /// Hard-delete sessions that have been `Expired` since before `threshold`.
    async fn delete_expired_older_than(&self, threshold: DateTime<Utc>) -> Result<usize, SpeechError>;

    /// A user's sessions, newest first.
    async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError>;

    async fn stats(&self) -> Result<SessionStats, SpeechError>;
}

#[async_trait]
pub trait VoiceProfileRepository: Send + Sync {
    async fn get_by_user(&self, user_id: &str) -> Result<Option<VoiceProfile>, SpeechError>;

    async fn upsert(&self, profile: &VoiceProfile) -> Result<(), SpeechError>;

    /// `true` if a profile was removed.
    async fn delete(&self, user_id: &str) -> Result<bool, SpeechError>;

    async fn count(&self) -> Result<usize, SpeechError>;
}

/// Session counts by status and by type.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SessionStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub interactions: usize,
}

impl SessionStats {
    pub fn record(&mut self, session: &Session) {
        self.total += 1;
        *self.by_status.entry(session.status.as_str().to_string()).or_default() += 1;
        *self
            .by_type
            .entry(session.session_type.as_str().to_string())
            .or_default() += 1;
        self.interactions += session.interactions.len();
    }

    pub fn count_status(&self, status: SessionStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }

    pub fn count_type(&self, session_type: SessionType) -> usize {
        self.by_type.get(session_type.as_str()).copied().unwrap_or(0)
    }
}

/// Shared expiry rule for both backends.
pub(crate) fn should_mark_expired(session: &Session, now: DateTime<Utc>) -> bool {
    !session.status.is_terminal() && session.expires_at < now
}

/// Shared retention rule for both backends.
pub(crate) fn should_purge(session: &Session, threshold: DateTime<Utc>) -> bool {
    session.status == SessionStatus::Expired && session.updated_at < threshold
}

/// Newest first, then truncate. `limit == 0` means no limit.
pub(crate) fn newest_first(mut sessions: Vec<Session>, limit: usize) -> Vec<Session> {
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if limit > 0 {
        sessions.truncate(limit);
    }
    sessions
}

/// Reject writes to a terminal session. Both backends call this under their write lock.
pub(crate) fn ensure_open(session: &Session) -> Result<(), SpeechError> {
    match session.status {
        SessionStatus::Expired => Err(SpeechError::SessionExpired(session.id.clone())),
        SessionStatus::Ended => Err(SpeechError::SessionClosed {
            id: session.id.clone(),
            status: session.status.to_string(),
        }),
        SessionStatus::Active | SessionStatus::Inactive => Ok(()),
    }
}

pub(crate) fn session_not_found(id: &str) -> SpeechError {
    SpeechError::NotFound(format!("session not found: {}", id))
}

/// Behavior every repository backend must share.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::session::model::InteractionKind;
    use chrono::Duration;

    pub fn sample_session(id: &str, user_id: &str, lifetime: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: id.to_string(),
            user_id: user_id.to_string(),
            session_type: SessionType::General,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + lifetime,
            ended_at: None,
            metadata: HashMap::new(),
            interactions: Vec::new(),
        }
    }

    pub async fn session_repository(repo: &dyn SessionRepository) {
        let live = sample_session("live", "u1", Duration::hours(1));
        let stale = sample_session("stale", "u1", Duration::seconds(-5));
        let mut older = sample_session("older", "u2", Duration::hours(1));
        older.created_at -= Duration::minutes(10);
        for session in [&live, &stale, &older] {
            repo.create(session).await.unwrap();
        }

        assert_eq!(repo.get_by_id("live").await.unwrap().unwrap(), live);
        assert!(repo.get_by_id("missing").await.unwrap().is_none());

        // Interactions keep append order.
        for text in ["first", "second", "third"] {
            repo.append_interaction("live", &Interaction::new(InteractionKind::SpeechToText, text))
                .await
                .unwrap();
        }
        let stored = repo.get_by_id("live").await.unwrap().unwrap();
        let texts: Vec<_> = stored.interactions.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, ["first", "second", "third"]);

        let missing = repo
            .append_interaction("missing", &Interaction::new(InteractionKind::TextToSpeech, "x"))
            .await;
        assert!(matches!(missing, Err(SpeechError::NotFound(_))));

        let now = Utc::now();
        let updated = repo
            .update_fields("live", &SessionUpdate::status(SessionStatus::Inactive), now)
            .await
            .unwrap();
        assert_eq!(updated.status, SessionStatus::Inactive);
        assert_eq!(updated.updated_at, now);

        // Only the stale session is past expiry.
        let expired = repo.mark_expired(now).await.unwrap();
        assert_eq!(expired, vec!["stale".to_string()]);
        assert!(repo.mark_expired(now).await.unwrap().is_empty());

        let late = repo
            .append_interaction("stale", &Interaction::new(InteractionKind::SpeechToText, "late"))
            .await;
        assert_eq!(late, Err(SpeechError::SessionExpired("stale".to_string())));
        let revived = repo
            .update_fields("stale", &SessionUpdate::status(SessionStatus::Active), now)
            .await;
        assert_eq!(revived, Err(SpeechError::SessionExpired("stale".to_string())));

        // Expired "now": not yet older than a threshold in the past, older than one in the future.
        assert_eq!(repo.delete_expired_older_than(now - Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(repo.delete_expired_older_than(now + Duration::seconds(1)).await.unwrap(), 1);
        assert!(repo.get_by_id("stale").await.unwrap().is_none());

        let newer = sample_session("newer", "u2", Duration::hours(1));
        repo.create(&newer).await.unwrap();
        let listed = repo.list_by_user("u2", 0).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["newer", "older"]);
        assert_eq!(repo.list_by_user("u2", 1).await.unwrap().len(), 1);

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.count_status(SessionStatus::Inactive), 1);
        assert_eq!(stats.count_status(SessionStatus::Active), 2);
        assert_eq!(stats.count_type(SessionType::General), 3);
        assert_eq!(stats.interactions, 3);

        // Terminal sessions take no more writes and never leave their state.
        let ended = repo
            .update_fields("older", &SessionUpdate::status(SessionStatus::Ended), Utc::now())
            .await
            .unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);

        let late = repo
            .append_interaction("older", &Interaction::new(InteractionKind::SpeechToText, "late"))
            .await;
        assert!(matches!(late, Err(SpeechError::SessionClosed { .. })));
        let reopened = repo
            .update_fields("older", &SessionUpdate::status(SessionStatus::Active), Utc::now())
            .await;
        assert!(matches!(reopened, Err(SpeechError::SessionClosed { .. })));

        let stored = repo.get_by_id("older").await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Ended);
        assert!(stored.interactions.is_empty());
    }

    pub async fn profile_repository(repo: &dyn VoiceProfileRepository) {
        let now = Utc::now();
        let mut profile = VoiceProfile {
            user_id: "u1".to_string(),
            embeddings: vec![vec![0.1, 0.2], vec![0.3, 0.4]],
            quality_score: 0.8,
            sample_count: 2,
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        assert!(repo.get_by_user("u1").await.unwrap().is_none());
        repo.upsert(&profile).await.unwrap();
        assert_eq!(repo.get_by_user("u1").await.unwrap().unwrap(), profile);

        profile.quality_score = 0.9;
        repo.upsert(&profile).await.unwrap();
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(repo.get_by_user("u1").await.unwrap().unwrap().quality_score, 0.9);

        assert!(repo.delete("u1").await.unwrap());
        assert!(!repo.delete("u1").await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }
}
