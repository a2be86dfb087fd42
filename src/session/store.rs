//! # Session Store
//!
//! Concurrency-safe registry of voice sessions.
//!
//! ## Storage Model:
//! - The [`SessionRepository`] is the source of truth. Every write goes there first.
//! - A `tokio::sync::RwLock<HashMap>` cache sits in front of it. Reads take the shared lock;
//!   create/update/evict take the exclusive lock.
//! - Only live sessions are cached. Ending, expiring or sweeping a session evicts it, and
//!   a cache miss is filled under the exclusive lock so it cannot resurrect a session that
//!   was just ended.
//! - The repository re-checks the terminal states atomically with each write, so a session
//!   ended by one request cannot take an interaction from another request that checked it
//!   a moment earlier.
//!
//! ## Session States:
//! ```text
//! Active ──(now > expires_at, on read or sweep)──▶ Expired   (terminal)
//!   │
//!   └────────────(end_session)─────────────────▶ Ended     (terminal)
//! ```

use crate::context::CancelToken;
use crate::error::SpeechError;
use crate::session::model::{
    Interaction, Session, SessionDurations, SessionStatus, SessionType, SessionUpdate,
};
use crate::storage::{ensure_open, SessionRepository, SessionStats};
use crate::tasks;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What one cleanup sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    /// Sessions newly flipped to `Expired`.
    pub expired: usize,
    /// Expired sessions removed after the retention window.
    pub deleted: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStoreStats {
    #[serde(flatten)]
    pub stored: SessionStats,
    pub cached: usize,
}

pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
    cache: RwLock<HashMap<String, Session>>,
    durations: SessionDurations,
    /// How long expired sessions are kept before being deleted.
    retention: chrono::Duration,
}

impl SessionStore {
    pub fn new(
        repository: Arc<dyn SessionRepository>,
        durations: SessionDurations,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            repository,
            cache: RwLock::new(HashMap::new()),
            durations,
            retention,
        }
    }

    pub fn durations(&self) -> &SessionDurations {
        &self.durations
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        session_type: SessionType,
        metadata: HashMap<String, String>,
    ) -> Result<Session, SpeechError> {
        if user_id.trim().is_empty() {
            return Err(SpeechError::validation("user_id is required"));
        }

        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            session_type,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + self.durations.for_type(session_type),
            ended_at: None,
            metadata,
            interactions: Vec::new(),
        };

        self.repository.create(&session).await?;
        self.cache
            .write()
            .await
            .insert(session.id.clone(), session.clone());

        info!(
            session_id = %session.id,
            user_id,
            session_type = %session_type,
            expires_at = %session.expires_at,
            "Session created"
        );
        Ok(session)
    }

    /// Fetch a usable session.
    ///
    /// ## Errors:
    /// - `NotFound` for an unknown id
    /// - `SessionExpired` if the session is expired, or just passed `expires_at` (in which case
    ///   it is marked expired as a side effect)
    ///
    /// Ended sessions are returned as-is so callers can read them; writes to them fail.
    pub async fn get_session(&self, id: &str) -> Result<Session, SpeechError> {
        let session = self.load(id).await?;
        self.check_expiry(session, Utc::now()).await
    }

    /// Apply field updates. Sessions in a terminal state cannot be changed.
    pub async fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session, SpeechError> {
        let current = self.get_session(id).await?;
        ensure_open(&current)?;
        if let Some(expires_at) = update.expires_at {
            if expires_at <= current.created_at {
                return Err(SpeechError::validation("expires_at must be after created_at"));
            }
        }

        let updated = self
            .evict_if_closed(id, self.repository.update_fields(id, &update, Utc::now()).await)
            .await?;
        self.refresh_cache(updated.clone()).await;
        debug!(session_id = id, status = %updated.status, "Session updated");
        Ok(updated)
    }

    /// Append an interaction. Only live sessions accept interactions.
    pub async fn add_interaction(&self, id: &str, interaction: Interaction) -> Result<(), SpeechError> {
        let current = self.get_session(id).await?;
        ensure_open(&current)?;

        let updated = self
            .evict_if_closed(id, self.repository.append_interaction(id, &interaction).await)
            .await?;
        self.refresh_cache(updated).await;
        debug!(
            session_id = id,
            interaction_id = %interaction.id,
            kind = interaction.kind.as_str(),
            "Interaction recorded"
        );
        Ok(())
    }

    /// Close a session explicitly and drop it from the cache.
    pub async fn end_session(&self, id: &str) -> Result<Session, SpeechError> {
        let current = self.get_session(id).await?;
        ensure_open(&current)?;

        let now = Utc::now();
        let update = SessionUpdate {
            ended_at: Some(now),
            ..SessionUpdate::status(SessionStatus::Ended)
        };
        // Held across the write so a concurrent cache fill sees either the live session
        // before this point or the ended one after it.
        let mut cache = self.cache.write().await;
        let ended = self.repository.update_fields(id, &update, now).await;
        cache.remove(id);
        drop(cache);
        let ended = ended?;

        info!(
            session_id = id,
            interactions = ended.interactions.len(),
            "Session ended"
        );
        Ok(ended)
    }

    /// Mark every overdue session expired, then delete those expired for longer than the
    /// retention window.
    pub async fn cleanup_expired_sessions(&self) -> Result<CleanupReport, SpeechError> {
        let now = Utc::now();
        let expired_ids = self.repository.mark_expired(now).await?;
        let threshold = now - self.retention;
        let deleted = self.repository.delete_expired_older_than(threshold).await?;

        {
            let swept: HashSet<&str> = expired_ids.iter().map(String::as_str).collect();
            let mut cache = self.cache.write().await;
            cache.retain(|id, session| !swept.contains(id.as_str()) && !session.status.is_terminal());
        }

        let report = CleanupReport {
            expired: expired_ids.len(),
            deleted,
        };
        if report.expired > 0 || report.deleted > 0 {
            info!(expired = report.expired, deleted = report.deleted, "Session cleanup completed");
        } else {
            debug!("Session cleanup found nothing to do");
        }
        Ok(report)
    }

    /// A user's sessions, newest first. `limit == 0` returns all of them.
    pub async fn user_sessions(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError> {
        let now = Utc::now();
        let mut sessions = self.repository.list_by_user(user_id, limit).await?;
        // Present overdue sessions as expired even before the sweep gets to them.
        for session in &mut sessions {
            if !session.status.is_terminal() && session.is_past_expiry(now) {
                session.status = SessionStatus::Expired;
            }
        }
        Ok(sessions)
    }

    /// Interaction history of any known session, including expired and ended ones.
    pub async fn interactions(&self, id: &str) -> Result<Vec<Interaction>, SpeechError> {
        Ok(self.load(id).await?.interactions)
    }

    pub async fn stats(&self) -> Result<SessionStoreStats, SpeechError> {
        Ok(SessionStoreStats {
            stored: self.repository.stats().await?,
            cached: self.cache.read().await.len(),
        })
    }

    /// Start the periodic cleanup sweep. Each run is bounded by `run_timeout`.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        run_timeout: Duration,
        token: CancelToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tasks::spawn_periodic("session-cleanup", interval, token, move || {
            let store = Arc::clone(&store);
            async move {
                match tokio::time::timeout(run_timeout, store.cleanup_expired_sessions()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => error!(error = %err, "Session cleanup failed"),
                    Err(_) => warn!(
                        timeout_secs = run_timeout.as_secs(),
                        "Session cleanup timed out"
                    ),
                }
            }
        })
    }

    /// Cache first, then the repository. Live sessions found there are cached.
    async fn load(&self, id: &str) -> Result<Session, SpeechError> {
        if let Some(session) = self.cache.read().await.get(id) {
            return Ok(session.clone());
        }

        let mut cache = self.cache.write().await;
        if let Some(session) = cache.get(id) {
            return Ok(session.clone());
        }

        let session = self
            .repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| SpeechError::NotFound(format!("session not found: {}", id)))?;

        if !session.status.is_terminal() {
            cache.insert(id.to_string(), session.clone());
        }
        Ok(session)
    }

    async fn check_expiry(&self, session: Session, now: DateTime<Utc>) -> Result<Session, SpeechError> {
        if session.status == SessionStatus::Expired {
            return Err(SpeechError::SessionExpired(session.id));
        }
        if session.status.is_terminal() || !session.is_past_expiry(now) {
            return Ok(session);
        }

        debug!(session_id = %session.id, expires_at = %session.expires_at, "Session expired on read");
        let persisted = self
            .repository
            .update_fields(&session.id, &SessionUpdate::status(SessionStatus::Expired), now)
            .await;
        self.cache.write().await.remove(&session.id);
        match persisted {
            Ok(_) => Err(SpeechError::SessionExpired(session.id)),
            // Ended by someone else in the meantime.
            Err(err @ SpeechError::SessionClosed { .. }) => Err(err),
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "Failed to persist session expiry");
                Err(SpeechError::SessionExpired(session.id))
            }
        }
    }

    /// Replace a cached entry with a newer repository snapshot.
    ///
    /// Absent entries stay absent: the session was evicted (ended, expired, swept) after
    /// this snapshot was taken. Terminal snapshots evict.
    async fn refresh_cache(&self, snapshot: Session) {
        let mut cache = self.cache.write().await;
        if snapshot.status.is_terminal() {
            cache.remove(&snapshot.id);
            return;
        }
        if let Some(cached) = cache.get_mut(&snapshot.id) {
            if (snapshot.interactions.len(), snapshot.updated_at)
                >= (cached.interactions.len(), cached.updated_at)
            {
                *cached = snapshot;
            }
        }
    }

    /// Drop the cached copy when the repository reports the session terminal.
    async fn evict_if_closed(
        &self,
        id: &str,
        result: Result<Session, SpeechError>,
    ) -> Result<Session, SpeechError> {
        if let Err(SpeechError::SessionExpired(_) | SpeechError::SessionClosed { .. }) = &result {
            self.cache.write().await.remove(id);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::InteractionKind;
    use crate::storage::conformance::sample_session;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    /// Memory repository whose appends pause before writing, to widen the window between
    /// the store's status check and the repository write.
    struct SlowAppends {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl SessionRepository for SlowAppends {
        async fn create(&self, session: &Session) -> Result<(), SpeechError> {
            self.inner.create(session).await
        }

        async fn get_by_id(&self, id: &str) -> Result<Option<Session>, SpeechError> {
            self.inner.get_by_id(id).await
        }

        async fn update_fields(
            &self,
            id: &str,
            update: &SessionUpdate,
            now: DateTime<Utc>,
        ) -> Result<Session, SpeechError> {
            self.inner.update_fields(id, update, now).await
        }

        async fn append_interaction(&self, id: &str, interaction: &Interaction) -> Result<Session, SpeechError> {
            tokio::time::sleep(self.delay).await;
            self.inner.append_interaction(id, interaction).await
        }

        async fn mark_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, SpeechError> {
            self.inner.mark_expired(now).await
        }

        async fn delete_expired_older_than(&self, threshold: DateTime<Utc>) -> Result<usize, SpeechError> {
            self.inner.delete_expired_older_than(threshold).await
        }

        async fn list_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<Session>, SpeechError> {
            self.inner.list_by_user(user_id, limit).await
        }

        async fn stats(&self) -> Result<SessionStats, SpeechError> {
            self.inner.stats().await
        }
    }

    fn store_with(durations: SessionDurations) -> (Arc<SessionStore>, Arc<MemoryStore>) {
        let repository = Arc::new(MemoryStore::new());
        let store = Arc::new(SessionStore::new(
            repository.clone(),
            durations,
            chrono::Duration::hours(24),
        ));
        (store, repository)
    }

    fn short_lived() -> SessionDurations {
        SessionDurations {
            general: chrono::Duration::milliseconds(20),
            ..SessionDurations::default()
        }
    }

    #[tokio::test]
    async fn test_create_consultation_session() {
        let (store, repository) = store_with(SessionDurations::default());
        let session = store
            .create_session("u1", SessionType::Consultation, HashMap::new())
            .await
            .unwrap();

        assert_eq!(session.status, SessionStatus::Active);
        let lifetime = session.expires_at - session.created_at;
        assert_eq!(lifetime, chrono::Duration::hours(2));
        assert!(repository.get_by_id(&session.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_user_is_rejected() {
        let (store, _) = store_with(SessionDurations::default());
        let err = store
            .create_session(" ", SessionType::General, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::Validation(_)));
    }

    #[tokio::test]
    async fn test_past_expiry_is_reported_on_next_read_from_repository() {
        let (store, repository) = store_with(SessionDurations::default());
        repository
            .create(&sample_session("old", "u1", chrono::Duration::seconds(-1)))
            .await
            .unwrap();

        let err = store.get_session("old").await.unwrap_err();
        assert_eq!(err, SpeechError::SessionExpired("old".to_string()));

        let persisted = repository.get_by_id("old").await.unwrap().unwrap();
        assert_eq!(persisted.status, SessionStatus::Expired);
    }

    #[tokio::test]
    async fn test_past_expiry_is_reported_on_next_read_from_cache() {
        let (store, _) = store_with(short_lived());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(matches!(
            store.get_session(&session.id).await,
            Err(SpeechError::SessionExpired(_))
        ));
        // Stays expired.
        assert!(matches!(
            store.get_session(&session.id).await,
            Err(SpeechError::SessionExpired(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (store, _) = store_with(SessionDurations::default());
        let err = store.get_session("nope").await.unwrap_err();
        assert_eq!(err, SpeechError::NotFound("session not found: nope".to_string()));
    }

    #[tokio::test]
    async fn test_interactions_are_kept_in_order() {
        let (store, _) = store_with(SessionDurations::default());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        for text in ["one", "two", "three"] {
            store
                .add_interaction(&session.id, Interaction::new(InteractionKind::SpeechToText, text))
                .await
                .unwrap();
        }

        let cached = store.get_session(&session.id).await.unwrap();
        let texts: Vec<_> = cached.interactions.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_all_recorded() {
        let (store, repository) = store_with(SessionDurations::default());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            let id = session.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .add_interaction(&id, Interaction::new(InteractionKind::TextToSpeech, format!("{}", i)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let persisted = repository.get_by_id(&session.id).await.unwrap().unwrap();
        assert_eq!(persisted.interactions.len(), 20);
        let cached = store.get_session(&session.id).await.unwrap();
        assert_eq!(cached.interactions, persisted.interactions);
    }

    #[tokio::test]
    async fn test_ended_session_rejects_writes() {
        let (store, _) = store_with(SessionDurations::default());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        let ended = store.end_session(&session.id).await.unwrap();
        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());

        let read = store.get_session(&session.id).await.unwrap();
        assert_eq!(read.status, SessionStatus::Ended);

        let err = store
            .add_interaction(&session.id, Interaction::new(InteractionKind::SpeechToText, "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::SessionClosed { .. }));

        let err = store
            .update_session(&session.id, SessionUpdate::status(SessionStatus::Active))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::SessionClosed { .. }));
        assert!(store.end_session(&session.id).await.is_err());
    }

    #[tokio::test]
    async fn test_end_racing_an_append_keeps_session_closed() {
        let repository = Arc::new(SlowAppends {
            inner: MemoryStore::new(),
            delay: Duration::from_millis(50),
        });
        let store = Arc::new(SessionStore::new(
            repository.clone(),
            SessionDurations::default(),
            chrono::Duration::hours(24),
        ));
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        let appending = {
            let store = Arc::clone(&store);
            let id = session.id.clone();
            tokio::spawn(async move {
                store
                    .add_interaction(&id, Interaction::new(InteractionKind::SpeechToText, "late"))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.end_session(&session.id).await.unwrap();

        let err = appending.await.unwrap().unwrap_err();
        assert!(matches!(err, SpeechError::SessionClosed { .. }));

        let stored = repository.get_by_id(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Ended);
        assert!(stored.interactions.is_empty());

        let read = store.get_session(&session.id).await.unwrap();
        assert_eq!(read.status, SessionStatus::Ended);
        assert_eq!(store.stats().await.unwrap().cached, 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_expired_sessions_from_cache() {
        let (store, _) = store_with(short_lived());
        store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();
        let live = store
            .create_session("u1", SessionType::Consultation, HashMap::new())
            .await
            .unwrap();
        assert_eq!(store.stats().await.unwrap().cached, 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        let report = store.cleanup_expired_sessions().await.unwrap();
        assert_eq!(report.expired, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.cached, 1);
        assert_eq!(stats.stored.count_status(SessionStatus::Expired), 1);
        assert!(store.get_session(&live.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_lazy_expiry_evicts_from_cache() {
        let (store, _) = store_with(short_lived());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get_session(&session.id).await.is_err());
        assert_eq!(store.stats().await.unwrap().cached, 0);
    }

    #[tokio::test]
    async fn test_update_session_changes_status_and_metadata() {
        let (store, _) = store_with(SessionDurations::default());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        let update = SessionUpdate {
            metadata: Some(HashMap::from([("topic".to_string(), "billing".to_string())])),
            ..SessionUpdate::status(SessionStatus::Inactive)
        };
        let updated = store.update_session(&session.id, update).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Inactive);
        assert_eq!(updated.metadata["topic"], "billing");

        let bad = SessionUpdate {
            expires_at: Some(session.created_at - chrono::Duration::seconds(1)),
            ..SessionUpdate::default()
        };
        assert!(matches!(
            store.update_session(&session.id, bad).await,
            Err(SpeechError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_marks_and_purges() {
        let repository = Arc::new(MemoryStore::new());
        let store = SessionStore::new(
            repository.clone(),
            SessionDurations::default(),
            chrono::Duration::zero(),
        );

        repository
            .create(&sample_session("stale", "u1", chrono::Duration::seconds(-30)))
            .await
            .unwrap();
        let live = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();

        let first = store.cleanup_expired_sessions().await.unwrap();
        assert_eq!(first.expired, 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = store.cleanup_expired_sessions().await.unwrap();
        assert_eq!(second, CleanupReport { expired: 0, deleted: 1 });

        assert!(repository.get_by_id("stale").await.unwrap().is_none());
        assert!(store.get_session(&live.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_user_sessions_newest_first_with_limit() {
        let (store, _) = store_with(SessionDurations::default());
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(
                store
                    .create_session("u1", SessionType::Transcription, HashMap::new())
                    .await
                    .unwrap()
                    .id,
            );
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        store
            .create_session("u2", SessionType::General, HashMap::new())
            .await
            .unwrap();

        let listed = store.user_sessions("u1", 2).await.unwrap();
        let listed_ids: Vec<_> = listed.iter().map(|s| s.id.clone()).collect();
        assert_eq!(listed_ids, vec![ids[2].clone(), ids[1].clone()]);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.stored.total, 4);
        assert_eq!(stats.stored.count_type(SessionType::Transcription), 3);
        assert_eq!(stats.cached, 4);
    }

    #[tokio::test]
    async fn test_interactions_readable_after_end() {
        let (store, _) = store_with(SessionDurations::default());
        let session = store
            .create_session("u1", SessionType::General, HashMap::new())
            .await
            .unwrap();
        store
            .add_interaction(&session.id, Interaction::new(InteractionKind::SpeechToText, "kept"))
            .await
            .unwrap();
        store.end_session(&session.id).await.unwrap();

        let history = store.interactions(&session.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_runs_until_cancelled() {
        let (store, repository) = store_with(SessionDurations::default());
        repository
            .create(&sample_session("stale", "u1", chrono::Duration::seconds(-30)))
            .await
            .unwrap();

        let token = CancelToken::new();
        let handle = store.spawn_cleanup(Duration::from_secs(60), Duration::from_secs(5), token.clone());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let stale = repository.get_by_id("stale").await.unwrap().unwrap();
        assert_eq!(stale.status, SessionStatus::Expired);

        token.cancel();
        handle.await.unwrap();
    }
}
