//! # Voice Biometric Authenticator
//!
//! Enrollment and verification of users by voice.
//!
//! ## Profile Lifecycle:
//! - **No profile**: authentication fails closed with "voice profile not found"
//! - **Enrolled**: created by [`enroll`](VoiceBiometricAuthenticator::enroll) from at least
//!   `min_samples` clips; active
//! - **Refreshed**: a confident authentication appends the checked clip's embedding in the
//!   background (FIFO, capped at `max_samples`) and recomputes quality
//! - **Deleted**: removed entirely by [`delete_profile`](VoiceBiometricAuthenticator::delete_profile)
//!
//! ## Concurrency:
//! Every write to a user's profile (enroll, refresh, delete) holds that user's async lock.
//! A background refresh re-reads the profile under the lock and is dropped if the profile
//! is gone, so a refresh racing a delete can never bring the profile back.
//!
//! Locks exist only while someone holds or waits for them; the last [`ProfileLock`] to be
//! dropped removes the user's entry, so lookups for unknown users leave nothing behind.

use crate::audio::{AudioProcessor, AudioPurpose};
use crate::biometrics::embedding::EmbeddingModel;
use crate::biometrics::similarity::{best_match, QualityPolicy};
use crate::context::RequestContext;
use crate::error::SpeechError;
use crate::storage::VoiceProfileRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Enrolled voice of one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceProfile {
    pub user_id: String,
    /// Oldest first.
    pub embeddings: Vec<Vec<f32>>,
    pub quality_score: f64,
    pub sample_count: usize,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Profile metadata without the embedding vectors.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VoiceProfileSummary {
    pub user_id: String,
    pub quality_score: f64,
    pub sample_count: usize,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&VoiceProfile> for VoiceProfileSummary {
    fn from(profile: &VoiceProfile) -> Self {
        Self {
            user_id: profile.user_id.clone(),
            quality_score: profile.quality_score,
            sample_count: profile.sample_count,
            is_active: profile.is_active,
            created_at: profile.created_at,
            updated_at: profile.updated_at,
        }
    }
}

/// Outcome of an authentication attempt. A failed match is a normal result, not an error.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AuthenticationResult {
    pub user_id: String,
    pub is_authenticated: bool,
    /// Highest similarity against the stored embeddings (0.0 if none were compared).
    pub confidence: f64,
    pub threshold: f64,
    pub processing_time_ms: u64,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct VoiceAuthSettings {
    pub min_samples: usize,
    pub max_samples: usize,
    pub similarity_threshold: f64,
    pub update_threshold: f64,
    pub quality: QualityPolicy,
}

impl Default for VoiceAuthSettings {
    fn default() -> Self {
        Self {
            min_samples: 3,
            max_samples: 10,
            similarity_threshold: 0.85,
            update_threshold: 0.90,
            quality: QualityPolicy::default(),
        }
    }
}

type UserLocks = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Exclusive hold on one user's profile.
struct ProfileLock {
    user_id: String,
    locks: UserLocks,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in our guard: nobody else is waiting.
        if locks
            .get(&self.user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 2)
        {
            locks.remove(&self.user_id);
        }
    }
}

/// Voice enrollment and verification. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct VoiceBiometricAuthenticator {
    processor: Arc<AudioProcessor>,
    model: Arc<dyn EmbeddingModel>,
    profiles: Arc<dyn VoiceProfileRepository>,
    settings: Arc<VoiceAuthSettings>,
    user_locks: UserLocks,
}

impl VoiceBiometricAuthenticator {
    pub fn new(
        processor: Arc<AudioProcessor>,
        model: Arc<dyn EmbeddingModel>,
        profiles: Arc<dyn VoiceProfileRepository>,
        settings: VoiceAuthSettings,
    ) -> Self {
        Self {
            processor,
            model,
            profiles,
            settings: Arc::new(settings),
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn settings(&self) -> &VoiceAuthSettings {
        &self.settings
    }

    pub async fn profile_count(&self) -> Result<usize, SpeechError> {
        self.profiles.count().await
    }

    /// Enroll (or re-enroll) `user_id` from a set of voice clips.
    ///
    /// All-or-nothing: every clip must pass voice-auth validation, otherwise nothing is
    /// stored. Re-enrolling replaces the previous embeddings.
    ///
    /// ## Errors:
    /// - `Validation` for too few clips, an invalid clip, or a quality score below the minimum
    /// - `Timeout`/`Cancelled` if `ctx` ends during preprocessing
    pub async fn enroll(
        &self,
        user_id: &str,
        samples: &[Vec<u8>],
        ctx: &RequestContext,
    ) -> Result<VoiceProfile, SpeechError> {
        let started = Instant::now();
        let settings = &self.settings;

        if samples.len() < settings.min_samples {
            return Err(SpeechError::validation(format!(
                "insufficient audio samples: need at least {}, got {}",
                settings.min_samples,
                samples.len()
            )));
        }

        for (index, sample) in samples.iter().enumerate() {
            let validation = self.processor.validate_for(sample, AudioPurpose::VoiceAuth);
            if !validation.is_valid {
                return Err(SpeechError::validation(format!(
                    "invalid audio sample {}: {}",
                    index + 1,
                    validation.summary()
                )));
            }
        }

        let mut embeddings = Vec::with_capacity(samples.len());
        for sample in samples {
            embeddings.push(self.embed_sample(sample, ctx).await?);
        }

        let quality = settings.quality.score(&embeddings);
        if !settings.quality.is_acceptable(quality) {
            return Err(SpeechError::validation(format!(
                "voice samples quality too low: {:.2} (minimum {:.2})",
                quality, settings.quality.minimum
            )));
        }

        if embeddings.len() > settings.max_samples {
            let excess = embeddings.len() - settings.max_samples;
            embeddings.drain(..excess);
        }

        let _lock = self.lock_user(user_id).await;
        if ctx.is_done() {
            return Err(SpeechError::Cancelled("voice enrollment".to_string()));
        }

        let now = Utc::now();
        let created_at = match self.profiles.get_by_user(user_id).await? {
            Some(existing) => existing.created_at,
            None => now,
        };

        let profile = VoiceProfile {
            user_id: user_id.to_string(),
            sample_count: embeddings.len(),
            embeddings,
            quality_score: quality,
            is_active: true,
            created_at,
            updated_at: now,
        };
        self.profiles.upsert(&profile).await?;

        info!(
            user_id,
            samples = profile.sample_count,
            quality = profile.quality_score,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Voice profile enrolled"
        );
        Ok(profile)
    }

    /// Check a voice clip against `user_id`'s profile.
    ///
    /// Missing/inactive profiles and unusable audio produce a negative result rather than
    /// an error. Only context interruptions and internal failures are returned as `Err`.
    pub async fn authenticate(
        &self,
        user_id: &str,
        audio: &[u8],
        ctx: &RequestContext,
    ) -> Result<AuthenticationResult, SpeechError> {
        let started = Instant::now();
        let threshold = self.settings.similarity_threshold;
        let reject = |reason: String, confidence: f64| AuthenticationResult {
            user_id: user_id.to_string(),
            is_authenticated: false,
            confidence,
            threshold,
            processing_time_ms: started.elapsed().as_millis() as u64,
            reason,
        };

        let profile = match self.profiles.get_by_user(user_id).await? {
            Some(profile) => profile,
            None => return Ok(reject("voice profile not found".to_string(), 0.0)),
        };
        if !profile.is_active {
            return Ok(reject("voice profile inactive".to_string(), 0.0));
        }

        let validation = self.processor.validate_for(audio, AudioPurpose::VoiceAuth);
        if !validation.is_valid {
            return Ok(reject(format!("invalid audio: {}", validation.summary()), 0.0));
        }

        let embedding = match self.embed_sample(audio, ctx).await {
            Ok(embedding) => embedding,
            Err(err) if err.is_interruption() => return Err(err),
            Err(SpeechError::Validation(message)) => {
                debug!(user_id, error = %message, "Sample preprocessing failed");
                return Ok(reject("audio preprocessing failed".to_string(), 0.0));
            }
            Err(err) => return Err(err),
        };

        let similarity = best_match(&embedding, &profile.embeddings);
        let is_authenticated = similarity >= threshold;
        let reason = if is_authenticated {
            "voice authenticated successfully".to_string()
        } else {
            format!("similarity {:.3} below threshold {:.3}", similarity, threshold)
        };

        if is_authenticated && similarity >= self.settings.update_threshold {
            let authenticator = self.clone();
            let user = user_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = authenticator.apply_update(&user, embedding).await {
                    warn!(user_id = %user, error = %err, "Background voice profile update failed");
                }
            });
        }

        let result = AuthenticationResult {
            user_id: user_id.to_string(),
            is_authenticated,
            confidence: similarity,
            threshold,
            processing_time_ms: started.elapsed().as_millis() as u64,
            reason,
        };
        info!(
            user_id,
            authenticated = result.is_authenticated,
            confidence = result.confidence,
            elapsed_ms = result.processing_time_ms,
            "Voice authentication completed"
        );
        Ok(result)
    }

    /// Add one clip to an existing profile.
    pub async fn update_profile(
        &self,
        user_id: &str,
        sample: &[u8],
        ctx: &RequestContext,
    ) -> Result<VoiceProfile, SpeechError> {
        let validation = self.processor.validate_for(sample, AudioPurpose::VoiceAuth);
        if !validation.is_valid {
            return Err(SpeechError::validation(validation.summary()));
        }
        let embedding = self.embed_sample(sample, ctx).await?;
        self.apply_update(user_id, embedding)
            .await?
            .ok_or_else(|| SpeechError::NotFound("voice profile not found".to_string()))
    }

    /// Append `embedding` under the user lock. `Ok(None)` when the profile no longer exists.
    async fn apply_update(
        &self,
        user_id: &str,
        embedding: Vec<f32>,
    ) -> Result<Option<VoiceProfile>, SpeechError> {
        let _lock = self.lock_user(user_id).await;

        let mut profile = match self.profiles.get_by_user(user_id).await? {
            Some(profile) => profile,
            None => {
                debug!(user_id, "Profile gone before update, dropping sample");
                return Ok(None);
            }
        };

        profile.embeddings.push(embedding);
        if profile.embeddings.len() > self.settings.max_samples {
            let excess = profile.embeddings.len() - self.settings.max_samples;
            profile.embeddings.drain(..excess);
        }
        profile.sample_count = profile.embeddings.len();
        profile.quality_score = self.settings.quality.score(&profile.embeddings);
        profile.updated_at = Utc::now();

        self.profiles.upsert(&profile).await?;
        debug!(user_id, samples = profile.sample_count, quality = profile.quality_score, "Voice profile updated");
        Ok(Some(profile))
    }

    pub async fn delete_profile(&self, user_id: &str) -> Result<(), SpeechError> {
        let _lock = self.lock_user(user_id).await;

        if !self.profiles.delete(user_id).await? {
            return Err(SpeechError::NotFound("voice profile not found".to_string()));
        }
        info!(user_id, "Voice profile deleted");
        Ok(())
    }

    pub async fn profile(&self, user_id: &str) -> Result<VoiceProfile, SpeechError> {
        self.profiles
            .get_by_user(user_id)
            .await?
            .ok_or_else(|| SpeechError::NotFound("voice profile not found".to_string()))
    }

    /// Canonicalize, normalize and embed one clip.
    async fn embed_sample(&self, audio: &[u8], ctx: &RequestContext) -> Result<Vec<f32>, SpeechError> {
        let canonical = self.processor.canonical_format();
        let converted = self.processor.preprocess(audio, &canonical, ctx).await?;
        let normalized = self.processor.normalize(&converted)?;
        self.model.embed(&normalized)
    }

    async fn lock_user(&self, user_id: &str) -> ProfileLock {
        let lock = {
            let mut locks = self.user_locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(user_id.to_string()).or_default())
        };
        ProfileLock {
            user_id: user_id.to_string(),
            locks: Arc::clone(&self.user_locks),
            _guard: lock.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.user_locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
