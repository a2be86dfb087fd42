//! Session and interaction records.

use crate::error::SpeechError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Consultation,
    Transcription,
    VoiceAuth,
    General,
}

impl SessionType {
    pub const ALL: [SessionType; 4] = [
        SessionType::Consultation,
        SessionType::Transcription,
        SessionType::VoiceAuth,
        SessionType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Consultation => "consultation",
            SessionType::Transcription => "transcription",
            SessionType::VoiceAuth => "voice_auth",
            SessionType::General => "general",
        }
    }

    /// Which interaction kinds a session of this type may record.
    pub fn accepts(&self, kind: InteractionKind) -> bool {
        match kind {
            InteractionKind::SpeechToText => matches!(
                self,
                SessionType::Consultation | SessionType::Transcription | SessionType::General
            ),
            InteractionKind::TextToSpeech => {
                matches!(self, SessionType::Consultation | SessionType::General)
            }
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = SpeechError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "consultation" => Ok(SessionType::Consultation),
            "transcription" => Ok(SessionType::Transcription),
            "voice_auth" | "voice-auth" => Ok(SessionType::VoiceAuth),
            "general" => Ok(SessionType::General),
            other => Err(SpeechError::validation(format!("unknown session type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Inactive,
    Expired,
    Ended,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Inactive => "inactive",
            SessionStatus::Expired => "expired",
            SessionStatus::Ended => "ended",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Expired | SessionStatus::Ended)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    SpeechToText,
    TextToSpeech,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::SpeechToText => "speech_to_text",
            InteractionKind::TextToSpeech => "text_to_speech",
        }
    }
}

/// One recorded STT or TTS exchange. Never modified after it is appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Interaction {
    pub id: String,
    pub kind: InteractionKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio: Option<Vec<u8>>,
    pub text: String,
    pub confidence: f32,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl Interaction {
    pub fn new(kind: InteractionKind, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            input_audio: None,
            output_audio: None,
            text: text.into(),
            confidence: 1.0,
            processing_time_ms: 0,
            options: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub session_type: SessionType,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Chronological; append-only.
    #[serde(default)]
    pub interactions: Vec<Interaction>,
}

impl Session {
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Still usable: not terminal and not past `expires_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && !self.is_past_expiry(now)
    }
}

/// Field changes applied to a stored session. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Merged into the existing metadata.
    pub metadata: Option<HashMap<String, String>>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn apply(&self, session: &mut Session, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(expires_at) = self.expires_at {
            session.expires_at = expires_at;
        }
        if let Some(ended_at) = self.ended_at {
            session.ended_at = Some(ended_at);
        }
        if let Some(metadata) = &self.metadata {
            session
                .metadata
                .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        session.updated_at = now;
    }
}

/// Lifetime of a new session, by type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionDurations {
    pub consultation: Duration,
    pub transcription: Duration,
    pub voice_auth: Duration,
    pub general: Duration,
}

impl Default for SessionDurations {
    fn default() -> Self {
        Self {
            consultation: Duration::hours(2),
            transcription: Duration::hours(1),
            voice_auth: Duration::minutes(15),
            general: Duration::minutes(30),
        }
    }
}

impl SessionDurations {
    pub fn for_type(&self, session_type: SessionType) -> Duration {
        match session_type {
            SessionType::Consultation => self.consultation,
            SessionType::Transcription => self.transcription,
            SessionType::VoiceAuth => self.voice_auth,
            SessionType::General => self.general,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_in: Duration) -> Session {
        let now = Utc::now();
        Session {
            id: "s1".into(),
            user_id: "u1".into(),
            session_type: SessionType::General,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            expires_at: now + expires_in,
            ended_at: None,
            metadata: HashMap::new(),
            interactions: Vec::new(),
        }
    }

    #[test]
    fn test_session_type_parsing() {
        assert_eq!("voice_auth".parse::<SessionType>().unwrap(), SessionType::VoiceAuth);
        assert_eq!("consultation".parse::<SessionType>().unwrap(), SessionType::Consultation);
        assert!("meeting".parse::<SessionType>().is_err());
        for t in SessionType::ALL {
            assert_eq!(t.as_str().parse::<SessionType>().unwrap(), t);
        }
    }

    #[test]
    fn test_type_capabilities() {
        assert!(SessionType::Transcription.accepts(InteractionKind::SpeechToText));
        assert!(!SessionType::Transcription.accepts(InteractionKind::TextToSpeech));
        assert!(!SessionType::VoiceAuth.accepts(InteractionKind::SpeechToText));
        assert!(SessionType::General.accepts(InteractionKind::TextToSpeech));
    }

    #[test]
    fn test_default_durations() {
        let durations = SessionDurations::default();
        assert_eq!(durations.for_type(SessionType::Consultation), Duration::hours(2));
        assert_eq!(durations.for_type(SessionType::Transcription), Duration::hours(1));
        assert_eq!(durations.for_type(SessionType::VoiceAuth), Duration::minutes(15));
        assert_eq!(durations.for_type(SessionType::General), Duration::minutes(30));
    }

    #[test]
    fn test_liveness() {
        let now = Utc::now();
        let mut live = session(Duration::minutes(5));
        assert!(live.is_live(now));

        live.status = SessionStatus::Ended;
        assert!(!live.is_live(now));

        let stale = session(Duration::seconds(-1));
        assert!(stale.is_past_expiry(now));
        assert!(!stale.is_live(now));
    }

    #[test]
    fn test_update_merges_metadata() {
        let mut s = session(Duration::minutes(5));
        s.metadata.insert("channel".into(), "web".into());

        let update = SessionUpdate {
            metadata: Some(HashMap::from([("locale".to_string(), "en-GB".to_string())])),
            ..SessionUpdate::status(SessionStatus::Inactive)
        };
        let later = s.updated_at + Duration::seconds(3);
        update.apply(&mut s, later);

        assert_eq!(s.status, SessionStatus::Inactive);
        assert_eq!(s.metadata.len(), 2);
        assert_eq!(s.updated_at, later);
    }

    #[test]
    fn test_interaction_audio_is_omitted_from_json_when_absent() {
        let interaction = Interaction::new(InteractionKind::SpeechToText, "hi");
        let json = serde_json::to_value(&interaction).unwrap();
        assert!(json.get("input_audio").is_none());
        assert_eq!(json["kind"], "speech_to_text");
    }
}
