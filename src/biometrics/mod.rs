//! # Voice Biometrics
//!
//! - **similarity**: cosine similarity and the enrollment quality policy
//! - **embedding**: the `EmbeddingModel` seam and a built-in spectral model
//! - **authenticator**: enrollment, verification, profile refresh and deletion

pub mod authenticator;
pub mod embedding;
pub mod similarity;

pub use authenticator::{
    AuthenticationResult, VoiceAuthSettings, VoiceBiometricAuthenticator, VoiceProfile,
    VoiceProfileSummary,
};
pub use embedding::{EmbeddingModel, SpectralEmbeddingModel};
pub use similarity::{cosine_similarity, QualityPolicy};
