//! facewatch-core: face matching, identity tracking and presence decisions.
//!
//! Two matching strategies share one interface: SCRFD detection with ArcFace
//! embeddings over ONNX Runtime, and a classical cascade detector with binary
//! local features. The registry and presence state machine are
//! strategy-agnostic and take time as an explicit argument.

pub mod alignment;
pub mod cascade;
pub mod detector;
pub mod features;
pub mod matcher;
pub mod presence;
pub mod recognizer;
pub mod registry;
pub mod types;

pub use matcher::{
    Backend, DescriptorOf, EmbeddingMatcher, EmbeddingMetric, FaceMatcher, FeatureMatcher, FeatureMetric,
    IdentityMetric, MatcherError,
};
pub use presence::{AlertKind, Phase, PresenceConfig, PresenceSnapshot, PresenceStateMachine};
pub use registry::{IdentityRegistry, RegistryConfig, Resolution, UnknownRecord};
pub use types::{BoundingBox, Detection, Embedding, FaceClass};

/// SCRFD detection model file name.
pub const SCRFD_MODEL: &str = "det_10g.onnx";
/// ArcFace recognition model file name.
pub const ARCFACE_MODEL: &str = "w600k_r50.onnx";
/// SeetaFace cascade model file name.
pub const CASCADE_MODEL: &str = "seeta_fd_frontal_v1.0.bin";

/// Default model directory: `$XDG_DATA_HOME/facewatch/models`, falling back to
/// `~/.local/share/facewatch/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    data_dir().join("models")
}

/// Per-user data directory holding models and reference images.
pub fn data_dir() -> std::path::PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_DATA_HOME").filter(|v| !v.is_empty()) {
        return std::path::PathBuf::from(xdg).join("facewatch");
    }
    match std::env::var_os("HOME") {
        Some(home) => std::path::PathBuf::from(home).join(".local/share/facewatch"),
        None => std::path::PathBuf::from("/var/lib/facewatch"),
    }
}
