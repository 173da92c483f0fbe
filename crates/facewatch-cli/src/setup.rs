use crate::config::{BackendChoice, Config};
use facewatch_core::{EmbeddingMatcher, FeatureMatcher, MatcherError};
use std::path::PathBuf;
use thiserror::Error;

/// Problems that stop the monitor before the first frame.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(
        "no reference image found (searched: {}); place a photo of each authorized person in one of these locations",
        display_paths(.searched)
    )]
    NoReferenceImage { searched: Vec<PathBuf> },
    #[error("none of the {files} reference image(s) contains a detectable face; use a clear, frontal photo")]
    NoUsableReference { files: usize },
    #[error("{backend} backend unavailable: {source}")]
    Backend {
        backend: &'static str,
        source: MatcherError,
    },
    #[error("no usable backend (embedding: {embedding}; features: {features})")]
    NoBackend {
        embedding: MatcherError,
        features: MatcherError,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The matcher chosen at startup.
pub enum LoadedBackend {
    Embedding(EmbeddingMatcher),
    Features(FeatureMatcher),
}

fn load_embedding(config: &Config) -> Result<EmbeddingMatcher, MatcherError> {
    EmbeddingMatcher::load(
        &config.scrfd_model_path(),
        &config.arcface_model_path(),
        config.embedding_metric(),
    )
}

fn load_features(config: &Config) -> Result<FeatureMatcher, MatcherError> {
    FeatureMatcher::load(&config.cascade_model_path(), config.feature_metric())
}

/// Load the configured matcher. `auto` prefers embeddings and falls back to
/// local features when the ONNX models cannot be loaded.
pub fn load_backend(config: &Config) -> Result<LoadedBackend, SetupError> {
    match config.backend {
        BackendChoice::Embedding => load_embedding(config)
            .map(LoadedBackend::Embedding)
            .map_err(|source| SetupError::Backend { backend: "embedding", source }),
        BackendChoice::Features => load_features(config)
            .map(LoadedBackend::Features)
            .map_err(|source| SetupError::Backend { backend: "features", source }),
        BackendChoice::Auto => match load_embedding(config) {
            Ok(matcher) => Ok(LoadedBackend::Embedding(matcher)),
            Err(embedding) => {
                tracing::warn!(error = %embedding, "embedding backend unavailable; falling back to local features");
                load_features(config)
                    .map(LoadedBackend::Features)
                    .map_err(|features| SetupError::NoBackend { embedding, features })
            }
        },
    }
}
