use facewatch_core::{EmbeddingMetric, FeatureMetric, PresenceConfig, RegistryConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Which matching strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Embeddings if the ONNX models load, otherwise local features.
    Auto,
    Embedding,
    Features,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "embedding" => Ok(Self::Embedding),
            "features" => Ok(Self::Features),
            other => Err(format!("unknown backend {other:?}")),
        }
    }
}

/// Runtime configuration.
///
/// Layered: built-in defaults, then the TOML file, then `FACEWATCH_*`
/// environment variables, then command-line flags.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub backend: BackendChoice,
    /// Directory containing the ONNX and cascade model files.
    pub model_dir: PathBuf,
    /// Reference image, or a directory of them. Unset means the data-dir defaults.
    pub reference_path: Option<PathBuf>,
    /// Capture devices in probe order.
    pub devices: Vec<String>,
    pub capture_width: u32,
    pub capture_height: u32,
    pub min_frames_for_alert: u32,
    pub alert_cooldown_secs: u64,
    pub presence_reset_secs: u64,
    pub unknown_cleanup_secs: u64,
    pub max_unknown: usize,
    pub embedding_authorized_distance: f32,
    pub embedding_same_identity_distance: f32,
    pub feature_match_distance: u32,
    pub feature_authorized_ratio: f32,
    pub feature_same_identity_ratio: f32,
    /// Run CLAHE on each frame before detection.
    pub enhance_contrast: bool,
    /// TTF/OTF font for overlay labels. Boxes are drawn without text when unset.
    pub overlay_font: Option<PathBuf>,
    /// Headless mode: where to write the latest annotated frame (JPEG).
    pub preview_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let embedding = EmbeddingMetric::default();
        let features = FeatureMetric::default();
        let presence = PresenceConfig::default();
        let registry = RegistryConfig::default();
        Self {
            backend: BackendChoice::Auto,
            model_dir: facewatch_core::default_model_dir(),
            reference_path: None,
            devices: vec!["/dev/video1".into(), "/dev/video0".into(), "/dev/video2".into()],
            capture_width: 640,
            capture_height: 480,
            min_frames_for_alert: presence.min_frames_for_alert,
            alert_cooldown_secs: presence.alert_cooldown.as_secs(),
            presence_reset_secs: presence.presence_reset.as_secs(),
            unknown_cleanup_secs: registry.unknown_ttl.as_secs(),
            max_unknown: registry.max_unknown,
            embedding_authorized_distance: embedding.authorized_distance,
            embedding_same_identity_distance: embedding.same_identity_distance,
            feature_match_distance: features.max_match_distance,
            feature_authorized_ratio: features.authorized_ratio,
            feature_same_identity_ratio: features.same_identity_ratio,
            enhance_contrast: false,
            overlay_font: None,
            preview_path: None,
        }
    }
}

impl Config {
    /// Load defaults, the TOML file and the process environment.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(found) => Self::from_file(&found)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `FACEWATCH_*` variables. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        self.backend = env.parse("FACEWATCH_BACKEND", self.backend);
        if let Some(dir) = env.get("FACEWATCH_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(path) = env.get("FACEWATCH_REFERENCE_PATH") {
            self.reference_path = Some(PathBuf::from(path));
        }
        if let Some(list) = env.get("FACEWATCH_DEVICES") {
            let devices: Vec<String> = list
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from)
                .collect();
            if !devices.is_empty() {
                self.devices = devices;
            }
        }
        self.capture_width = env.parse("FACEWATCH_CAPTURE_WIDTH", self.capture_width);
        self.capture_height = env.parse("FACEWATCH_CAPTURE_HEIGHT", self.capture_height);
        self.min_frames_for_alert = env.parse("FACEWATCH_MIN_FRAMES_FOR_ALERT", self.min_frames_for_alert);
        self.alert_cooldown_secs = env.parse("FACEWATCH_ALERT_COOLDOWN_SECS", self.alert_cooldown_secs);
        self.presence_reset_secs = env.parse("FACEWATCH_PRESENCE_RESET_SECS", self.presence_reset_secs);
        self.unknown_cleanup_secs = env.parse("FACEWATCH_UNKNOWN_CLEANUP_SECS", self.unknown_cleanup_secs);
        self.max_unknown = env.parse("FACEWATCH_MAX_UNKNOWN", self.max_unknown);
        self.embedding_authorized_distance =
            env.parse("FACEWATCH_EMBEDDING_AUTHORIZED_DISTANCE", self.embedding_authorized_distance);
        self.embedding_same_identity_distance =
            env.parse("FACEWATCH_EMBEDDING_SAME_IDENTITY_DISTANCE", self.embedding_same_identity_distance);
        self.feature_match_distance = env.parse("FACEWATCH_FEATURE_MATCH_DISTANCE", self.feature_match_distance);
        self.feature_authorized_ratio = env.parse("FACEWATCH_FEATURE_AUTHORIZED_RATIO", self.feature_authorized_ratio);
        self.feature_same_identity_ratio =
            env.parse("FACEWATCH_FEATURE_SAME_IDENTITY_RATIO", self.feature_same_identity_ratio);
        if let Some(v) = env.get("FACEWATCH_ENHANCE_CONTRAST") {
            self.enhance_contrast = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        if let Some(font) = env.get("FACEWATCH_OVERLAY_FONT") {
            self.overlay_font = Some(PathBuf::from(font));
        }
        if let Some(path) = env.get("FACEWATCH_PREVIEW_PATH") {
            self.preview_path = Some(PathBuf::from(path));
        }
    }

    pub fn presence(&self) -> PresenceConfig {
        PresenceConfig {
            min_frames_for_alert: self.min_frames_for_alert.max(1),
            alert_cooldown: Duration::from_secs(self.alert_cooldown_secs),
            presence_reset: Duration::from_secs(self.presence_reset_secs),
        }
    }

    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            unknown_ttl: Duration::from_secs(self.unknown_cleanup_secs),
            max_unknown: self.max_unknown,
        }
    }

    pub fn embedding_metric(&self) -> EmbeddingMetric {
        EmbeddingMetric {
            authorized_distance: self.embedding_authorized_distance,
            same_identity_distance: self.embedding_same_identity_distance,
        }
    }

    pub fn feature_metric(&self) -> FeatureMetric {
        FeatureMetric {
            max_match_distance: self.feature_match_distance,
            authorized_ratio: self.feature_authorized_ratio,
            same_identity_ratio: self.feature_same_identity_ratio,
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join(facewatch_core::SCRFD_MODEL)
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join(facewatch_core::ARCFACE_MODEL)
    }

    pub fn cascade_model_path(&self) -> PathBuf {
        self.model_dir.join(facewatch_core::CASCADE_MODEL)
    }

    /// Where to look for reference images, in order.
    pub fn reference_candidates(&self) -> Vec<PathBuf> {
        match &self.reference_path {
            Some(path) => vec![path.clone()],
            None => {
                let data = facewatch_core::data_dir();
                vec![data.join("authorized"), data.join("face.png")]
            }
        }
    }
}

/// `$XDG_CONFIG_HOME/facewatch/config.toml`, or `~/.config/facewatch/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("facewatch").join("config.toml"))
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, current: T) -> T {
        match self.get(key) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                current
            }),
            None => current,
        }
    }
}
