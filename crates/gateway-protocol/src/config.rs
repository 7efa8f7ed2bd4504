use serde::{Deserialize, Serialize};

/// Top-level configuration for the gateway process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Resolution ceiling frames are resized to before inference (C4).
    #[serde(default = "default_max_width")]
    pub max_frame_width: u32,
    #[serde(default = "default_max_height")]
    pub max_frame_height: u32,
    /// Frames larger than this on the wire are rejected as `FRAME_TOO_LARGE`.
    #[serde(default = "default_max_frame_size_bytes")]
    pub max_frame_size_bytes: u64,
    /// Below this Laplacian-variance score a frame gets `quality_warning`.
    #[serde(default = "default_blur_warning_threshold")]
    pub blur_warning_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_audio_window_seconds")]
    pub window_seconds: f64,
    #[serde(default = "default_audio_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_audio_sample_rate")]
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Minimum accepted detection confidence; authoritative for both backends.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Empty disables the remote backend.
    #[serde(default)]
    pub remote_url: String,
    #[serde(default)]
    pub remote_key: String,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default)]
    pub local_enabled: bool,
    pub local_weights_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: u32,
    #[serde(default = "default_idle_timeout_sec")]
    pub idle_timeout_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_frame_width: default_max_width(),
            max_frame_height: default_max_height(),
            max_frame_size_bytes: default_max_frame_size_bytes(),
            blur_warning_threshold: default_blur_warning_threshold(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            window_seconds: default_audio_window_seconds(),
            batch_size: default_audio_batch_size(),
            sample_rate: default_audio_sample_rate(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            remote_url: String::new(),
            remote_key: String::new(),
            remote_timeout_secs: default_remote_timeout_secs(),
            local_enabled: false,
            local_weights_path: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            idle_timeout_sec: default_idle_timeout_sec(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            inference: InferenceConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Overlay recognized environment variables onto a loaded config
    /// (SPEC_FULL.md §2, env-style overrides named in spec.md §6).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MAX_CONCURRENT_SESSIONS") {
            if let Ok(v) = v.parse() {
                self.session.max_concurrent_sessions = v;
            }
        }
        if let Ok(v) = std::env::var("CONFIDENCE_THRESHOLD") {
            if let Ok(v) = v.parse() {
                self.inference.confidence_threshold = v;
            }
        }
        if let Ok(v) = std::env::var("MAX_FRAME_WIDTH") {
            if let Ok(v) = v.parse() {
                self.video.max_frame_width = v;
            }
        }
        if let Ok(v) = std::env::var("MAX_FRAME_HEIGHT") {
            if let Ok(v) = v.parse() {
                self.video.max_frame_height = v;
            }
        }
        if let Ok(v) = std::env::var("IDLE_TIMEOUT_SEC") {
            if let Ok(v) = v.parse() {
                self.session.idle_timeout_sec = v;
            }
        }
        if let Ok(v) = std::env::var("MAX_FRAME_SIZE_BYTES") {
            if let Ok(v) = v.parse() {
                self.video.max_frame_size_bytes = v;
            }
        }
        if let Ok(v) = std::env::var("INFERENCE_REMOTE_URL") {
            self.inference.remote_url = v;
        }
        if let Ok(v) = std::env::var("INFERENCE_REMOTE_KEY") {
            self.inference.remote_key = v;
        }
        if let Ok(v) = std::env::var("INFERENCE_REMOTE_TIMEOUT_SEC") {
            if let Ok(v) = v.parse() {
                self.inference.remote_timeout_secs = v;
            }
        }
        if let Ok(v) = std::env::var("INFERENCE_LOCAL_ENABLED") {
            if let Ok(v) = v.parse() {
                self.inference.local_enabled = v;
            }
        }
        if let Ok(v) = std::env::var("INFERENCE_LOCAL_WEIGHTS_PATH") {
            self.inference.local_weights_path = Some(v);
        }
        if let Ok(v) = std::env::var("BLUR_WARNING_THRESHOLD") {
            if let Ok(v) = v.parse() {
                self.video.blur_warning_threshold = v;
            }
        }
        if let Ok(v) = std::env::var("AUDIO_WINDOW_SECONDS") {
            if let Ok(v) = v.parse() {
                self.audio.window_seconds = v;
            }
        }
        if let Ok(v) = std::env::var("AUDIO_BATCH_SIZE") {
            if let Ok(v) = v.parse() {
                self.audio.batch_size = v;
            }
        }
        if let Ok(v) = std::env::var("AUDIO_SAMPLE_RATE") {
            if let Ok(v) = v.parse() {
                self.audio.sample_rate = v;
            }
        }
    }

    /// Validate the configuration, returning a list of issues found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal, server should not start) or
    /// "WARNING:" (advisory, server can start but the config is likely wrong).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push("ERROR: server.port must be between 1 and 65535, got 0.".to_string());
        }

        if self.video.max_frame_width == 0 || self.video.max_frame_width > 7680 {
            issues.push(format!(
                "ERROR: video.max_frame_width must be between 1 and 7680, got {}.",
                self.video.max_frame_width
            ));
        }
        if self.video.max_frame_height == 0 || self.video.max_frame_height > 4320 {
            issues.push(format!(
                "ERROR: video.max_frame_height must be between 1 and 4320, got {}.",
                self.video.max_frame_height
            ));
        }
        if self.video.max_frame_size_bytes == 0 {
            issues.push("ERROR: video.max_frame_size_bytes must be >= 1.".to_string());
        }

        if !(0.0..=1.0).contains(&self.inference.confidence_threshold) {
            issues.push(format!(
                "ERROR: inference.confidence_threshold must be between 0.0 and 1.0, got {}.",
                self.inference.confidence_threshold
            ));
        }
        if !self.inference.remote_url.is_empty()
            && !(self.inference.remote_url.starts_with("http://")
                || self.inference.remote_url.starts_with("https://"))
        {
            issues.push(format!(
                "ERROR: inference.remote_url '{}' must start with 'http://' or 'https://'.",
                self.inference.remote_url
            ));
        }
        if self.inference.remote_url.is_empty() && !self.inference.local_enabled {
            issues.push(
                "WARNING: no remote inference URL and local inference disabled — \
                 the router will emit empty detections for every frame."
                    .to_string(),
            );
        }
        if self.inference.local_enabled && self.inference.local_weights_path.is_none() {
            issues.push(
                "ERROR: inference.local_enabled is true but local_weights_path is not set."
                    .to_string(),
            );
        }

        if self.session.max_concurrent_sessions == 0 {
            issues.push("ERROR: session.max_concurrent_sessions must be >= 1.".to_string());
        }

        if self.audio.window_seconds <= 0.0 {
            issues.push("ERROR: audio.window_seconds must be > 0.".to_string());
        }
        if self.audio.batch_size == 0 {
            issues.push("ERROR: audio.batch_size must be >= 1.".to_string());
        }
        if self.audio.sample_rate == 0 {
            issues.push("ERROR: audio.sample_rate must be >= 1.".to_string());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_width() -> u32 {
    1280
}
fn default_max_height() -> u32 {
    720
}
fn default_max_frame_size_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_blur_warning_threshold() -> f64 {
    100.0
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_remote_timeout_secs() -> u64 {
    10
}
fn default_max_concurrent_sessions() -> u32 {
    10
}
fn default_idle_timeout_sec() -> u64 {
    30
}
fn default_audio_window_seconds() -> f64 {
    1.0
}
fn default_audio_batch_size() -> usize {
    10
}
fn default_audio_sample_rate() -> u32 {
    48_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_from_empty_string() {
        let config: GatewayConfig =
            toml::from_str("").expect("empty string should deserialize to default config");

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.video.max_frame_width, 1280);
        assert_eq!(config.video.max_frame_height, 720);
        assert_eq!(config.inference.confidence_threshold, 0.5);
        assert_eq!(config.session.idle_timeout_sec, 30);
        assert_eq!(config.audio.window_seconds, 1.0);
        assert_eq!(config.audio.batch_size, 10);
        assert_eq!(config.audio.sample_rate, 48_000);
    }

    #[test]
    fn default_config_validates_with_a_warning_only() {
        // No remote URL, no local backend: valid but warns.
        let issues = GatewayConfig::default().validate().unwrap_err();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].starts_with("WARNING"));
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = GatewayConfig::default();
        config.server.port = 0;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.starts_with("ERROR") && i.contains("port")));
    }

    #[test]
    fn local_enabled_without_weights_is_an_error() {
        let mut config = GatewayConfig::default();
        config.inference.local_enabled = true;
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("local_weights_path")));
    }

    #[test]
    fn remote_url_without_scheme_is_an_error() {
        let mut config = GatewayConfig::default();
        config.inference.remote_url = "inference.example.com".to_string();
        let issues = config.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("remote_url")));
    }

    #[test]
    fn env_overrides_apply() {
        unsafe {
            std::env::set_var("CONFIDENCE_THRESHOLD", "0.75");
            std::env::set_var("IDLE_TIMEOUT_SEC", "45");
        }
        let mut config = GatewayConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("CONFIDENCE_THRESHOLD");
            std::env::remove_var("IDLE_TIMEOUT_SEC");
        }
        assert_eq!(config.inference.confidence_threshold, 0.75);
        assert_eq!(config.session.idle_timeout_sec, 45);
    }
}
