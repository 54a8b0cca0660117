use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioMode,
    error::ConfigError,
    input::KeyMap,
    rom::DEFAULT_HASH_PREFIX,
    video::{PixelLayout, SCREEN_HEIGHT, SCREEN_WIDTH},
};

/// Largest accepted frame edge, in pixels.
pub const MAX_VIDEO_EDGE: usize = 4096;
/// Longest accepted audio queue, in seconds.
pub const MAX_QUEUE_SECONDS: f32 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoConfig {
    pub width: usize,
    pub height: usize,
    pub pixel_layout: PixelLayout,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: SCREEN_WIDTH,
            height: SCREEN_HEIGHT,
            pixel_layout: PixelLayout::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioConfig {
    pub mode: AudioMode,
    pub sample_rate: u32,
    /// Length of the sample queue in seconds of stereo audio.
    pub queue_seconds: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            mode: AudioMode::Auto,
            sample_rate: 44_100,
            queue_seconds: 1.0,
        }
    }
}

/// Session configuration. Every field has a default, so `{}` is a valid
/// config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Prefix of every storage key.
    pub namespace: String,
    /// Accepted ROM file extensions, without the dot.
    pub rom_extensions: Vec<String>,
    pub video: VideoConfig,
    pub audio: AudioConfig,
    pub autosave_interval_secs: u64,
    pub rom_hash_prefix_bytes: usize,
    pub keys: KeyMap,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "nesweb".to_string(),
            rom_extensions: vec!["nes".to_string()],
            video: VideoConfig::default(),
            audio: AudioConfig::default(),
            autosave_interval_secs: 20,
            rom_hash_prefix_bytes: DEFAULT_HASH_PREFIX,
            keys: KeyMap::standard(),
        }
    }
}

impl SessionConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(ConfigError::Invalid(format!(
                "namespace must be non-empty and free of ':' (got {:?})",
                self.namespace
            )));
        }
        if self.rom_extensions.is_empty() {
            return Err(ConfigError::Invalid("no ROM extensions configured".into()));
        }
        if let Some(ext) = self
            .rom_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.'))
        {
            return Err(ConfigError::Invalid(format!(
                "ROM extension {ext:?} must be non-empty and given without the dot"
            )));
        }
        let edges = 1..=MAX_VIDEO_EDGE;
        if !edges.contains(&self.video.width) || !edges.contains(&self.video.height) {
            return Err(ConfigError::Invalid(format!(
                "video size {}x{} must be between 1 and {MAX_VIDEO_EDGE} on each edge",
                self.video.width, self.video.height
            )));
        }
        if !(8_000..=192_000).contains(&self.audio.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} Hz out of range",
                self.audio.sample_rate
            )));
        }
        let seconds = self.audio.queue_seconds;
        if !(seconds.is_finite() && seconds > 0.0 && seconds <= MAX_QUEUE_SECONDS) {
            return Err(ConfigError::Invalid(format!(
                "audio queue length {seconds}s must be in (0, {MAX_QUEUE_SECONDS}]"
            )));
        }
        if self.rom_hash_prefix_bytes == 0 {
            return Err(ConfigError::Invalid("ROM hash prefix must be non-zero".into()));
        }
        Ok(())
    }

    /// `None` when autosave is switched off (`autosaveIntervalSecs: 0`).
    pub fn autosave_interval(&self) -> Option<Duration> {
        (self.autosave_interval_secs > 0).then(|| Duration::from_secs(self.autosave_interval_secs))
    }
}
