use thiserror::Error;

/// Failures reported by an engine collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("engine rejected ROM: {0}")]
    RomRejected(String),
    #[error("engine fault: {0}")]
    Fault(String),
}

/// Failures raised by a durable state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by an audio output device that cannot be opened.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AudioDeviceError(pub String);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the session controller can report back to its caller.
///
/// None of these are fatal to the process; at worst the session is left in
/// `Idle`/`Loaded` and the user has to load the ROM again.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unrecognized ROM file `{filename}`: {reason}")]
    InvalidRomFormat { filename: String, reason: String },
    #[error("engine build does not support {capability}")]
    UnsupportedEngineBuild { capability: &'static str },
    #[error("no ROM loaded")]
    NoRomLoaded,
    #[error("session has been shut down")]
    SessionClosed,
    #[error("no save state found for {rom_key}")]
    NoSaveFound { rom_key: String },
    #[error("save state data is corrupt: {reason}")]
    CorruptSaveData { reason: String },
    #[error("save state format v{found} is newer than supported v{supported}")]
    UnsupportedSaveVersion { found: u32, supported: u32 },
    #[error("audio output unavailable: {reason}")]
    AudioUnavailable { reason: String },
    #[error("frame has {actual} pixels, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl SessionError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptSaveData {
            reason: reason.into(),
        }
    }
}
