//! Session controller for a browser-hosted NES front-end.
//!
//! The engine that actually emulates the console is an external collaborator
//! (see [`Engine`]). This crate owns everything around it: the run state
//! machine and frame-drive loop, the video and audio sinks, and versioned
//! per-ROM save states. Platform facilities (display refresh, presentation,
//! audio output, durable storage) are traits the host implements.

pub mod adapter;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod input;
pub mod rom;
pub mod savestate;
pub mod schedule;
pub mod session;
pub mod store;
pub mod video;

pub use adapter::{EngineAdapter, InputShape, SnapshotBlob, SnapshotShape};
pub use audio::{AudioBridge, AudioDevice, AudioMode, DeviceState, NoAudioDevice, SampleQueue};
pub use config::{AudioConfig, MAX_QUEUE_SECONDS, MAX_VIDEO_EDGE, SessionConfig, VideoConfig};
pub use engine::{
    BinaryState, Button, ControllerPorts, DirectButtons, Engine, EngineFactory, FrameOutput,
    JsonState, Joypad, PLAYER_ONE, PrimaryControllers, TextState,
};
pub use error::{AudioDeviceError, ConfigError, EngineError, SessionError, StoreError};
pub use input::KeyMap;
pub use rom::{RomImage, RomKey};
pub use savestate::{FORMAT_VERSION, SaveMeta, SaveMode, SaveRecord, SaveStateManager};
pub use schedule::{FrameScheduler, FrameTicket, ManualScheduler};
pub use session::{EventReceiver, LoadOutcome, RunState, Session, SessionEvent, SessionServices};
pub use store::{FileStore, MemoryStore, StateStore};
pub use video::{NullPresenter, PixelLayout, Presenter, SCREEN_HEIGHT, SCREEN_WIDTH, VideoSink};
