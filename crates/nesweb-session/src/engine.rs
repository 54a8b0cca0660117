//! Contract of the external emulation engine.
//!
//! The engine is an opaque collaborator: it interprets the ROM and advances
//! the machine one display frame at a time. Different engine builds expose
//! controller input and snapshots through different method shapes; each shape
//! is a separate trait here and an engine advertises the ones it has through
//! the `Option`-returning probes on [`Engine`]. [`crate::EngineAdapter`] picks
//! one shape per engine instance and sticks with it.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Player number of the single controller the session drives.
pub const PLAYER_ONE: u8 = 1;

/// Standard pad buttons. Discriminants follow the controller shift register
/// order (A first), which is also the numbering engines expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Button {
    A = 0,
    B = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    #[inline]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

/// Receives what the engine produces while advancing one frame.
pub trait FrameOutput {
    /// Finished frame: `width * height` packed 32-bit pixels.
    fn frame(&mut self, pixels: &[u32]);
    /// One stereo sample pair.
    fn audio_sample(&mut self, left: f32, right: f32);
}

/// A single controller object (`controllers[n]` / `controllerN` shapes).
pub trait Joypad {
    fn button_down(&mut self, button: Button) -> Result<(), EngineError>;
    fn button_up(&mut self, button: Button) -> Result<(), EngineError>;
}

/// Indexed controller array, addressed by player number.
pub trait ControllerPorts {
    fn port(&mut self, player: u8) -> Option<&mut dyn Joypad>;
}

/// Named controller fields (`controller1`, `controller2`).
pub trait PrimaryControllers {
    fn controller(&mut self, player: u8) -> Option<&mut dyn Joypad>;
}

/// Button events addressed directly on the engine with a player argument.
pub trait DirectButtons {
    fn button_down(&mut self, player: u8, button: Button) -> Result<(), EngineError>;
    fn button_up(&mut self, player: u8, button: Button) -> Result<(), EngineError>;
}

/// Structured snapshots (`toJSON` / `fromJSON`).
pub trait JsonState {
    fn to_json(&mut self) -> Result<serde_json::Value, EngineError>;
    fn from_json(&mut self, state: &serde_json::Value) -> Result<(), EngineError>;
}

/// Snapshots as an opaque string (`saveState` / `loadState`).
pub trait TextState {
    fn save_state(&mut self) -> Result<String, EngineError>;
    fn load_state(&mut self, state: &str) -> Result<(), EngineError>;
}

/// Snapshots as raw bytes (`serialize` / `deserialize`).
pub trait BinaryState {
    fn serialize(&mut self) -> Result<Vec<u8>, EngineError>;
    fn deserialize(&mut self, state: &[u8]) -> Result<(), EngineError>;
}

/// The emulation engine itself.
///
/// Capability probes default to "absent"; an engine overrides the ones its
/// build actually provides.
pub trait Engine {
    fn load_rom(&mut self, rom: &[u8]) -> Result<(), EngineError>;

    /// Advances exactly one display frame, reporting the frame and the audio
    /// produced during it to `output`.
    fn advance_frame(&mut self, output: &mut dyn FrameOutput) -> Result<(), EngineError>;

    fn controller_ports(&mut self) -> Option<&mut dyn ControllerPorts> {
        None
    }

    fn primary_controllers(&mut self) -> Option<&mut dyn PrimaryControllers> {
        None
    }

    fn direct_buttons(&mut self) -> Option<&mut dyn DirectButtons> {
        None
    }

    fn json_state(&mut self) -> Option<&mut dyn JsonState> {
        None
    }

    fn text_state(&mut self) -> Option<&mut dyn TextState> {
        None
    }

    fn binary_state(&mut self) -> Option<&mut dyn BinaryState> {
        None
    }
}

/// Builds fresh engine instances. A new instance is created for every ROM
/// load, cold reset and state load.
pub trait EngineFactory {
    type Engine: Engine;

    fn create(&mut self) -> Result<Self::Engine, EngineError>;
}

impl<E, F> EngineFactory for F
where
    E: Engine,
    F: FnMut() -> Result<E, EngineError>,
{
    type Engine = E;

    fn create(&mut self) -> Result<E, EngineError> {
        self()
    }
}
