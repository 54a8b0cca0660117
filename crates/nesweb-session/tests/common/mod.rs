#![allow(dead_code)]

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use nesweb_session::{
    AudioDevice, AudioDeviceError, BinaryState, Button, ControllerPorts, DirectButtons, Engine,
    EngineError, FrameOutput, InputShape, JsonState, Joypad, ManualScheduler, MemoryStore,
    PrimaryControllers, Presenter, SCREEN_HEIGHT, SCREEN_WIDTH, Session, SessionConfig,
    SessionServices, SnapshotShape, TextState,
};
use serde_json::json;

/// Stereo sample pairs the fake engine emits per frame.
pub const SAMPLES_PER_FRAME: usize = 16;

#[derive(Debug, Clone)]
pub struct FakeSpec {
    pub input: Option<InputShape>,
    pub snapshot: Option<SnapshotShape>,
    pub pixels: usize,
    /// Frame number (1-based) on which `advance_frame` fails.
    pub fault_at: Option<u64>,
}

impl Default for FakeSpec {
    fn default() -> Self {
        Self {
            input: Some(InputShape::ControllerPorts),
            snapshot: Some(SnapshotShape::Json),
            pixels: SCREEN_WIDTH * SCREEN_HEIGHT,
            fault_at: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FakePad {
    pub mask: u8,
}

impl Joypad for FakePad {
    fn button_down(&mut self, button: Button) -> Result<(), EngineError> {
        self.mask |= 1 << button.index();
        Ok(())
    }

    fn button_up(&mut self, button: Button) -> Result<(), EngineError> {
        self.mask &= !(1 << button.index());
        Ok(())
    }
}

/// Deterministic engine: every frame is a pure function of the ROM, the frame
/// number and the held buttons.
#[derive(Debug)]
pub struct FakeEngine {
    spec: FakeSpec,
    seed: u32,
    frame: u64,
    pad: FakePad,
    scratch: Vec<u32>,
}

impl FakeEngine {
    pub fn new(spec: FakeSpec) -> Self {
        let pixels = spec.pixels;
        Self {
            spec,
            seed: 0,
            frame: 0,
            pad: FakePad::default(),
            scratch: vec![0; pixels],
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn buttons(&self) -> u8 {
        self.pad.mask
    }

    fn restore(&mut self, seed: u32, frame: u64, buttons: u8) -> Result<(), EngineError> {
        if seed != self.seed {
            return Err(EngineError::Fault("snapshot from another ROM".into()));
        }
        self.frame = frame;
        self.pad.mask = buttons;
        Ok(())
    }
}

impl Engine for FakeEngine {
    fn load_rom(&mut self, rom: &[u8]) -> Result<(), EngineError> {
        if !rom.starts_with(b"NES\x1a") {
            return Err(EngineError::RomRejected("missing iNES header".into()));
        }
        self.seed = rom
            .iter()
            .fold(0x811C_9DC5u32, |h, &b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
        Ok(())
    }

    fn advance_frame(&mut self, output: &mut dyn FrameOutput) -> Result<(), EngineError> {
        self.frame += 1;
        if self.spec.fault_at == Some(self.frame) {
            return Err(EngineError::Fault(format!("CPU jammed on frame {}", self.frame)));
        }

        let base =
            self.seed ^ (self.frame as u32).wrapping_mul(0x9E37_79B9) ^ u32::from(self.pad.mask);
        for (i, px) in self.scratch.iter_mut().enumerate() {
            *px = base.wrapping_add(i as u32) & 0x00FF_FFFF;
        }
        output.frame(&self.scratch);

        for i in 0..SAMPLES_PER_FRAME {
            let s = ((self.frame as usize + i) % 100) as f32 / 100.0;
            output.audio_sample(s, -s);
        }
        Ok(())
    }

    fn controller_ports(&mut self) -> Option<&mut dyn ControllerPorts> {
        match self.spec.input {
            Some(InputShape::ControllerPorts) => Some(self as &mut dyn ControllerPorts),
            _ => None,
        }
    }

    fn primary_controllers(&mut self) -> Option<&mut dyn PrimaryControllers> {
        match self.spec.input {
            Some(InputShape::PrimaryControllers) => Some(self as &mut dyn PrimaryControllers),
            _ => None,
        }
    }

    fn direct_buttons(&mut self) -> Option<&mut dyn DirectButtons> {
        match self.spec.input {
            Some(InputShape::DirectButtons) => Some(self as &mut dyn DirectButtons),
            _ => None,
        }
    }

    fn json_state(&mut self) -> Option<&mut dyn JsonState> {
        match self.spec.snapshot {
            Some(SnapshotShape::Json) => Some(self as &mut dyn JsonState),
            _ => None,
        }
    }

    fn text_state(&mut self) -> Option<&mut dyn TextState> {
        match self.spec.snapshot {
            Some(SnapshotShape::Text) => Some(self as &mut dyn TextState),
            _ => None,
        }
    }

    fn binary_state(&mut self) -> Option<&mut dyn BinaryState> {
        match self.spec.snapshot {
            Some(SnapshotShape::Binary) => Some(self as &mut dyn BinaryState),
            _ => None,
        }
    }
}

impl ControllerPorts for FakeEngine {
    fn port(&mut self, player: u8) -> Option<&mut dyn Joypad> {
        (player == 1).then_some(&mut self.pad as &mut dyn Joypad)
    }
}

impl PrimaryControllers for FakeEngine {
    fn controller(&mut self, player: u8) -> Option<&mut dyn Joypad> {
        (player == 1).then_some(&mut self.pad as &mut dyn Joypad)
    }
}

impl DirectButtons for FakeEngine {
    fn button_down(&mut self, player: u8, button: Button) -> Result<(), EngineError> {
        if player != 1 {
            return Err(EngineError::Fault(format!("no controller {player}")));
        }
        self.pad.button_down(button)
    }

    fn button_up(&mut self, player: u8, button: Button) -> Result<(), EngineError> {
        if player != 1 {
            return Err(EngineError::Fault(format!("no controller {player}")));
        }
        self.pad.button_up(button)
    }
}

impl JsonState for FakeEngine {
    fn to_json(&mut self) -> Result<serde_json::Value, EngineError> {
        Ok(json!({ "seed": self.seed, "frame": self.frame, "buttons": self.pad.mask }))
    }

    fn from_json(&mut self, state: &serde_json::Value) -> Result<(), EngineError> {
        let field = |name: &str| {
            state[name]
                .as_u64()
                .ok_or_else(|| EngineError::Fault(format!("missing {name}")))
        };
        self.restore(field("seed")? as u32, field("frame")?, field("buttons")? as u8)
    }
}

impl TextState for FakeEngine {
    fn save_state(&mut self) -> Result<String, EngineError> {
        Ok(format!("{}:{}:{}", self.seed, self.frame, self.pad.mask))
    }

    fn load_state(&mut self, state: &str) -> Result<(), EngineError> {
        let bad = || EngineError::Fault(format!("bad state string {state:?}"));
        let mut parts = state.split(':');
        let mut next = || parts.next().and_then(|p| p.parse::<u64>().ok()).ok_or_else(bad);
        let (seed, frame, buttons) = (next()?, next()?, next()?);
        self.restore(seed as u32, frame, buttons as u8)
    }
}

impl BinaryState for FakeEngine {
    fn serialize(&mut self) -> Result<Vec<u8>, EngineError> {
        let mut out = Vec::with_capacity(13);
        out.extend_from_slice(&self.seed.to_le_bytes());
        out.extend_from_slice(&self.frame.to_le_bytes());
        out.push(self.pad.mask);
        Ok(out)
    }

    fn deserialize(&mut self, state: &[u8]) -> Result<(), EngineError> {
        if state.len() != 13 {
            return Err(EngineError::Fault(format!("state is {} bytes", state.len())));
        }
        let seed = u32::from_le_bytes([state[0], state[1], state[2], state[3]]);
        let mut frame = [0u8; 8];
        frame.copy_from_slice(&state[4..12]);
        self.restore(seed, u64::from_le_bytes(frame), state[12])
    }
}

/// Keeps every presented image.
#[derive(Clone, Default)]
pub struct RecordingPresenter {
    pub frames: Rc<RefCell<Vec<Vec<u8>>>>,
    pub sizes: Rc<RefCell<Vec<(usize, usize)>>>,
}

impl RecordingPresenter {
    pub fn count(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn last(&self) -> Option<Vec<u8>> {
        self.frames.borrow().last().cloned()
    }

    pub fn range(&self, start: usize, end: usize) -> Vec<Vec<u8>> {
        self.frames.borrow()[start..end].to_vec()
    }
}

impl Presenter for RecordingPresenter {
    fn present(&mut self, rgba: &[u8], width: usize, height: usize) {
        self.frames.borrow_mut().push(rgba.to_vec());
        self.sizes.borrow_mut().push((width, height));
    }
}

#[derive(Clone, Default)]
pub struct TestAudioDevice {
    pub fail: bool,
    pub opens: Rc<Cell<usize>>,
    pub closes: Rc<Cell<usize>>,
}

impl AudioDevice for TestAudioDevice {
    fn open(&mut self, _sample_rate: u32) -> Result<(), AudioDeviceError> {
        self.opens.set(self.opens.get() + 1);
        if self.fail {
            return Err(AudioDeviceError("autoplay blocked".into()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closes.set(self.closes.get() + 1);
    }
}

pub type FakeFactory = Box<dyn FnMut() -> Result<FakeEngine, EngineError>>;

/// A session over [`FakeEngine`] plus handles on every host facility.
pub struct Harness {
    pub session: Session<FakeFactory>,
    pub scheduler: ManualScheduler,
    pub presenter: RecordingPresenter,
    pub store: MemoryStore,
    pub audio: TestAudioDevice,
    pub engines_created: Rc<Cell<usize>>,
}

impl Harness {
    pub fn new(spec: FakeSpec) -> Self {
        Self::with(spec, SessionConfig::default(), MemoryStore::new(), TestAudioDevice::default())
    }

    pub fn with(
        spec: FakeSpec,
        config: SessionConfig,
        store: MemoryStore,
        audio: TestAudioDevice,
    ) -> Self {
        let scheduler = ManualScheduler::new();
        let presenter = RecordingPresenter::default();
        let engines_created = Rc::new(Cell::new(0));

        let created = Rc::clone(&engines_created);
        let factory: FakeFactory = Box::new(move || {
            created.set(created.get() + 1);
            Ok(FakeEngine::new(spec.clone()))
        });

        let services = SessionServices {
            scheduler: Box::new(scheduler.clone()),
            presenter: Box::new(presenter.clone()),
            audio: Box::new(audio.clone()),
            store: Box::new(store.clone()),
        };
        let session = Session::new(config, factory, services).expect("valid config");

        Self {
            session,
            scheduler,
            presenter,
            store,
            audio,
            engines_created,
        }
    }

    /// Fires `n` display refreshes, one pending ticket each.
    pub fn run_frames(&mut self, n: usize) {
        for _ in 0..n {
            let ticket = self.scheduler.take_pending().expect("a frame should be pending");
            self.session.on_frame(ticket);
        }
    }

    pub fn engine(&self) -> &FakeEngine {
        self.session
            .engine()
            .expect("engine should be loaded")
            .engine()
    }
}

pub fn rom_bytes(len: usize) -> Vec<u8> {
    let mut rom = vec![0u8; len];
    rom[..4].copy_from_slice(b"NES\x1a");
    for (i, b) in rom.iter_mut().enumerate().skip(16) {
        *b = (i * 7 % 251) as u8;
    }
    rom
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
