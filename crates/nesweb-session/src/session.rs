//! The emulation session controller.
//!
//! A [`Session`] owns everything that lives between the user and the engine:
//! the engine instance (wrapped in an [`EngineAdapter`]), the retained ROM,
//! the run state machine, the frame-drive loop, the video and audio sinks and
//! the save-state manager. All of it runs on one logical thread; the host calls
//! in from its display refresh, audio pull, timers and input handlers.
//!
//! State machine:
//!
//! ```text
//!   Idle --load_rom--> Loaded --play--> Running --pause--> Paused
//!                        ^                 |                 |
//!                        +--reset / load_state (any state)---+
//! ```

use std::fmt;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info, trace, warn};

use crate::{
    adapter::EngineAdapter,
    audio::{AudioBridge, AudioDevice, NoAudioDevice},
    config::SessionConfig,
    engine::{Button, Engine, EngineFactory, FrameOutput, PLAYER_ONE},
    error::{ConfigError, SessionError},
    rom::{RomImage, RomKey},
    savestate::{SaveMeta, SaveMode, SaveStateManager},
    schedule::{FrameScheduler, FrameTicket, ManualScheduler},
    store::{MemoryStore, StateStore},
    video::{NullPresenter, Presenter, VideoSink},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    Idle,
    Loaded,
    Running,
    Paused,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Idle => "idle",
            RunState::Loaded => "loaded",
            RunState::Running => "running",
            RunState::Paused => "paused",
        })
    }
}

/// User-visible notifications, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged {
        from: RunState,
        to: RunState,
    },
    RomLoaded {
        name: String,
        rom_key: String,
        has_save: bool,
    },
    /// Informational message ("State saved", ...).
    Status(String),
    /// A failed user action.
    Error(String),
    /// Reported at most once per session; the session continues without
    /// sound.
    AudioUnavailable {
        reason: String,
    },
}

/// Receiving end of the session's event channel.
pub type EventReceiver = Receiver<SessionEvent>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub rom_key: RomKey,
    /// A save-state record already exists for this ROM.
    pub has_save: bool,
}

/// Host facilities a session runs on.
pub struct SessionServices {
    pub scheduler: Box<dyn FrameScheduler>,
    pub presenter: Box<dyn Presenter>,
    pub audio: Box<dyn AudioDevice>,
    pub store: Box<dyn StateStore>,
}

impl SessionServices {
    /// Manual scheduling, no display, no sound, in-memory saves.
    pub fn headless() -> Self {
        Self {
            scheduler: Box::new(ManualScheduler::new()),
            presenter: Box::new(NullPresenter),
            audio: Box::new(NoAudioDevice),
            store: Box::new(MemoryStore::new()),
        }
    }
}

/// Routes one frame's engine output into the video and audio sinks.
struct FrameSinks<'a> {
    video: &'a mut VideoSink,
    audio: &'a mut AudioBridge,
    rendered: bool,
    error: Option<SessionError>,
}

impl FrameOutput for FrameSinks<'_> {
    fn frame(&mut self, pixels: &[u32]) {
        match self.video.render(pixels) {
            Ok(_) => self.rendered = true,
            Err(err) => self.error = Some(err),
        }
    }

    #[inline]
    fn audio_sample(&mut self, left: f32, right: f32) {
        self.audio.enqueue(left, right);
    }
}

pub struct Session<F: EngineFactory> {
    config: SessionConfig,
    factory: F,
    engine: Option<EngineAdapter<F::Engine>>,
    rom: Option<RomImage>,
    state: RunState,
    pending_frame: Option<FrameTicket>,
    scheduler: Box<dyn FrameScheduler>,
    video: VideoSink,
    presenter: Box<dyn Presenter>,
    audio: AudioBridge,
    saves: SaveStateManager,
    events_tx: Sender<SessionEvent>,
    events_rx: EventReceiver,
    shut_down: bool,
}

impl<F: EngineFactory> Session<F> {
    pub fn new(
        config: SessionConfig,
        factory: F,
        services: SessionServices,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let video = VideoSink::new(
            config.video.width,
            config.video.height,
            config.video.pixel_layout,
        );
        let audio = AudioBridge::new(
            services.audio,
            config.audio.mode,
            config.audio.sample_rate,
            config.audio.queue_seconds,
        );
        let saves = SaveStateManager::new(services.store, config.namespace.clone());
        let (events_tx, events_rx) = unbounded();

        debug!(
            width = config.video.width,
            height = config.video.height,
            layout = ?config.video.pixel_layout,
            sample_rate = config.audio.sample_rate,
            "session created"
        );

        Ok(Self {
            config,
            factory,
            engine: None,
            rom: None,
            state: RunState::Idle,
            pending_frame: None,
            scheduler: services.scheduler,
            video,
            presenter: services.presenter,
            audio,
            saves,
            events_tx,
            events_rx,
            shut_down: false,
        })
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Binds a new ROM. On any failure the previous ROM, engine and run state
    /// are left exactly as they were.
    pub fn load_rom(&mut self, bytes: &[u8], filename: &str) -> Result<LoadOutcome, SessionError> {
        let result = self.try_load_rom(bytes, filename);
        self.surface(result)
    }

    fn try_load_rom(&mut self, bytes: &[u8], filename: &str) -> Result<LoadOutcome, SessionError> {
        self.ensure_open()?;
        let rom = RomImage::new(
            bytes,
            filename,
            &self.config.rom_extensions,
            self.config.rom_hash_prefix_bytes,
        )?;
        let adapter = self.boot(&rom)?;

        self.stop_loop();
        self.engine = Some(adapter);
        self.audio.clear();
        self.video.clear();
        self.set_state(RunState::Loaded);

        let has_save = self.saves.exists(rom.key()).unwrap_or_else(|err| {
            warn!(%err, "could not check for an existing save state");
            false
        });
        info!(name = rom.name(), key = %rom.key(), bytes = rom.len(), has_save, "ROM loaded");

        let outcome = LoadOutcome {
            rom_key: rom.key().clone(),
            has_save,
        };
        self.emit(SessionEvent::RomLoaded {
            name: rom.name().to_string(),
            rom_key: rom.key().to_string(),
            has_save,
        });
        self.rom = Some(rom);
        Ok(outcome)
    }

    /// Starts the frame-drive loop. Opens the audio device on first use, so
    /// this should run from a user gesture.
    pub fn play(&mut self) -> Result<(), SessionError> {
        if let Err(err) = self.ensure_open() {
            return self.surface(Err(err));
        }
        match self.state {
            RunState::Running => return Ok(()),
            RunState::Idle => return self.surface(Err(SessionError::NoRomLoaded)),
            RunState::Loaded | RunState::Paused => {}
        }

        if let Err(SessionError::AudioUnavailable { reason }) = self.audio.initialize() {
            self.emit(SessionEvent::AudioUnavailable { reason });
        }

        self.set_state(RunState::Running);
        self.schedule_next();
        Ok(())
    }

    /// Stops the loop. The engine keeps its state; `play` resumes it.
    pub fn pause(&mut self) {
        if self.state == RunState::Running {
            self.stop_loop();
            self.set_state(RunState::Paused);
        }
    }

    /// Cold boot: a fresh engine from the retained ROM, never an in-place
    /// soft reset. One frame is rendered right away.
    pub fn reset(&mut self) -> Result<(), SessionError> {
        let result = self.try_reset();
        self.surface(result)
    }

    fn try_reset(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let rom = self.rom.clone().ok_or(SessionError::NoRomLoaded)?;
        let adapter = self.boot(&rom)?;

        self.stop_loop();
        self.engine = Some(adapter);
        self.audio.clear();
        self.set_state(RunState::Loaded);
        debug!(key = %rom.key(), "cold reset");
        self.step_frame()
    }

    /// Stops the loop, makes a best-effort silent save and closes the audio
    /// device. Runs at most once; `Drop` calls it too. Afterwards the session
    /// refuses to load, play or reset.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        self.stop_loop();
        if self.state == RunState::Running {
            self.set_state(RunState::Paused);
        }
        if self.rom.is_some() {
            let _ = self.save_state(SaveMode::Silent);
        }
        self.audio.teardown();
        debug!("session shut down");
    }

    // ---------------------------------------------------------------------
    // Frame-drive loop
    // ---------------------------------------------------------------------

    /// Display-refresh callback. Advances exactly one frame if `ticket` is
    /// the pending one and the session is running; anything else is a stale
    /// callback and is ignored.
    pub fn on_frame(&mut self, ticket: FrameTicket) {
        if self.pending_frame != Some(ticket) {
            trace!(%ticket, pending = ?self.pending_frame, "stale frame ticket ignored");
            return;
        }
        self.pending_frame = None;

        if self.state != RunState::Running {
            trace!(%ticket, state = %self.state, "frame ticket outside running state");
            return;
        }

        match self.step_frame() {
            Ok(()) => self.schedule_next(),
            Err(err) => {
                warn!(%err, "frame failed, pausing");
                self.set_state(RunState::Paused);
                self.emit(SessionEvent::Error(err.to_string()));
            }
        }
    }

    fn schedule_next(&mut self) {
        let ticket = self.scheduler.request_frame();
        trace!(%ticket, "next frame requested");
        self.pending_frame = Some(ticket);
    }

    fn stop_loop(&mut self) {
        if let Some(ticket) = self.pending_frame.take() {
            self.scheduler.cancel_frame(ticket);
            trace!(%ticket, "pending frame cancelled");
        }
    }

    /// Advances the engine one frame, then renders and presents what it
    /// produced. Engine advance happens before rendering.
    fn step_frame(&mut self) -> Result<(), SessionError> {
        let engine = self.engine.as_mut().ok_or(SessionError::NoRomLoaded)?;
        let mut sinks = FrameSinks {
            video: &mut self.video,
            audio: &mut self.audio,
            rendered: false,
            error: None,
        };
        engine.advance_frame(&mut sinks)?;

        let FrameSinks { rendered, error, .. } = sinks;
        if let Some(err) = error {
            return Err(err);
        }
        if rendered {
            self.presenter
                .present(self.video.image(), self.video.width(), self.video.height());
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Input
    // ---------------------------------------------------------------------

    /// Returns whether `code` is bound, so the host can suppress the
    /// browser's default action for it.
    pub fn key_down(&mut self, code: &str) -> bool {
        self.key_event(code, true)
    }

    pub fn key_up(&mut self, code: &str) -> bool {
        self.key_event(code, false)
    }

    fn key_event(&mut self, code: &str, pressed: bool) -> bool {
        match self.config.keys.lookup(code) {
            Some(button) => {
                self.button(button, pressed);
                true
            }
            None => false,
        }
    }

    /// Player one button event, e.g. from on-screen controls. Ignored until a
    /// ROM is loaded.
    pub fn button(&mut self, button: Button, pressed: bool) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        match engine.button_event(PLAYER_ONE, button, pressed) {
            Ok(()) => {}
            Err(err @ SessionError::UnsupportedEngineBuild { .. }) => {
                warn!(%err, "engine cannot take input, stopping");
                self.stop_loop();
                self.set_state(RunState::Loaded);
                self.emit(SessionEvent::Error(err.to_string()));
            }
            Err(err) => {
                warn!(%err, ?button, pressed, "button event failed");
                self.emit(SessionEvent::Error(err.to_string()));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Save states
    // ---------------------------------------------------------------------

    /// Snapshots the engine and persists it for the bound ROM.
    ///
    /// `Manual` reports the outcome on the event channel; `Silent` only
    /// logs. The result is returned either way.
    pub fn save_state(&mut self, mode: SaveMode) -> Result<SaveMeta, SessionError> {
        let result = self.write_save();
        match (&result, mode) {
            (Ok(meta), SaveMode::Manual) => {
                let at = meta.saved_at.format("%H:%M:%S");
                self.emit(SessionEvent::Status(format!("State saved at {at}")));
            }
            (Err(err), SaveMode::Manual) => self.emit(SessionEvent::Error(err.to_string())),
            (Ok(meta), SaveMode::Silent) => debug!(saved_at = %meta.saved_at, "autosaved"),
            (Err(err), SaveMode::Silent) => warn!(%err, "silent save failed"),
        }
        result
    }

    fn write_save(&mut self) -> Result<SaveMeta, SessionError> {
        let (Some(rom), Some(engine)) = (self.rom.as_ref(), self.engine.as_mut()) else {
            return Err(SessionError::NoRomLoaded);
        };
        let blob = engine.export_snapshot()?;
        self.saves.write(rom, &blob)
    }

    /// Restores the saved state of the bound ROM into a fresh engine.
    ///
    /// The record is read, validated and imported before the session is
    /// touched, so every failure leaves the current engine and run state
    /// as they were.
    pub fn load_state(&mut self) -> Result<SaveMeta, SessionError> {
        let result = self.try_load_state();
        self.surface(result)
    }

    fn try_load_state(&mut self) -> Result<SaveMeta, SessionError> {
        self.ensure_open()?;
        let rom = self.rom.clone().ok_or(SessionError::NoRomLoaded)?;
        let record = self.saves.read(rom.key())?;

        let mut adapter = self.boot(&rom)?;
        adapter.import_snapshot(&record.state)?;

        self.stop_loop();
        self.engine = Some(adapter);
        self.audio.clear();
        self.set_state(RunState::Loaded);
        info!(key = %rom.key(), saved_at = %record.meta.saved_at, "save state loaded");

        self.step_frame()?;
        self.emit(SessionEvent::Status("State loaded".to_string()));
        Ok(record.meta)
    }

    /// Removes the record of the bound ROM. Deleting twice is fine.
    pub fn delete_state(&mut self) -> Result<(), SessionError> {
        let result = match self.rom.as_ref() {
            Some(rom) => self.saves.delete(rom.key()),
            None => Err(SessionError::NoRomLoaded),
        };
        if result.is_ok() {
            self.emit(SessionEvent::Status("Save state deleted".to_string()));
        }
        self.surface(result)
    }

    pub fn has_save(&self) -> Result<bool, SessionError> {
        let rom = self.rom.as_ref().ok_or(SessionError::NoRomLoaded)?;
        self.saves.exists(rom.key())
    }

    /// Timer callback: silent save while a ROM is bound. Never fails;
    /// returns whether a record was written.
    pub fn autosave(&mut self) -> bool {
        if self.rom.is_none() || self.shut_down {
            return false;
        }
        self.save_state(SaveMode::Silent).is_ok()
    }

    // ---------------------------------------------------------------------
    // Audio
    // ---------------------------------------------------------------------

    /// Audio device callback: fills `out` with interleaved stereo samples,
    /// silence when the queue runs dry.
    pub fn pull_audio(&mut self, out: &mut [f32]) -> usize {
        self.audio.pull_into(out)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn events(&self) -> EventReceiver {
        self.events_rx.clone()
    }

    pub fn run_state(&self) -> RunState {
        self.state
    }

    pub fn rom_key(&self) -> Option<&RomKey> {
        self.rom.as_ref().map(RomImage::key)
    }

    pub fn rom_name(&self) -> Option<&str> {
        self.rom.as_ref().map(RomImage::name)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.video.frames_rendered()
    }

    /// Last rendered RGBA image.
    pub fn frame_image(&self) -> &[u8] {
        self.video.image()
    }

    pub fn pending_frame(&self) -> Option<FrameTicket> {
        self.pending_frame
    }

    pub fn engine(&self) -> Option<&EngineAdapter<F::Engine>> {
        self.engine.as_ref()
    }

    pub fn audio(&self) -> &AudioBridge {
        &self.audio
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.shut_down {
            return Err(SessionError::SessionClosed);
        }
        Ok(())
    }

    fn boot(&mut self, rom: &RomImage) -> Result<EngineAdapter<F::Engine>, SessionError> {
        let mut engine = self.factory.create()?;
        engine.load_rom(rom.bytes())?;
        Ok(EngineAdapter::new(engine))
    }

    fn set_state(&mut self, to: RunState) {
        let from = self.state;
        if from == to {
            return;
        }
        debug!(%from, %to, "run state changed");
        self.state = to;
        self.emit(SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: SessionEvent) {
        // The session holds a receiver, so the channel never disconnects.
        let _ = self.events_tx.send(event);
    }

    /// Mirrors a failed user action onto the event channel.
    fn surface<T>(&self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(err) = &result {
            debug!(%err, "operation failed");
            self.emit(SessionEvent::Error(err.to_string()));
        }
        result
    }
}

impl<F: EngineFactory> Drop for Session<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
