//! Browser host for the nesweb session controller.
//!
//! JavaScript creates one [`WebSession`] per page, passing a [`Host`] object
//! that owns the canvas, the audio output and the emulator engine
//! constructor. Display refresh runs on `requestAnimationFrame`, autosave on
//! `setInterval`, and save states live in `localStorage`.

mod engine;
mod host;
mod logging;
mod store;

use std::{
    cell::{RefCell, RefMut},
    rc::{Rc, Weak},
};

use nesweb_session::{Button, SaveMode, Session, SessionConfig, SessionError, SessionServices};
use tracing::{Level, warn};
use wasm_bindgen::prelude::*;

pub use engine::{JsEngine, JsEngineFactory};
pub use host::Host;
pub use store::LocalStorageStore;

use host::{HostAudio, HostPresenter, IntervalTimer, RafScheduler, RafState, StatusForwarder};

type JsSession = Session<JsEngineFactory>;

/// Largest block `pullAudio` hands out, in stereo frames.
const MAX_PULL_FRAMES: usize = 16_384;

#[wasm_bindgen(start)]
pub fn start() {
    let level = if cfg!(debug_assertions) {
        Level::DEBUG
    } else {
        Level::INFO
    };
    logging::init(level);
}

/// Runs `f` on the session unless it is gone or already borrowed further up
/// the stack.
fn with_session(session: &Weak<RefCell<JsSession>>, f: impl FnOnce(&mut JsSession)) {
    if let Some(session) = session.upgrade()
        && let Ok(mut session) = session.try_borrow_mut()
    {
        f(&mut session);
    } else {
        warn!("session busy or gone, callback skipped");
    }
}

/// Shared read of `cell`, or `None` while it is mutably borrowed.
fn peek<S, T>(cell: &RefCell<S>, f: impl FnOnce(&S) -> T) -> Option<T> {
    cell.try_borrow().ok().map(|value| f(&value))
}

/// Interleaved length of a `pullAudio` block for a requested frame count.
fn block_len(frames: usize) -> usize {
    frames.min(MAX_PULL_FRAMES) * 2
}

fn parse_button(name: &str) -> Option<Button> {
    serde_json::from_value(serde_json::Value::String(name.to_ascii_lowercase())).ok()
}

#[wasm_bindgen]
pub struct WebSession {
    session: Rc<RefCell<JsSession>>,
    frames: Rc<RafState>,
    status: StatusForwarder,
    autosave: Option<IntervalTimer>,
}

#[wasm_bindgen]
impl WebSession {
    /// `config` is an optional JSON document; omitted fields take their
    /// defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(host: Host, config: Option<String>) -> Result<WebSession, JsError> {
        let config = match config.as_deref() {
            Some(text) => SessionConfig::from_json(text)?,
            None => SessionConfig::default(),
        };
        let autosave_every = config.autosave_interval();

        let frames = Rc::new(RafState::default());
        let services = SessionServices {
            scheduler: Box::new(RafScheduler::new(Rc::clone(&frames))),
            presenter: Box::new(HostPresenter(host.clone())),
            audio: Box::new(HostAudio(host.clone())),
            store: Box::new(LocalStorageStore),
        };
        let session = Session::new(config, JsEngineFactory::new(host.clone()), services)?;
        let status = StatusForwarder::new(host, session.events());
        let session = Rc::new(RefCell::new(session));

        let weak = Rc::downgrade(&session);
        let frame_status = status.clone();
        frames.install(move |ticket| {
            with_session(&weak, |session| session.on_frame(ticket));
            frame_status.flush();
        });

        let autosave = autosave_every.map(|every| {
            let weak = Rc::downgrade(&session);
            let status = status.clone();
            let millis = u32::try_from(every.as_millis()).unwrap_or(u32::MAX);
            IntervalTimer::start(millis, move || {
                with_session(&weak, |session| {
                    session.autosave();
                });
                status.flush();
            })
        });

        Ok(WebSession {
            session,
            frames,
            status,
            autosave,
        })
    }

    fn session(&self) -> Result<RefMut<'_, JsSession>, JsError> {
        self.session
            .try_borrow_mut()
            .map_err(|_| JsError::new("session is busy"))
    }

    fn finish<T>(&self, result: Result<T, SessionError>) -> Result<T, JsError> {
        self.status.flush();
        result.map_err(JsError::from)
    }

    /// Returns whether a save state exists for the ROM.
    #[wasm_bindgen(js_name = loadRom)]
    pub fn load_rom(&self, bytes: &[u8], filename: &str) -> Result<bool, JsError> {
        let result = self
            .session()?
            .load_rom(bytes, filename)
            .map(|outcome| outcome.has_save);
        self.finish(result)
    }

    /// Call from a user gesture: the first call opens audio output.
    pub fn play(&self) -> Result<(), JsError> {
        let result = self.session()?.play();
        self.finish(result)
    }

    pub fn pause(&self) -> Result<(), JsError> {
        self.session()?.pause();
        self.finish(Ok(()))
    }

    pub fn reset(&self) -> Result<(), JsError> {
        let result = self.session()?.reset();
        self.finish(result)
    }

    /// `code` is a `KeyboardEvent.code`. Returns `true` for bound keys so the
    /// page can call `preventDefault()`.
    #[wasm_bindgen(js_name = keyDown)]
    pub fn key_down(&self, code: &str) -> bool {
        let handled = self
            .session
            .try_borrow_mut()
            .is_ok_and(|mut session| session.key_down(code));
        self.status.flush();
        handled
    }

    #[wasm_bindgen(js_name = keyUp)]
    pub fn key_up(&self, code: &str) -> bool {
        let handled = self
            .session
            .try_borrow_mut()
            .is_ok_and(|mut session| session.key_up(code));
        self.status.flush();
        handled
    }

    /// On-screen controls: `button` is one of `a`, `b`, `select`, `start`,
    /// `up`, `down`, `left`, `right`.
    #[wasm_bindgen(js_name = pressButton)]
    pub fn press_button(&self, button: &str, pressed: bool) -> Result<(), JsError> {
        let parsed = parse_button(button)
            .ok_or_else(|| JsError::new(&format!("unknown button `{button}`")))?;
        self.session()?.button(parsed, pressed);
        self.finish(Ok(()))
    }

    #[wasm_bindgen(js_name = saveState)]
    pub fn save_state(&self) -> Result<(), JsError> {
        let result = self.session()?.save_state(SaveMode::Manual).map(drop);
        self.finish(result)
    }

    #[wasm_bindgen(js_name = loadState)]
    pub fn load_state(&self) -> Result<(), JsError> {
        let result = self.session()?.load_state().map(drop);
        self.finish(result)
    }

    #[wasm_bindgen(js_name = deleteState)]
    pub fn delete_state(&self) -> Result<(), JsError> {
        let result = self.session()?.delete_state();
        self.finish(result)
    }

    #[wasm_bindgen(js_name = hasSave)]
    pub fn has_save(&self) -> Result<bool, JsError> {
        let result = self.session()?.has_save();
        result.map_err(JsError::from)
    }

    /// Silent save, also run by the interval timer. Never throws.
    pub fn autosave(&self) -> bool {
        let saved = self
            .session
            .try_borrow_mut()
            .is_ok_and(|mut session| session.autosave());
        self.status.flush();
        saved
    }

    /// Audio output callback: `frames` interleaved stereo frames (at most
    /// 16384), padded with silence when emulation falls behind.
    #[wasm_bindgen(js_name = pullAudio)]
    pub fn pull_audio(&self, frames: usize) -> Vec<f32> {
        let mut block = vec![0.0; block_len(frames)];
        if let Ok(mut session) = self.session.try_borrow_mut() {
            session.pull_audio(&mut block);
        }
        block
    }

    // Getters may run from inside a host callback while the session is
    // mutably borrowed; they answer `busy` / `undefined` / 0 then.

    #[wasm_bindgen(getter, js_name = runState)]
    pub fn run_state(&self) -> String {
        peek(&self.session, |session| session.run_state().to_string())
            .unwrap_or_else(|| "busy".to_string())
    }

    #[wasm_bindgen(getter, js_name = romKey)]
    pub fn rom_key(&self) -> Option<String> {
        peek(&self.session, |session| session.rom_key().map(ToString::to_string))
            .flatten()
    }

    #[wasm_bindgen(getter, js_name = romName)]
    pub fn rom_name(&self) -> Option<String> {
        peek(&self.session, |session| session.rom_name().map(str::to_string))
            .flatten()
    }

    #[wasm_bindgen(getter, js_name = framesRendered)]
    pub fn frames_rendered(&self) -> f64 {
        peek(&self.session, |session| session.frames_rendered() as f64)
            .unwrap_or(0.0)
    }

    #[wasm_bindgen(getter, js_name = sampleRate)]
    pub fn sample_rate(&self) -> u32 {
        peek(&self.session, |session| session.audio().sample_rate())
            .unwrap_or(0)
    }

    /// Page teardown (`pagehide`): stops the loop and the autosave timer,
    /// makes a final silent save and closes audio. Safe to call twice.
    pub fn shutdown(&mut self) {
        self.autosave.take();
        if let Ok(mut session) = self.session.try_borrow_mut() {
            session.shutdown();
        }
        self.frames.uninstall();
        self.status.flush();
    }
}

impl Drop for WebSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
