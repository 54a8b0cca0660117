//! Page-side facilities: the JS host object, display refresh, timers and the
//! status line.

use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

use js_sys::{Function, Reflect};
use nesweb_session::{
    AudioDevice, AudioDeviceError, EventReceiver, FrameScheduler, FrameTicket, Presenter,
    SessionEvent,
};
use tracing::{debug, warn};
use wasm_bindgen::{JsCast, prelude::*};

use crate::engine::describe;

#[wasm_bindgen]
extern "C" {
    /// Object supplied by the page:
    ///
    /// ```text
    /// createEngine({ onFrame, onAudioSample }) -> engine
    /// present(rgba: Uint8Array, width, height)   // copy before returning
    /// openAudio(sampleRate)                      // may throw
    /// closeAudio()
    /// status(kind, message)                      // optional
    /// ```
    #[derive(Clone)]
    pub type Host;

    #[wasm_bindgen(method, catch, js_name = createEngine)]
    pub(crate) fn create_engine(
        this: &Host,
        callbacks: &js_sys::Object,
    ) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, catch)]
    fn present(this: &Host, rgba: &[u8], width: u32, height: u32) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = openAudio)]
    fn open_audio(this: &Host, sample_rate: u32) -> Result<(), JsValue>;

    #[wasm_bindgen(method, catch, js_name = closeAudio)]
    fn close_audio(this: &Host) -> Result<(), JsValue>;

    #[wasm_bindgen(js_name = requestAnimationFrame)]
    fn request_animation_frame(callback: &Function) -> i32;

    #[wasm_bindgen(js_name = cancelAnimationFrame)]
    fn cancel_animation_frame(handle: i32);

    #[wasm_bindgen(js_name = setInterval)]
    fn set_interval(callback: &Function, millis: i32) -> i32;

    #[wasm_bindgen(js_name = clearInterval)]
    fn clear_interval(handle: i32);
}

pub(crate) struct HostPresenter(pub Host);

impl Presenter for HostPresenter {
    fn present(&mut self, rgba: &[u8], width: usize, height: usize) {
        if let Err(err) = self.0.present(rgba, width as u32, height as u32) {
            warn!(err = %describe(&err), "host present() threw");
        }
    }
}

pub(crate) struct HostAudio(pub Host);

impl AudioDevice for HostAudio {
    fn open(&mut self, sample_rate: u32) -> Result<(), AudioDeviceError> {
        self.0
            .open_audio(sample_rate)
            .map_err(|err| AudioDeviceError(describe(&err)))
    }

    fn close(&mut self) {
        if let Err(err) = self.0.close_audio() {
            warn!(err = %describe(&err), "host closeAudio() threw");
        }
    }
}

// ---------------------------------------------------------------------------
// Display refresh
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct RafState {
    /// Outstanding ticket and its `requestAnimationFrame` handle.
    pending: Cell<Option<(FrameTicket, i32)>>,
    callback: RefCell<Option<Closure<dyn FnMut(f64)>>>,
}

impl RafState {
    /// Installs the refresh callback. `on_frame` receives the ticket that
    /// fired.
    pub(crate) fn install(self: &Rc<Self>, mut on_frame: impl FnMut(FrameTicket) + 'static) {
        let state: Weak<RafState> = Rc::downgrade(self);
        let callback = Closure::<dyn FnMut(f64)>::new(move |_timestamp: f64| {
            let Some(state) = state.upgrade() else {
                return;
            };
            if let Some((ticket, _)) = state.pending.take() {
                on_frame(ticket);
            }
        });
        *self.callback.borrow_mut() = Some(callback);
    }

    /// Drops the callback; later requests schedule nothing.
    pub(crate) fn uninstall(&self) {
        if let Some((_, handle)) = self.pending.take() {
            cancel_animation_frame(handle);
        }
        self.callback.borrow_mut().take();
    }
}

/// [`FrameScheduler`] over `requestAnimationFrame`.
pub(crate) struct RafScheduler {
    next: u64,
    state: Rc<RafState>,
}

impl RafScheduler {
    pub(crate) fn new(state: Rc<RafState>) -> Self {
        Self { next: 0, state }
    }
}

impl FrameScheduler for RafScheduler {
    fn request_frame(&mut self) -> FrameTicket {
        self.next += 1;
        let ticket = FrameTicket(self.next);
        match self.state.callback.borrow().as_ref() {
            Some(callback) => {
                let handle = request_animation_frame(callback.as_ref().unchecked_ref());
                self.state.pending.set(Some((ticket, handle)));
            }
            None => warn!(%ticket, "frame requested with no refresh callback installed"),
        }
        ticket
    }

    fn cancel_frame(&mut self, ticket: FrameTicket) {
        match self.state.pending.get() {
            Some((pending, handle)) if pending == ticket => {
                cancel_animation_frame(handle);
                self.state.pending.set(None);
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Autosave timer
// ---------------------------------------------------------------------------

pub(crate) struct IntervalTimer {
    handle: i32,
    _callback: Closure<dyn FnMut()>,
}

impl IntervalTimer {
    pub(crate) fn start(millis: u32, tick: impl FnMut() + 'static) -> Self {
        let callback = Closure::<dyn FnMut()>::new(tick);
        let millis = i32::try_from(millis).unwrap_or(i32::MAX);
        let handle = set_interval(callback.as_ref().unchecked_ref(), millis);
        debug!(millis, "interval timer started");
        Self {
            handle,
            _callback: callback,
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        clear_interval(self.handle);
    }
}

// ---------------------------------------------------------------------------
// Status line
// ---------------------------------------------------------------------------

/// `(kind, message)` pair shown to the user for a session event.
pub(crate) fn status_line(event: &SessionEvent) -> (&'static str, String) {
    match event {
        SessionEvent::StateChanged { to, .. } => ("state", to.to_string()),
        SessionEvent::RomLoaded { name, has_save, .. } => {
            let suffix = if *has_save { " (save state available)" } else { "" };
            ("rom", format!("Loaded {name}{suffix}"))
        }
        SessionEvent::Status(message) => ("info", message.clone()),
        SessionEvent::Error(message) => ("error", message.clone()),
        SessionEvent::AudioUnavailable { reason } => {
            ("warning", format!("Sound is off: {reason}"))
        }
    }
}

/// Forwards session events to `host.status(kind, message)` when the host
/// provides it.
#[derive(Clone)]
pub(crate) struct StatusForwarder {
    host: Host,
    events: EventReceiver,
}

impl StatusForwarder {
    pub(crate) fn new(host: Host, events: EventReceiver) -> Self {
        Self { host, events }
    }

    pub(crate) fn flush(&self) {
        let status = Reflect::get(&self.host, &JsValue::from_str("status"))
            .ok()
            .and_then(|value| value.dyn_into::<Function>().ok());

        for event in self.events.try_iter() {
            let (kind, message) = status_line(&event);
            debug!(kind, %message, "status");
            if let Some(status) = &status {
                let _ = status.call2(
                    &self.host,
                    &JsValue::from_str(kind),
                    &JsValue::from_str(&message),
                );
            }
        }
    }
}
