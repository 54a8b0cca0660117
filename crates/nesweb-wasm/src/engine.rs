//! [`Engine`] over a JavaScript emulator object (jsnes and lookalikes).
//!
//! The JS engine reports its output through the `onFrame` / `onAudioSample`
//! callbacks it was constructed with. Those callbacks only record into a
//! capture buffer; `advance_frame` replays the capture into the session's
//! [`FrameOutput`] once the JS `frame()` call has returned.

use std::{cell::RefCell, rc::Rc};

use js_sys::{Function, JSON, Object, Reflect, Uint8Array, Uint32Array};
use nesweb_session::{
    BinaryState, Button, ControllerPorts, DirectButtons, Engine, EngineError, EngineFactory,
    FrameOutput, JsonState, Joypad, PrimaryControllers, TextState,
};
use tracing::trace;
use wasm_bindgen::{JsCast, prelude::*};

use crate::host::Host;

/// Best-effort text for a thrown JS value.
pub(crate) fn describe(err: &JsValue) -> String {
    if let Some(error) = err.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

/// One char per byte (U+0000..=U+00FF), the form `loadROM` expects.
pub(crate) fn binary_string(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn key(name: &str) -> JsValue {
    JsValue::from_str(name)
}

fn property(target: &JsValue, name: &str) -> Option<JsValue> {
    Reflect::get(target, &key(name))
        .ok()
        .filter(|value| !value.is_undefined() && !value.is_null())
}

fn method(target: &JsValue, name: &str) -> Option<Function> {
    property(target, name)?.dyn_into::<Function>().ok()
}

fn has_methods(target: &JsValue, names: &[&str]) -> bool {
    names.iter().all(|name| method(target, name).is_some())
}

fn fault(err: JsValue) -> EngineError {
    EngineError::Fault(describe(&err))
}

/// Calls `target[name](args...)`.
fn invoke(target: &JsValue, name: &str, args: &[&JsValue]) -> Result<JsValue, EngineError> {
    let func = method(target, name)
        .ok_or_else(|| EngineError::Fault(format!("engine has no {name}()")))?;
    let result = match args {
        [] => func.call0(target),
        [a] => func.call1(target, a),
        [a, b] => func.call2(target, a, b),
        _ => func.apply(target, &args.iter().copied().collect::<js_sys::Array>()),
    };
    result.map_err(fault)
}

#[derive(Default)]
struct Capture {
    pixels: Vec<u32>,
    has_frame: bool,
    samples: Vec<(f32, f32)>,
}

/// A controller object exposing `buttonDown(b)` / `buttonUp(b)`.
struct JsPad {
    object: JsValue,
}

impl JsPad {
    fn probe(object: Option<JsValue>) -> Option<Self> {
        object
            .filter(|object| has_methods(object, &["buttonDown", "buttonUp"]))
            .map(|object| Self { object })
    }
}

impl Joypad for JsPad {
    fn button_down(&mut self, button: Button) -> Result<(), EngineError> {
        invoke(&self.object, "buttonDown", &[&JsValue::from(button.index())]).map(drop)
    }

    fn button_up(&mut self, button: Button) -> Result<(), EngineError> {
        invoke(&self.object, "buttonUp", &[&JsValue::from(button.index())]).map(drop)
    }
}

pub struct JsEngine {
    object: JsValue,
    capture: Rc<RefCell<Capture>>,
    pad: Option<JsPad>,
    _on_frame: Closure<dyn FnMut(JsValue)>,
    _on_audio_sample: Closure<dyn FnMut(f32, f32)>,
}

impl JsEngine {
    fn create(host: &Host) -> Result<Self, EngineError> {
        let capture = Rc::new(RefCell::new(Capture::default()));

        let frame_capture = Rc::clone(&capture);
        let on_frame = Closure::<dyn FnMut(JsValue)>::new(move |buffer: JsValue| {
            let pixels = Uint32Array::new(&buffer);
            let mut capture = frame_capture.borrow_mut();
            capture.pixels.resize(pixels.length() as usize, 0);
            pixels.copy_to(&mut capture.pixels);
            capture.has_frame = true;
        });

        let audio_capture = Rc::clone(&capture);
        let on_audio_sample = Closure::<dyn FnMut(f32, f32)>::new(move |left: f32, right: f32| {
            audio_capture.borrow_mut().samples.push((left, right));
        });

        let callbacks = Object::new();
        Reflect::set(&callbacks, &key("onFrame"), on_frame.as_ref()).map_err(fault)?;
        Reflect::set(&callbacks, &key("onAudioSample"), on_audio_sample.as_ref())
            .map_err(fault)?;

        let object = host.create_engine(&callbacks).map_err(fault)?;
        if !object.is_object() {
            return Err(EngineError::Fault("createEngine() did not return an object".into()));
        }

        Ok(Self {
            object,
            capture,
            pad: None,
            _on_frame: on_frame,
            _on_audio_sample: on_audio_sample,
        })
    }

    fn bind_pad(&mut self, controller: Option<JsValue>) -> Option<&mut dyn Joypad> {
        self.pad = JsPad::probe(controller);
        self.pad.as_mut().map(|pad| pad as &mut dyn Joypad)
    }
}

impl Engine for JsEngine {
    fn load_rom(&mut self, rom: &[u8]) -> Result<(), EngineError> {
        invoke(&self.object, "loadROM", &[&JsValue::from_str(&binary_string(rom))])
            .map(drop)
            .map_err(|err| match err {
                EngineError::Fault(reason) => EngineError::RomRejected(reason),
                other => other,
            })
    }

    fn advance_frame(&mut self, output: &mut dyn FrameOutput) -> Result<(), EngineError> {
        {
            let mut capture = self.capture.borrow_mut();
            capture.has_frame = false;
            capture.samples.clear();
        }

        invoke(&self.object, "frame", &[])?;

        let capture = self.capture.borrow();
        trace!(samples = capture.samples.len(), frame = capture.has_frame, "engine frame");
        for &(left, right) in &capture.samples {
            output.audio_sample(left, right);
        }
        if capture.has_frame {
            output.frame(&capture.pixels);
        }
        Ok(())
    }

    fn controller_ports(&mut self) -> Option<&mut dyn ControllerPorts> {
        property(&self.object, "controllers")
            .filter(JsValue::is_object)
            .map(|_| self as &mut dyn ControllerPorts)
    }

    fn primary_controllers(&mut self) -> Option<&mut dyn PrimaryControllers> {
        property(&self.object, "controller1").map(|_| self as &mut dyn PrimaryControllers)
    }

    fn direct_buttons(&mut self) -> Option<&mut dyn DirectButtons> {
        has_methods(&self.object, &["buttonDown", "buttonUp"])
            .then_some(self as &mut dyn DirectButtons)
    }

    fn json_state(&mut self) -> Option<&mut dyn JsonState> {
        has_methods(&self.object, &["toJSON", "fromJSON"]).then_some(self as &mut dyn JsonState)
    }

    fn text_state(&mut self) -> Option<&mut dyn TextState> {
        has_methods(&self.object, &["saveState", "loadState"])
            .then_some(self as &mut dyn TextState)
    }

    fn binary_state(&mut self) -> Option<&mut dyn BinaryState> {
        has_methods(&self.object, &["serialize", "deserialize"])
            .then_some(self as &mut dyn BinaryState)
    }
}

impl ControllerPorts for JsEngine {
    fn port(&mut self, player: u8) -> Option<&mut dyn Joypad> {
        let controllers = property(&self.object, "controllers")?;
        let controller = Reflect::get(&controllers, &JsValue::from(player)).ok();
        self.bind_pad(controller)
    }
}

impl PrimaryControllers for JsEngine {
    fn controller(&mut self, player: u8) -> Option<&mut dyn Joypad> {
        let controller = property(&self.object, &format!("controller{player}"));
        self.bind_pad(controller)
    }
}

impl DirectButtons for JsEngine {
    fn button_down(&mut self, player: u8, button: Button) -> Result<(), EngineError> {
        let args = [JsValue::from(player), JsValue::from(button.index())];
        invoke(&self.object, "buttonDown", &[&args[0], &args[1]]).map(drop)
    }

    fn button_up(&mut self, player: u8, button: Button) -> Result<(), EngineError> {
        let args = [JsValue::from(player), JsValue::from(button.index())];
        invoke(&self.object, "buttonUp", &[&args[0], &args[1]]).map(drop)
    }
}

impl JsonState for JsEngine {
    fn to_json(&mut self) -> Result<serde_json::Value, EngineError> {
        let state = invoke(&self.object, "toJSON", &[])?;
        let text: String = JSON::stringify(&state).map_err(fault)?.into();
        serde_json::from_str(&text)
            .map_err(|err| EngineError::Fault(format!("toJSON() result is not JSON: {err}")))
    }

    fn from_json(&mut self, state: &serde_json::Value) -> Result<(), EngineError> {
        let text = serde_json::to_string(state)
            .map_err(|err| EngineError::Fault(err.to_string()))?;
        let value = JSON::parse(&text).map_err(fault)?;
        invoke(&self.object, "fromJSON", &[&value]).map(drop)
    }
}

impl TextState for JsEngine {
    fn save_state(&mut self) -> Result<String, EngineError> {
        invoke(&self.object, "saveState", &[])?
            .as_string()
            .ok_or_else(|| EngineError::Fault("saveState() did not return a string".into()))
    }

    fn load_state(&mut self, state: &str) -> Result<(), EngineError> {
        invoke(&self.object, "loadState", &[&JsValue::from_str(state)]).map(drop)
    }
}

impl BinaryState for JsEngine {
    fn serialize(&mut self) -> Result<Vec<u8>, EngineError> {
        let state = invoke(&self.object, "serialize", &[])?;
        if !state.is_object() {
            return Err(EngineError::Fault("serialize() did not return bytes".into()));
        }
        Ok(Uint8Array::new(&state).to_vec())
    }

    fn deserialize(&mut self, state: &[u8]) -> Result<(), EngineError> {
        let bytes = Uint8Array::from(state);
        invoke(&self.object, "deserialize", &[bytes.as_ref()]).map(drop)
    }
}

/// Builds a [`JsEngine`] through `host.createEngine`.
pub struct JsEngineFactory {
    host: Host,
}

impl JsEngineFactory {
    pub fn new(host: Host) -> Self {
        Self { host }
    }
}

impl EngineFactory for JsEngineFactory {
    type Engine = JsEngine;

    fn create(&mut self) -> Result<JsEngine, EngineError> {
        JsEngine::create(&self.host)
    }
}
