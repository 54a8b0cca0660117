use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{
    engine::{Button, Engine, FrameOutput, Joypad},
    error::{EngineError, SessionError},
};

const INPUT_CAPABILITY: &str = "controller input";
const EXPORT_CAPABILITY: &str = "snapshot export";

/// How a particular engine build accepts button events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputShape {
    ControllerPorts,
    PrimaryControllers,
    DirectButtons,
}

impl InputShape {
    pub const PROBE_ORDER: [InputShape; 3] = [
        InputShape::ControllerPorts,
        InputShape::PrimaryControllers,
        InputShape::DirectButtons,
    ];
}

/// How a particular engine build exports and imports its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotShape {
    Json,
    Text,
    Binary,
}

impl SnapshotShape {
    pub const PROBE_ORDER: [SnapshotShape; 3] =
        [SnapshotShape::Json, SnapshotShape::Text, SnapshotShape::Binary];

    fn import_capability(self) -> &'static str {
        match self {
            SnapshotShape::Json => "JSON snapshot import",
            SnapshotShape::Text => "text snapshot import",
            SnapshotShape::Binary => "binary snapshot import",
        }
    }
}

/// Engine state captured through one of the snapshot shapes.
///
/// The variant records which shape produced it, so a stored payload is only
/// ever handed back to the same kind of entry point. Binary payloads are
/// base64 encoded when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "data", rename_all = "snake_case")]
pub enum SnapshotBlob {
    Json(serde_json::Value),
    Text(String),
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl SnapshotBlob {
    pub fn shape(&self) -> SnapshotShape {
        match self {
            SnapshotBlob::Json(_) => SnapshotShape::Json,
            SnapshotBlob::Text(_) => SnapshotShape::Text,
            SnapshotBlob::Binary(_) => SnapshotShape::Binary,
        }
    }
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(D::Error::custom)
    }
}

/// Outcome of trying one shape.
enum Probe {
    /// The engine does not expose this shape at all.
    Missing,
    /// The shape exists but the call failed.
    Failed(EngineError),
}

impl Probe {
    fn into_error(self, capability: &'static str) -> SessionError {
        match self {
            Probe::Missing => SessionError::UnsupportedEngineBuild { capability },
            Probe::Failed(err) => SessionError::Engine(err),
        }
    }
}

/// Normalizes an engine's input and snapshot surface.
///
/// The first call of each kind probes the candidate shapes in
/// [`InputShape::PROBE_ORDER`] / [`SnapshotShape::PROBE_ORDER`] and caches the
/// first one that exists and succeeds. Later calls go straight to the cached
/// shape. The cache lives and dies with the engine instance.
pub struct EngineAdapter<E> {
    engine: E,
    input: Option<InputShape>,
    snapshot: Option<SnapshotShape>,
}

impl<E: Engine> EngineAdapter<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            input: None,
            snapshot: None,
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn input_shape(&self) -> Option<InputShape> {
        self.input
    }

    pub fn snapshot_shape(&self) -> Option<SnapshotShape> {
        self.snapshot
    }

    pub fn advance_frame(&mut self, output: &mut dyn FrameOutput) -> Result<(), EngineError> {
        self.engine.advance_frame(output)
    }

    pub fn button_event(
        &mut self,
        player: u8,
        button: Button,
        pressed: bool,
    ) -> Result<(), SessionError> {
        if let Some(shape) = self.input {
            return self
                .send_button(shape, player, button, pressed)
                .map_err(|probe| probe.into_error(INPUT_CAPABILITY));
        }

        let mut last_error = None;
        for shape in InputShape::PROBE_ORDER {
            match self.send_button(shape, player, button, pressed) {
                Ok(()) => {
                    debug!(?shape, "engine input shape detected");
                    self.input = Some(shape);
                    return Ok(());
                }
                Err(Probe::Missing) => {}
                Err(Probe::Failed(err)) => {
                    trace!(?shape, %err, "input shape present but failed");
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(err) => SessionError::Engine(err),
            None => SessionError::UnsupportedEngineBuild {
                capability: INPUT_CAPABILITY,
            },
        })
    }

    pub fn export_snapshot(&mut self) -> Result<SnapshotBlob, SessionError> {
        if let Some(shape) = self.snapshot {
            return self
                .export_with(shape)
                .map_err(|probe| probe.into_error(EXPORT_CAPABILITY));
        }

        let mut last_error = None;
        for shape in SnapshotShape::PROBE_ORDER {
            match self.export_with(shape) {
                Ok(blob) => {
                    debug!(?shape, "engine snapshot shape detected");
                    self.snapshot = Some(shape);
                    return Ok(blob);
                }
                Err(Probe::Missing) => {}
                Err(Probe::Failed(err)) => {
                    trace!(?shape, %err, "snapshot shape present but failed");
                    last_error = Some(err);
                }
            }
        }

        Err(match last_error {
            Some(err) => SessionError::Engine(err),
            None => SessionError::UnsupportedEngineBuild {
                capability: EXPORT_CAPABILITY,
            },
        })
    }

    /// Restores state captured by [`Self::export_snapshot`]. The blob's own
    /// shape selects the entry point.
    pub fn import_snapshot(&mut self, blob: &SnapshotBlob) -> Result<(), SessionError> {
        let shape = blob.shape();
        self.import_with(blob)
            .map_err(|probe| probe.into_error(shape.import_capability()))?;
        self.snapshot = Some(shape);
        Ok(())
    }

    fn send_button(
        &mut self,
        shape: InputShape,
        player: u8,
        button: Button,
        pressed: bool,
    ) -> Result<(), Probe> {
        match shape {
            InputShape::ControllerPorts => {
                let ports = self.engine.controller_ports().ok_or(Probe::Missing)?;
                let pad = ports.port(player).ok_or(Probe::Missing)?;
                press(pad, button, pressed)
            }
            InputShape::PrimaryControllers => {
                let named = self.engine.primary_controllers().ok_or(Probe::Missing)?;
                let pad = named.controller(player).ok_or(Probe::Missing)?;
                press(pad, button, pressed)
            }
            InputShape::DirectButtons => {
                let direct = self.engine.direct_buttons().ok_or(Probe::Missing)?;
                let result = if pressed {
                    direct.button_down(player, button)
                } else {
                    direct.button_up(player, button)
                };
                result.map_err(Probe::Failed)
            }
        }
    }

    fn export_with(&mut self, shape: SnapshotShape) -> Result<SnapshotBlob, Probe> {
        match shape {
            SnapshotShape::Json => {
                let state = self.engine.json_state().ok_or(Probe::Missing)?;
                state.to_json().map(SnapshotBlob::Json).map_err(Probe::Failed)
            }
            SnapshotShape::Text => {
                let state = self.engine.text_state().ok_or(Probe::Missing)?;
                state.save_state().map(SnapshotBlob::Text).map_err(Probe::Failed)
            }
            SnapshotShape::Binary => {
                let state = self.engine.binary_state().ok_or(Probe::Missing)?;
                state.serialize().map(SnapshotBlob::Binary).map_err(Probe::Failed)
            }
        }
    }

    fn import_with(&mut self, blob: &SnapshotBlob) -> Result<(), Probe> {
        match blob {
            SnapshotBlob::Json(value) => {
                let state = self.engine.json_state().ok_or(Probe::Missing)?;
                state.from_json(value).map_err(Probe::Failed)
            }
            SnapshotBlob::Text(text) => {
                let state = self.engine.text_state().ok_or(Probe::Missing)?;
                state.load_state(text).map_err(Probe::Failed)
            }
            SnapshotBlob::Binary(bytes) => {
                let state = self.engine.binary_state().ok_or(Probe::Missing)?;
                state.deserialize(bytes).map_err(Probe::Failed)
            }
        }
    }
}

fn press(pad: &mut dyn Joypad, button: Button, pressed: bool) -> Result<(), Probe> {
    let result = if pressed {
        pad.button_down(button)
    } else {
        pad.button_up(button)
    };
    result.map_err(Probe::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{DirectButtons, PrimaryControllers};

    /// Minimal engine exposing the named-controller and direct shapes, with
    /// a switch to make the named shape fail.
    #[derive(Default)]
    struct ProbeEngine {
        named_fails: bool,
        probes: usize,
        presses: Vec<(&'static str, u8, Button, bool)>,
        pad: ProbePad,
    }

    #[derive(Default)]
    struct ProbePad {
        presses: Vec<(Button, bool)>,
    }

    impl Joypad for ProbePad {
        fn button_down(&mut self, button: Button) -> Result<(), EngineError> {
            self.presses.push((button, true));
            Ok(())
        }

        fn button_up(&mut self, button: Button) -> Result<(), EngineError> {
            self.presses.push((button, false));
            Ok(())
        }
    }

    impl Engine for ProbeEngine {
        fn load_rom(&mut self, _rom: &[u8]) -> Result<(), EngineError> {
            Ok(())
        }

        fn advance_frame(&mut self, _output: &mut dyn FrameOutput) -> Result<(), EngineError> {
            Ok(())
        }

        fn primary_controllers(&mut self) -> Option<&mut dyn PrimaryControllers> {
            self.probes += 1;
            Some(self as &mut dyn PrimaryControllers)
        }

        fn direct_buttons(&mut self) -> Option<&mut dyn DirectButtons> {
            self.probes += 1;
            Some(self as &mut dyn DirectButtons)
        }
    }

    impl PrimaryControllers for ProbeEngine {
        fn controller(&mut self, player: u8) -> Option<&mut dyn Joypad> {
            if self.named_fails || player != 1 {
                return None;
            }
            Some(&mut self.pad)
        }
    }

    impl DirectButtons for ProbeEngine {
        fn button_down(&mut self, player: u8, button: Button) -> Result<(), EngineError> {
            self.presses.push(("direct", player, button, true));
            Ok(())
        }

        fn button_up(&mut self, player: u8, button: Button) -> Result<(), EngineError> {
            self.presses.push(("direct", player, button, false));
            Ok(())
        }
    }

    struct Bare;

    impl Engine for Bare {
        fn load_rom(&mut self, _rom: &[u8]) -> Result<(), EngineError> {
            Ok(())
        }

        fn advance_frame(&mut self, _output: &mut dyn FrameOutput) -> Result<(), EngineError> {
            Ok(())
        }
    }

    #[test]
    fn prefers_earlier_shape_in_probe_order() {
        let mut adapter = EngineAdapter::new(ProbeEngine::default());
        adapter.button_event(1, Button::A, true).unwrap();

        assert_eq!(adapter.input_shape(), Some(InputShape::PrimaryControllers));
        assert_eq!(adapter.engine().pad.presses, vec![(Button::A, true)]);
        assert!(adapter.engine().presses.is_empty());
    }

    #[test]
    fn falls_through_to_next_shape_when_one_is_unusable() {
        let mut adapter = EngineAdapter::new(ProbeEngine {
            named_fails: true,
            ..Default::default()
        });
        adapter.button_event(1, Button::Start, false).unwrap();

        assert_eq!(adapter.input_shape(), Some(InputShape::DirectButtons));
        assert_eq!(
            adapter.engine().presses,
            vec![("direct", 1, Button::Start, false)]
        );
    }

    #[test]
    fn cached_shape_is_not_reprobed() {
        let mut adapter = EngineAdapter::new(ProbeEngine::default());
        adapter.button_event(1, Button::A, true).unwrap();
        let after_detection = adapter.engine().probes;

        for _ in 0..10 {
            adapter.button_event(1, Button::B, true).unwrap();
        }

        // One probe per call on the cached shape, no walk over other shapes.
        assert_eq!(adapter.engine().probes, after_detection + 10);
        assert_eq!(adapter.input_shape(), Some(InputShape::PrimaryControllers));
    }

    #[test]
    fn engine_without_shapes_is_unsupported() {
        let mut adapter = EngineAdapter::new(Bare);

        let err = adapter.button_event(1, Button::A, true).unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedEngineBuild {
                capability: "controller input"
            }
        ));

        let err = adapter.export_snapshot().unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedEngineBuild {
                capability: "snapshot export"
            }
        ));

        let err = adapter
            .import_snapshot(&SnapshotBlob::Text("x".into()))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedEngineBuild {
                capability: "text snapshot import"
            }
        ));
    }

    #[test]
    fn binary_blob_serializes_as_base64() {
        let blob = SnapshotBlob::Binary(vec![0, 1, 2, 250]);
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "format": "binary", "data": "AAEC+g==" })
        );

        let back: SnapshotBlob = serde_json::from_value(json).unwrap();
        assert_eq!(back, blob);
    }
}
