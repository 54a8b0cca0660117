use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::Button;

/// Keyboard layout for player one, keyed by `KeyboardEvent.code`.
///
/// Serialized as a plain `{ "code": "button" }` object so hosts can override
/// bindings from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMap {
    bindings: BTreeMap<String, Button>,
}

impl KeyMap {
    pub fn standard() -> Self {
        [
            ("ArrowUp", Button::Up),
            ("ArrowDown", Button::Down),
            ("ArrowLeft", Button::Left),
            ("ArrowRight", Button::Right),
            ("KeyX", Button::A),
            ("KeyZ", Button::B),
            ("Enter", Button::Start),
            ("ShiftLeft", Button::Select),
            ("ShiftRight", Button::Select),
        ]
        .into_iter()
        .collect()
    }

    #[inline]
    pub fn lookup(&self, code: &str) -> Option<Button> {
        self.bindings.get(code).copied()
    }

    pub fn bind(&mut self, code: impl Into<String>, button: Button) -> Option<Button> {
        self.bindings.insert(code.into(), button)
    }

    pub fn unbind(&mut self, code: &str) -> Option<Button> {
        self.bindings.remove(code)
    }

    /// Buttons no key maps to.
    pub fn unbound_buttons(&self) -> Vec<Button> {
        Button::ALL
            .into_iter()
            .filter(|button| !self.bindings.values().any(|b| b == button))
            .collect()
    }
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::standard()
    }
}

impl<S: Into<String>> FromIterator<(S, Button)> for KeyMap {
    fn from_iter<I: IntoIterator<Item = (S, Button)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().map(|(code, b)| (code.into(), b)).collect(),
        }
    }
}
