//! Versioned, per-ROM save-state records.
//!
//! Record layout (JSON, one per ROM key):
//!
//! ```text
//! key:   {namespace}:savestate:v{version}:{romKey}
//! value: { "meta":  { "version", "romName", "romKey", "savedAt" },
//!          "state": { "format": "json" | "text" | "binary", "data": ... } }
//! ```
//!
//! Records are validated completely before anything in the session changes,
//! so a bad record never disturbs the running machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    adapter::SnapshotBlob,
    error::SessionError,
    rom::{RomImage, RomKey},
    store::StateStore,
};

/// Newest envelope version this build reads and the one it writes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// User-requested: outcome is reported on the event channel.
    Manual,
    /// Autosave / shutdown save: failures are only logged.
    Silent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMeta {
    #[serde(alias = "formatVersion")]
    pub version: u32,
    pub rom_name: String,
    pub rom_key: String,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveRecord {
    pub meta: SaveMeta,
    pub state: SnapshotBlob,
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    meta: &'a SaveMeta,
    state: &'a SnapshotBlob,
}

#[derive(Deserialize)]
struct RawEnvelope {
    meta: SaveMeta,
    #[serde(default)]
    state: Option<Value>,
}

pub struct SaveStateManager {
    store: Box<dyn StateStore>,
    namespace: String,
}

impl SaveStateManager {
    pub fn new(store: Box<dyn StateStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn storage_key(&self, rom: &RomKey) -> String {
        format!("{}:savestate:v{FORMAT_VERSION}:{rom}", self.namespace)
    }

    pub fn exists(&self, rom: &RomKey) -> Result<bool, SessionError> {
        Ok(self.store.get(&self.storage_key(rom))?.is_some())
    }

    /// Wraps `state` in an envelope stamped with the current time and
    /// persists it, replacing any previous record for the ROM.
    pub fn write(
        &mut self,
        rom: &RomImage,
        state: &SnapshotBlob,
    ) -> Result<SaveMeta, SessionError> {
        let meta = SaveMeta {
            version: FORMAT_VERSION,
            rom_name: rom.name().to_string(),
            rom_key: rom.key().to_string(),
            saved_at: Utc::now(),
        };
        let text = serde_json::to_string(&EnvelopeRef { meta: &meta, state })
            .map_err(|err| SessionError::corrupt(format!("cannot encode snapshot: {err}")))?;

        let key = self.storage_key(rom.key());
        self.store.set(&key, &text)?;
        info!(%key, bytes = text.len(), "save state written");
        Ok(meta)
    }

    pub fn read(&self, rom: &RomKey) -> Result<SaveRecord, SessionError> {
        let key = self.storage_key(rom);
        let text = self
            .store
            .get(&key)?
            .ok_or_else(|| SessionError::NoSaveFound {
                rom_key: rom.to_string(),
            })?;
        debug!(%key, bytes = text.len(), "save state read");
        decode_record(&text, rom)
    }

    /// Removes the record for `rom`; a missing record is fine.
    pub fn delete(&mut self, rom: &RomKey) -> Result<(), SessionError> {
        let key = self.storage_key(rom);
        self.store.remove(&key)?;
        debug!(%key, "save state deleted");
        Ok(())
    }
}

fn decode_record(text: &str, expected: &RomKey) -> Result<SaveRecord, SessionError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| SessionError::corrupt(format!("record is not JSON: {err}")))?;

    // Version first: a newer layout may not match anything below.
    let version = value
        .get("meta")
        .and_then(|meta| meta.get("version").or_else(|| meta.get("formatVersion")))
        .and_then(Value::as_u64)
        .ok_or_else(|| SessionError::corrupt("record has no format version"))?;
    if version > u64::from(FORMAT_VERSION) {
        return Err(SessionError::UnsupportedSaveVersion {
            found: u32::try_from(version).unwrap_or(u32::MAX),
            supported: FORMAT_VERSION,
        });
    }

    let raw: RawEnvelope = serde_json::from_value(value)
        .map_err(|err| SessionError::corrupt(format!("malformed envelope: {err}")))?;

    let state = match raw.state {
        None | Some(Value::Null) => return Err(SessionError::corrupt("missing state payload")),
        Some(state) => serde_json::from_value::<SnapshotBlob>(state)
            .map_err(|err| SessionError::corrupt(format!("undecodable state payload: {err}")))?,
    };

    if raw.meta.rom_key != expected.as_str() {
        return Err(SessionError::corrupt(format!(
            "record belongs to a different ROM ({})",
            raw.meta.rom_key
        )));
    }

    Ok(SaveRecord {
        meta: raw.meta,
        state,
    })
}
