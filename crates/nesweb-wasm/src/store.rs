use nesweb_session::{StateStore, StoreError};
use wasm_bindgen::prelude::*;

use crate::engine::describe;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = localStorage, js_name = getItem)]
    fn get_item(key: &str) -> Result<Option<String>, JsValue>;

    #[wasm_bindgen(catch, js_namespace = localStorage, js_name = setItem)]
    fn set_item(key: &str, value: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch, js_namespace = localStorage, js_name = removeItem)]
    fn remove_item(key: &str) -> Result<(), JsValue>;
}

/// [`StateStore`] over the page's `localStorage`.
///
/// Every call can throw: storage may be disabled (private browsing) or full.
/// A throw from `setItem` is reported as a backend failure and leaves the
/// previous record in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorageStore;

impl StateStore for LocalStorageStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        get_item(key).map_err(|err| StoreError::Unavailable(describe(&err)))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        set_item(key, value).map_err(|err| StoreError::Backend(describe(&err)))
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        remove_item(key).map_err(|err| StoreError::Backend(describe(&err)))
    }
}
