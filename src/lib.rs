//! Content-script addon for the Standard Notes web app: reads the open
//! note's tags from the page and offers a one-click button that writes a
//! marked location block at the top of the note.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Reflect;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

pub mod app;
pub mod button;
pub mod config;
pub mod dom;
pub mod inserter;
pub mod logger;
pub mod observer;
pub mod tags;

use app::AddonController;
use config::AddonConfig;
use logger::{Level, Logger};

/// Window-global guard against double injection; the script can be loaded
/// more than once by extension reloads.
const INIT_FLAG: &str = "__snTagLocationInitialized";

/// Optional window-global JSON blob overriding the built-in selectors and
/// delays; set it before the script loads to track host markup changes
/// without rebuilding.
const CONFIG_GLOBAL: &str = "__snTagLocationConfig";

thread_local! {
    static ADDON: RefCell<Option<Rc<AddonController>>> = const { RefCell::new(None) };
}

fn load_config() -> AddonConfig {
    let raw = dom::window()
        .and_then(|win| Reflect::get(&win, &JsValue::from_str(CONFIG_GLOBAL)).ok())
        .and_then(|value| value.as_string());
    match raw {
        Some(raw) => AddonConfig::from_json(&raw),
        None => AddonConfig::default(),
    }
}

fn mark_initialized() -> bool {
    let Some(win) = dom::window() else {
        return false;
    };
    let flag = JsValue::from_str(INIT_FLAG);
    let already = Reflect::get(&win, &flag)
        .map(|value| value.is_truthy())
        .unwrap_or(false);
    if already {
        return false;
    }
    let _ = Reflect::set(&win, &flag, &JsValue::TRUE);
    true
}

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    let config = load_config();
    let logger = Logger::new(if config.debug_logging {
        Level::Debug
    } else {
        Level::Info
    });

    if !mark_initialized() {
        logger.warn("Script já inicializado nesta página, ignorando");
        return;
    }

    let controller = AddonController::new(config, logger);
    ADDON.with(|slot| *slot.borrow_mut() = Some(controller.clone()));
    spawn_local(async move {
        controller.initialize().await;
    });
}

/// Console hook: `wasm.addon_status()` returns the diagnostic snapshot.
#[wasm_bindgen]
pub fn addon_status() -> JsValue {
    let status = ADDON.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|controller| controller.status())
    });
    match status {
        Some(status) => serde_json::to_string(&status)
            .map(|json| JsValue::from_str(&json))
            .unwrap_or(JsValue::NULL),
        None => JsValue::NULL,
    }
}

/// Console hook: tears the addon down and clears the injection flag.
#[wasm_bindgen]
pub fn addon_shutdown() {
    if let Some(controller) = ADDON.with(|slot| slot.borrow_mut().take()) {
        controller.cleanup();
    }
    if let Some(win) = dom::window() {
        let _ = Reflect::set(&win, &JsValue::from_str(INIT_FLAG), &JsValue::FALSE);
    }
}
