use wasm_bindgen::JsValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Prefixed console logger shared by every component. Constructed once at
/// startup and passed down explicitly instead of living in a global.
#[derive(Clone, Copy, Debug)]
pub struct Logger {
    prefix: &'static str,
    min_level: Level,
}

impl Logger {
    pub const fn new(min_level: Level) -> Self {
        Self {
            prefix: "[SN Tag Addon]",
            min_level,
        }
    }

    pub fn debug(&self, message: impl AsRef<str>) {
        if self.min_level <= Level::Debug {
            web_sys::console::debug_1(&self.line("DEBUG:", message.as_ref()));
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        if self.min_level <= Level::Info {
            web_sys::console::log_1(&self.line("", message.as_ref()));
        }
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        if self.min_level <= Level::Warn {
            web_sys::console::warn_1(&self.line("WARNING:", message.as_ref()));
        }
    }

    pub fn error(&self, message: impl AsRef<str>) {
        web_sys::console::error_1(&self.line("ERROR:", message.as_ref()));
    }

    fn line(&self, tag: &str, message: &str) -> JsValue {
        if tag.is_empty() {
            JsValue::from_str(&format!("{} {}", self.prefix, message))
        } else {
            JsValue::from_str(&format!("{} {} {}", self.prefix, tag, message))
        }
    }
}
