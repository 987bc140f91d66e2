use serde::Deserialize;

/// Everything the addon treats as externally supplied data: selectors into the
/// host markup, timing constants, and the noise lists used to tell real tags
/// apart from interface chrome. Values mirror the host app's current markup
/// and are expected to need updating when it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AddonConfig {
    pub allowed_host: String,
    pub debug_logging: bool,
    pub ui: UiConfig,
    pub tags: TagConfig,
    pub insertion: InsertionConfig,
    pub observation: ObservationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub button_id: String,
    pub button_text: String,
    pub processing_text: String,
    pub reposition_delay_ms: i32,
    pub processing_timeout_ms: i32,
    pub listener_debounce_ms: i32,
    pub observer_debounce_ms: i32,
    pub min_left_offset: f64,
    pub button_offset: f64,
    pub reference_selectors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagConfig {
    pub primary_selector: String,
    pub linking_container_selector: String,
    pub linking_selectors: Vec<String>,
    pub max_tag_length: usize,
    pub interface_noise: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InsertionConfig {
    pub editor_selectors: Vec<String>,
    pub cooldown_ms: f64,
    pub in_flight_reset_ms: i32,
    pub post_check_delay_ms: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservationConfig {
    pub debounce_ms: i32,
    pub dispatch_delay_ms: i32,
    pub navigation_delay_ms: i32,
    pub poll_interval_ms: i32,
    pub identity_attributes: Vec<String>,
    pub attribute_filter: Vec<String>,
    pub indicator_selectors: Vec<String>,
    pub interface_load_grace_ms: i32,
    pub interface_load_poll_ms: i32,
    pub interface_load_max_attempts: u32,
}

impl AddonConfig {
    /// Parses an override blob, falling back to the built-in defaults when the
    /// JSON is absent or malformed.
    pub fn from_json(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

impl Default for AddonConfig {
    fn default() -> Self {
        Self {
            allowed_host: "app.standardnotes.com".to_string(),
            debug_logging: false,
            ui: UiConfig::default(),
            tags: TagConfig::default(),
            insertion: InsertionConfig::default(),
            observation: ObservationConfig::default(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            button_id: "sn-add-location-button".to_string(),
            button_text: "Adicionar Localização".to_string(),
            processing_text: "Adicionando...".to_string(),
            reposition_delay_ms: 50,
            processing_timeout_ms: 2000,
            listener_debounce_ms: 200,
            observer_debounce_ms: 300,
            min_left_offset: 10.0,
            button_offset: 180.0,
            reference_selectors: vec![
                ".note-view-options-buttons > button:nth-child(1) > svg:nth-child(1)".to_string(),
                ".note-view-options-buttons > button:nth-child(1)".to_string(),
                ".note-view-options-buttons > button".to_string(),
                ".note-view-options-buttons".to_string(),
                ".note-view-header button".to_string(),
                ".note-view .options button".to_string(),
                "[title=\"Pin\"], [title=\"Options\"], [title=\"Menu\"]".to_string(),
                ".note-view-top button".to_string(),
                ".note-view-content-header button".to_string(),
            ],
        }
    }
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            primary_selector: "span.gap-1".to_string(),
            linking_container_selector: ".note-view-linking-container".to_string(),
            linking_selectors: vec![
                "span.gap-1".to_string(),
                "button.group.h-6.cursor-pointer".to_string(),
                "button[title*=\"/\"]".to_string(),
                "*[title]:not([title*=\"Link\"]):not([title*=\"Focus\"]):not([title*=\"menu\"])"
                    .to_string(),
            ],
            max_tag_length: 100,
            interface_noise: [
                "create a new smart view",
                "show/hide password",
                "link tags",
                "focus mode",
                "change",
                "pin",
                "options",
                "menu",
                "ctrl",
                "files",
                "link",
                "editor",
                "note",
                "view",
                "settings",
                "preferences",
                "search",
                "filter",
                "toggle",
                "button",
                "click",
                "select",
                "add",
                "remove",
                "delete",
                "edit",
                "save",
                "cancel",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for InsertionConfig {
    fn default() -> Self {
        Self {
            editor_selectors: vec![
                "#super-editor-content".to_string(),
                ".editor-content".to_string(),
                ".note-text-editor".to_string(),
                "[contenteditable=\"true\"]".to_string(),
                ".CodeMirror".to_string(),
                ".cm-editor".to_string(),
            ],
            cooldown_ms: 2000.0,
            in_flight_reset_ms: 1000,
            post_check_delay_ms: 500,
        }
    }
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            dispatch_delay_ms: 100,
            navigation_delay_ms: 200,
            poll_interval_ms: 5000,
            identity_attributes: vec![
                "data-note-uuid".to_string(),
                "data-note-id".to_string(),
                "data-id".to_string(),
            ],
            attribute_filter: vec![
                "data-note-uuid".to_string(),
                "data-note-id".to_string(),
                "data-id".to_string(),
                "class".to_string(),
            ],
            indicator_selectors: vec![
                ".note-view".to_string(),
                ".editor-content".to_string(),
                "#super-editor-content".to_string(),
                ".note-view-options-buttons".to_string(),
                "[data-note-uuid]".to_string(),
                "[data-note-id]".to_string(),
            ],
            interface_load_grace_ms: 2000,
            interface_load_poll_ms: 500,
            interface_load_max_attempts: 120,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_the_full_selector_surface() {
        let config = AddonConfig::default();
        assert_eq!(config.allowed_host, "app.standardnotes.com");
        assert_eq!(config.insertion.editor_selectors[0], "#super-editor-content");
        assert_eq!(config.ui.reference_selectors.len(), 9);
        assert!(config
            .tags
            .interface_noise
            .iter()
            .any(|s| s == "create a new smart view"));
    }

    #[test]
    fn partial_json_overrides_merge_with_defaults() {
        let config = AddonConfig::from_json(r#"{"ui":{"button_id":"custom-id"}}"#);
        assert_eq!(config.ui.button_id, "custom-id");
        // Untouched sections keep their defaults.
        assert_eq!(config.ui.button_offset, 180.0);
        assert_eq!(config.insertion.cooldown_ms, 2000.0);
    }

    #[test]
    fn malformed_json_falls_back_to_defaults() {
        let config = AddonConfig::from_json("{not json");
        assert_eq!(config.ui.button_id, "sn-add-location-button");
    }
}
