use std::cell::RefCell;
use std::rc::Rc;
use std::sync::OnceLock;

use js_sys::{Function, Reflect};
use regex::Regex;
use thiserror::Error;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlDocument, HtmlElement, InputEvent, InputEventInit, Node};

use crate::config::AddonConfig;
use crate::dom;
use crate::logger::Logger;
use crate::tags::LOCATION_MARKER;

const TREE_WALKER_SHOW_TEXT: u32 = 0x4;

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("insertion cooldown active, {remaining_ms:.0}ms remaining")]
    CooldownActive { remaining_ms: f64 },
    #[error("a previous insertion is still in flight")]
    InFlight,
    #[error("insertText command rejected by the browser")]
    CommandRejected,
    #[error("dom call failed: {0}")]
    Dom(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The editor already carried a marker; treated as done, not as an error.
    AlreadyPresent,
}

/// Rate limiting for insertions: a cooldown between attempts plus a single
/// in-flight slot. Pure over a caller-supplied clock.
#[derive(Debug, Clone)]
pub struct InsertionGuard {
    cooldown_ms: f64,
    last_attempt_ms: Option<f64>,
    in_flight: bool,
}

impl InsertionGuard {
    pub fn new(cooldown_ms: f64) -> Self {
        Self {
            cooldown_ms,
            last_attempt_ms: None,
            in_flight: false,
        }
    }

    pub fn try_begin(&mut self, now_ms: f64) -> Result<(), InsertError> {
        if let Some(last) = self.last_attempt_ms {
            let elapsed = now_ms - last;
            if elapsed < self.cooldown_ms {
                return Err(InsertError::CooldownActive {
                    remaining_ms: self.cooldown_ms - elapsed,
                });
            }
        }
        if self.in_flight {
            return Err(InsertError::InFlight);
        }
        // The attempt counts against the cooldown whether or not it lands.
        self.last_attempt_ms = Some(now_ms);
        self.in_flight = true;
        Ok(())
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }
}

fn location_patterns() -> &'static [Regex; 4] {
    static RE: OnceLock<[Regex; 4]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"(?i)<<<.*?Localização.*?>>>").expect("valid marker pattern"),
            Regex::new(r"(?i)Localização.*?:").expect("valid label pattern"),
            Regex::new(r"(?i)Local.*?:").expect("valid short label pattern"),
            Regex::new("📍").expect("valid pin glyph pattern"),
        ]
    })
}

/// Loose check: the full marker or the bare word anywhere. Knowingly
/// over-broad; a note that merely mentions "Localização" will match.
pub fn content_mentions_location(content: &str) -> bool {
    content.contains(LOCATION_MARKER) || content.contains("Localização")
}

pub fn matches_location_pattern(content: &str) -> bool {
    location_patterns()
        .iter()
        .any(|pattern| pattern.is_match(content))
}

/// Walks every surface a marker could live in (text content, markup, rendered
/// text, descendants, text nodes, pattern set) and names the first hit.
pub fn find_existing_marker(editor: &Element) -> Option<&'static str> {
    let text = editor.text_content().unwrap_or_default();
    if content_mentions_location(&text) {
        return Some("textContent");
    }
    let html = editor.inner_html();
    if content_mentions_location(&html) {
        return Some("innerHTML");
    }
    if let Some(element) = editor.dyn_ref::<HtmlElement>() {
        if content_mentions_location(&element.inner_text()) {
            return Some("innerText");
        }
    }
    if let Ok(descendants) = editor.query_selector_all("*") {
        for child in dom::elements_of(&descendants) {
            if content_mentions_location(&child.text_content().unwrap_or_default()) {
                return Some("descendant element");
            }
        }
    }
    if text_node_mentions_location(editor) {
        return Some("text node walk");
    }
    if matches_location_pattern(&text) || matches_location_pattern(&html) {
        return Some("location pattern");
    }
    None
}

fn text_node_mentions_location(editor: &Element) -> bool {
    let Some(doc) = editor.owner_document() else {
        return false;
    };
    let Ok(walker) = doc.create_tree_walker_with_what_to_show(editor, TREE_WALKER_SHOW_TEXT)
    else {
        return false;
    };
    while let Ok(Some(node)) = walker.next_node() {
        if node
            .text_content()
            .is_some_and(|text| text.contains("Localização"))
        {
            return true;
        }
    }
    false
}

pub fn is_structured_editor(editor: &Element) -> bool {
    if editor.get_attribute("data-lexical-editor").is_some() {
        return true;
    }
    Reflect::get(editor, &JsValue::from_str("__lexicalEditor"))
        .map(|handle| !handle.is_undefined())
        .unwrap_or(false)
}

trait InsertStrategy {
    fn insert(&self, doc: &Document, editor: &Element, block: &str, logger: Logger)
        -> Result<(), InsertError>;
}

/// Goes through the host editor's transactional update API, prepending a
/// paragraph node. Falls back to the caret path when the handle or its
/// globals are missing.
struct StructuredInsert;

/// Caret to the very start of the editor, then a single insertText command,
/// then a synthetic input event so the host app saves the change.
struct PlainTextInsert;

impl InsertStrategy for StructuredInsert {
    fn insert(
        &self,
        doc: &Document,
        editor: &Element,
        block: &str,
        logger: Logger,
    ) -> Result<(), InsertError> {
        if let Some(handle) = lexical_handle(editor) {
            if let Some(update) = method_of(&handle, "update") {
                let inserted = Rc::new(std::cell::Cell::new(false));
                let flag = inserted.clone();
                let content = format!("{block}\n\n");
                let transaction = Closure::once_into_js(move || {
                    if structured_transaction(&content).is_some() {
                        flag.set(true);
                    }
                });
                let _ = update.call1(&handle, transaction.unchecked_ref());
                if inserted.get() {
                    logger.info("Inserção transacional concluída");
                    return Ok(());
                }
                logger.warn("API transacional indisponível ou recusou a inserção");
            }
        }
        // No usable handle; the selection path still works on the same element.
        caret_insert(doc, editor, &format!("{block}\n\n"), false)
    }
}

impl InsertStrategy for PlainTextInsert {
    fn insert(
        &self,
        doc: &Document,
        editor: &Element,
        block: &str,
        logger: Logger,
    ) -> Result<(), InsertError> {
        // Last-moment re-check: another signal path may have inserted already.
        let text = editor.text_content().unwrap_or_default();
        if text.contains("Localização") {
            logger.info("Localização detectada antes do execCommand, nada a fazer");
            return Ok(());
        }
        caret_insert(doc, editor, &format!("{block}\n\n"), true)
    }
}

fn lexical_handle(editor: &Element) -> Option<JsValue> {
    let handle = Reflect::get(editor, &JsValue::from_str("__lexicalEditor")).ok()?;
    if handle.is_undefined() || handle.is_null() {
        None
    } else {
        Some(handle)
    }
}

fn method_of(target: &JsValue, name: &str) -> Option<Function> {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()
}

fn window_function(name: &str) -> Option<Function> {
    let win = dom::window()?;
    Reflect::get(&win, &JsValue::from_str(name))
        .ok()?
        .dyn_into::<Function>()
        .ok()
}

/// Runs inside the editor's update() callback. Uses the editor framework's
/// window globals to prepend a paragraph carrying the block text.
fn structured_transaction(content: &str) -> Option<()> {
    let get_root = window_function("$getRoot")?;
    let create_text = window_function("$createTextNode")?;
    let create_paragraph = window_function("$createParagraphNode")?;

    let root = get_root.call0(&JsValue::NULL).ok()?;
    let current_text = method_of(&root, "getTextContent")?
        .call0(&root)
        .ok()?
        .as_string()
        .unwrap_or_default();
    if current_text.contains("Localização") {
        return None;
    }

    let paragraph = create_paragraph.call0(&JsValue::NULL).ok()?;
    let text_node = create_text
        .call1(&JsValue::NULL, &JsValue::from_str(content))
        .ok()?;
    method_of(&paragraph, "append")?
        .call1(&paragraph, &text_node)
        .ok()?;
    method_of(&root, "selectStart")?.call0(&root).ok()?;

    let first_child = method_of(&root, "getFirstChild")?.call0(&root).ok()?;
    if first_child.is_undefined() || first_child.is_null() {
        method_of(&root, "append")?.call1(&root, &paragraph).ok()?;
    } else {
        method_of(&first_child, "insertBefore")?
            .call1(&first_child, &paragraph)
            .ok()?;
    }
    Some(())
}

fn js_error(err: JsValue) -> InsertError {
    InsertError::Dom(format!("{err:?}"))
}

fn caret_insert(
    doc: &Document,
    editor: &Element,
    content: &str,
    notify: bool,
) -> Result<(), InsertError> {
    if let Some(element) = editor.dyn_ref::<HtmlElement>() {
        let _ = element.focus();
    }

    let range = doc.create_range().map_err(js_error)?;
    match editor.first_child() {
        Some(first) if first.node_type() == Node::TEXT_NODE => {
            range.set_start(&first, 0).map_err(js_error)?;
        }
        Some(first) => {
            range.set_start_before(&first).map_err(js_error)?;
        }
        None => {
            range.set_start(editor, 0).map_err(js_error)?;
        }
    }
    range.collapse_with_to_start(true);

    if let Some(win) = dom::window() {
        if let Ok(Some(selection)) = win.get_selection() {
            let _ = selection.remove_all_ranges();
            let _ = selection.add_range(&range);
        }
    }

    // execCommand lives on HtmlDocument, not the Document base.
    let html_doc = doc
        .dyn_ref::<HtmlDocument>()
        .ok_or_else(|| InsertError::Dom("document is not an HtmlDocument".to_string()))?;
    let accepted = html_doc
        .exec_command_with_show_ui_and_value("insertText", false, content)
        .map_err(js_error)?;
    if !accepted {
        return Err(InsertError::CommandRejected);
    }

    if notify {
        let init = InputEventInit::new();
        init.set_bubbles(true);
        init.set_cancelable(true);
        init.set_data(Some(content));
        init.set_input_type("insertText");
        if let Ok(event) = InputEvent::new_with_event_init_dict("input", &init) {
            let _ = editor.dispatch_event(&event);
        }
    }
    Ok(())
}

pub struct ContentInserter {
    config: Rc<AddonConfig>,
    logger: Logger,
    guard: Rc<RefCell<InsertionGuard>>,
}

impl ContentInserter {
    pub fn new(config: Rc<AddonConfig>, logger: Logger) -> Self {
        let guard = Rc::new(RefCell::new(InsertionGuard::new(
            config.insertion.cooldown_ms,
        )));
        Self {
            config,
            logger,
            guard,
        }
    }

    /// First match from the editor selector preference list.
    pub fn get_content_editor(&self, doc: &Document) -> Option<Element> {
        let selectors = self.config.insertion.editor_selectors.iter().map(|s| s.as_str());
        match dom::query_first(doc, selectors) {
            Some((editor, selector)) => {
                self.logger.debug(format!("Editor encontrado: {selector}"));
                Some(editor)
            }
            None => {
                self.logger.warn("Nenhum editor encontrado");
                None
            }
        }
    }

    /// Inserts the block at the top of the editor, once. Repeated calls are
    /// rejected by cooldown or in-flight state; an already-present marker is
    /// an idempotent success and does not consume the cooldown, so a repeat
    /// click on such a note answers the same way every time.
    pub fn insert_location_block(
        &self,
        doc: &Document,
        editor: &Element,
        block: &str,
    ) -> Result<InsertOutcome, InsertError> {
        if let Some(surface) = find_existing_marker(editor) {
            self.logger
                .info(format!("Localização já presente ({surface}), inserção ignorada"));
            return Ok(InsertOutcome::AlreadyPresent);
        }

        self.guard.borrow_mut().try_begin(js_sys::Date::now())?;

        let strategy: &dyn InsertStrategy = if is_structured_editor(editor) {
            self.logger.info("Editor estruturado detectado, usando API transacional");
            &StructuredInsert
        } else {
            self.logger.info("Editor padrão detectado, usando execCommand");
            &PlainTextInsert
        };

        let result = strategy.insert(doc, editor, block, self.logger);

        match &result {
            Ok(()) => {
                self.schedule_post_check(editor);
                let guard = self.guard.clone();
                dom::set_timeout(self.config.insertion.in_flight_reset_ms, move || {
                    guard.borrow_mut().finish();
                });
            }
            Err(error) => {
                self.logger.error(format!("Falha na inserção: {error}"));
                self.guard.borrow_mut().finish();
            }
        }
        result.map(|()| InsertOutcome::Inserted)
    }

    /// Observational only: confirms the marker landed, without retrying.
    fn schedule_post_check(&self, editor: &Element) {
        let editor = editor.clone();
        let logger = self.logger;
        dom::set_timeout(self.config.insertion.post_check_delay_ms, move || {
            if find_existing_marker(&editor).is_some() {
                logger.info("Inserção confirmada, localização presente no editor");
            } else {
                logger.warn("Localização não detectada após a inserção");
            }
        });
    }

    /// Best-effort cleanup of marker blocks already in the editor: removes the
    /// carrying text nodes (and their wrapping single-child ancestors) and
    /// collapses the line-break runs left behind.
    pub fn remove_existing_location_blocks(&self, editor: &Element) -> bool {
        let Some(doc) = editor.owner_document() else {
            return false;
        };
        let Ok(walker) = doc.create_tree_walker_with_what_to_show(editor, TREE_WALKER_SHOW_TEXT)
        else {
            return false;
        };

        let editor_node: &Node = editor;
        let mut doomed: Vec<Node> = Vec::new();
        while let Ok(Some(node)) = walker.next_node() {
            if !node
                .text_content()
                .is_some_and(|text| text.contains(LOCATION_MARKER))
            {
                continue;
            }
            let mut target = node;
            while let Some(parent) = target.parent_element() {
                let parent_node: &Node = &parent;
                if parent_node.is_same_node(Some(editor_node)) || parent.child_element_count() > 1
                {
                    break;
                }
                target = parent.into();
            }
            doomed.push(target);
        }

        for node in &doomed {
            if let Some(parent) = node.parent_node() {
                let _ = parent.remove_child(node);
            }
        }
        self.cleanup_orphaned_breaks(editor);
        self.logger
            .info(format!("{} bloco(s) de localização removido(s)", doomed.len()));
        true
    }

    fn cleanup_orphaned_breaks(&self, editor: &Element) {
        let Ok(breaks) = editor.query_selector_all("br") else {
            return;
        };
        let mut consecutive = 0u32;
        for node in dom::nodes_of(&breaks) {
            let after_break = match node.previous_sibling() {
                None => true,
                Some(previous) => previous.node_name() == "BR",
            };
            if after_break {
                consecutive += 1;
                if consecutive > 1 {
                    if let Some(element) = node.dyn_ref::<Element>() {
                        element.remove();
                    }
                }
            } else {
                consecutive = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loose_check_matches_marker_and_bare_word() {
        assert!(content_mentions_location("x <<<Localização>>> y"));
        assert!(content_mentions_location("minha Localização favorita"));
        assert!(!content_mentions_location("no marker here"));
    }

    #[test]
    fn pattern_set_catches_label_variants() {
        assert!(matches_location_pattern("<<<Localização>>>"));
        assert!(matches_location_pattern("localização: casa"));
        assert!(matches_location_pattern("Local: escritório"));
        assert!(matches_location_pattern("ponto 📍 aqui"));
        assert!(!matches_location_pattern("nothing to see"));
    }

    #[test]
    fn guard_enforces_cooldown() {
        let mut guard = InsertionGuard::new(2000.0);
        assert!(guard.try_begin(10_000.0).is_ok());
        guard.finish();
        // Second attempt before the cooldown elapses is rejected even though
        // the first one completed.
        match guard.try_begin(10_500.0) {
            Err(InsertError::CooldownActive { remaining_ms }) => {
                assert!((remaining_ms - 1500.0).abs() < f64::EPSILON);
            }
            other => panic!("expected cooldown rejection, got {other:?}"),
        }
        assert!(guard.try_begin(12_000.0).is_ok());
    }

    #[test]
    fn guard_rejects_concurrent_attempts() {
        let mut guard = InsertionGuard::new(2000.0);
        assert!(guard.try_begin(0.0).is_ok());
        // Cooldown has elapsed but the first attempt never acknowledged.
        assert!(matches!(guard.try_begin(5000.0), Err(InsertError::InFlight)));
        guard.finish();
        assert!(guard.try_begin(10_000.0).is_ok());
    }

    #[test]
    fn guard_untouched_until_an_attempt_begins() {
        let mut guard = InsertionGuard::new(2000.0);
        // Paths that bail out before try_begin (duplicate already in the
        // editor) leave the guard fresh: the next real attempt is accepted
        // at any timestamp.
        assert!(guard.try_begin(5.0).is_ok());
    }

    #[test]
    fn guard_counts_failed_attempts_against_cooldown() {
        let mut guard = InsertionGuard::new(2000.0);
        assert!(guard.try_begin(0.0).is_ok());
        guard.finish();
        assert!(matches!(
            guard.try_begin(100.0),
            Err(InsertError::CooldownActive { .. })
        ));
    }
}
