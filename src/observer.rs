use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Promise, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Document, Element, History, MutationObserver, MutationObserverInit, MutationRecord};

use crate::config::AddonConfig;
use crate::dom;
use crate::logger::Logger;

const RELEVANT_SELECTORS: [&str; 4] = [
    ".note-view",
    ".editor-content",
    "#super-editor-content",
    ".note-view-options-buttons",
];

pub(crate) fn class_name_is_relevant(class_name: &str) -> bool {
    class_name.contains("note") || class_name.contains("editor")
}

fn is_relevant_element(element: &Element) -> bool {
    for selector in RELEVANT_SELECTORS {
        if element.matches(selector).unwrap_or(false) {
            return true;
        }
    }
    class_name_is_relevant(&element.class_name())
}

pub(crate) fn identity_fallback(hash: &str, pathname: &str) -> String {
    if hash.is_empty() {
        pathname.to_string()
    } else {
        hash.to_string()
    }
}

/// Opaque note identity: first identity-bearing DOM attribute, else the URL
/// hash or pathname. Only ever compared, never stored beyond change tracking.
pub fn note_identity(doc: &Document, config: &AddonConfig) -> Option<String> {
    let attributes = &config.observation.identity_attributes;
    for attribute in attributes {
        let Ok(Some(element)) = doc.query_selector(&format!("[{attribute}]")) else {
            continue;
        };
        for candidate in attributes {
            if let Some(value) = element.get_attribute(candidate) {
                return Some(value);
            }
        }
    }
    let location = dom::window()?.location();
    let hash = location.hash().ok()?;
    let pathname = location.pathname().ok()?;
    Some(identity_fallback(&hash, &pathname))
}

pub fn is_allowed_origin(config: &AddonConfig) -> bool {
    dom::window()
        .and_then(|win| win.location().hostname().ok())
        .is_some_and(|hostname| hostname == config.allowed_host)
}

/// At least one of the host interface's indicator elements is present.
pub fn is_interface_loaded(doc: &Document, config: &AddonConfig) -> bool {
    config
        .observation
        .indicator_selectors
        .iter()
        .any(|selector| matches!(doc.query_selector(selector), Ok(Some(_))))
}

pub async fn wait_for_page_ready() {
    let Some(doc) = dom::document() else { return };
    if doc.ready_state() != "loading" {
        return;
    }
    let promise = Promise::new(&mut |resolve, _reject| {
        let _ = doc.add_event_listener_with_callback("DOMContentLoaded", &resolve);
    });
    let _ = JsFuture::from(promise).await;
}

#[derive(Default)]
struct ObserverState {
    callback: Option<Rc<dyn Fn()>>,
    mutation_observer: Option<MutationObserver>,
    mutation_listener: Option<Closure<dyn FnMut(Array, MutationObserver)>>,
    poll_handle: Option<i32>,
    poll_listener: Option<Closure<dyn FnMut()>>,
    history: Option<History>,
    original_push_state: Option<Function>,
    original_replace_state: Option<Function>,
    history_patches: Vec<Closure<dyn FnMut(JsValue, JsValue, JsValue)>>,
    popstate_listener: Option<Closure<dyn FnMut()>>,
    unload_listeners: Vec<(&'static str, Closure<dyn FnMut()>)>,
    last_url: String,
    last_note_id: Option<String>,
}

/// Watches for note navigation through four overlapping signals: body
/// mutations, patched history methods, popstate, and a slow URL/identity
/// poll. The signals race; the callback must tolerate duplicate invocations.
#[derive(Clone)]
pub struct PageObserver {
    config: Rc<AddonConfig>,
    logger: Logger,
    state: Rc<RefCell<ObserverState>>,
}

impl PageObserver {
    pub fn new(config: Rc<AddonConfig>, logger: Logger) -> Self {
        Self {
            config,
            logger,
            state: Rc::new(RefCell::new(ObserverState::default())),
        }
    }

    pub fn initialize(&self, callback: Rc<dyn Fn()>) {
        {
            let mut state = self.state.borrow_mut();
            state.callback = Some(callback);
            state.last_url = current_url().unwrap_or_default();
            state.last_note_id = dom::document()
                .and_then(|doc| note_identity(&doc, &self.config));
        }
        self.setup_dom_observer();
        self.setup_navigation_detection();
        self.setup_periodic_check();
        self.logger.info("Observação da página inicializada");
    }

    fn setup_dom_observer(&self) {
        let Some(doc) = dom::document() else { return };
        let Some(body) = doc.body() else { return };

        let dispatch = {
            let this = self.clone();
            dom::Debouncer::new(
                self.config.observation.debounce_ms,
                Rc::new(move || this.handle_dom_change()),
            )
        };

        let listener = Closure::<dyn FnMut(Array, MutationObserver)>::new(
            move |records: Array, _observer: MutationObserver| {
                let mut relevant = false;
                for record in records.iter() {
                    let Ok(record) = record.dyn_into::<MutationRecord>() else {
                        continue;
                    };
                    match record.type_().as_str() {
                        "childList" => {
                            if node_list_is_relevant(&record.added_nodes())
                                || node_list_is_relevant(&record.removed_nodes())
                            {
                                relevant = true;
                            }
                        }
                        "attributes" => {
                            // The attribute filter already narrows this to the
                            // identity attributes and class.
                            relevant = true;
                        }
                        _ => {}
                    }
                    if relevant {
                        break;
                    }
                }
                if relevant {
                    dispatch.schedule();
                }
            },
        );

        let Ok(observer) = MutationObserver::new(listener.as_ref().unchecked_ref()) else {
            return;
        };
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        init.set_attributes(true);
        let filter = Array::new();
        for attribute in &self.config.observation.attribute_filter {
            filter.push(&JsValue::from_str(attribute));
        }
        init.set_attribute_filter(&filter);
        if observer.observe_with_options(&body, &init).is_err() {
            return;
        }

        let mut state = self.state.borrow_mut();
        state.mutation_observer = Some(observer);
        state.mutation_listener = Some(listener);
    }

    /// Mutations can leave more than one button behind when two check passes
    /// overlap; the live DOM is reconciled before the callback runs.
    fn handle_dom_change(&self) {
        self.remove_duplicate_buttons();
        self.schedule_callback(self.config.observation.dispatch_delay_ms);
    }

    fn remove_duplicate_buttons(&self) {
        let Some(doc) = dom::document() else { return };
        let Ok(buttons) = doc.query_selector_all(&format!("#{}", self.config.ui.button_id))
        else {
            return;
        };
        if buttons.length() <= 1 {
            return;
        }
        self.logger.info(format!(
            "Removendo {} botão(ões) duplicado(s)",
            buttons.length() - 1
        ));
        for element in dom::elements_of(&buttons).skip(1) {
            element.remove();
        }
    }

    fn setup_navigation_detection(&self) {
        let Some(win) = dom::window() else { return };
        let Ok(history) = win.history() else { return };

        {
            let mut state = self.state.borrow_mut();
            state.history = Some(history.clone());
        }

        for method in ["pushState", "replaceState"] {
            let Ok(original) = Reflect::get(&history, &JsValue::from_str(method)) else {
                continue;
            };
            let Ok(original) = original.dyn_into::<Function>() else {
                continue;
            };
            {
                let mut state = self.state.borrow_mut();
                match method {
                    "pushState" => state.original_push_state = Some(original.clone()),
                    _ => state.original_replace_state = Some(original.clone()),
                }
            }

            let this = self.clone();
            let delegate = original.clone();
            let history_target: JsValue = history.clone().into();
            let patched = Closure::<dyn FnMut(JsValue, JsValue, JsValue)>::new(
                move |state_arg: JsValue, title: JsValue, url: JsValue| {
                    let args = Array::new();
                    args.push(&state_arg);
                    args.push(&title);
                    args.push(&url);
                    let _ = delegate.apply(&history_target, &args);
                    // Let the SPA finish rendering before reacting.
                    this.schedule_callback(this.config.observation.navigation_delay_ms);
                },
            );
            let _ = Reflect::set(&history, &JsValue::from_str(method), patched.as_ref());
            self.state.borrow_mut().history_patches.push(patched);
        }

        let this = self.clone();
        let popstate = Closure::<dyn FnMut()>::new(move || {
            this.schedule_callback(this.config.observation.navigation_delay_ms);
        });
        let _ =
            win.add_event_listener_with_callback("popstate", popstate.as_ref().unchecked_ref());
        self.state.borrow_mut().popstate_listener = Some(popstate);
    }

    /// Fallback for navigations none of the event-based signals observe.
    fn setup_periodic_check(&self) {
        let Some(win) = dom::window() else { return };
        if let Some(handle) = self.state.borrow_mut().poll_handle.take() {
            win.clear_interval_with_handle(handle);
        }

        let this = self.clone();
        let poll = Closure::<dyn FnMut()>::new(move || {
            let url = current_url().unwrap_or_default();
            let note_id = dom::document().and_then(|doc| note_identity(&doc, &this.config));
            let changed = {
                let state = this.state.borrow();
                state.last_url != url || state.last_note_id != note_id
            };
            if changed {
                let mut state = this.state.borrow_mut();
                state.last_url = url;
                state.last_note_id = note_id;
                drop(state);
                this.schedule_callback(0);
            }
        });
        let handle = win
            .set_interval_with_callback_and_timeout_and_arguments_0(
                poll.as_ref().unchecked_ref(),
                self.config.observation.poll_interval_ms,
            )
            .ok();

        let mut state = self.state.borrow_mut();
        state.poll_handle = handle;
        state.poll_listener = Some(poll);
    }

    /// Never invokes the callback synchronously on the triggering event.
    fn schedule_callback(&self, delay_ms: i32) {
        let Some(callback) = self.state.borrow().callback.clone() else {
            return;
        };
        dom::set_timeout(delay_ms, move || callback());
    }

    pub fn setup_cleanup_listeners(&self) {
        let Some(win) = dom::window() else { return };
        for event in ["beforeunload", "unload"] {
            let this = self.clone();
            let listener = Closure::<dyn FnMut()>::new(move || this.cleanup());
            let _ =
                win.add_event_listener_with_callback(event, listener.as_ref().unchecked_ref());
            self.state.borrow_mut().unload_listeners.push((event, listener));
        }
    }

    /// Idempotent teardown; safe before initialization and when called twice.
    pub fn cleanup(&self) {
        let mut state = self.state.borrow_mut();

        if let Some(observer) = state.mutation_observer.take() {
            observer.disconnect();
        }
        state.mutation_listener = None;

        let win = dom::window();
        if let Some(handle) = state.poll_handle.take() {
            if let Some(win) = win.as_ref() {
                win.clear_interval_with_handle(handle);
            }
        }
        state.poll_listener = None;

        if let Some(history) = state.history.take() {
            if let Some(original) = state.original_push_state.take() {
                let _ = Reflect::set(&history, &JsValue::from_str("pushState"), &original);
            }
            if let Some(original) = state.original_replace_state.take() {
                let _ = Reflect::set(&history, &JsValue::from_str("replaceState"), &original);
            }
        }
        state.history_patches.clear();

        if let Some(listener) = state.popstate_listener.take() {
            if let Some(win) = win.as_ref() {
                let _ = win.remove_event_listener_with_callback(
                    "popstate",
                    listener.as_ref().unchecked_ref(),
                );
            }
        }

        let unload_listeners = std::mem::take(&mut state.unload_listeners);
        drop(state);
        for (event, listener) in unload_listeners {
            if let Some(win) = win.as_ref() {
                let _ = win
                    .remove_event_listener_with_callback(event, listener.as_ref().unchecked_ref());
            }
            // One of these may be mid-dispatch right now; leak instead of
            // dropping a running closure.
            listener.forget();
        }

        self.logger.info("Observer cleanup completo");
    }
}

fn current_url() -> Option<String> {
    dom::window()?.location().href().ok()
}

fn node_list_is_relevant(nodes: &web_sys::NodeList) -> bool {
    dom::elements_of(nodes).any(|element| is_relevant_element(&element))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_relevance_matches_note_and_editor_fragments() {
        assert!(class_name_is_relevant("note-view-wrapper"));
        assert!(class_name_is_relevant("super-editor-pane"));
        assert!(!class_name_is_relevant("sidebar-footer"));
    }

    #[test]
    fn identity_prefers_hash_over_pathname() {
        assert_eq!(identity_fallback("#note-42", "/notes"), "#note-42");
        assert_eq!(identity_fallback("", "/notes"), "/notes");
    }
}
