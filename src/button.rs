use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, Event, HtmlButtonElement, MutationObserver, MutationObserverInit};

use crate::config::AddonConfig;
use crate::dom::{self, Debouncer};
use crate::logger::Logger;

const BASE_STYLE: &str = "z-index: 10000; background: #086dd9; color: white; border: none; \
    padding: 6px 12px; border-radius: 4px; font-size: 12px; font-weight: 500; cursor: pointer; \
    box-shadow: 0 2px 8px rgba(0,0,0,0.15); transition: all 0.2s ease; \
    font-family: -apple-system, BlinkMacSystemFont, \"Segoe UI\", Roboto, sans-serif; \
    white-space: nowrap;";

pub(crate) fn is_degenerate_rect(top: f64, left: f64, width: f64, height: f64) -> bool {
    top == 0.0 && left == 0.0 && width == 0.0 && height == 0.0
}

/// Button sits a fixed distance to the left of the anchor, clamped so it
/// never leaves the viewport.
pub(crate) fn clamp_left(anchor_left: f64, button_offset: f64, min_left: f64) -> f64 {
    (anchor_left - button_offset).max(min_left)
}

fn anchored_css(top: f64, left: f64) -> String {
    format!("position: fixed; top: {top}px; left: {left}px; {BASE_STYLE}")
}

fn fallback_css() -> String {
    format!("position: fixed; top: 10px; right: 10px; {BASE_STYLE}")
}

#[derive(Default)]
struct ButtonInner {
    button: Option<HtmlButtonElement>,
    anchor: Option<Element>,
    used_selector: Option<String>,
    processing: bool,
    reposition_timer: Option<i32>,
    reposition_observer: Option<MutationObserver>,
    listeners_installed: bool,
}

/// Owns the single floating action button. The DOM, not this struct, is the
/// source of truth for existence: creation always clears any stale element
/// with the same id first.
#[derive(Clone)]
pub struct UiButton {
    config: Rc<AddonConfig>,
    logger: Logger,
    inner: Rc<RefCell<ButtonInner>>,
}

impl UiButton {
    pub fn new(config: Rc<AddonConfig>, logger: Logger) -> Self {
        Self {
            config,
            logger,
            inner: Rc::new(RefCell::new(ButtonInner::default())),
        }
    }

    pub fn create_button(&self, on_click: Rc<dyn Fn()>) -> bool {
        let Some(doc) = dom::document() else {
            return false;
        };
        self.remove_button();
        if let Some(stale) = doc.get_element_by_id(&self.config.ui.button_id) {
            stale.remove();
        }

        self.resolve_anchor(&doc);

        let Ok(element) = doc.create_element("button") else {
            return false;
        };
        let Ok(button) = element.dyn_into::<HtmlButtonElement>() else {
            return false;
        };
        button.set_id(&self.config.ui.button_id);
        button.set_type("button");
        button.set_text_content(Some(&self.config.ui.button_text));
        button.style().set_css_text(&self.compute_css());

        self.attach_hover_listeners(&button);
        self.attach_click_listener(&button, on_click);

        let Some(body) = doc.body() else {
            return false;
        };
        if body.append_child(&button).is_err() {
            return false;
        }

        self.inner.borrow_mut().button = Some(button);
        self.install_reposition_listeners(&doc);
        self.logger.info("Botão de localização criado e posicionado");
        true
    }

    pub fn remove_button(&self) {
        if let Some(button) = self.inner.borrow_mut().button.take() {
            button.remove();
            self.logger.debug("Botão removido");
        }
    }

    pub fn exists(&self) -> bool {
        let inner = self.inner.borrow();
        let Some(button) = inner.button.as_ref() else {
            return false;
        };
        let button_node: &web_sys::Node = button;
        dom::document().is_some_and(|doc| doc.contains(Some(button_node)))
    }

    /// Debounced reposition; cheap to call from high-frequency signals.
    pub fn reposition_button(&self) {
        let delay = self.config.ui.reposition_delay_ms;
        if let Some(timer) = self.inner.borrow_mut().reposition_timer.take() {
            dom::clear_timeout(timer);
        }
        let this = self.clone();
        let timer = dom::set_timeout(delay, move || {
            this.inner.borrow_mut().reposition_timer = None;
            this.do_reposition();
        });
        self.inner.borrow_mut().reposition_timer = timer;
    }

    fn resolve_anchor(&self, doc: &Document) {
        let selectors = self.config.ui.reference_selectors.iter().map(|s| s.as_str());
        let mut inner = self.inner.borrow_mut();
        match dom::query_first(doc, selectors) {
            Some((element, selector)) => {
                self.logger
                    .debug(format!("Elemento de referência encontrado: {selector}"));
                inner.anchor = Some(element);
                inner.used_selector = Some(selector.to_string());
            }
            None => {
                self.logger.warn("Nenhum elemento de referência encontrado");
                inner.anchor = None;
                inner.used_selector = None;
            }
        }
    }

    fn compute_css(&self) -> String {
        let inner = self.inner.borrow();
        let Some(anchor) = inner.anchor.as_ref() else {
            return fallback_css();
        };
        let rect = anchor.get_bounding_client_rect();
        if is_degenerate_rect(rect.top(), rect.left(), rect.width(), rect.height()) {
            self.logger
                .debug("Referência sem posição válida, usando posição fixa");
            return fallback_css();
        }
        let left = self.anchor_left(anchor, inner.used_selector.as_deref(), rect.left());
        anchored_css(rect.top(), left)
    }

    /// The most specific selector targets the icon inside the first toolbar
    /// button; positioning then keys off the enclosing button instead.
    fn anchor_left(&self, anchor: &Element, used_selector: Option<&str>, rect_left: f64) -> f64 {
        let ui = &self.config.ui;
        let svg_selector = ui.reference_selectors.first().map(|s| s.as_str());
        let base_left = if used_selector.is_some() && used_selector == svg_selector {
            anchor
                .closest("button")
                .ok()
                .flatten()
                .map(|parent| parent.get_bounding_client_rect().left())
                .unwrap_or(rect_left)
        } else {
            rect_left
        };
        clamp_left(base_left, ui.button_offset, ui.min_left_offset)
    }

    fn attach_hover_listeners(&self, button: &HtmlButtonElement) {
        let hover_target = button.clone();
        let on_enter = Closure::<dyn FnMut()>::new(move || {
            let style = hover_target.style();
            let _ = style.set_property("background", "#0056b3");
            let _ = style.set_property("transform", "translateY(-1px)");
            let _ = style.set_property("box-shadow", "0 4px 12px rgba(0,0,0,0.2)");
        });
        let leave_target = button.clone();
        let on_leave = Closure::<dyn FnMut()>::new(move || {
            let style = leave_target.style();
            let _ = style.set_property("background", "#086dd9");
            let _ = style.set_property("transform", "translateY(0)");
            let _ = style.set_property("box-shadow", "0 2px 8px rgba(0,0,0,0.15)");
        });
        let _ = button
            .add_event_listener_with_callback("mouseenter", on_enter.as_ref().unchecked_ref());
        let _ = button
            .add_event_listener_with_callback("mouseleave", on_leave.as_ref().unchecked_ref());
        // Listener lifetime equals button lifetime.
        on_enter.forget();
        on_leave.forget();
    }

    fn attach_click_listener(&self, button: &HtmlButtonElement, on_click: Rc<dyn Fn()>) {
        let this = self.clone();
        let handler = Closure::<dyn FnMut(Event)>::new(move |event: Event| {
            {
                let mut inner = this.inner.borrow_mut();
                if inner.processing {
                    this.logger.debug("Clique ignorado, processamento em andamento");
                    return;
                }
                inner.processing = true;
            }
            event.prevent_default();
            event.stop_propagation();
            this.set_processing_state(true);
            on_click();

            // Timeout-based re-enable: the callback outcome does not change it.
            let reset = this.clone();
            dom::set_timeout(this.config.ui.processing_timeout_ms, move || {
                reset.inner.borrow_mut().processing = false;
                reset.set_processing_state(false);
            });
        });
        let _ = button.add_event_listener_with_callback("click", handler.as_ref().unchecked_ref());
        handler.forget();
    }

    fn set_processing_state(&self, processing: bool) {
        let inner = self.inner.borrow();
        let Some(button) = inner.button.as_ref() else {
            return;
        };
        if processing {
            button.set_disabled(true);
            let _ = button.style().set_property("opacity", "0.6");
            button.set_text_content(Some(&self.config.ui.processing_text));
        } else {
            button.set_disabled(false);
            let _ = button.style().set_property("opacity", "1");
            button.set_text_content(Some(&self.config.ui.button_text));
        }
    }

    /// Resize, scroll and body mutations all funnel into the debounced
    /// reposition. Installed once; the handlers no-op while no button exists.
    fn install_reposition_listeners(&self, doc: &Document) {
        if self.inner.borrow().listeners_installed {
            return;
        }
        self.inner.borrow_mut().listeners_installed = true;

        let Some(win) = dom::window() else { return };

        let reposition = {
            let this = self.clone();
            Rc::new(move || {
                if this.exists() {
                    this.reposition_button();
                }
            }) as Rc<dyn Fn()>
        };

        let window_debouncer =
            Debouncer::new(self.config.ui.listener_debounce_ms, reposition.clone());
        for event in ["resize", "scroll"] {
            let debouncer = window_debouncer.clone();
            let listener = Closure::<dyn FnMut()>::new(move || debouncer.schedule());
            let _ = win.add_event_listener_with_callback(event, listener.as_ref().unchecked_ref());
            listener.forget();
        }

        let observer_debouncer = Debouncer::new(self.config.ui.observer_debounce_ms, reposition);
        let observer_callback = Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(
            move |_records: js_sys::Array, _observer: MutationObserver| {
                observer_debouncer.schedule();
            },
        );
        if let Ok(observer) = MutationObserver::new(observer_callback.as_ref().unchecked_ref()) {
            if let Some(body) = doc.body() {
                let init = MutationObserverInit::new();
                init.set_child_list(true);
                init.set_subtree(true);
                init.set_attributes(false);
                let _ = observer.observe_with_options(&body, &init);
                self.inner.borrow_mut().reposition_observer = Some(observer);
            }
        }
        observer_callback.forget();
    }

    fn do_reposition(&self) {
        if self.inner.borrow().button.is_none() {
            return;
        }
        let Some(doc) = dom::document() else { return };

        let anchor_detached = {
            let inner = self.inner.borrow();
            match inner.anchor.as_ref() {
                Some(anchor) => {
                    let anchor_node: &web_sys::Node = anchor;
                    !doc.contains(Some(anchor_node))
                }
                None => true,
            }
        };
        if anchor_detached {
            self.logger
                .debug("Referência perdida, procurando novo elemento");
            self.resolve_anchor(&doc);
        }

        let inner = self.inner.borrow();
        let (Some(button), Some(anchor)) = (inner.button.as_ref(), inner.anchor.as_ref()) else {
            return;
        };
        let rect = anchor.get_bounding_client_rect();
        if is_degenerate_rect(rect.top(), rect.left(), rect.width(), rect.height()) {
            return;
        }
        let left = self.anchor_left(anchor, inner.used_selector.as_deref(), rect.left());
        let style = button.style();
        let _ = style.set_property("top", &format!("{}px", rect.top()));
        let _ = style.set_property("left", &format!("{left}px"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_offset_is_clamped_to_viewport_margin() {
        assert_eq!(clamp_left(400.0, 180.0, 10.0), 220.0);
        assert_eq!(clamp_left(100.0, 180.0, 10.0), 10.0);
        assert_eq!(clamp_left(190.0, 180.0, 10.0), 10.0);
    }

    #[test]
    fn all_zero_rect_is_degenerate() {
        assert!(is_degenerate_rect(0.0, 0.0, 0.0, 0.0));
        assert!(!is_degenerate_rect(0.0, 0.0, 24.0, 24.0));
        assert!(!is_degenerate_rect(120.0, 640.0, 0.0, 0.0));
    }

    #[test]
    fn css_variants_pin_the_button() {
        let anchored = anchored_css(42.0, 220.0);
        assert!(anchored.starts_with("position: fixed; top: 42px; left: 220px;"));
        let fallback = fallback_css();
        assert!(fallback.contains("top: 10px; right: 10px;"));
    }
}
