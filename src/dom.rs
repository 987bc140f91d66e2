use std::cell::Cell;
use std::rc::Rc;

use js_sys::Promise;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Document, Element, Node, NodeList, Window};

pub fn window() -> Option<Window> {
    web_sys::window()
}

pub fn document() -> Option<Document> {
    web_sys::window()?.document()
}

/// Returns the first element matched by an ordered selector preference list,
/// together with the selector that found it.
pub fn query_first<'a>(
    doc: &Document,
    selectors: impl IntoIterator<Item = &'a str>,
) -> Option<(Element, &'a str)> {
    for selector in selectors {
        if let Ok(Some(element)) = doc.query_selector(selector) {
            return Some((element, selector));
        }
    }
    None
}

pub fn elements_of(list: &NodeList) -> impl Iterator<Item = Element> + '_ {
    nodes_of(list).filter_map(|node| node.dyn_into::<Element>().ok())
}

pub fn nodes_of(list: &NodeList) -> impl Iterator<Item = Node> + '_ {
    (0..list.length()).filter_map(move |index| list.get(index))
}

/// One-shot timer. The closure leaks if the page dies before it fires, which
/// is the same lifetime the browser gives the timer itself.
pub fn set_timeout(delay_ms: i32, callback: impl FnOnce() + 'static) -> Option<i32> {
    let win = window()?;
    let js_callback = Closure::once_into_js(callback);
    win.set_timeout_with_callback_and_timeout_and_arguments_0(
        js_callback.unchecked_ref(),
        delay_ms,
    )
    .ok()
}

pub fn clear_timeout(handle: i32) {
    if let Some(win) = window() {
        win.clear_timeout_with_handle(handle);
    }
}

pub fn alert(message: &str) {
    if let Some(win) = window() {
        let _ = win.alert_with_message(message);
    }
}

pub async fn sleep(delay_ms: i32) {
    let promise = Promise::new(&mut |resolve, _reject| {
        let Some(win) = window() else { return };
        let _ = win.set_timeout_with_callback_and_timeout_and_arguments_0(&resolve, delay_ms);
    });
    let _ = JsFuture::from(promise).await;
}

/// Trailing-edge debouncer: every `schedule` resets the timer, the action runs
/// once after the burst goes quiet.
#[derive(Clone)]
pub struct Debouncer {
    delay_ms: i32,
    pending: Rc<Cell<Option<i32>>>,
    action: Rc<dyn Fn()>,
}

impl Debouncer {
    pub fn new(delay_ms: i32, action: Rc<dyn Fn()>) -> Self {
        Self {
            delay_ms,
            pending: Rc::new(Cell::new(None)),
            action,
        }
    }

    pub fn schedule(&self) {
        if let Some(handle) = self.pending.take() {
            clear_timeout(handle);
        }
        let pending = self.pending.clone();
        let action = self.action.clone();
        let handle = set_timeout(self.delay_ms, move || {
            pending.set(None);
            action();
        });
        self.pending.set(handle);
    }
}
