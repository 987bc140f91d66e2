use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::Serialize;
use web_sys::Element;

use crate::button::UiButton;
use crate::config::AddonConfig;
use crate::dom;
use crate::inserter::{self, ContentInserter, InsertError, InsertOutcome};
use crate::logger::Logger;
use crate::observer::{self, PageObserver};
use crate::tags::{self, TagExtractor};

/// The button disappears shortly after a successful insertion; the next
/// navigation signal brings it back if the note still qualifies.
const BUTTON_REMOVE_DELAY_MS: i32 = 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Initializing,
    Active,
    /// Wrong origin or the interface never loaded; the addon stays inert.
    Disabled,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Initializing => "initializing",
            Phase::Active => "active",
            Phase::Disabled => "disabled",
        }
    }
}

/// What the last check pass saw: which editor and note were open and the
/// tags captured for them. A repeat signal for the same pair short-circuits
/// the pass; the click handler consumes the captured tags so the insertion
/// matches what the user was shown the button for.
#[derive(Default)]
struct Session {
    editor: Option<Element>,
    note_id: Option<String>,
    tags: Vec<String>,
}

impl Session {
    fn clear(&mut self) {
        self.editor = None;
        self.note_id = None;
        self.tags.clear();
    }

    fn matches(&self, editor: &Element, note_id: &Option<String>) -> bool {
        let editor_node: &web_sys::Node = editor;
        self.note_id == *note_id
            && self
                .editor
                .as_ref()
                .is_some_and(|cached| cached.is_same_node(Some(editor_node)))
    }
}

/// Diagnostic snapshot, exported as JSON for console inspection.
#[derive(Debug, Serialize)]
pub struct AddonStatus {
    pub phase: &'static str,
    pub button_present: bool,
    pub editor_present: bool,
    pub url: String,
    pub note_id: Option<String>,
    pub captured_tags: Vec<String>,
}

/// Ties the pieces together: waits for the host interface, watches for note
/// navigation, and keeps exactly one action button alive while the open note
/// both has tags and lacks a location block.
pub struct AddonController {
    config: Rc<AddonConfig>,
    logger: Logger,
    extractor: TagExtractor,
    inserter: ContentInserter,
    button: UiButton,
    observer: PageObserver,
    phase: Cell<Phase>,
    session: RefCell<Session>,
}

impl AddonController {
    pub fn new(config: AddonConfig, logger: Logger) -> Rc<Self> {
        let config = Rc::new(config);
        Rc::new(Self {
            extractor: TagExtractor::new(config.clone(), logger),
            inserter: ContentInserter::new(config.clone(), logger),
            button: UiButton::new(config.clone(), logger),
            observer: PageObserver::new(config.clone(), logger),
            config,
            logger,
            phase: Cell::new(Phase::Pending),
            session: RefCell::new(Session::default()),
        })
    }

    pub async fn initialize(self: Rc<Self>) {
        if self.phase.get() != Phase::Pending {
            self.logger.warn("Inicialização repetida ignorada");
            return;
        }
        self.phase.set(Phase::Initializing);

        if !observer::is_allowed_origin(&self.config) {
            self.logger
                .info("Host não suportado, o addon ficará inativo");
            self.phase.set(Phase::Disabled);
            return;
        }

        observer::wait_for_page_ready().await;
        dom::sleep(self.config.observation.interface_load_grace_ms).await;

        if !self.wait_for_interface().await {
            self.logger
                .error("Interface não carregou dentro do limite, abortando");
            self.phase.set(Phase::Disabled);
            return;
        }

        let weak = Rc::downgrade(&self);
        self.observer.initialize(Rc::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.check_for_editor();
            }
        }));
        self.observer.setup_cleanup_listeners();

        self.phase.set(Phase::Active);
        self.logger.info("Addon inicializado");
        self.check_for_editor();
    }

    /// Polls for the interface indicators after the initial grace period,
    /// giving up after a fixed number of attempts so a login screen does not
    /// keep the addon spinning forever.
    async fn wait_for_interface(&self) -> bool {
        let observation = &self.config.observation;
        for attempt in 0..observation.interface_load_max_attempts {
            if let Some(doc) = dom::document() {
                if observer::is_interface_loaded(&doc, &self.config) {
                    self.logger.debug(format!(
                        "Interface detectada após {attempt} tentativa(s)"
                    ));
                    return true;
                }
            }
            dom::sleep(observation.interface_load_poll_ms).await;
        }
        false
    }

    /// One pass of the reconciliation loop. Runs after every navigation
    /// signal, so it must be cheap and idempotent: an unchanged note with a
    /// live button is only repositioned.
    pub fn check_for_editor(self: &Rc<Self>) {
        if self.phase.get() != Phase::Active {
            return;
        }
        let Some(doc) = dom::document() else { return };

        let Some(editor) = self.inserter.get_content_editor(&doc) else {
            self.button.remove_button();
            self.session.borrow_mut().clear();
            return;
        };

        let note_id = observer::note_identity(&doc, &self.config);
        if self.session.borrow().matches(&editor, &note_id) {
            // Duplicate signal for the same note; at most nudge the button.
            if self.button.exists() {
                self.button.reposition_button();
            }
            return;
        }

        let ranked = self.extractor.extract_tags(&doc);
        let text = editor.text_content().unwrap_or_default();
        let block_present = inserter::content_mentions_location(&text)
            || tags::has_location_block(&editor.inner_html());

        {
            let mut session = self.session.borrow_mut();
            session.editor = Some(editor);
            session.note_id = note_id;
            session.tags = ranked.clone();
        }

        if ranked.is_empty() {
            self.logger.debug("Nota sem tags, botão não é necessário");
            self.button.remove_button();
            return;
        }
        if block_present {
            self.logger
                .debug("Nota já contém localização, botão não é necessário");
            self.button.remove_button();
            return;
        }

        if self.button.exists() {
            self.button.reposition_button();
            return;
        }
        let weak: Weak<Self> = Rc::downgrade(self);
        let created = self.button.create_button(Rc::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.handle_add_location_click();
            }
        }));
        if !created {
            self.logger.warn("Não foi possível criar o botão");
        }
    }

    fn handle_add_location_click(self: &Rc<Self>) {
        let Some(doc) = dom::document() else { return };

        let Some(editor) = self.inserter.get_content_editor(&doc) else {
            self.logger.error("Editor sumiu entre a verificação e o clique");
            dom::alert("Editor não encontrado. Abra uma nota e tente novamente.");
            return;
        };

        let text = editor.text_content().unwrap_or_default();
        if inserter::content_mentions_location(&text) {
            dom::alert("A nota já contém um bloco de localização.");
            self.button.remove_button();
            return;
        }

        let mut ranked = self.session.borrow().tags.clone();
        if ranked.is_empty() {
            // Session went stale (e.g. cleanup raced a click); re-extract.
            ranked = self.extractor.extract_tags(&doc);
        }
        let Some(block) = tags::create_location_block(&ranked) else {
            dom::alert("Nenhuma tag encontrada para esta nota.");
            return;
        };

        match self.inserter.insert_location_block(&doc, &editor, &block) {
            Ok(InsertOutcome::Inserted) => {
                self.logger.info("Localização adicionada à nota");
                let button = self.button.clone();
                dom::set_timeout(BUTTON_REMOVE_DELAY_MS, move || {
                    button.remove_button();
                });
            }
            Ok(InsertOutcome::AlreadyPresent) => {
                dom::alert("A nota já contém um bloco de localização.");
                self.button.remove_button();
            }
            Err(error @ (InsertError::CooldownActive { .. } | InsertError::InFlight)) => {
                // Double-clicks and racing navigation signals land here.
                self.logger.debug(format!("Inserção suprimida: {error}"));
            }
            Err(error) => {
                self.logger
                    .error(format!("Erro ao inserir localização: {error}"));
                dom::alert("Erro ao adicionar a localização. Veja o console para detalhes.");
            }
        }
    }

    pub fn status(&self) -> AddonStatus {
        let doc = dom::document();
        let editor_present = doc
            .as_ref()
            .is_some_and(|doc| self.inserter.get_content_editor(doc).is_some());
        let url = dom::window()
            .and_then(|win| win.location().href().ok())
            .unwrap_or_default();
        let session = self.session.borrow();
        AddonStatus {
            phase: self.phase.get().as_str(),
            button_present: self.button.exists(),
            editor_present,
            url,
            note_id: session.note_id.clone(),
            captured_tags: session.tags.clone(),
        }
    }

    pub fn cleanup(&self) {
        self.observer.cleanup();
        self.button.remove_button();
        self.session.borrow_mut().clear();
        self.phase.set(Phase::Disabled);
        self.logger.info("Addon finalizado");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_names_are_stable() {
        assert_eq!(Phase::Pending.as_str(), "pending");
        assert_eq!(Phase::Active.as_str(), "active");
        assert_eq!(Phase::Disabled.as_str(), "disabled");
    }

    #[test]
    fn session_clear_drops_identity_and_tags() {
        let mut session = Session {
            editor: None,
            note_id: Some("abc".to_string()),
            tags: vec!["Projects/Alpha".to_string()],
        };
        session.clear();
        assert!(session.note_id.is_none());
        assert!(session.tags.is_empty());
    }

    #[test]
    fn status_serializes_to_json() {
        let status = AddonStatus {
            phase: "active",
            button_present: true,
            editor_present: false,
            url: "https://app.standardnotes.com/".to_string(),
            note_id: Some("abc".to_string()),
            captured_tags: vec!["Work".to_string()],
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"phase\":\"active\""));
        assert!(json.contains("\"note_id\":\"abc\""));
        assert!(json.contains("\"captured_tags\":[\"Work\"]"));
    }
}
