use std::collections::HashSet;
use std::rc::Rc;
use std::sync::OnceLock;

use regex::Regex;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlElement};

use crate::config::AddonConfig;
use crate::dom;
use crate::logger::Logger;

pub const LOCATION_MARKER: &str = "<<<Localização>>>";

fn allowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-ZÀ-ÿ0-9\s_\-/.]+$").expect("valid char allow-list"))
}

fn suspicious_patterns() -> &'static [Regex; 4] {
    static RE: OnceLock<[Regex; 4]> = OnceLock::new();
    RE.get_or_init(|| {
        [
            Regex::new(r"^\d+$").expect("valid digits pattern"),
            Regex::new(r"^[()\[\]{}]+$").expect("valid brackets pattern"),
            Regex::new(r"^[<>]+$").expect("valid angle brackets pattern"),
            Regex::new(r"(?i)\b(click|select|button|menu|link|focus|edit|delete|save|cancel)\b")
                .expect("valid verbs pattern"),
        ]
    })
}

fn hierarchical_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z/]*$").expect("valid hierarchy pattern"))
}

/// A candidate is a tag when it is short enough, sticks to the character
/// allow-list, and resembles neither interface chrome nor an interaction verb.
pub fn is_valid_tag(candidate: &str, interface_noise: &[String]) -> bool {
    let length = candidate.chars().count();
    if length == 0 || length > 100 {
        return false;
    }
    let lowered = candidate.to_lowercase();
    if interface_noise
        .iter()
        .any(|noise| lowered.contains(&noise.to_lowercase()))
    {
        return false;
    }
    if !allowed_chars().is_match(candidate) {
        return false;
    }
    !suspicious_patterns()
        .iter()
        .any(|pattern| pattern.is_match(candidate))
}

/// Strips newlines and tabs, collapses runs of whitespace, and drops values
/// that survive cleaning only as junk.
fn normalize_tag(raw: &str, max_length: usize) -> Option<String> {
    let stripped = raw.replace(['\n', '\r', '\t'], "");
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty()
        || collapsed.chars().count() > max_length
        || collapsed == "undefined"
        || collapsed == "null"
        || collapsed.ends_with('/')
    {
        return None;
    }
    Some(collapsed)
}

fn segment_count(tag: &str) -> usize {
    tag.split('/').count()
}

/// Orders tags by hierarchical depth then length, and collapses the set to
/// the single most specific tag when every other entry is an ancestor or a
/// shallower sibling of it.
pub fn rank_tags(mut tags: Vec<String>) -> Vec<String> {
    if tags.len() <= 1 {
        return tags;
    }
    tags.sort_by(|a, b| {
        segment_count(b)
            .cmp(&segment_count(a))
            .then(b.len().cmp(&a.len()))
    });
    let first = tags[0].clone();
    let first_depth = segment_count(&first);
    let first_wins = tags[1..]
        .iter()
        .all(|tag| first.contains(tag.as_str()) || first_depth > segment_count(tag));
    if first_wins {
        vec![first]
    } else {
        tags
    }
}

/// Formats the marker block from the best tag; `None` when no usable tag
/// survives the final interface-string filter.
pub fn create_location_block(tags: &[String]) -> Option<String> {
    let tag_path = tags.iter().find(|tag| {
        let lowered = tag.to_lowercase();
        tag.as_str() != "Create a new smart view"
            && tag.as_str() != "Show/hide password"
            && !lowered.contains("link")
            && !lowered.contains("focus")
            && !lowered.contains("menu")
    })?;
    Some(format!(
        "{LOCATION_MARKER}\n{tag_path}\n{LOCATION_MARKER}\n\n"
    ))
}

/// Strict marker test. The inserter carries a deliberately looser variant.
pub fn has_location_block(content: &str) -> bool {
    content.contains(LOCATION_MARKER)
}

pub struct TagExtractor {
    config: Rc<AddonConfig>,
    logger: Logger,
}

impl TagExtractor {
    pub fn new(config: Rc<AddonConfig>, logger: Logger) -> Self {
        Self { config, logger }
    }

    /// Scans the page with three heuristics of decreasing precision and
    /// returns the ranked tag set. Empty output just means no tags.
    pub fn extract_tags(&self, doc: &Document) -> Vec<String> {
        let mut candidates = Vec::new();
        self.collect_primary(doc, &mut candidates);
        self.collect_from_linking_container(doc, &mut candidates);
        self.collect_hierarchical(doc, &mut candidates);

        let cleaned = self.clean_and_dedupe(candidates);
        let ranked = rank_tags(cleaned);
        self.logger.info(format!("Tags selecionadas: {ranked:?}"));
        ranked
    }

    fn collect_primary(&self, doc: &Document, out: &mut Vec<String>) {
        let Ok(spans) = doc.query_selector_all(&self.config.tags.primary_selector) else {
            return;
        };
        self.logger.debug(format!(
            "Seletor primário encontrou {} elementos",
            spans.length()
        ));
        for span in dom::elements_of(&spans) {
            let text = span.text_content();
            let title = span.get_attribute("title");
            for candidate in [text, title].into_iter().flatten() {
                self.keep_if_valid(candidate.trim(), out);
            }
        }
    }

    fn collect_from_linking_container(&self, doc: &Document, out: &mut Vec<String>) {
        let Ok(Some(container)) =
            doc.query_selector(&self.config.tags.linking_container_selector)
        else {
            return;
        };
        for selector in &self.config.tags.linking_selectors {
            let Ok(elements) = container.query_selector_all(selector) else {
                continue;
            };
            for element in dom::elements_of(&elements) {
                for candidate in candidate_texts(&element) {
                    self.keep_if_valid(candidate.trim(), out);
                }
            }
        }
    }

    fn collect_hierarchical(&self, doc: &Document, out: &mut Vec<String>) {
        let Ok(spans) = doc.query_selector_all("span") else {
            return;
        };
        for span in dom::elements_of(&spans) {
            let Some(text) = span.text_content() else {
                continue;
            };
            let text = text.trim();
            if text.contains('/') && hierarchical_shape().is_match(text) {
                self.keep_if_valid(text, out);
            }
        }
    }

    fn keep_if_valid(&self, candidate: &str, out: &mut Vec<String>) {
        if candidate.is_empty() {
            return;
        }
        if is_valid_tag(candidate, &self.config.tags.interface_noise) {
            out.push(candidate.to_string());
        } else {
            self.logger
                .debug(format!("Candidato rejeitado: \"{candidate}\""));
        }
    }

    fn clean_and_dedupe(&self, raw: Vec<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        raw.iter()
            .filter_map(|tag| normalize_tag(tag, self.config.tags.max_tag_length))
            .filter(|tag| seen.insert(tag.clone()))
            .collect()
    }
}

/// All the places a tag string can hide on a chip element.
fn candidate_texts(element: &Element) -> Vec<String> {
    let mut texts = vec![
        element.text_content(),
        element.get_attribute("title"),
        element.get_attribute("data-tag"),
        element.get_attribute("aria-label"),
    ];
    if let Some(html) = element.dyn_ref::<HtmlElement>() {
        texts.push(Some(html.inner_text()));
    }
    texts
        .into_iter()
        .flatten()
        .filter(|text| !text.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TagConfig;

    fn noise() -> Vec<String> {
        TagConfig::default().interface_noise
    }

    #[test]
    fn rejects_suspicious_patterns() {
        let noise = noise();
        for candidate in ["12345", "([{}])", "<<<>>>", "click here now", "Save all"] {
            assert!(!is_valid_tag(candidate, &noise), "accepted {candidate:?}");
        }
    }

    #[test]
    fn rejects_overlong_candidates() {
        let noise = noise();
        let long = "a".repeat(101);
        assert!(!is_valid_tag(&long, &noise));
        let long_but_ok = "a".repeat(100);
        assert!(is_valid_tag(&long_but_ok, &noise));
    }

    #[test]
    fn rejects_interface_noise_substrings() {
        let noise = noise();
        assert!(!is_valid_tag("Create a new smart view", &noise));
        assert!(!is_valid_tag("My Settings Page", &noise));
        assert!(is_valid_tag("Projects/Alpha", &noise));
    }

    #[test]
    fn rejects_disallowed_characters() {
        let noise = noise();
        assert!(!is_valid_tag("tag!", &noise));
        assert!(!is_valid_tag("a|b", &noise));
        assert!(is_valid_tag("Férias 2024", &noise));
    }

    #[test]
    fn normalization_strips_and_collapses() {
        assert_eq!(
            normalize_tag("  Projects\n\t Alpha  ", 100),
            Some("Projects Alpha".to_string())
        );
        assert_eq!(normalize_tag("a   b", 100), Some("a b".to_string()));
        assert_eq!(normalize_tag("undefined", 100), None);
        assert_eq!(normalize_tag("null", 100), None);
        assert_eq!(normalize_tag("Projects/", 100), None);
        assert_eq!(normalize_tag("  \n ", 100), None);
    }

    #[test]
    fn ranking_collapses_to_most_specific_tag() {
        let ranked = rank_tags(vec![
            "Projects/Alpha/Beta".to_string(),
            "Projects/Alpha".to_string(),
            "Projects".to_string(),
        ]);
        assert_eq!(ranked, vec!["Projects/Alpha/Beta".to_string()]);
    }

    #[test]
    fn ranking_keeps_unrelated_tags() {
        let ranked = rank_tags(vec!["Work".to_string(), "Personal".to_string()]);
        assert_eq!(ranked.len(), 2);
        // Longer tag sorts first when depth ties.
        assert_eq!(ranked[0], "Personal");
    }

    #[test]
    fn ranking_prefers_deeper_paths_over_longer_strings() {
        let ranked = rank_tags(vec![
            "A/B".to_string(),
            "AveryLongTopLevelTagName".to_string(),
        ]);
        assert_eq!(ranked[0], "A/B");
    }

    #[test]
    fn location_block_has_exact_shape() {
        let block = create_location_block(&["Projects/Alpha".to_string()]).unwrap();
        assert_eq!(block, "<<<Localização>>>\nProjects/Alpha\n<<<Localização>>>\n\n");
    }

    #[test]
    fn location_block_skips_interface_leftovers() {
        assert_eq!(
            create_location_block(&["Show/hide password".to_string()]),
            None
        );
        let block = create_location_block(&[
            "Create a new smart view".to_string(),
            "Projects/Alpha".to_string(),
        ])
        .unwrap();
        assert!(block.contains("Projects/Alpha"));
    }

    #[test]
    fn strict_marker_detection() {
        assert!(has_location_block("x <<<Localização>>> y"));
        assert!(!has_location_block("no marker here"));
        // The strict check does not fire on the bare word.
        assert!(!has_location_block("minha Localização favorita"));
    }
}
