//! Heuristic [`ClassifierPort`] that reads the fetched markup.
//!
//! A page is an entity page when one form holds at least one visible
//! editable field and a submit button that is not a search/cancel style
//! control. Candidate steps are internal links plus buttons whose text reads
//! like "open a form" (add, create, new, ...).

use crate::port::{Classification, ClassifierError, ClassifierPort, Surface};
use crate::registry::normalize_address;
use crate::step::{ExplorationPath, InteractionStep, StepKind};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

/// Submit buttons with these words do not make a page an entity form.
const SUBMIT_BLACKLIST: &[&str] = &[
    "search", "filter", "find", "reset", "clear", "back", "cancel", "close",
];

const FORM_OPENERS: &[&str] = &[
    "add", "create", "new", "insert", "edit", "modify", "change", "revise", "amend", "rate",
    "review", "feedback", "survey", "open", "start", "begin", "launch", "assign", "register",
    "sign up", "signup", "join", "enroll", "subscribe", "apply", "file", "claim", "request",
    "pay", "transfer", "deposit", "withdraw", "buy", "purchase", "donate", "invest", "book",
    "reserve", "schedule", "send message", "contact", "share", "invite", "comment", "reply",
];

const CANDIDATE_BLACKLIST: &[&str] = &[
    "upgrade", "pricing", "checkout", "order", "logout", "log out", "sign out", "about", "help",
    "support", "contact", "faq", "documentation", "docs", "tutorial", "guide", "feedback",
    "report", "terms", "privacy", "download", "export", "import", "print", "share", "save as",
    "copy", "delete", "remove", "cancel", "close", "reset", "clear", "clean", "facebook",
    "twitter", "linkedin", "instagram", "youtube", "social", "follow", "like", "subscribe",
    "preferences", "settings", "profile", "account", "notifications", "password", "back",
    "home", "previous", "next page", "search", "filter", "dismiss",
];

const SYMBOL_BLACKLIST: &[&str] = &["×", "✓", "✕"];

/// Leading words dropped from a button label to get the entity name.
const ACTION_WORDS: &[&str] = &["add", "create", "new", "edit", "view", "manage"];

const MAX_LABEL_LEN: usize = 60;

#[derive(Debug, Clone)]
pub struct HtmlClassifier {
    max_candidates: usize,
}

impl Default for HtmlClassifier {
    fn default() -> Self {
        Self { max_candidates: 25 }
    }
}

impl HtmlClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_candidates(mut self, max: usize) -> Self {
        self.max_candidates = max;
        self
    }

    pub fn analyse(
        &self,
        surface: &Surface,
        path: &ExplorationPath,
        discovered: &HashSet<String>,
    ) -> Result<Classification, ClassifierError> {
        let document = Html::parse_document(&surface.content);

        if let Some(form) = entity_form(&document)? {
            let name = entity_name(path, &document)?;
            let fields = relationship_fields(&document, form)?;
            debug!(address = %surface.address, ?name, fields = fields.len(), "Entity page");
            return Ok(Classification {
                is_entity: true,
                entity_name: name,
                relationship_field_names: fields,
                candidate_next_steps: Vec::new(),
            });
        }

        let base = Url::parse(&surface.address).ok();
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for element in document.select(&css(CLICKABLE)?) {
            let Some(step) = clickable_step(element) else {
                continue;
            };
            if !is_candidate(element, &step.label, base.as_ref(), discovered) {
                continue;
            }
            if seen.insert(step.label.to_lowercase()) {
                candidates.push(step);
            }
            if candidates.len() >= self.max_candidates {
                break;
            }
        }

        debug!(address = %surface.address, candidates = candidates.len(), "Navigation page");
        Ok(Classification::navigation(candidates))
    }

    pub fn locate(
        &self,
        surface: &Surface,
        failing: &InteractionStep,
    ) -> Result<Option<InteractionStep>, ClassifierError> {
        let document = Html::parse_document(&surface.content);
        let wanted = failing.label.trim().to_lowercase();

        let found = match failing.kind {
            StepKind::Fill | StepKind::Select => document
                .select(&css(FIELD)?)
                .filter(|e| field_label(&document, *e).is_some_and(|l| l.to_lowercase() == wanted))
                .find_map(|e| locator_for(e).filter(|l| *l != failing.locator)),
            _ => document
                .select(&css(CLICKABLE)?)
                .filter_map(clickable_step)
                .find(|s| s.label.to_lowercase() == wanted && s.locator != failing.locator)
                .map(|s| s.locator),
        };

        Ok(found.map(|locator| failing.relocated(locator)))
    }
}

#[async_trait]
impl ClassifierPort for HtmlClassifier {
    async fn classify(
        &mut self,
        surface: &Surface,
        path: &ExplorationPath,
        discovered_addresses: &HashSet<String>,
    ) -> Result<Classification, ClassifierError> {
        self.analyse(surface, path, discovered_addresses)
    }

    async fn resolve_step(
        &mut self,
        surface: &Surface,
        failing: &InteractionStep,
    ) -> Result<Option<InteractionStep>, ClassifierError> {
        self.locate(surface, failing)
    }
}

const CLICKABLE: &str = "a[href], button, [role=button], input[type=button], input[type=submit]";
const FIELD: &str = "input, textarea, select";

fn css(selector: &str) -> Result<Selector, ClassifierError> {
    Selector::parse(selector)
        .map_err(|e| ClassifierError::Malformed(format!("{}: {}", selector, e)))
}

fn text_of(element: ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_hidden(element: ElementRef) -> bool {
    let attrs = element.value();
    attrs.attr("hidden").is_some()
        || attrs.attr("aria-hidden") == Some("true")
        || attrs.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
        || attrs
            .attr("style")
            .is_some_and(|s| s.replace(' ', "").contains("display:none"))
}

fn contains_word(text: &str, words: &[&str]) -> bool {
    let text = text.to_lowercase();
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let joined = tokens.join(" ");
    words.iter().any(|w| {
        if w.contains(' ') {
            joined.contains(w)
        } else {
            tokens.contains(w)
        }
    })
}

/// The first form that looks like it creates or edits something. Pages
/// without a `<form>` are checked as a whole.
fn entity_form(document: &Html) -> Result<Option<ElementRef<'_>>, ClassifierError> {
    let forms: Vec<ElementRef> = document.select(&css("form")?).collect();
    let containers = if forms.is_empty() {
        document.select(&css("body")?).collect()
    } else {
        forms
    };

    let fields = css(FIELD)?;
    let buttons = css("button, input[type=submit]")?;

    for container in containers {
        let editable = container.select(&fields).any(|f| {
            let kind = f.value().attr("type").unwrap_or("text").to_lowercase();
            !is_hidden(f) && !matches!(kind.as_str(), "submit" | "button" | "reset" | "image")
        });
        if !editable {
            continue;
        }

        let submit = container.select(&buttons).any(|b| {
            let attrs = b.value();
            let kind = attrs.attr("type").unwrap_or("submit");
            let label = match attrs.name() {
                "input" => attrs.attr("value").unwrap_or("").to_string(),
                _ => text_of(b),
            };
            kind.eq_ignore_ascii_case("submit")
                && !is_hidden(b)
                && !contains_word(&label, SUBMIT_BLACKLIST)
        });
        if submit {
            return Ok(Some(container));
        }
    }
    Ok(None)
}

/// `Add sales order` becomes `Sales_Order`.
pub fn clean_entity_name(raw: &str) -> Option<String> {
    let words: Vec<String> = raw
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .filter(|w| !ACTION_WORDS.contains(&w.to_lowercase().as_str()))
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        None
    } else {
        Some(words.join("_"))
    }
}

fn entity_name(path: &ExplorationPath, document: &Html) -> Result<Option<String>, ClassifierError> {
    if let Some(name) = path.last().and_then(|s| clean_entity_name(&s.label)) {
        return Ok(Some(name));
    }
    for tag in ["h1", "title"] {
        if let Some(name) = document
            .select(&css(tag)?)
            .next()
            .and_then(|e| clean_entity_name(&text_of(e)))
        {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

fn field_label(document: &Html, field: ElementRef) -> Option<String> {
    let attrs = field.value();
    if let Some(id) = attrs.attr("id")
        && let Ok(selector) = Selector::parse(&format!("label[for=\"{}\"]", id))
        && let Some(label) = document.select(&selector).next()
    {
        let text = text_of(label);
        if !text.is_empty() {
            return Some(text);
        }
    }
    if let Some(label) = field
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "label")
    {
        let text = text_of(label);
        if !text.is_empty() {
            return Some(text);
        }
    }
    attrs
        .attr("aria-label")
        .or_else(|| attrs.attr("placeholder"))
        .map(str::to_string)
}

fn mentions_id(label: &str) -> bool {
    label.len() < 50
        && (label.ends_with("Id")
            || label.ends_with("ID")
            || label
                .split(|c: char| !c.is_alphanumeric())
                .any(|w| w.eq_ignore_ascii_case("id")))
}

/// Names of fields that point at other entities.
fn relationship_fields(document: &Html, form: ElementRef) -> Result<Vec<String>, ClassifierError> {
    let mut fields: Vec<String> = Vec::new();
    let mut push = |name: String| {
        if !fields.contains(&name) {
            fields.push(name);
        }
    };

    for field in form.select(&css(FIELD)?) {
        let attrs = field.value();
        let name = attrs.attr("name").filter(|n| !n.is_empty());

        if let Some(name) = name
            && (name.ends_with("_id") || name.ends_with("Id"))
        {
            push(name.to_string());
            continue;
        }

        let kind = attrs.attr("type").unwrap_or("").to_lowercase();
        let constrained = attrs.name() == "select" || matches!(kind.as_str(), "checkbox" | "radio");
        if !constrained {
            continue;
        }
        if let Some(label) = field_label(document, field).filter(|l| mentions_id(l)) {
            push(name.map(str::to_string).unwrap_or(label));
        }
    }
    Ok(fields)
}

fn valid_ident(id: &str) -> bool {
    let mut chars = id.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn locator_for(element: ElementRef) -> Option<String> {
    let attrs = element.value();
    if let Some(id) = attrs.attr("id").filter(|id| valid_ident(id)) {
        return Some(format!("#{}", id));
    }
    if let Some(name) = attrs.attr("name").filter(|n| !n.is_empty() && !n.contains('\'')) {
        return Some(format!("[name='{}']", name));
    }
    for attr in ["href", "data-href", "formaction"] {
        if let Some(value) = attrs.attr(attr).filter(|v| !v.contains('"')) {
            return Some(format!("{}[{}=\"{}\"]", attrs.name(), attr, value));
        }
    }
    None
}

fn clickable_step(element: ElementRef) -> Option<InteractionStep> {
    if is_hidden(element) {
        return None;
    }
    let attrs = element.value();
    let label = Some(text_of(element))
        .filter(|t| !t.is_empty())
        .or_else(|| attrs.attr("aria-label").map(str::to_string))
        .or_else(|| attrs.attr("title").map(str::to_string))
        .or_else(|| attrs.attr("value").map(str::to_string))?;
    let label = label.trim().to_string();
    if label.is_empty() || label.chars().count() > MAX_LABEL_LEN {
        return None;
    }
    let locator = locator_for(element)?;
    Some(InteractionStep::click(locator, label))
}

fn opens_form(label: &str) -> bool {
    label.contains('+') || label.contains('➕') || contains_word(label, FORM_OPENERS)
}

fn is_candidate(
    element: ElementRef,
    label: &str,
    base: Option<&Url>,
    discovered: &HashSet<String>,
) -> bool {
    if SYMBOL_BLACKLIST.iter().any(|s| label.contains(s))
        || contains_word(label, CANDIDATE_BLACKLIST)
    {
        return false;
    }

    let href = element
        .value()
        .attr("href")
        .or_else(|| element.value().attr("data-href"));
    let Some(href) = href else {
        return opens_form(label);
    };

    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return opens_form(label);
    }
    if href.starts_with("mailto:") || href.starts_with("tel:") {
        return false;
    }

    let Some(target) = base.and_then(|b| b.join(href).ok()) else {
        return opens_form(label);
    };
    let internal = base.is_some_and(|b| b.host_str() == target.host_str());
    if !internal {
        return false;
    }
    if discovered.contains(&normalize_address(target.as_str())) {
        return false;
    }
    // Links back to the page itself lead nowhere new.
    base.is_none_or(|b| normalize_address(b.as_str()) != normalize_address(target.as_str()))
}
