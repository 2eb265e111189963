//! Checks and repairs loosely-shaped project documents (import files, damaged
//! metadata). Nothing outside this module handles `RawDocument` directly.
//!
//! Validation and repair are separate: `ImportPolicy::Strict`
//! rejects a document with its field-level messages, `ImportPolicy::Lenient`
//! repairs whatever it is given. Callers pick one.

use crate::errors::{StoreError, StoreResult};
use crate::models::{new_id, Page, Project, ProjectConfig, Theme};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

const PROJECT_REQUIRED_FIELDS: &[&str] = &["id", "name", "createdAt", "updatedAt", "pages", "config", "theme"];
const PAGE_REQUIRED_FIELDS: &[&str] = &["id", "name", "order", "html", "css", "createdAt", "updatedAt"];

pub const UNTITLED_PROJECT_NAME: &str = "Untitled Project";
const EMPTY_PAGE_MARKUP: &str = "<div></div>";

/// An untyped document that has not been validated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument(Value);

impl RawDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn parse(text: &str) -> StoreResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|error| StoreError::Corrupt(format!("document is not valid JSON: {}", error)))?;
        Ok(Self(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportPolicy {
    /// Validate, and reject with the field-level errors on failure.
    Strict,
    /// Repair whatever is missing or malformed.
    Lenient,
}

pub fn validate(raw: &RawDocument) -> ValidationReport {
    let mut errors = Vec::new();

    let Some(object) = raw.0.as_object() else {
        errors.push("project document must be a JSON object".to_string());
        return ValidationReport { ok: false, errors };
    };

    for field in PROJECT_REQUIRED_FIELDS {
        if !object.contains_key(*field) {
            errors.push(format!("missing required field: {}", field));
        }
    }

    check_type(object, "id", Value::is_string, "a string", "", &mut errors);
    check_type(object, "name", Value::is_string, "a string", "", &mut errors);
    check_type(object, "createdAt", Value::is_string, "a string", "", &mut errors);
    check_type(object, "updatedAt", Value::is_string, "a string", "", &mut errors);
    check_type(object, "pages", Value::is_array, "an array", "", &mut errors);
    check_type(object, "config", Value::is_object, "an object", "", &mut errors);
    check_type(object, "theme", Value::is_object, "an object", "", &mut errors);
    if let Some(description) = object.get("description") {
        if !description.is_string() && !description.is_null() {
            errors.push("field description must be a string".to_string());
        }
    }

    let mut page_ids = HashSet::new();
    if let Some(pages) = object.get("pages").and_then(Value::as_array) {
        for (index, page) in pages.iter().enumerate() {
            validate_page(page, index, &mut errors);
            if let Some(id) = page.get("id").and_then(Value::as_str) {
                if !page_ids.insert(id.to_string()) {
                    errors.push(format!("page {}: duplicate page id {}", index, id));
                }
            }
        }
    }

    if let Some(current) = object.get("currentPageId").and_then(Value::as_str) {
        if !page_ids.contains(current) {
            errors.push(format!("currentPageId {} does not reference a page", current));
        }
    }

    ValidationReport {
        ok: errors.is_empty(),
        errors,
    }
}

fn validate_page(page: &Value, index: usize, errors: &mut Vec<String>) {
    let Some(object) = page.as_object() else {
        errors.push(format!("page {}: must be a JSON object", index));
        return;
    };
    let prefix = format!("page {}: ", index);
    for field in PAGE_REQUIRED_FIELDS {
        if !object.contains_key(*field) {
            errors.push(format!("{}missing required field: {}", prefix, field));
        }
    }
    check_type(object, "id", Value::is_string, "a string", &prefix, errors);
    check_type(object, "name", Value::is_string, "a string", &prefix, errors);
    check_type(object, "order", Value::is_number, "a number", &prefix, errors);
    check_type(object, "html", Value::is_string, "a string", &prefix, errors);
    check_type(object, "css", Value::is_string, "a string", &prefix, errors);
    if let Some(js) = object.get("js") {
        if !js.is_string() && !js.is_null() {
            errors.push(format!("{}field js must be a string", prefix));
        }
    }
}

fn check_type(
    object: &Map<String, Value>,
    field: &str,
    predicate: fn(&Value) -> bool,
    expected: &str,
    prefix: &str,
    errors: &mut Vec<String>,
) {
    if let Some(value) = object.get(field) {
        if !predicate(value) {
            errors.push(format!("{}field {} must be {}", prefix, field, expected));
        }
    }
}

/// Builds a usable project from any document. Never fails.
pub fn repair(raw: &RawDocument) -> Project {
    let now = Utc::now();
    let empty = Map::new();
    let object = raw.0.as_object().unwrap_or(&empty);

    let mut seen_ids = HashSet::new();
    let pages: Vec<Page> = object
        .get("pages")
        .and_then(Value::as_array)
        .map(|pages| {
            pages
                .iter()
                .enumerate()
                .map(|(index, page)| {
                    let mut repaired = repair_page(page, index, now);
                    if !seen_ids.insert(repaired.id.clone()) {
                        repaired.id = new_id();
                        seen_ids.insert(repaired.id.clone());
                    }
                    repaired
                })
                .collect()
        })
        .unwrap_or_default();

    let current_page_id = non_empty_str(object, "currentPageId")
        .filter(|id| pages.iter().any(|page| page.id == *id))
        .map(ToString::to_string);

    Project {
        id: non_empty_str(object, "id").map(ToString::to_string).unwrap_or_else(new_id),
        name: non_empty_str(object, "name")
            .unwrap_or(UNTITLED_PROJECT_NAME)
            .to_string(),
        description: non_empty_str(object, "description").map(ToString::to_string),
        created_at: object.get("createdAt").and_then(coerce_timestamp).unwrap_or(now),
        updated_at: object.get("updatedAt").and_then(coerce_timestamp).unwrap_or(now),
        pages,
        config: repair_section::<ProjectConfig>(object.get("config")),
        theme: repair_section::<Theme>(object.get("theme")),
        path: object
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        current_page_id,
    }
}

fn repair_page(value: &Value, index: usize, now: DateTime<Utc>) -> Page {
    let empty = Map::new();
    let object = value.as_object().unwrap_or(&empty);
    Page {
        id: non_empty_str(object, "id").map(ToString::to_string).unwrap_or_else(new_id),
        name: non_empty_str(object, "name")
            .map(ToString::to_string)
            .unwrap_or_else(|| format!("Page {}", index + 1)),
        order: object
            .get("order")
            .and_then(|order| order.as_i64().or_else(|| order.as_f64().map(|float| float.floor() as i64)))
            .unwrap_or(index as i64),
        html: non_empty_str(object, "html")
            .unwrap_or(EMPTY_PAGE_MARKUP)
            .to_string(),
        css: object
            .get("css")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        js: non_empty_str(object, "js").map(ToString::to_string),
        thumbnail: non_empty_str(object, "thumbnail").map(ToString::to_string),
        created_at: object.get("createdAt").and_then(coerce_timestamp).unwrap_or(now),
        updated_at: object.get("updatedAt").and_then(coerce_timestamp).unwrap_or(now),
        html_path: None,
        css_path: None,
        js_path: None,
    }
}

/// Overlays whatever fields are present onto the defaults; falls back to the
/// defaults entirely when the overlay does not deserialize.
fn repair_section<T>(value: Option<&Value>) -> T
where
    T: Default + Serialize + DeserializeOwned,
{
    let Some(overlay) = value.filter(|value| value.is_object()) else {
        return T::default();
    };
    let Ok(mut merged) = serde_json::to_value(T::default()) else {
        return T::default();
    };
    merge_json(&mut merged, overlay.clone());
    serde_json::from_value(merged).unwrap_or_else(|error| {
        tracing::warn!(error = %error, "section could not be repaired; using defaults");
        T::default()
    })
}

fn non_empty_str<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    object
        .get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
}

/// Accepts RFC 3339 strings, naive date-times, plain dates and epoch milliseconds.
pub fn coerce_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => {
            let text = text.trim();
            if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
                return Some(parsed.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
                return Some(naive.and_utc());
            }
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc())
        }
        Value::Number(number) => number.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

pub fn merge_json(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target_map), Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

/// Turns an import file into a transient project (no backing directory).
pub fn import_document(text: &str, policy: ImportPolicy) -> StoreResult<Project> {
    let raw = RawDocument::parse(text)?;
    let mut project = match policy {
        ImportPolicy::Strict => {
            let report = validate(&raw);
            if !report.ok {
                return Err(StoreError::Validation(report.errors));
            }
            serde_json::from_value::<Project>(raw.0)
                .map_err(|error| StoreError::Validation(vec![error.to_string()]))?
        }
        ImportPolicy::Lenient => repair(&raw),
    };
    detach(&mut project);
    project.normalize_order();
    Ok(project)
}

/// Full project document suitable for `import_document`.
pub fn export_document(project: &Project) -> StoreResult<String> {
    let mut exported = project.clone();
    detach(&mut exported);
    Ok(serde_json::to_string_pretty(&exported)?)
}

pub fn is_project_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|value| value.to_str())
        .map(|extension| extension.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn detach(project: &mut Project) {
    project.path.clear();
    for page in &mut project.pages {
        page.html_path = None;
        page.css_path = None;
        page.js_path = None;
    }
}
