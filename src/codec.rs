//! On-disk encoding of a project.
//!
//! A project directory holds `project.json` (everything except page bodies) and a
//! `pages/` directory with one `<pageId>.html`, `<pageId>.css` and optional
//! `<pageId>.js` per page. Encoding and decoding here are pure; the service
//! sequences the actual reads and writes.

use crate::errors::{StoreError, StoreResult};
use crate::models::{Project, ProjectConfig, Theme};
use crate::validation::{repair, RawDocument};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

pub const METADATA_FILE: &str = "project.json";
pub const PAGES_DIR: &str = "pages";
pub const GLOBAL_DIR: &str = "global";
pub const THUMBNAILS_DIR: &str = "thumbnails";

const HTML_EXT: &str = "html";
const CSS_EXT: &str = "css";
const JS_EXT: &str = "js";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: ProjectConfig,
    pub theme: Theme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page_id: Option<String>,
    #[serde(default)]
    pub pages: Vec<PageDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, deserialize_with = "lenient_order")]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A write request for one file under `pages/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFileWrite {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct EncodedProject {
    pub metadata: String,
    pub page_files: Vec<PageFileWrite>,
}

/// One file read back from `pages/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone)]
pub struct DecodedProject {
    pub project: Project,
    /// Descriptors whose markup file was missing.
    pub dropped_page_ids: Vec<String>,
}

#[derive(Default)]
struct PageBodies {
    html: Option<String>,
    css: Option<String>,
    js: Option<String>,
}

pub fn html_file_name(page_id: &str) -> String {
    format!("{}.{}", page_id, HTML_EXT)
}

pub fn css_file_name(page_id: &str) -> String {
    format!("{}.{}", page_id, CSS_EXT)
}

pub fn js_file_name(page_id: &str) -> String {
    format!("{}.{}", page_id, JS_EXT)
}

pub fn metadata_of(project: &Project) -> ProjectMetadata {
    ProjectMetadata {
        id: project.id.clone(),
        name: project.name.clone(),
        description: project.description.clone(),
        created_at: project.created_at,
        updated_at: project.updated_at,
        config: project.config.clone(),
        theme: project.theme.clone(),
        current_page_id: project.current_page_id.clone(),
        pages: project
            .pages
            .iter()
            .enumerate()
            .map(|(index, page)| PageDescriptor {
                id: page.id.clone(),
                name: page.name.clone(),
                order: index as i64,
                thumbnail: page.thumbnail.clone(),
                created_at: page.created_at,
                updated_at: page.updated_at,
            })
            .collect(),
    }
}

pub fn encode(project: &Project) -> StoreResult<EncodedProject> {
    let metadata = serde_json::to_string_pretty(&metadata_of(project))?;
    let mut page_files = Vec::with_capacity(project.pages.len() * 3);
    for page in &project.pages {
        page_files.push(PageFileWrite {
            name: html_file_name(&page.id),
            content: page.html.clone(),
        });
        page_files.push(PageFileWrite {
            name: css_file_name(&page.id),
            content: page.css.clone(),
        });
        if let Some(script) = page.script() {
            page_files.push(PageFileWrite {
                name: js_file_name(&page.id),
                content: script.to_string(),
            });
        }
    }
    Ok(EncodedProject { metadata, page_files })
}

/// File names under `pages/` that the given project owns after a save.
pub fn owned_page_files(project: &Project) -> BTreeSet<String> {
    encode_names(project).collect()
}

fn encode_names(project: &Project) -> impl Iterator<Item = String> + '_ {
    project.pages.iter().flat_map(|page| {
        let mut names = vec![html_file_name(&page.id), css_file_name(&page.id)];
        if page.script().is_some() {
            names.push(js_file_name(&page.id));
        }
        names
    })
}

/// Splits `abc.html` into (`abc`, `html`). Names without an extension have no page id.
pub fn split_page_file_name(name: &str) -> Option<(&str, &str)> {
    let (id, extension) = name.split_once('.')?;
    if id.is_empty() {
        return None;
    }
    Some((id, extension))
}

/// True for `<id>.html`, `<id>.css` and `<id>.js`; anything else under `pages/` is left alone.
pub fn is_page_body_file(name: &str) -> bool {
    matches!(
        split_page_file_name(name),
        Some((_, HTML_EXT | CSS_EXT | JS_EXT))
    )
}

/// Rebuilds a project from `project.json` and the files found under `pages/`.
///
/// Only unreadable JSON fails the load. Descriptors without a usable id or without
/// a markup file are dropped; every other missing or malformed field is repaired.
pub fn decode(metadata: &str, page_files: Vec<PageFile>, location: &str) -> StoreResult<DecodedProject> {
    let mut document: Value = serde_json::from_str(metadata)?;
    let Some(object) = document.as_object_mut() else {
        return Err(StoreError::Corrupt("project metadata must be a JSON object".to_string()));
    };
    if !object.get("id").is_some_and(|id| id.as_str().is_some_and(|id| !id.trim().is_empty())) {
        tracing::warn!(project = %location, "project metadata has no id; assigning a new one");
    }

    let mut bodies: HashMap<String, PageBodies> = HashMap::new();
    for file in page_files {
        let Some((page_id, extension)) = split_page_file_name(&file.name) else {
            continue;
        };
        let entry = bodies.entry(page_id.to_string()).or_default();
        match extension {
            HTML_EXT => entry.html = Some(file.content),
            CSS_EXT => entry.css = Some(file.content),
            JS_EXT => entry.js = Some(file.content),
            _ => {}
        }
    }

    let descriptors = match object.remove("pages") {
        Some(Value::Array(descriptors)) => descriptors,
        Some(_) => {
            tracing::warn!(project = %location, "project metadata pages is not an array; loading no pages");
            Vec::new()
        }
        None => Vec::new(),
    };

    let mut kept = Vec::with_capacity(descriptors.len());
    let mut kept_bodies = HashMap::new();
    let mut dropped_page_ids = Vec::new();
    for mut descriptor in descriptors {
        let Some(page_id) = descriptor
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .map(ToString::to_string)
        else {
            tracing::warn!(project = %location, "page descriptor has no id; dropping page");
            continue;
        };
        let Some(PageBodies { html: Some(html), css, js }) = bodies.remove(&page_id) else {
            tracing::warn!(project = %location, page_id = %page_id, "page markup file missing; dropping page");
            dropped_page_ids.push(page_id);
            continue;
        };
        let order = descriptor.get("order").map(order_value).unwrap_or(0);
        if let Some(fields) = descriptor.as_object_mut() {
            fields.insert("order".to_string(), Value::from(order));
        }
        kept_bodies.insert(page_id, (html, css.unwrap_or_default(), js.filter(|value| !value.is_empty())));
        kept.push(descriptor);
    }
    object.insert("pages".to_string(), Value::Array(kept));

    let mut project = repair(&RawDocument::new(document));
    for page in &mut project.pages {
        if let Some((html, css, js)) = kept_bodies.remove(&page.id) {
            page.html = html;
            page.css = css;
            page.js = js;
        }
        page.html_path = Some(format!("{}/{}", PAGES_DIR, html_file_name(&page.id)));
        page.css_path = Some(format!("{}/{}", PAGES_DIR, css_file_name(&page.id)));
        page.js_path = page
            .script()
            .is_some()
            .then(|| format!("{}/{}", PAGES_DIR, js_file_name(&page.id)));
    }
    // Stable: equal orders keep their array position.
    project.pages.sort_by_key(|page| page.order);
    project.path = location.to_string();
    if project.current_page_id.is_none() {
        project.current_page_id = project.pages.first().map(|page| page.id.clone());
    }

    Ok(DecodedProject {
        project,
        dropped_page_ids,
    })
}

fn lenient_order<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(order_value(&Value::deserialize(deserializer)?))
}

/// Integer order of a descriptor; fractional values are floored, anything else is 0.
fn order_value(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.floor() as i64))
            .unwrap_or(0),
        _ => 0,
    }
}
