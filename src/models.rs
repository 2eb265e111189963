use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub pages: Vec<Page>,
    pub config: ProjectConfig,
    pub theme: Theme,
    /// Backing directory; empty for transient projects.
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_page_id: Option<String>,
}

impl Project {
    pub fn new(name: &str, description: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            description,
            created_at: now,
            updated_at: now,
            pages: Vec::new(),
            config: ProjectConfig::default(),
            theme: Theme::default(),
            path: String::new(),
            current_page_id: None,
        }
    }

    pub fn is_directory_backed(&self) -> bool {
        !self.path.is_empty()
    }

    pub fn page(&self, page_id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id == page_id)
    }

    pub fn page_index(&self, page_id: &str) -> Option<usize> {
        self.pages.iter().position(|page| page.id == page_id)
    }

    pub fn current_page(&self) -> Option<&Page> {
        self.current_page_id.as_deref().and_then(|id| self.page(id))
    }

    /// Re-derives `order` from position. Stored order values are never trusted
    /// once the page list has been structurally changed.
    pub fn normalize_order(&mut self) {
        for (index, page) in self.pages.iter_mut().enumerate() {
            page.order = index as i64;
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub name: String,
    pub order: i64,
    pub html: String,
    pub css: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_path: Option<String>,
}

impl Page {
    pub fn new(name: &str, order: i64, html: String, css: String, js: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name: name.to_string(),
            order,
            html,
            css,
            js,
            thumbnail: None,
            created_at: now,
            updated_at: now,
            html_path: None,
            css_path: None,
            js_path: None,
        }
    }

    /// A script body is only materialized on disk when it has content.
    pub fn script(&self) -> Option<&str> {
        self.js.as_deref().filter(|js| !js.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub auto_save: bool,
    pub auto_save_interval: u64,
    pub default_transition: String,
    pub show_page_numbers: bool,
    pub loop_presentation: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            auto_save: true,
            auto_save_interval: 30_000,
            default_transition: "fade".to_string(),
            show_page_numbers: true,
            loop_presentation: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub id: String,
    pub name: String,
    pub colors: ThemeColors,
    pub fonts: ThemeFonts,
    pub spacing: ThemeSpacing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeColors {
    pub primary: String,
    pub secondary: String,
    pub background: String,
    pub text: String,
    pub accent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeFonts {
    pub heading: String,
    pub body: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeSpacing {
    pub small: u32,
    pub medium: u32,
    pub large: u32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            name: "Default Theme".to_string(),
            colors: ThemeColors {
                primary: "#409eff".to_string(),
                secondary: "#67c23a".to_string(),
                background: "#ffffff".to_string(),
                text: "#303133".to_string(),
                accent: "#e6a23c".to_string(),
            },
            fonts: ThemeFonts {
                heading: "Arial, sans-serif".to_string(),
                body: "Arial, sans-serif".to_string(),
                code: "Consolas, monospace".to_string(),
            },
            spacing: ThemeSpacing {
                small: 8,
                medium: 16,
                large: 24,
            },
        }
    }
}

/// Detached summary kept in the local index for the recent-projects view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCache {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub path: String,
    pub page_count: u32,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl ProjectCache {
    pub fn from_project(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            description: project.description.clone(),
            path: project.path.clone(),
            page_count: u32::try_from(project.pages.len()).unwrap_or(u32::MAX),
            updated_at: project.updated_at,
            thumbnail: project.pages.first().and_then(|page| page.thumbnail.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePatch {
    pub name: Option<String>,
    pub html: Option<String>,
    pub css: Option<String>,
    /// `Some("")` clears the script.
    pub js: Option<String>,
    pub thumbnail: Option<String>,
}

impl PagePatch {
    pub fn apply(self, page: &mut Page) {
        if let Some(name) = self.name {
            page.name = name;
        }
        if let Some(html) = self.html {
            page.html = html;
        }
        if let Some(css) = self.css {
            page.css = css;
        }
        if let Some(js) = self.js {
            page.js = if js.is_empty() { None } else { Some(js) };
        }
        if let Some(thumbnail) = self.thumbnail {
            page.thumbnail = Some(thumbnail);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn title_page(project_name: &str, now: DateTime<Utc>) -> Page {
    let html = format!(
        "<div class=\"slide\">\n  <h1 style=\"font-size: 48px; color: #409eff; margin-bottom: 20px;\">{}</h1>\n  <p style=\"font-size: 24px; color: #606266;\">Welcome to the deck editor</p>\n</div>",
        project_name
    );
    let css = "/* page styles */\n.slide {\n  width: 100vw;\n  height: 100vh;\n  display: flex;\n  flex-direction: column;\n  justify-content: center;\n  align-items: center;\n  padding: 40px;\n  box-sizing: border-box;\n  background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);\n  color: white;\n}\n".to_string();
    Page::new(
        &format!("{}'s title page", project_name),
        0,
        html,
        css,
        Some("// page script\nconsole.log(\"title page loaded\");".to_string()),
        now,
    )
}

pub fn content_page(name: &str, position: usize, now: DateTime<Utc>) -> Page {
    let html = format!(
        "<div style=\"padding: 40px; min-height: 400px;\">\n  <h2 style=\"color: #303133; margin-bottom: 20px;\">{}</h2>\n  <p style=\"color: #606266; font-size: 16px; line-height: 1.6;\">This is page {}. Switch to edit mode to change its markup.</p>\n</div>",
        name,
        position + 1
    );
    let css = "/* page styles */\nh2 {\n  border-bottom: 2px solid #409eff;\n  padding-bottom: 10px;\n}\n".to_string();
    Page::new(
        name,
        position as i64,
        html,
        css,
        Some(format!("// page script\nconsole.log(\"page loaded:\", {:?});", name)),
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_is_derived_from_project() {
        let now = Utc::now();
        let mut project = Project::new("Deck", Some("quarterly".to_string()), now);
        project.path = "/decks/deck".to_string();
        project.pages.push(title_page("Deck", now));
        project.pages.push(content_page("Agenda", 1, now));

        let summary = ProjectCache::from_project(&project);
        assert_eq!(summary.id, project.id);
        assert_eq!(summary.path, "/decks/deck");
        assert_eq!(summary.page_count, 2);
        assert_eq!(summary.description.as_deref(), Some("quarterly"));
    }

    #[test]
    fn normalize_order_rewrites_positions() {
        let now = Utc::now();
        let mut project = Project::new("Deck", None, now);
        for (index, order) in [7_i64, 7, -2].iter().enumerate() {
            let mut page = content_page(&format!("p{index}"), index, now);
            page.order = *order;
            project.pages.push(page);
        }
        project.normalize_order();
        let orders: Vec<i64> = project.pages.iter().map(|page| page.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[test]
    fn empty_script_patch_clears_script() {
        let mut page = content_page("Intro", 0, Utc::now());
        assert!(page.script().is_some());
        PagePatch {
            js: Some(String::new()),
            ..PagePatch::default()
        }
        .apply(&mut page);
        assert!(page.js.is_none());
        assert!(page.script().is_none());
    }

    #[test]
    fn project_serializes_with_camel_case_keys() {
        let project = Project::new("Deck", None, Utc::now());
        let value = serde_json::to_value(&project).expect("serialize project");
        assert!(value.get("createdAt").is_some());
        assert!(value["config"].get("autoSaveInterval").is_some());
        assert!(value.get("description").is_none());
    }
}
