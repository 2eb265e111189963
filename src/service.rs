use crate::codec::{self, PageFile, GLOBAL_DIR, METADATA_FILE, PAGES_DIR, THUMBNAILS_DIR};
use crate::config::StoreSettings;
use crate::db::Database;
use crate::errors::{StoreError, StoreResult};
use crate::fs_access::{self, sanitize_file_name, DirHandle, DirectoryAccess, EntryKind};
use crate::index::LocalIndex;
use crate::models::{content_page, title_page, Page, PagePatch, Project, ProjectCache, ProjectConfig, ProjectPatch, Theme};
use crate::validation::{self, merge_json, ImportPolicy, UNTITLED_PROJECT_NAME};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const GLOBAL_STYLES_FILE: &str = "styles.css";
const GLOBAL_SCRIPTS_FILE: &str = "scripts.js";

const DEFAULT_GLOBAL_STYLES: &str = "/* Shared styles for every page of this deck. */\n\
* {\n  box-sizing: border-box;\n}\n\n\
body {\n  margin: 0;\n  font-family: Arial, sans-serif;\n  color: #303133;\n  background: #ffffff;\n}\n";

const DEFAULT_GLOBAL_SCRIPTS: &str = "// Shared script loaded before every page script.\n\
window.deck = window.deck || {};\n";

#[derive(Default)]
struct ServiceState {
    current_project: Option<Project>,
    handle: Option<DirHandle>,
    loading: bool,
    last_error: Option<String>,
}

/// Which key an index write matches existing entries on.
#[derive(Debug, Clone, Copy)]
enum IndexMatch {
    Path,
    Id,
}

/// Owns the open project and sequences every directory and index operation on it.
///
/// State lives behind a std mutex that is never held across an await point, so
/// mutators can run while a save is writing. A save persists the snapshot taken
/// when it started.
pub struct ProjectService {
    access: Arc<dyn DirectoryAccess>,
    index: LocalIndex,
    state: Mutex<ServiceState>,
    save_in_flight: AtomicBool,
}

struct LoadingGuard<'a> {
    service: &'a ProjectService,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.service.state().loading = false;
    }
}

struct SaveGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl ProjectService {
    pub fn new(access: Arc<dyn DirectoryAccess>, index: LocalIndex) -> Self {
        Self {
            access,
            index,
            state: Mutex::new(ServiceState::default()),
            save_in_flight: AtomicBool::new(false),
        }
    }

    /// Service whose index lives in the sqlite database named by `settings`.
    pub fn from_settings(access: Arc<dyn DirectoryAccess>, settings: &StoreSettings) -> StoreResult<Self> {
        let database = Database::new(&settings.index_db_path)?;
        let index = LocalIndex::with_key(Arc::new(database), &settings.index_key);
        Ok(Self::new(access, index))
    }

    pub fn is_supported(&self) -> bool {
        self.access.is_supported()
    }

    // ---- directory-backed lifecycle ----

    /// Prompts for (or reacquires) `parent`, creates a project directory inside it and
    /// opens the new project. `Ok(None)` when the user cancelled the prompt.
    pub async fn create_directory_backed_project(
        &self,
        name: &str,
        description: Option<String>,
        parent: Option<&Path>,
    ) -> StoreResult<Option<Project>> {
        let _loading = self.begin_loading();
        let result = self.create_directory_backed(name, description, parent).await;
        self.record(result)
    }

    async fn create_directory_backed(
        &self,
        name: &str,
        description: Option<String>,
        parent: Option<&Path>,
    ) -> StoreResult<Option<Project>> {
        self.ensure_supported()?;
        let name = display_name(name);
        let Some(root) = self.prepare_project_directory(&name, parent).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        let mut project = Project::new(&name, description, now);
        project.path = root.location();
        let page = title_page(&project.name, now);
        project.current_page_id = Some(page.id.clone());
        project.pages.push(page);

        self.persist(&root, &mut project).await?;
        self.sync_index(IndexMatch::Path, &project);
        tracing::info!(project_id = %project.id, path = %project.path, "created project");
        self.install(project.clone(), Some(root));
        Ok(Some(project))
    }

    /// Prompts for an existing project directory and opens it.
    pub async fn open_directory_backed_project(&self) -> StoreResult<Option<Project>> {
        let _loading = self.begin_loading();
        let result = self.open_directory_backed().await;
        self.record(result)
    }

    async fn open_directory_backed(&self) -> StoreResult<Option<Project>> {
        self.ensure_supported()?;
        let Some(root) = self.access.select_directory().await? else {
            return Ok(None);
        };
        let project = self.materialize(&root).await?;
        self.sync_index(IndexMatch::Path, &project);
        tracing::info!(project_id = %project.id, path = %project.path, "opened project");
        self.install(project.clone(), Some(root));
        Ok(Some(project))
    }

    /// Opens the project an index entry points at. The held directory handle is
    /// reused when it matches; otherwise the location is reacquired, which may prompt.
    pub async fn load_from_index_entry(&self, entry: &ProjectCache) -> StoreResult<Option<Project>> {
        let _loading = self.begin_loading();
        let result = self.load_entry(entry).await;
        self.record(result)
    }

    async fn load_entry(&self, entry: &ProjectCache) -> StoreResult<Option<Project>> {
        let held = self.state().handle.clone();
        let root = match held.filter(|handle| handle.location() == entry.path) {
            Some(handle) => handle,
            None => match self.access.reacquire(&entry.path).await? {
                Some(handle) => handle,
                None => return Ok(None),
            },
        };
        let project = self.materialize(&root).await?;
        if project.id != entry.id {
            tracing::warn!(
                expected = %entry.id,
                found = %project.id,
                path = %project.path,
                "directory holds a different project than the index entry"
            );
            if let Err(error) = self.index.remove_by_id(&entry.id) {
                tracing::warn!(project_id = %entry.id, error = %error, "failed to remove stale index entry");
            }
        }
        self.sync_index(IndexMatch::Id, &project);
        self.install(project.clone(), Some(root));
        Ok(Some(project))
    }

    /// Writes the current project back to its directory and refreshes its index entry.
    pub async fn save_current_project(&self) -> StoreResult<Project> {
        if self
            .save_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return self.record(Err(StoreError::State("save already in progress".to_string())));
        }
        let _guard = SaveGuard {
            flag: &self.save_in_flight,
        };
        let result = self.save_current().await;
        self.record(result)
    }

    async fn save_current(&self) -> StoreResult<Project> {
        let (mut project, held) = {
            let state = self.state();
            let project = state.current_project.clone().ok_or_else(StoreError::no_current_project)?;
            (project, state.handle.clone())
        };
        if !project.is_directory_backed() {
            return Err(StoreError::State(
                "project has no backing directory; promote it before saving".to_string(),
            ));
        }

        let root = match held.filter(|handle| handle.location() == project.path) {
            Some(handle) => handle,
            None => self.access.reacquire(&project.path).await?.ok_or_else(|| {
                StoreError::PermissionDenied(format!("access to {} was not granted", project.path))
            })?,
        };
        project.path = root.location();
        project.touch();
        self.persist(&root, &mut project).await?;
        self.sync_index(IndexMatch::Id, &project);

        self.absorb(&project, root);
        tracing::debug!(project_id = %project.id, pages = project.pages.len(), "saved project");
        Ok(project)
    }

    /// Gives the current project (typically transient or imported) a directory of its
    /// own and saves it there. `Ok(None)` when the user cancelled the prompt.
    pub async fn promote_current_project(&self, parent: Option<&Path>) -> StoreResult<Option<Project>> {
        let _loading = self.begin_loading();
        let result = self.promote_current(parent).await;
        self.record(result)
    }

    async fn promote_current(&self, parent: Option<&Path>) -> StoreResult<Option<Project>> {
        self.ensure_supported()?;
        let mut project = self.state().current_project.clone().ok_or_else(StoreError::no_current_project)?;
        let Some(root) = self.prepare_project_directory(&project.name, parent).await? else {
            return Ok(None);
        };
        project.path = root.location();
        project.touch();
        self.persist(&root, &mut project).await?;
        self.sync_index(IndexMatch::Path, &project);

        self.absorb(&project, root);
        tracing::info!(project_id = %project.id, path = %project.path, "promoted project to a directory");
        Ok(Some(project))
    }

    /// Drops the index entry; the project directory itself is never touched.
    pub fn remove_from_index(&self, project_id: &str) -> StoreResult<()> {
        let result = self.index.remove_by_id(project_id);
        self.record(result)?;
        let is_current = self
            .state()
            .current_project
            .as_ref()
            .is_some_and(|project| project.id == project_id);
        if is_current {
            self.close_project();
        }
        Ok(())
    }

    // ---- transient lifecycle ----

    pub fn create_transient_project(&self, name: &str, description: Option<String>) -> Project {
        let name = display_name(name);
        let now = Utc::now();
        let mut project = Project::new(&name, description, now);
        let page = title_page(&project.name, now);
        project.current_page_id = Some(page.id.clone());
        project.pages.push(page);
        self.install(project.clone(), None);
        project
    }

    /// Makes an in-memory project current. A non-empty `path` is kept so a later save
    /// can reacquire the directory.
    pub fn open_project(&self, mut project: Project) {
        project.normalize_order();
        let valid_current = project
            .current_page_id
            .as_deref()
            .is_some_and(|id| project.page(id).is_some());
        if !valid_current {
            project.current_page_id = project.pages.first().map(|page| page.id.clone());
        }
        self.install(project, None);
    }

    pub fn open_imported_project(&self, text: &str, policy: ImportPolicy) -> StoreResult<Project> {
        let result = validation::import_document(text, policy);
        let project = self.record(result)?;
        self.open_project(project.clone());
        Ok(self.current_project().unwrap_or(project))
    }

    pub fn close_project(&self) {
        let mut state = self.state();
        state.current_project = None;
        state.handle = None;
    }

    // ---- mutators on the current project ----
    //
    // Only `add_page` requires an open project; the rest do nothing and return
    // `Ok` (with `None` where they hand back a value) when none is open.

    pub fn add_page(&self, name: &str) -> StoreResult<Page> {
        self.with_current(|project| {
            let position = project.pages.len();
            let name = match name.trim() {
                "" => format!("Page {}", position + 1),
                trimmed => trimmed.to_string(),
            };
            let page = content_page(&name, position, Utc::now());
            project.current_page_id = Some(page.id.clone());
            project.pages.push(page.clone());
            project.normalize_order();
            project.touch();
            Ok(page)
        })
    }

    pub fn update_page(&self, page_id: &str, patch: PagePatch) -> StoreResult<Option<Page>> {
        self.with_open(|project| {
            let index = project
                .page_index(page_id)
                .ok_or_else(|| StoreError::NotFound(format!("page {}", page_id)))?;
            let page = &mut project.pages[index];
            patch.apply(page);
            page.updated_at = Utc::now();
            let updated = page.clone();
            project.touch();
            Ok(updated)
        })
    }

    /// Removes a page. When it was the current page, the page that slides into its
    /// position (or the new last page) becomes current.
    pub fn delete_page(&self, page_id: &str) -> StoreResult<()> {
        self.with_open(|project| {
            let index = project
                .page_index(page_id)
                .ok_or_else(|| StoreError::NotFound(format!("page {}", page_id)))?;
            project.pages.remove(index);
            project.normalize_order();
            if project.current_page_id.as_deref() == Some(page_id) {
                project.current_page_id = project
                    .pages
                    .get(index)
                    .or_else(|| project.pages.last())
                    .map(|page| page.id.clone());
            }
            project.touch();
            Ok(())
        })
        .map(|_| ())
    }

    pub fn reorder_pages(&self, from: usize, to: usize) -> StoreResult<()> {
        let summary = self.with_open(|project| {
            let count = project.pages.len();
            if from >= count || to >= count {
                return Err(StoreError::State(format!(
                    "cannot move page {} to {}: project has {} pages",
                    from, to, count
                )));
            }
            let page = project.pages.remove(from);
            project.pages.insert(to, page);
            project.normalize_order();
            project.touch();
            Ok(directory_summary(project))
        })?;
        if let Some(summary) = summary.flatten() {
            self.sync_summary(IndexMatch::Id, summary);
        }
        Ok(())
    }

    pub fn set_current_page(&self, page_id: &str) -> StoreResult<()> {
        self.with_open(|project| {
            if project.page(page_id).is_none() {
                return Err(StoreError::NotFound(format!("page {}", page_id)));
            }
            project.current_page_id = Some(page_id.to_string());
            project.touch();
            Ok(())
        })
        .map(|_| ())
    }

    /// Deep-merges a partial config document (camelCase keys) into the current config.
    pub fn update_config(&self, patch: Value) -> StoreResult<Option<ProjectConfig>> {
        self.with_open(|project| {
            project.config = merged(&project.config, patch)?;
            project.touch();
            Ok(project.config.clone())
        })
    }

    /// Deep-merges a partial theme document (camelCase keys) into the current theme.
    pub fn update_theme(&self, patch: Value) -> StoreResult<Option<Theme>> {
        self.with_open(|project| {
            project.theme = merged(&project.theme, patch)?;
            project.touch();
            Ok(project.theme.clone())
        })
    }

    pub fn update_project(&self, patch: ProjectPatch) -> StoreResult<Option<Project>> {
        let Some((updated, summary)) = self.with_open(|project| {
            if let Some(name) = patch.name {
                project.name = display_name(&name);
            }
            if let Some(description) = patch.description {
                project.description = Some(description).filter(|value| !value.trim().is_empty());
            }
            project.touch();
            Ok((project.clone(), directory_summary(project)))
        })?
        else {
            return Ok(None);
        };
        if let Some(summary) = summary {
            self.sync_summary(IndexMatch::Id, summary);
        }
        Ok(Some(updated))
    }

    // ---- read side ----

    pub fn current_project(&self) -> Option<Project> {
        self.state().current_project.clone()
    }

    pub fn current_page(&self) -> Option<Page> {
        self.state()
            .current_project
            .as_ref()
            .and_then(|project| project.current_page().cloned())
    }

    pub fn has_current_project(&self) -> bool {
        self.state().current_project.is_some()
    }

    pub fn total_pages(&self) -> usize {
        self.state()
            .current_project
            .as_ref()
            .map(|project| project.pages.len())
            .unwrap_or(0)
    }

    pub fn cached_projects(&self) -> StoreResult<Vec<ProjectCache>> {
        self.index.list()
    }

    pub fn cached_projects_count(&self) -> StoreResult<usize> {
        Ok(self.index.list()?.len())
    }

    pub fn is_loading(&self) -> bool {
        self.state().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    pub fn clear_error(&self) {
        self.state().last_error = None;
    }

    // ---- internals ----

    fn state(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_loading(&self) -> LoadingGuard<'_> {
        self.state().loading = true;
        LoadingGuard { service: self }
    }

    fn record<T>(&self, result: StoreResult<T>) -> StoreResult<T> {
        if let Err(error) = &result {
            tracing::warn!(code = error.code(), error = %error, "project operation failed");
            self.state().last_error = Some(error.to_string());
        }
        result
    }

    fn ensure_supported(&self) -> StoreResult<()> {
        if self.access.is_supported() {
            Ok(())
        } else {
            Err(StoreError::CapabilityUnavailable(
                "directory access is not supported on this platform".to_string(),
            ))
        }
    }

    fn install(&self, project: Project, handle: Option<DirHandle>) {
        let mut state = self.state();
        state.current_project = Some(project);
        state.handle = handle;
    }

    /// Applies a finished save to the live project, if it is still the one open.
    fn absorb(&self, saved: &Project, root: DirHandle) {
        let mut state = self.state();
        if let Some(current) = state.current_project.as_mut().filter(|current| current.id == saved.id) {
            absorb_saved(current, saved);
            state.handle = Some(root);
        }
    }

    fn with_current<T, F>(&self, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Project) -> StoreResult<T>,
    {
        let mut state = self.state();
        let project = state.current_project.as_mut().ok_or_else(StoreError::no_current_project)?;
        mutate(project)
    }

    fn with_open<T, F>(&self, mutate: F) -> StoreResult<Option<T>>
    where
        F: FnOnce(&mut Project) -> StoreResult<T>,
    {
        let mut state = self.state();
        match state.current_project.as_mut() {
            Some(project) => mutate(project).map(Some),
            None => Ok(None),
        }
    }

    fn sync_index(&self, matching: IndexMatch, project: &Project) {
        self.sync_summary(matching, ProjectCache::from_project(project));
    }

    /// Index writes never fail the operation that triggered them.
    fn sync_summary(&self, matching: IndexMatch, summary: ProjectCache) {
        let project_id = summary.id.clone();
        let result = match matching {
            IndexMatch::Path => self.index.upsert_by_path(summary),
            IndexMatch::Id => self.index.upsert_by_id(summary),
        };
        if let Err(error) = result {
            tracing::warn!(project_id = %project_id, error = %error, "failed to update project index");
        }
    }

    /// Resolves the parent directory (prompting when none is given) and creates the
    /// project directory skeleton inside it.
    async fn prepare_project_directory(&self, name: &str, parent: Option<&Path>) -> StoreResult<Option<DirHandle>> {
        let parent = match parent {
            Some(path) => self.access.reacquire(path.to_string_lossy().as_ref()).await?,
            None => self.access.select_directory().await?,
        };
        let Some(parent) = parent else {
            return Ok(None);
        };
        let root = self
            .access
            .create_subdirectory(&parent, &sanitize_file_name(name), true)
            .await?;
        if fs_access::path_exists(self.access.as_ref(), &root, METADATA_FILE).await {
            return Err(StoreError::State(format!(
                "{} already contains a project; open it or choose another name",
                root.location()
            )));
        }
        for dir in [PAGES_DIR, GLOBAL_DIR, THUMBNAILS_DIR] {
            self.access.create_subdirectory(&root, dir, true).await?;
        }
        for (file, content) in [
            (GLOBAL_STYLES_FILE, DEFAULT_GLOBAL_STYLES),
            (GLOBAL_SCRIPTS_FILE, DEFAULT_GLOBAL_SCRIPTS),
        ] {
            let relative = format!("{}/{}", GLOBAL_DIR, file);
            if fs_access::path_exists(self.access.as_ref(), &root, &relative).await {
                continue;
            }
            if let Err(error) = fs_access::write_path(self.access.as_ref(), &root, &relative, content).await {
                tracing::warn!(path = %relative, error = %error, "failed to write global starter file");
            }
        }
        Ok(Some(root))
    }

    /// Writes page bodies, then `project.json`, then prunes page files the project no
    /// longer owns. Sets the relative file paths on every page.
    async fn persist(&self, root: &DirHandle, project: &mut Project) -> StoreResult<()> {
        let encoded = codec::encode(project)?;
        let pages_dir = self.access.create_subdirectory(root, PAGES_DIR, true).await?;
        for file in &encoded.page_files {
            let handle = self.access.get_file(&pages_dir, &file.name, true).await?;
            self.access.write_file(&handle, &file.content).await?;
        }
        let metadata = self.access.get_file(root, METADATA_FILE, true).await?;
        self.access.write_file(&metadata, &encoded.metadata).await?;

        self.prune_page_files(&pages_dir, project).await;
        for page in &mut project.pages {
            page.html_path = Some(format!("{}/{}", PAGES_DIR, codec::html_file_name(&page.id)));
            page.css_path = Some(format!("{}/{}", PAGES_DIR, codec::css_file_name(&page.id)));
            page.js_path = page
                .script()
                .is_some()
                .then(|| format!("{}/{}", PAGES_DIR, codec::js_file_name(&page.id)));
        }
        Ok(())
    }

    async fn prune_page_files(&self, pages_dir: &DirHandle, project: &Project) {
        let owned = codec::owned_page_files(project);
        let entries = match self.access.list_entries(pages_dir).await {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(path = %pages_dir.location(), error = %error, "failed to list page files for pruning");
                return;
            }
        };
        for entry in entries {
            if entry.kind != EntryKind::File || owned.contains(&entry.name) || !codec::is_page_body_file(&entry.name) {
                continue;
            }
            if let Err(error) = self.access.remove_file(pages_dir, &entry.name).await {
                tracing::warn!(file = %entry.name, error = %error, "failed to remove stale page file");
            }
        }
    }

    async fn materialize(&self, root: &DirHandle) -> StoreResult<Project> {
        let metadata_file = match self.access.get_file(root, METADATA_FILE, false).await {
            Ok(file) => file,
            Err(StoreError::NotFound(_)) => {
                return Err(StoreError::NotFound(format!(
                    "{} has no {}",
                    root.location(),
                    METADATA_FILE
                )))
            }
            Err(error) => return Err(error),
        };
        let metadata = self.access.read_file(&metadata_file).await?;

        let page_files = match self.access.create_subdirectory(root, PAGES_DIR, false).await {
            Ok(pages_dir) => self.read_page_files(&pages_dir).await?,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(path = %root.location(), "project has no pages directory");
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        let decoded = codec::decode(&metadata, page_files, &root.location()).map_err(|error| match error {
            StoreError::Corrupt(message) => StoreError::Corrupt(format!("{}: {}", METADATA_FILE, message)),
            other => other,
        })?;
        if !decoded.dropped_page_ids.is_empty() {
            let warning = StoreError::Corrupt(format!(
                "{} page(s) dropped, markup file missing for: {}",
                decoded.dropped_page_ids.len(),
                decoded.dropped_page_ids.join(", ")
            ));
            self.state().last_error = Some(warning.to_string());
        }
        Ok(decoded.project)
    }

    async fn read_page_files(&self, pages_dir: &DirHandle) -> StoreResult<Vec<PageFile>> {
        let mut files = Vec::new();
        for entry in self.access.list_entries(pages_dir).await? {
            if entry.kind != EntryKind::File || !codec::is_page_body_file(&entry.name) {
                continue;
            }
            let handle = self.access.get_file(pages_dir, &entry.name, false).await?;
            let content = self.access.read_file(&handle).await?;
            files.push(PageFile {
                name: entry.name,
                content,
            });
        }
        Ok(files)
    }
}

fn display_name(name: &str) -> String {
    match name.trim() {
        "" => UNTITLED_PROJECT_NAME.to_string(),
        trimmed => trimmed.to_string(),
    }
}

fn directory_summary(project: &Project) -> Option<ProjectCache> {
    project
        .is_directory_backed()
        .then(|| ProjectCache::from_project(project))
}

fn merged<T>(current: &T, patch: Value) -> StoreResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(current)?;
    merge_json(&mut value, patch);
    serde_json::from_value(value).map_err(|error| StoreError::Validation(vec![error.to_string()]))
}

/// Carries what a save decided (location, timestamp, file paths) into the live
/// project without discarding edits made while the save was running.
fn absorb_saved(current: &mut Project, saved: &Project) {
    current.path = saved.path.clone();
    current.updated_at = current.updated_at.max(saved.updated_at);
    for page in &mut current.pages {
        if let Some(saved_page) = saved.page(&page.id) {
            page.html_path = saved_page.html_path.clone();
            page.css_path = saved_page.css_path.clone();
            page.js_path = saved_page.js_path.clone();
        }
    }
}
