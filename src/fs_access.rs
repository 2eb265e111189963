use crate::errors::{StoreError, StoreResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::path::{Path, PathBuf};
use std::sync::Arc;

static UNSAFE_FILE_NAME_CHARS: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r#"[<>:"/\\|?*]"#).expect("valid file name regex"));

/// A directory the user granted access to. Only valid for the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirHandle {
    path: PathBuf,
}

impl DirHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|value| value.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Stable string form stored as `Project::path` and in the index.
    pub fn location(&self) -> String {
        self.path.to_string_lossy().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHandle {
    path: PathBuf,
}

impl FileHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Interactive directory chooser supplied by the host application.
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    /// `None` means the user dismissed the dialog.
    async fn pick_directory(&self, hint: Option<&Path>) -> Option<PathBuf>;
}

#[async_trait]
pub trait DirectoryAccess: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn select_directory(&self) -> StoreResult<Option<DirHandle>>;

    /// Returns a usable handle for a previously known location, prompting the
    /// user when the location can no longer be accessed directly.
    async fn reacquire(&self, location: &str) -> StoreResult<Option<DirHandle>>;

    async fn create_subdirectory(&self, parent: &DirHandle, name: &str, create: bool) -> StoreResult<DirHandle>;

    async fn get_file(&self, dir: &DirHandle, name: &str, create: bool) -> StoreResult<FileHandle>;

    async fn write_file(&self, file: &FileHandle, content: &str) -> StoreResult<()>;

    async fn read_file(&self, file: &FileHandle) -> StoreResult<String>;

    async fn list_entries(&self, dir: &DirHandle) -> StoreResult<Vec<DirEntry>>;

    async fn remove_file(&self, dir: &DirHandle, name: &str) -> StoreResult<()>;
}

#[derive(Clone, Default)]
pub struct LocalDirectoryAccess {
    picker: Option<Arc<dyn DirectoryPicker>>,
}

impl LocalDirectoryAccess {
    pub fn new(picker: Arc<dyn DirectoryPicker>) -> Self {
        Self { picker: Some(picker) }
    }

    /// Filesystem access without any interactive chooser. Directory-backed
    /// flows that need a prompt report `CapabilityUnavailable`.
    pub fn without_picker() -> Self {
        Self::default()
    }

    async fn prompt(&self, hint: Option<&Path>) -> StoreResult<Option<DirHandle>> {
        let Some(picker) = self.picker.as_ref() else {
            return Err(StoreError::CapabilityUnavailable(
                "no directory picker is available on this platform".to_string(),
            ));
        };
        let Some(path) = picker.pick_directory(hint).await else {
            return Ok(None);
        };
        open_directory(&path).await.map(Some)
    }
}

#[async_trait]
impl DirectoryAccess for LocalDirectoryAccess {
    fn is_supported(&self) -> bool {
        self.picker.is_some()
    }

    async fn select_directory(&self) -> StoreResult<Option<DirHandle>> {
        self.prompt(None).await
    }

    async fn reacquire(&self, location: &str) -> StoreResult<Option<DirHandle>> {
        let path = PathBuf::from(location);
        match open_directory(&path).await {
            Ok(handle) => Ok(Some(handle)),
            Err(error @ (StoreError::NotFound(_) | StoreError::PermissionDenied(_))) => {
                if self.picker.is_none() {
                    return Err(error);
                }
                tracing::warn!(path = %location, error = %error, "project directory not accessible; prompting");
                self.prompt(Some(&path)).await
            }
            Err(error) => Err(error),
        }
    }

    async fn create_subdirectory(&self, parent: &DirHandle, name: &str, create: bool) -> StoreResult<DirHandle> {
        validate_entry_name(name)?;
        let path = parent.path.join(name);
        if create {
            tokio::fs::create_dir_all(&path).await?;
        }
        open_directory(&path).await
    }

    async fn get_file(&self, dir: &DirHandle, name: &str, create: bool) -> StoreResult<FileHandle> {
        validate_entry_name(name)?;
        let path = dir.path.join(name);
        if create {
            tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
        } else {
            let metadata = tokio::fs::metadata(&path).await?;
            if !metadata.is_file() {
                return Err(StoreError::NotFound(format!("not a file: {}", path.to_string_lossy())));
            }
        }
        Ok(FileHandle { path })
    }

    async fn write_file(&self, file: &FileHandle, content: &str) -> StoreResult<()> {
        tokio::fs::write(&file.path, content).await?;
        Ok(())
    }

    async fn read_file(&self, file: &FileHandle) -> StoreResult<String> {
        Ok(tokio::fs::read_to_string(&file.path).await?)
    }

    async fn list_entries(&self, dir: &DirHandle) -> StoreResult<Vec<DirEntry>> {
        let mut reader = tokio::fs::read_dir(&dir.path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                continue;
            };
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                kind,
            });
        }
        Ok(entries)
    }

    async fn remove_file(&self, dir: &DirHandle, name: &str) -> StoreResult<()> {
        validate_entry_name(name)?;
        match tokio::fs::remove_file(dir.path.join(name)).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

async fn open_directory(path: &Path) -> StoreResult<DirHandle> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_dir() {
        return Err(StoreError::NotFound(format!("not a directory: {}", path.to_string_lossy())));
    }
    // read_dir surfaces revoked permissions that metadata alone does not.
    tokio::fs::read_dir(path).await?;
    Ok(DirHandle {
        path: path.to_path_buf(),
    })
}

fn validate_entry_name(name: &str) -> StoreResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StoreError::Io(format!("invalid entry name: {:?}", name)));
    }
    Ok(())
}

pub fn sanitize_file_name(input: &str) -> String {
    let cleaned = UNSAFE_FILE_NAME_CHARS.replace_all(input, "_").trim().to_string();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "project".to_string()
    } else {
        cleaned
    }
}

fn split_relative(path: &str) -> StoreResult<(Vec<&str>, &str)> {
    let mut parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    let Some(file_name) = parts.pop() else {
        return Err(StoreError::Io(format!("empty relative path: {:?}", path)));
    };
    Ok((parts, file_name))
}

async fn walk_directories(
    access: &dyn DirectoryAccess,
    root: &DirHandle,
    parts: &[&str],
    create: bool,
) -> StoreResult<DirHandle> {
    let mut current = root.clone();
    for part in parts {
        current = access.create_subdirectory(&current, part, create).await?;
    }
    Ok(current)
}

/// Reads a `/`-separated path relative to `root`.
pub async fn read_path(access: &dyn DirectoryAccess, root: &DirHandle, path: &str) -> StoreResult<String> {
    let (dirs, file_name) = split_relative(path)?;
    let dir = walk_directories(access, root, &dirs, false).await?;
    let file = access.get_file(&dir, file_name, false).await?;
    access.read_file(&file).await
}

/// Writes a `/`-separated path relative to `root`, creating intermediate directories.
pub async fn write_path(access: &dyn DirectoryAccess, root: &DirHandle, path: &str, content: &str) -> StoreResult<()> {
    let (dirs, file_name) = split_relative(path)?;
    let dir = walk_directories(access, root, &dirs, true).await?;
    let file = access.get_file(&dir, file_name, true).await?;
    access.write_file(&file, content).await
}

pub async fn path_exists(access: &dyn DirectoryAccess, root: &DirHandle, path: &str) -> bool {
    read_path(access, root, path).await.is_ok()
}

pub async fn create_path(access: &dyn DirectoryAccess, root: &DirHandle, path: &str) -> StoreResult<DirHandle> {
    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    walk_directories(access, root, &parts, true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPicker;

    fn temp_root() -> tempfile::TempDir {
        tempfile::tempdir().expect("temp root")
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_file_name("Q3: plan/review?"), "Q3_ plan_review_");
        assert_eq!(sanitize_file_name("  Demo  "), "Demo");
        assert_eq!(sanitize_file_name("   "), "project");
    }

    #[tokio::test]
    async fn cancelled_picker_yields_none() {
        let access = LocalDirectoryAccess::new(Arc::new(ScriptedPicker::new(vec![None])));
        let selected = access.select_directory().await.expect("select");
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn missing_picker_is_a_capability_error() {
        let access = LocalDirectoryAccess::without_picker();
        assert!(!access.is_supported());
        let error = access.select_directory().await.expect_err("no picker");
        assert!(matches!(error, StoreError::CapabilityUnavailable(_)));
    }

    #[tokio::test]
    async fn reacquire_opens_existing_directory_without_prompting() {
        let root = temp_root();
        let picker = Arc::new(ScriptedPicker::new(Vec::new()));
        let access = LocalDirectoryAccess::new(picker.clone());
        let handle = access
            .reacquire(root.path().to_string_lossy().as_ref())
            .await
            .expect("reacquire")
            .expect("handle");
        assert_eq!(handle.path(), root.path());
        assert_eq!(picker.prompts(), 0);
    }

    #[tokio::test]
    async fn reacquire_prompts_when_location_is_gone() {
        let root = temp_root();
        let relocated = root.path().join("moved");
        std::fs::create_dir_all(&relocated).expect("relocated dir");
        let picker = Arc::new(ScriptedPicker::new(vec![Some(relocated.clone())]));
        let access = LocalDirectoryAccess::new(picker.clone());

        let missing = root.path().join("gone");
        let handle = access
            .reacquire(missing.to_string_lossy().as_ref())
            .await
            .expect("reacquire")
            .expect("handle");
        assert_eq!(handle.path(), relocated.as_path());
        assert_eq!(picker.prompts(), 1);
    }

    #[tokio::test]
    async fn relative_paths_round_trip_through_nested_directories() {
        let root = temp_root();
        let access = LocalDirectoryAccess::without_picker();
        let handle = access
            .reacquire(root.path().to_string_lossy().as_ref())
            .await
            .expect("reacquire")
            .expect("handle");

        write_path(&access, &handle, "global/styles.css", "body {}").await.expect("write");
        assert_eq!(
            read_path(&access, &handle, "global/styles.css").await.expect("read"),
            "body {}"
        );
        assert!(path_exists(&access, &handle, "global/styles.css").await);
        assert!(!path_exists(&access, &handle, "global/missing.css").await);

        let entries = access
            .list_entries(&create_path(&access, &handle, "global").await.expect("dir"))
            .await
            .expect("list");
        assert_eq!(
            entries,
            vec![DirEntry {
                name: "styles.css".to_string(),
                kind: EntryKind::File
            }]
        );
    }

    #[tokio::test]
    async fn entry_names_cannot_escape_their_directory() {
        let root = temp_root();
        let access = LocalDirectoryAccess::without_picker();
        let handle = access
            .reacquire(root.path().to_string_lossy().as_ref())
            .await
            .expect("reacquire")
            .expect("handle");
        assert!(access.get_file(&handle, "../escape.txt", true).await.is_err());
        assert!(access.create_subdirectory(&handle, "..", true).await.is_err());
    }

    #[tokio::test]
    async fn get_file_without_create_reports_not_found() {
        let root = temp_root();
        let access = LocalDirectoryAccess::without_picker();
        let handle = access
            .reacquire(root.path().to_string_lossy().as_ref())
            .await
            .expect("reacquire")
            .expect("handle");
        let error = access.get_file(&handle, "project.json", false).await.expect_err("missing");
        assert!(matches!(error, StoreError::NotFound(_)));
    }
}
