use async_trait::async_trait;
use deck_store::{DirectoryPicker, LocalDirectoryAccess, ProjectService, StoreSettings};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

struct FixedPicker {
    answer: Mutex<Option<PathBuf>>,
}

impl FixedPicker {
    fn answering(path: &Path) -> Arc<Self> {
        Arc::new(Self {
            answer: Mutex::new(Some(path.to_path_buf())),
        })
    }
}

#[async_trait]
impl DirectoryPicker for FixedPicker {
    async fn pick_directory(&self, _hint: Option<&Path>) -> Option<PathBuf> {
        self.answer.lock().expect("picker answer").clone()
    }
}

fn service(data_dir: &Path, picker: Arc<FixedPicker>) -> ProjectService {
    let mut settings = StoreSettings::with_data_dir(data_dir);
    settings.apply_overrides(|_| None);
    let access = Arc::new(LocalDirectoryAccess::new(picker));
    ProjectService::from_settings(access, &settings).expect("service from settings")
}

#[tokio::test]
async fn index_survives_a_restart() {
    let data = tempfile::tempdir().expect("data dir");
    let decks = tempfile::tempdir().expect("decks dir");

    let first = service(data.path(), FixedPicker::answering(decks.path()));
    let created = first
        .create_directory_backed_project("Quarterly review", Some("Q3".to_string()), None)
        .await
        .expect("create")
        .expect("not cancelled");
    first.add_page("Numbers").expect("add page");
    first.save_current_project().await.expect("save");
    drop(first);

    let second = service(data.path(), FixedPicker::answering(decks.path()));
    let entries = second.cached_projects().expect("index");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, created.id);
    assert_eq!(entries[0].page_count, 2);

    let loaded = second
        .load_from_index_entry(&entries[0])
        .await
        .expect("load")
        .expect("not cancelled");
    assert_eq!(loaded.name, "Quarterly review");
    assert_eq!(loaded.pages[1].name, "Numbers");
    assert_eq!(second.current_page().expect("current page").name, "Numbers");
}

#[tokio::test]
async fn on_disk_layout_keeps_bodies_out_of_metadata() {
    let data = tempfile::tempdir().expect("data dir");
    let decks = tempfile::tempdir().expect("decks dir");
    let store = service(data.path(), FixedPicker::answering(decks.path()));

    let project = store
        .create_directory_backed_project("Layout: test?", None, None)
        .await
        .expect("create")
        .expect("not cancelled");
    let root = decks.path().join("Layout_ test_");
    assert_eq!(project.path, root.to_string_lossy());

    let metadata: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(root.join("project.json")).expect("read metadata"))
            .expect("metadata json");
    let page_id = metadata["pages"][0]["id"].as_str().expect("page id").to_string();
    assert!(metadata["pages"][0].get("html").is_none());
    assert_eq!(metadata["config"]["defaultTransition"], "fade");
    assert!(root.join("pages").join(format!("{}.html", page_id)).is_file());
    assert!(root.join("pages").join(format!("{}.css", page_id)).is_file());
}

#[tokio::test]
async fn page_with_missing_markup_is_dropped_on_open() {
    let data = tempfile::tempdir().expect("data dir");
    let decks = tempfile::tempdir().expect("decks dir");
    let author = service(data.path(), FixedPicker::answering(decks.path()));
    author
        .create_directory_backed_project("Deck", None, None)
        .await
        .expect("create")
        .expect("not cancelled");
    let lost = author.add_page("Lost").expect("add page");
    author.save_current_project().await.expect("save");

    let root = decks.path().join("Deck");
    std::fs::remove_file(root.join("pages").join(format!("{}.html", lost.id))).expect("remove markup");

    let reader = service(data.path(), FixedPicker::answering(&root));
    let opened = reader
        .open_directory_backed_project()
        .await
        .expect("open")
        .expect("not cancelled");
    assert_eq!(opened.pages.len(), 1);
    assert_eq!(opened.pages[0].order, 0);
    assert_ne!(opened.current_page_id.as_deref(), Some(lost.id.as_str()));
    assert!(reader.last_error().is_some_and(|warning| warning.contains(&lost.id)));
}
