pub mod codec;
pub mod config;
pub mod db;
pub mod errors;
pub mod fs_access;
pub mod index;
pub mod models;
pub mod service;
pub mod validation;

#[cfg(test)]
mod testing;

pub use crate::config::StoreSettings;
pub use crate::errors::{StoreError, StoreResult};
pub use crate::fs_access::{DirHandle, DirectoryAccess, DirectoryPicker, LocalDirectoryAccess};
pub use crate::index::LocalIndex;
pub use crate::models::{Page, PagePatch, Project, ProjectCache, ProjectConfig, ProjectPatch, Theme};
pub use crate::service::ProjectService;
pub use crate::validation::ImportPolicy;

use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global JSON subscriber writing to a daily rolling file under
/// `settings.log_dir`. `RUST_LOG` wins over `settings.log_filter`.
pub fn init_tracing(settings: &StoreSettings) -> StoreResult<()> {
    std::fs::create_dir_all(&settings.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&settings.log_dir, "deck-store.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| StoreError::Internal(error.to_string()))
}
