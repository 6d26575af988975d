//! Object storage for media references.
//!
//! Task inputs and outputs are opaque references into an [`ObjectStore`].
//! Processors turn references into local paths for ffmpeg, and the executor
//! deletes intermediate artifacts through the same interface.

use std::path::{Component, Path, PathBuf};

use cf_core::{Error, Result, RunId, TaskId};

/// Storage collaborator holding media bytes.
pub trait ObjectStore: Send + Sync {
    /// Whether `reference` currently exists.
    fn exists(&self, reference: &str) -> Result<bool>;

    /// Delete `reference`. Deleting something already absent succeeds.
    fn delete(&self, reference: &str) -> Result<()>;

    /// A local filesystem path for reading or writing `reference`.
    fn local_path(&self, reference: &str) -> Result<PathBuf>;

    /// Reserve a fresh reference for the output of step `index` of one run
    /// of a task. References of different runs never collide.
    fn allocate(
        &self,
        task_id: TaskId,
        run_id: RunId,
        index: usize,
        extension: &str,
    ) -> Result<String>;
}

/// Reject references that could escape the store root.
pub fn validate_reference(reference: &str) -> Result<()> {
    if reference.trim().is_empty() {
        return Err(Error::Validation("empty storage reference".into()));
    }
    let path = Path::new(reference);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(Error::Validation(format!(
                    "storage reference '{reference}' must be a relative path without '..'"
                )))
            }
        }
    }
    Ok(())
}

/// Extension of a reference, lowercased.
pub fn extension_of(reference: &str) -> Option<String> {
    Path::new(reference)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// [`ObjectStore`] backed by a local directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ObjectStore for LocalStore {
    fn exists(&self, reference: &str) -> Result<bool> {
        Ok(self.local_path(reference)?.is_file())
    }

    fn delete(&self, reference: &str) -> Result<()> {
        match std::fs::remove_file(self.local_path(reference)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn local_path(&self, reference: &str) -> Result<PathBuf> {
        validate_reference(reference)?;
        Ok(self.root.join(reference))
    }

    fn allocate(
        &self,
        task_id: TaskId,
        run_id: RunId,
        index: usize,
        extension: &str,
    ) -> Result<String> {
        let extension = extension.trim_start_matches('.');
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Validation(format!("invalid output extension '{extension}'")));
        }

        let reference = format!("tasks/{task_id}/{run_id}/step-{index:02}.{extension}");
        let path = self.local_path(&reference)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(reference)
    }
}
