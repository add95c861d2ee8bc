use std::sync::Arc;

use oncolink_storage::Storage;

/// Scoped ownership of a staged upload.
///
/// `release` deletes the object and must be awaited on every exit path. If the guard is
/// dropped unreleased (the owning future was cancelled), the delete is spawned onto the
/// current runtime instead.
pub(crate) struct TempArtifact {
    storage: Arc<dyn Storage>,
    path: Option<String>,
}

impl TempArtifact {
    pub fn new(storage: Arc<dyn Storage>, path: String) -> Self {
        Self {
            storage,
            path: Some(path),
        }
    }

    /// Delete the staged object. Failures are logged and never returned.
    ///
    /// The path is cleared only once the delete has returned, so a release interrupted by
    /// cancellation still falls through to the `Drop` cleanup.
    pub async fn release(mut self) {
        if let Some(path) = self.path.clone() {
            delete_logged(self.storage.as_ref(), &path).await;
            self.path = None;
        }
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let storage = self.storage.clone();
                handle.spawn(async move {
                    delete_logged(storage.as_ref(), &path).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    storage_key = %path,
                    "Temporary object dropped outside a runtime and left in storage"
                );
            }
        }
    }
}

async fn delete_logged(storage: &dyn Storage, path: &str) {
    match storage.delete(path).await {
        Ok(()) => tracing::debug!(storage_key = %path, "Temporary object deleted"),
        Err(e) => tracing::warn!(
            error = %e,
            storage_key = %path,
            "Failed to delete temporary object"
        ),
    }
}
