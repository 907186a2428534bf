use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::config::Settings;
use crate::drive::BlobStore;
use crate::error::{Ez3dError, Result};
use crate::sheet::SheetService;

/// Handles to the two remote services the reconciler talks to.
#[derive(Clone)]
pub struct RemoteServices {
    pub sheets: Arc<dyn SheetService>,
    pub drive: Arc<dyn BlobStore>,
}

impl RemoteServices {
    pub fn new(sheets: Arc<dyn SheetService>, drive: Arc<dyn BlobStore>) -> Self {
        Self { sheets, drive }
    }
}

/// Everything a job needs, built once at startup and shared by the scheduler
/// and the console.
pub struct AppContext {
    settings: Settings,
    remote: Option<RemoteServices>,
    /// Held for the whole of a reconcile or sweep so the two never touch the
    /// file tree at the same time.
    job_lock: Mutex<()>,
}

impl AppContext {
    pub fn new(settings: Settings, remote: Option<RemoteServices>) -> Self {
        Self {
            settings,
            remote,
            job_lock: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn remote(&self) -> Result<&RemoteServices> {
        self.remote.as_ref().ok_or_else(|| {
            Ez3dError::Config(
                "remote services are not connected; set ENABLE_STL_SEARCH=true".into(),
            )
        })
    }

    pub async fn lock_jobs(&self) -> MutexGuard<'_, ()> {
        self.job_lock.lock().await
    }
}
