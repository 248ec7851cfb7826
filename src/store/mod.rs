//! Job Store
//!
//! Durable record of parent jobs and their retry attempts. Implementations
//! must serialize writes; only the tracker that owns a job writes to it.

mod file;
mod memory;

pub use file::FileJobStore;
pub use memory::MemoryJobStore;

use std::io;
use std::path::PathBuf;

use instance_ops_model::{ChildJob, JobId, NewChildJob, NewParentJob, ParentJob, ParentJobView};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Parent job {0} not found")]
    ParentNotFound(JobId),

    #[error("Child job {0} not found")]
    ChildNotFound(JobId),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait JobStore: Send + Sync {
    fn create_parent(&self, job: NewParentJob) -> StoreResult<ParentJob>;

    /// Parent by id, scoped to its zone
    fn get_parent(&self, id: JobId, zone: &str) -> StoreResult<Option<ParentJob>>;

    fn update_parent(&self, job: &ParentJob) -> StoreResult<()>;

    fn create_child(&self, job: NewChildJob) -> StoreResult<ChildJob>;

    fn update_child(&self, job: &ChildJob) -> StoreResult<()>;

    /// Children of a parent, oldest first
    fn children_of(&self, parent: JobId) -> StoreResult<Vec<ChildJob>>;

    /// All parents, oldest first
    fn list_parents(&self) -> StoreResult<Vec<ParentJob>>;

    /// Parent with its children
    fn view(&self, id: JobId, zone: &str) -> StoreResult<Option<ParentJobView>> {
        match self.get_parent(id, zone)? {
            Some(job) => {
                let children = self.children_of(job.id)?;
                Ok(Some(ParentJobView { job, children }))
            }
            None => Ok(None),
        }
    }
}
