//! File-backed job store
//!
//! Layout:
//! - `<root>/parents/<id>.json`
//! - `<root>/children/<id>.json`
//!
//! Every document is written atomically (write temp file, then rename). Ids
//! continue from the highest id found on disk when the store is opened.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

use instance_ops_model::{ChildJob, JobId, NewChildJob, NewParentJob, ParentJob};

use super::{JobStore, StoreError, StoreResult};

const PARENTS_DIR: &str = "parents";
const CHILDREN_DIR: &str = "children";

#[derive(Debug)]
struct Counters {
    last_parent: u64,
    last_child: u64,
}

#[derive(Debug)]
pub struct FileJobStore {
    root: PathBuf,
    /// Held for every write so ids and documents stay consistent
    counters: Mutex<Counters>,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        for dir in [PARENTS_DIR, CHILDREN_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(io_err(&path))?;
        }

        let counters = Counters {
            last_parent: Self::highest_id(&root.join(PARENTS_DIR))?,
            last_child: Self::highest_id(&root.join(CHILDREN_DIR))?,
        };

        Ok(Self {
            root,
            counters: Mutex::new(counters),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn highest_id(dir: &Path) -> StoreResult<u64> {
        let mut highest = 0;
        for entry in fs::read_dir(dir).map_err(io_err(dir))? {
            let entry = entry.map_err(io_err(dir))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                highest = highest.max(id);
            }
        }
        Ok(highest)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Counters>> {
        self.counters.lock().map_err(|_| StoreError::Poisoned)
    }

    fn parent_path(&self, id: JobId) -> PathBuf {
        self.root.join(PARENTS_DIR).join(format!("{}.json", id))
    }

    fn child_path(&self, id: JobId) -> PathBuf {
        self.root.join(CHILDREN_DIR).join(format!("{}.json", id))
    }

    fn write_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(value)?;

        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, path).map_err(io_err(path))?;

        Ok(())
    }

    fn read<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(path).map_err(io_err(path))?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn read_all<T: DeserializeOwned>(dir: &Path) -> StoreResult<Vec<(u64, T)>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err(dir))? {
            let path = entry.map_err(io_err(dir))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            else {
                continue;
            };
            if let Some(item) = Self::read(&path)? {
                items.push((id, item));
            }
        }
        items.sort_by_key(|(id, _)| *id);
        Ok(items)
    }
}

impl JobStore for FileJobStore {
    fn create_parent(&self, job: NewParentJob) -> StoreResult<ParentJob> {
        let mut counters = self.lock()?;
        let id = JobId(counters.last_parent + 1);
        let parent = ParentJob::from_new(id, job);
        Self::write_atomic(&self.parent_path(id), &parent)?;
        counters.last_parent = id.0;
        Ok(parent)
    }

    fn get_parent(&self, id: JobId, zone: &str) -> StoreResult<Option<ParentJob>> {
        let parent: Option<ParentJob> = Self::read(&self.parent_path(id))?;
        Ok(parent.filter(|p| p.zone == zone))
    }

    fn update_parent(&self, job: &ParentJob) -> StoreResult<()> {
        let _guard = self.lock()?;
        let path = self.parent_path(job.id);
        if !path.exists() {
            return Err(StoreError::ParentNotFound(job.id));
        }
        Self::write_atomic(&path, job)
    }

    fn create_child(&self, job: NewChildJob) -> StoreResult<ChildJob> {
        let mut counters = self.lock()?;
        if !self.parent_path(job.parent_id).exists() {
            return Err(StoreError::ParentNotFound(job.parent_id));
        }
        let id = JobId(counters.last_child + 1);
        let child = ChildJob::from_new(id, job);
        Self::write_atomic(&self.child_path(id), &child)?;
        counters.last_child = id.0;
        Ok(child)
    }

    fn update_child(&self, job: &ChildJob) -> StoreResult<()> {
        let _guard = self.lock()?;
        let path = self.child_path(job.id);
        if !path.exists() {
            return Err(StoreError::ChildNotFound(job.id));
        }
        Self::write_atomic(&path, job)
    }

    fn children_of(&self, parent: JobId) -> StoreResult<Vec<ChildJob>> {
        let children: Vec<(u64, ChildJob)> = Self::read_all(&self.root.join(CHILDREN_DIR))?;
        Ok(children
            .into_iter()
            .map(|(_, child)| child)
            .filter(|c| c.parent_id == parent)
            .collect())
    }

    fn list_parents(&self) -> StoreResult<Vec<ParentJob>> {
        let parents: Vec<(u64, ParentJob)> = Self::read_all(&self.root.join(PARENTS_DIR))?;
        Ok(parents.into_iter().map(|(_, parent)| parent).collect())
    }
}
