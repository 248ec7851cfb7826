//! In-memory job store

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use instance_ops_model::{ChildJob, JobId, NewChildJob, NewParentJob, ParentJob};

use super::{JobStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    parents: BTreeMap<JobId, ParentJob>,
    children: BTreeMap<JobId, ChildJob>,
    next_parent: u64,
    next_child: u64,
}

/// Mutex-guarded tables with sequential ids starting at 1
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    tables: Mutex<Tables>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl JobStore for MemoryJobStore {
    fn create_parent(&self, job: NewParentJob) -> StoreResult<ParentJob> {
        let mut tables = self.tables()?;
        tables.next_parent += 1;
        let parent = ParentJob::from_new(JobId(tables.next_parent), job);
        tables.parents.insert(parent.id, parent.clone());
        Ok(parent)
    }

    fn get_parent(&self, id: JobId, zone: &str) -> StoreResult<Option<ParentJob>> {
        let tables = self.tables()?;
        Ok(tables.parents.get(&id).filter(|p| p.zone == zone).cloned())
    }

    fn update_parent(&self, job: &ParentJob) -> StoreResult<()> {
        let mut tables = self.tables()?;
        match tables.parents.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::ParentNotFound(job.id)),
        }
    }

    fn create_child(&self, job: NewChildJob) -> StoreResult<ChildJob> {
        let mut tables = self.tables()?;
        if !tables.parents.contains_key(&job.parent_id) {
            return Err(StoreError::ParentNotFound(job.parent_id));
        }
        tables.next_child += 1;
        let child = ChildJob::from_new(JobId(tables.next_child), job);
        tables.children.insert(child.id, child.clone());
        Ok(child)
    }

    fn update_child(&self, job: &ChildJob) -> StoreResult<()> {
        let mut tables = self.tables()?;
        match tables.children.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(StoreError::ChildNotFound(job.id)),
        }
    }

    fn children_of(&self, parent: JobId) -> StoreResult<Vec<ChildJob>> {
        let tables = self.tables()?;
        Ok(tables
            .children
            .values()
            .filter(|c| c.parent_id == parent)
            .cloned()
            .collect())
    }

    fn list_parents(&self) -> StoreResult<Vec<ParentJob>> {
        Ok(self.tables()?.parents.values().cloned().collect())
    }
}
