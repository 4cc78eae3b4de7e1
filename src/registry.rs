//! # Task Registry
//!
//! Bookkeeping of live tasks: pid → gid. An entry is inserted when
//! `create` succeeds and removed before the task's context goes away,
//! so the registry is the single source of truth for "is this pid live".
//!
//! Fixed capacity (`MAX_TASKS`), no heap.

use heapless::{FnvIndexMap, Vec};

use crate::config::MAX_TASKS;
use crate::error::SchedError;
use crate::task::{GroupId, TaskId};

pub struct Registry {
    entries: FnvIndexMap<TaskId, GroupId, MAX_TASKS>,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            entries: FnvIndexMap::new(),
        }
    }

    pub fn insert(&mut self, pid: TaskId, gid: GroupId) -> Result<(), SchedError> {
        match self.entries.insert(pid, gid) {
            Ok(None) => Ok(()),
            // Backends never hand out a live pid twice
            Ok(Some(previous)) => {
                log::error!("registry: {pid} already registered as {previous}");
                Err(SchedError::StaleTask(pid))
            }
            Err(_) => Err(SchedError::RegistryFull),
        }
    }

    /// Remove `pid`, returning its group. Removing an absent pid is a no-op.
    pub fn remove(&mut self, pid: TaskId) -> Option<GroupId> {
        self.entries.remove(&pid)
    }

    pub fn lookup(&self, pid: TaskId) -> Option<GroupId> {
        self.entries.get(&pid).copied()
    }

    /// Any live member of `gid`.
    pub fn find(&self, gid: GroupId) -> Option<TaskId> {
        self.entries
            .iter()
            .find(|(_, g)| **g == gid)
            .map(|(pid, _)| *pid)
    }

    /// Every live member of `gid`.
    pub fn members(&self, gid: GroupId) -> Vec<TaskId, MAX_TASKS> {
        self.entries
            .iter()
            .filter(|(_, g)| **g == gid)
            .map(|(pid, _)| *pid)
            .collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
