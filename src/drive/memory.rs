//! In-memory folder store
//!
//! Used by the test suite and for local dry runs. Counts every call and
//! can inject failures per operation.
//!
//! ## Limitations
//!
//! - No persistence: everything is lost when the process exits
//! - `search_folders` is a plain case-insensitive substring match

use super::{Folder, FolderPage, Permission, PermissionRequest, ResourceStore};
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Operation names used for fault injection
pub const OP_SEARCH: &str = "search_folders";
pub const OP_LIST_CHILDREN: &str = "list_child_folders";
pub const OP_LIST_PERMISSIONS: &str = "list_permissions";
pub const OP_CREATE_PERMISSION: &str = "create_permission";

/// Number of calls per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveCalls {
    pub search: u64,
    pub list_children: u64,
    pub list_permissions: u64,
    pub create_permission: u64,
}

impl DriveCalls {
    /// Calls of any kind
    pub fn total(&self) -> u64 {
        self.search + self.list_children + self.list_permissions + self.create_permission
    }
}

#[derive(Default)]
struct State {
    /// (folder, parent id)
    folders: Vec<(Folder, Option<String>)>,
    permissions: HashMap<String, Vec<Permission>>,
    faults: HashMap<&'static str, VecDeque<RemoteError>>,
    calls: DriveCalls,
    next_permission: u64,
}

/// In-memory [`ResourceStore`]
pub struct MemoryDrive {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for MemoryDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDrive {
    /// Empty store with a page size of 100
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    /// Empty store with the given child-listing page size
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: page_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a folder
    pub fn add_folder(&self, id: &str, name: &str, parent: Option<&str>) {
        self.state()
            .folders
            .push((Folder::new(id, name), parent.map(str::to_string)));
    }

    /// Add an existing permission
    pub fn add_permission(&self, folder_id: &str, permission: Permission) {
        self.state()
            .permissions
            .entry(folder_id.to_string())
            .or_default()
            .push(permission);
    }

    /// Fail the next `times` calls of `operation` with `error`
    pub fn fail_next(&self, operation: &'static str, error: RemoteError, times: usize) {
        let mut state = self.state();
        let queue = state.faults.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Call counters so far
    pub fn calls(&self) -> DriveCalls {
        self.state().calls
    }

    /// Permissions currently on a folder
    pub fn permissions(&self, folder_id: &str) -> Vec<Permission> {
        self.state()
            .permissions
            .get(folder_id)
            .cloned()
            .unwrap_or_default()
    }

    fn take_fault(state: &mut State, operation: &'static str) -> RemoteResult<()> {
        match state.faults.get_mut(operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryDrive {
    async fn search_folders(&self, name: &str) -> RemoteResult<Vec<Folder>> {
        let mut state = self.state();
        state.calls.search += 1;
        Self::take_fault(&mut state, OP_SEARCH)?;

        let needle = name.to_lowercase();
        Ok(state
            .folders
            .iter()
            .filter(|(f, _)| f.name.to_lowercase().contains(&needle))
            .map(|(f, _)| f.clone())
            .collect())
    }

    async fn list_child_folders(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> RemoteResult<FolderPage> {
        let mut state = self.state();
        state.calls.list_children += 1;
        Self::take_fault(&mut state, OP_LIST_CHILDREN)?;

        let children: Vec<Folder> = state
            .folders
            .iter()
            .filter(|(_, parent)| parent.as_deref() == Some(parent_id))
            .map(|(f, _)| f.clone())
            .collect();

        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::http(400, Some("invalidPageToken"), "bad page token"))?,
            None => 0,
        };
        let end = (start + self.page_size).min(children.len());
        let next_page_token = (end < children.len()).then(|| end.to_string());

        Ok(FolderPage {
            folders: children.get(start..end).map(<[Folder]>::to_vec).unwrap_or_default(),
            next_page_token,
        })
    }

    async fn list_permissions(&self, folder_id: &str) -> RemoteResult<Vec<Permission>> {
        let mut state = self.state();
        state.calls.list_permissions += 1;
        Self::take_fault(&mut state, OP_LIST_PERMISSIONS)?;

        Ok(state.permissions.get(folder_id).cloned().unwrap_or_default())
    }

    async fn create_permission(
        &self,
        folder_id: &str,
        request: &PermissionRequest,
    ) -> RemoteResult<Permission> {
        let mut state = self.state();
        state.calls.create_permission += 1;
        Self::take_fault(&mut state, OP_CREATE_PERMISSION)?;

        if !state.folders.iter().any(|(f, _)| f.id == folder_id) {
            return Err(RemoteError::http(404, Some("notFound"), format!("File not found: {}", folder_id)));
        }

        state.next_permission += 1;
        let permission = Permission {
            id: format!("perm-{}", state.next_permission),
            kind: "user".to_string(),
            email_address: Some(request.email_address.clone()),
            role: Some(request.role),
        };
        state
            .permissions
            .entry(folder_id.to_string())
            .or_default()
            .push(permission.clone());
        Ok(permission)
    }
}
