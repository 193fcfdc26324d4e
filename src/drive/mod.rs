//! Folder store client
//!
//! The folder store is a tree of named folders with per-folder permission
//! lists. The rest of the crate only talks to it through
//! [`ResourceStore`], implemented for the Drive v3 REST API
//! ([`GoogleDrive`]) and in memory ([`MemoryDrive`]).

mod google;
mod memory;

pub use google::GoogleDrive;
pub use memory::{
    DriveCalls, MemoryDrive, OP_CREATE_PERMISSION, OP_LIST_CHILDREN, OP_LIST_PERMISSIONS, OP_SEARCH,
};

use crate::error::RemoteResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A folder in the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub name: String,
}

impl Folder {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One page of a child listing
#[derive(Debug, Clone, Default)]
pub struct FolderPage {
    pub folders: Vec<Folder>,
    pub next_page_token: Option<String>,
}

/// Access level on a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Reader,
    Commenter,
    Writer,
    FileOrganizer,
    Organizer,
    Owner,
}

impl Role {
    /// Ordering used to decide whether an existing grant already covers a
    /// requested one
    pub fn rank(self) -> u8 {
        match self {
            Role::Reader => 1,
            Role::Commenter => 2,
            Role::Writer => 3,
            Role::FileOrganizer => 4,
            Role::Organizer => 5,
            Role::Owner => 6,
        }
    }

    /// Whether holding `self` implies holding `wanted`
    pub fn covers(self, wanted: Role) -> bool {
        self.rank() >= wanted.rank()
    }

    /// Wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Commenter => "commenter",
            Role::Writer => "writer",
            Role::FileOrganizer => "fileOrganizer",
            Role::Organizer => "organizer",
            Role::Owner => "owner",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reader" | "viewer" => Ok(Role::Reader),
            "commenter" => Ok(Role::Commenter),
            "writer" | "editor" => Ok(Role::Writer),
            "fileorganizer" => Ok(Role::FileOrganizer),
            "organizer" => Ok(Role::Organizer),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// An existing permission on a folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub id: String,
    /// `user`, `group`, `domain` or `anyone`
    pub kind: String,
    pub email_address: Option<String>,
    pub role: Option<Role>,
}

impl Permission {
    /// Whether this permission gives `email` at least `role`
    pub fn grants(&self, email: &str, role: Role) -> bool {
        self.kind == "user"
            && self
                .email_address
                .as_deref()
                .is_some_and(|e| e.eq_ignore_ascii_case(email.trim()))
            && self.role.is_some_and(|r| r.covers(role))
    }
}

/// A permission to create
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub email_address: String,
    pub role: Role,
    pub send_notification: bool,
}

/// Operations the granter needs from the folder store
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Folders anywhere in the store whose name contains `name`
    async fn search_folders(&self, name: &str) -> RemoteResult<Vec<Folder>>;

    /// One page of direct child folders of `parent_id`
    async fn list_child_folders(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> RemoteResult<FolderPage>;

    /// Current permissions on a folder
    async fn list_permissions(&self, folder_id: &str) -> RemoteResult<Vec<Permission>>;

    /// Grant a permission on a folder
    async fn create_permission(
        &self,
        folder_id: &str,
        request: &PermissionRequest,
    ) -> RemoteResult<Permission>;
}
