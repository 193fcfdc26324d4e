//! Drive v3 REST implementation of [`ResourceStore`]

use super::{Folder, FolderPage, Permission, PermissionRequest, ResourceStore, Role};
use crate::error::RemoteResult;
use crate::http::ApiClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const PAGE_SIZE: &str = "100";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<Folder>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct PermissionList {
    #[serde(default)]
    permissions: Vec<ApiPermission>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPermission {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    email_address: Option<String>,
    role: Option<String>,
}

impl From<ApiPermission> for Permission {
    fn from(p: ApiPermission) -> Self {
        Permission {
            id: p.id,
            kind: p.kind,
            email_address: p.email_address,
            role: p.role.and_then(|r| r.parse::<Role>().ok()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatePermissionBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    role: &'a str,
    email_address: &'a str,
}

/// Escape a value for a Drive query string literal
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Drive v3 client
pub struct GoogleDrive {
    api: ApiClient,
}

impl GoogleDrive {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn list_files(&self, query: &str, page_token: Option<&str>) -> RemoteResult<FileList> {
        let mut params = vec![
            ("q", query.to_string()),
            ("fields", "nextPageToken,files(id,name)".to_string()),
            ("pageSize", PAGE_SIZE.to_string()),
            ("supportsAllDrives", "true".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
        ];
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }
        self.api
            .send_json(self.api.get(FILES_URL).query(&params))
            .await
    }
}

#[async_trait]
impl ResourceStore for GoogleDrive {
    async fn search_folders(&self, name: &str) -> RemoteResult<Vec<Folder>> {
        let query = format!(
            "mimeType = '{}' and trashed = false and name contains '{}'",
            FOLDER_MIME,
            escape_query(name)
        );
        Ok(self.list_files(&query, None).await?.files)
    }

    async fn list_child_folders(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> RemoteResult<FolderPage> {
        let query = format!(
            "mimeType = '{}' and trashed = false and '{}' in parents",
            FOLDER_MIME,
            escape_query(parent_id)
        );
        let list = self.list_files(&query, page_token).await?;
        Ok(FolderPage {
            folders: list.files,
            next_page_token: list.next_page_token,
        })
    }

    async fn list_permissions(&self, folder_id: &str) -> RemoteResult<Vec<Permission>> {
        let url = format!("{}/{}/permissions", FILES_URL, folder_id);
        let list: PermissionList = self
            .api
            .send_json(self.api.get(&url).query(&[
                ("fields", "permissions(id,type,emailAddress,role)"),
                ("supportsAllDrives", "true"),
            ]))
            .await?;
        Ok(list.permissions.into_iter().map(Permission::from).collect())
    }

    async fn create_permission(
        &self,
        folder_id: &str,
        request: &PermissionRequest,
    ) -> RemoteResult<Permission> {
        let url = format!("{}/{}/permissions", FILES_URL, folder_id);
        let body = CreatePermissionBody {
            kind: "user",
            role: request.role.as_str(),
            email_address: &request.email_address,
        };
        let notify = if request.send_notification { "true" } else { "false" };
        let created: ApiPermission = self
            .api
            .send_json(
                self.api
                    .post(&url)
                    .query(&[
                        ("sendNotificationEmail", notify),
                        ("supportsAllDrives", "true"),
                        ("fields", "id,type,emailAddress,role"),
                    ])
                    .json(&body),
            )
            .await?;
        Ok(created.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_query() {
        assert_eq!(escape_query("O'Brien"), "O\\'Brien");
        assert_eq!(escape_query("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_permission_decode() {
        let json = r#"{"permissions": [
            {"id": "1", "type": "user", "emailAddress": "a@gmail.com", "role": "writer"},
            {"id": "2", "type": "anyone", "role": "reader"}
        ]}"#;
        let list: PermissionList = serde_json::from_str(json).unwrap();
        let perms: Vec<Permission> = list.permissions.into_iter().map(Permission::from).collect();
        assert_eq!(perms[0].role, Some(Role::Writer));
        assert!(perms[0].grants("A@gmail.com", Role::Reader));
        assert_eq!(perms[1].email_address, None);
    }
}
