//! Name-to-handle resolution.
//!
//! Three sequential lookups turn the configured names into handles:
//! hostname + site path → [`SiteHandle`], library display name →
//! [`LibraryHandle`], optional folder path → [`ContainerHandle`]. Each step
//! takes the previous step's handle, so the order is enforced by the types.
//! A 404 (or a missing name in a listing) becomes a [`NotFoundError`] naming
//! the configured value; a 401/403 becomes an [`AccessDeniedError`] pointing
//! at the missing site grant.
//!
//! [`AccessDeniedError`]: crate::error::AccessDeniedError

use tracing::{debug, info};

use crate::error::{NotFoundError, ResourceKind, WorkflowError};
use crate::graph::StorageApi;
use crate::models::{ContainerHandle, ContainerLocation, LibraryHandle, SiteHandle};

pub struct Resolver<'a> {
    api: &'a dyn StorageApi,
}

impl<'a> Resolver<'a> {
    pub fn new(api: &'a dyn StorageApi) -> Self {
        Self { api }
    }

    pub async fn resolve_site(
        &self,
        hostname: &str,
        path: &str,
    ) -> Result<SiteHandle, WorkflowError> {
        let name = format!("{}:{}", hostname, path);
        let site = self
            .api
            .get_site(hostname, path)
            .await
            .map_err(|e| e.into_lookup_error(ResourceKind::Site, name, None))?;
        info!(site_id = %site.id, "resolved site");
        Ok(SiteHandle::new(site.id))
    }

    /// Find the library whose display name equals `display_name` exactly.
    pub async fn resolve_library(
        &self,
        site: &SiteHandle,
        display_name: &str,
    ) -> Result<LibraryHandle, WorkflowError> {
        let drives = self
            .api
            .list_drives(site.as_str())
            .await
            .map_err(|e| e.into_lookup_error(ResourceKind::Site, site.to_string(), None))?;
        debug!(count = drives.len(), "libraries on site");

        let drive = drives
            .into_iter()
            .find(|d| d.name == display_name)
            .ok_or_else(|| NotFoundError {
                kind: ResourceKind::Library,
                name: display_name.to_string(),
                scope: Some(format!("site {}", site)),
            })?;
        info!(drive_id = %drive.id, library = display_name, "resolved library");

        Ok(LibraryHandle {
            site: site.clone(),
            drive_id: drive.id,
            display_name: display_name.to_string(),
        })
    }

    /// `None` (or an empty path) addresses the library root.
    pub async fn resolve_folder(
        &self,
        library: &LibraryHandle,
        folder_path: Option<&str>,
    ) -> Result<ContainerHandle, WorkflowError> {
        let path = folder_path.map(|p| p.trim_matches('/')).unwrap_or_default();
        if path.is_empty() {
            return Ok(ContainerHandle {
                library: library.clone(),
                location: ContainerLocation::Root,
            });
        }

        let scope = Some(format!("library '{}'", library.display_name));
        let item = self
            .api
            .get_item_by_path(&library.drive_id, path)
            .await
            .map_err(|e| {
                e.into_lookup_error(ResourceKind::Folder, path.to_string(), scope.clone())
            })?;

        if item.folder.is_none() {
            // The path exists but names a file.
            return Err(NotFoundError {
                kind: ResourceKind::Folder,
                name: path.to_string(),
                scope,
            }
            .into());
        }
        info!(folder = path, item_id = %item.id, "resolved folder");

        Ok(ContainerHandle {
            library: library.clone(),
            location: ContainerLocation::Folder {
                path: path.to_string(),
                item_id: item.id,
            },
        })
    }
}
