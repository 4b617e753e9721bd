//! Listing a container and downloading a selected entry.
//!
//! Listing covers exactly one level (the container's direct children) and
//! follows `@odata.nextLink` pages through [`EntryPages`], one request per
//! page. Downloads stream into a [`LocalArtifact`]; on any failure the
//! artifact is dropped, which deletes the partial file.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::artifact::LocalArtifact;
use crate::error::{DownloadError, ResourceKind, StorageError, WorkflowError};
use crate::graph::{DriveItem, StorageApi};
use crate::models::{ContainerHandle, ContainerLocation, Entry, EntryKind};

/// Lazy cursor over the pages of one children listing.
pub struct EntryPages<'a> {
    api: &'a dyn StorageApi,
    drive_id: String,
    folder_id: Option<String>,
    next_link: Option<String>,
    finished: bool,
}

impl<'a> EntryPages<'a> {
    /// Fetch the next page, or `None` once the listing is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Entry>>, StorageError> {
        if self.finished {
            return Ok(None);
        }
        let page = self
            .api
            .list_children(
                &self.drive_id,
                self.folder_id.as_deref(),
                self.next_link.as_deref(),
            )
            .await?;
        self.next_link = page.next_link;
        self.finished = self.next_link.is_none();
        let entries = page
            .value
            .into_iter()
            .map(|item| entry_from_item(item, &self.drive_id))
            .collect();
        Ok(Some(entries))
    }
}

fn entry_from_item(item: DriveItem, drive_id: &str) -> Entry {
    let kind = if item.folder.is_some() {
        EntryKind::Folder
    } else {
        EntryKind::File
    };
    Entry {
        id: item.id,
        name: item.name,
        kind,
        size: item.size.unwrap_or(0),
        last_modified: item.last_modified,
        mime_type: item.file.and_then(|f| f.mime_type),
        drive_id: drive_id.to_string(),
    }
}

pub struct Lister<'a> {
    api: &'a dyn StorageApi,
    download_dir: PathBuf,
    max_download_bytes: u64,
}

impl<'a> Lister<'a> {
    pub fn new(api: &'a dyn StorageApi, download_dir: PathBuf, max_download_bytes: u64) -> Self {
        Self {
            api,
            download_dir,
            max_download_bytes,
        }
    }

    pub fn pages(&self, container: &ContainerHandle) -> EntryPages<'a> {
        let folder_id = match &container.location {
            ContainerLocation::Root => None,
            ContainerLocation::Folder { item_id, .. } => Some(item_id.clone()),
        };
        EntryPages {
            api: self.api,
            drive_id: container.library.drive_id.clone(),
            folder_id,
            next_link: None,
            finished: false,
        }
    }

    /// All entries directly under `container`, in service order.
    pub async fn list(&self, container: &ContainerHandle) -> Result<Vec<Entry>, WorkflowError> {
        let mut pages = self.pages(container);
        let mut entries = Vec::new();
        loop {
            let page = pages
                .next_page()
                .await
                .map_err(|e| {
                    e.into_lookup_error(ResourceKind::Folder, container.describe(), None)
                })?;
            match page {
                Some(batch) => entries.extend(batch),
                None => break,
            }
        }
        info!(location = %container.describe(), count = entries.len(), "listed entries");
        Ok(entries)
    }

    /// Fetch `entry` into a fresh local artifact.
    pub async fn download(&self, entry: &Entry) -> Result<LocalArtifact, WorkflowError> {
        if entry.kind == EntryKind::Folder {
            return Err(DownloadError::Transfer {
                entry: entry.name.clone(),
                message: "folders cannot be downloaded".to_string(),
            }
            .into());
        }
        if entry.size > self.max_download_bytes {
            return Err(DownloadError::TooLarge {
                entry: entry.name.clone(),
                size: entry.size,
                limit: self.max_download_bytes,
            }
            .into());
        }

        let (artifact, mut file) = LocalArtifact::create(&self.download_dir, &entry.name)?;
        let written = self
            .api
            .download(&entry.drive_id, &entry.id, self.max_download_bytes, &mut file)
            .await
            .map_err(|e| self.map_download_error(entry, e))?;
        file.sync_all()?;
        debug!(
            entry = %entry.name,
            bytes = written,
            path = %artifact.path().display(),
            "download complete"
        );
        Ok(artifact)
    }

    fn map_download_error(&self, entry: &Entry, err: StorageError) -> WorkflowError {
        let name = entry.name.clone();
        match err {
            StorageError::Auth(e) => e.into(),
            StorageError::Status { status: 404, .. } => {
                DownloadError::NotFound { entry: name }.into()
            }
            StorageError::Status {
                status: status @ (401 | 403),
                ..
            } => DownloadError::Forbidden {
                entry: name,
                status,
            }
            .into(),
            StorageError::Status { status: 413, .. } => DownloadError::TooLarge {
                entry: name,
                size: entry.size,
                limit: self.max_download_bytes,
            }
            .into(),
            StorageError::TooLarge { received, limit } => DownloadError::TooLarge {
                entry: name,
                size: received,
                limit,
            }
            .into(),
            other => DownloadError::Transfer {
                entry: name,
                message: other.to_string(),
            }
            .into(),
        }
    }
}
