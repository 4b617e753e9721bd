//! Core data types that flow through the resolution and retrieval pipeline.
//!
//! Handles are opaque: they are produced only by the resolver and passed
//! back verbatim in later calls.

use chrono::{DateTime, Utc};

/// Composite site id as returned by the site lookup:
/// `hostname,siteGuid,webGuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteHandle(String);

impl SiteHandle {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SiteHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document library (drive) within a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryHandle {
    pub site: SiteHandle,
    pub drive_id: String,
    pub display_name: String,
}

/// The location whose children get listed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub library: LibraryHandle,
    pub location: ContainerLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerLocation {
    Root,
    Folder { path: String, item_id: String },
}

impl ContainerHandle {
    /// Human-readable location for messages: `Documents` or `Documents/Specs`.
    pub fn describe(&self) -> String {
        match &self.location {
            ContainerLocation::Root => self.library.display_name.clone(),
            ContainerLocation::Folder { path, .. } => {
                format!("{}/{}", self.library.display_name, path)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Folder,
}

/// One listed item of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    pub mime_type: Option<String>,
    /// Drive the entry lives in; downloads are addressed through it.
    pub drive_id: String,
}

impl Entry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}
