//! Temporary local copy of a downloaded entry.
//!
//! A [`LocalArtifact`] owns its file. It is deleted either explicitly through
//! [`LocalArtifact::remove`] (which reports failures) or, on any other exit
//! path, when the value is dropped. Downloaded content therefore never
//! outlives the run. On Unix the file is created readable by its owner only.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Fallback file name when the listed name is unusable.
const DEFAULT_NAME: &str = "downloaded-file";

/// Upper bound on `name (n).ext` candidates tried before giving up.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o600;

#[derive(Debug)]
pub struct LocalArtifact {
    path: PathBuf,
    /// Entry name as listed remotely.
    source_name: String,
    removed: bool,
}

impl LocalArtifact {
    /// Create a new, empty file for `name` inside `dir`.
    ///
    /// Never overwrites: when `name` is taken, `name (1).ext`, `name (2).ext`,
    /// ... are tried in turn.
    pub fn create(dir: &Path, name: &str) -> io::Result<(Self, File)> {
        std::fs::create_dir_all(dir)?;
        let safe = sanitize_file_name(name);
        let (stem, ext) = split_extension(&safe);

        for n in 0..=MAX_COLLISION_SUFFIX {
            let candidate = if n == 0 {
                dir.join(&safe)
            } else {
                dir.join(format!("{} ({}){}", stem, n, ext))
            };
            match private_file_options().open(&candidate) {
                Ok(file) => {
                    debug!(path = %candidate.display(), "created local artifact");
                    let artifact = Self {
                        path: candidate,
                        source_name: name.to_string(),
                        removed: false,
                    };
                    return Ok((artifact, file));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }

        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free file name for '{}' in {}", safe, dir.display()),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Delete the file now, reporting any failure.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed local artifact"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove local artifact")
            }
        }
    }
}

fn private_file_options() -> OpenOptions {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(ARTIFACT_MODE);
    }
    options
}

/// Strip path separators and control characters so a remote name cannot
/// escape the download directory.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// `"report.final.pdf"` → `("report.final", ".pdf")`.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}
