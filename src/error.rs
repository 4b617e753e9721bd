//! Failure taxonomy for a summarization run.
//!
//! Every variant is terminal for the run. The `Display` form of
//! [`WorkflowError`] leads with the kind and variant
//! (`NotFoundError{library}: ...`) so the CLI can print it verbatim and the
//! operator can map it straight onto a troubleshooting step: permission
//! grants for `forbidden`, naming for `not found`, secrets for auth.

use thiserror::Error;

/// Client-credential exchange failed. Indicates misconfiguration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("AuthError{{invalid_credentials}}: {message}")]
    InvalidCredentials { message: String },

    #[error("AuthError{{tenant_unreachable}}: tenant '{tenant}': {message}")]
    TenantUnreachable { tenant: String, message: String },

    #[error("AuthError{{consent_missing}}: {message} (grant admin consent for the application permissions)")]
    ConsentMissing { message: String },
}

/// Which resolution step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Site,
    Library,
    Folder,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Site => write!(f, "site"),
            ResourceKind::Library => write!(f, "library"),
            ResourceKind::Folder => write!(f, "folder"),
        }
    }
}

/// A configured name did not resolve to a remote resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("NotFoundError{{{kind}}}: {kind} '{name}' not found{}", scope_suffix(.scope))]
pub struct NotFoundError {
    pub kind: ResourceKind,
    /// The configured name that failed to resolve.
    pub name: String,
    /// Where the lookup was scoped (site id for a library, library name for a folder).
    pub scope: Option<String>,
}

fn scope_suffix(scope: &Option<String>) -> String {
    match scope {
        Some(s) => format!(" in {}", s),
        None => String::new(),
    }
}

/// The application identity may not read a configured resource.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error(
    "AccessDeniedError{{{kind}}}: access to {kind} '{name}' denied (HTTP {status}); \
     the application permission is missing: grant the app a role on the site \
     (`spsum grant add`) and retry"
)]
pub struct AccessDeniedError {
    pub kind: ResourceKind,
    pub name: String,
    pub status: u16,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("DownloadError{{not_found}}: '{entry}' no longer exists in the library")]
    NotFound { entry: String },

    #[error(
        "DownloadError{{forbidden}}: access to '{entry}' denied (HTTP {status}); \
         the application permission is missing: grant the app a role on the site \
         (`spsum grant add`) and retry"
    )]
    Forbidden { entry: String, status: u16 },

    #[error("DownloadError{{too_large}}: '{entry}' exceeds the download limit ({size} bytes > {limit} bytes)")]
    TooLarge { entry: String, size: u64, limit: u64 },

    #[error("DownloadError{{transfer}}: '{entry}': {message}")]
    Transfer { entry: String, message: String },
}

/// The artifact cannot be decoded into text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnsupportedFormatError {
    #[error("UnsupportedFormatError{{extension}}: '{name}' has unsupported extension '{extension}' (supported: txt, md, csv, log, pdf, docx)")]
    Extension { name: String, extension: String },

    #[error("UnsupportedFormatError{{decode}}: '{name}' could not be decoded as {format}: {message}")]
    Decode {
        name: String,
        format: String,
        message: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SummarizationError {
    #[error("SummarizationError{{endpoint_unreachable}}: {endpoint}: {message}")]
    EndpointUnreachable { endpoint: String, message: String },

    #[error("SummarizationError{{auth_rejected}}: HTTP {status}: check the API key for {endpoint}")]
    AuthRejected { endpoint: String, status: u16 },

    #[error("SummarizationError{{model_not_found}}: deployment '{deployment}' not found")]
    ModelNotFound { deployment: String },

    #[error("SummarizationError{{invalid_response}}: {message}")]
    InvalidResponse { message: String },
}

/// Failure of one storage REST call, before it is mapped onto the
/// taxonomy by the component that issued it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("response exceeded {limit} bytes ({received} received)")]
    TooLarge { received: u64, limit: u64 },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl StorageError {
    pub fn status(&self) -> Option<u16> {
        match self {
            StorageError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map a failed lookup of `kind` `name`: 404 → [`NotFoundError`],
    /// 401/403 → [`AccessDeniedError`], anything else passes through.
    pub fn into_lookup_error(
        self,
        kind: ResourceKind,
        name: String,
        scope: Option<String>,
    ) -> WorkflowError {
        match self.status() {
            Some(404) => NotFoundError { kind, name, scope }.into(),
            Some(status @ (401 | 403)) => AccessDeniedError { kind, name, status }.into(),
            _ => self.into(),
        }
    }
}

/// Anything that moves the orchestrator into `Failed`.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error(transparent)]
    AccessDenied(#[from] AccessDeniedError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormatError),
    #[error(transparent)]
    Summarization(#[from] SummarizationError),
    /// Transport or protocol failure outside the taxonomy above.
    #[error("StorageError: {0}")]
    Storage(String),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for WorkflowError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Auth(e) => WorkflowError::Auth(e),
            other => WorkflowError::Storage(other.to_string()),
        }
    }
}

impl WorkflowError {
    /// Short kind label, e.g. `"NotFoundError"`.
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowError::Auth(_) => "AuthError",
            WorkflowError::NotFound(_) => "NotFoundError",
            WorkflowError::AccessDenied(_) => "AccessDeniedError",
            WorkflowError::Download(_) => "DownloadError",
            WorkflowError::UnsupportedFormat(_) => "UnsupportedFormatError",
            WorkflowError::Summarization(_) => "SummarizationError",
            WorkflowError::Storage(_) => "StorageError",
            WorkflowError::Io(_) => "IoError",
        }
    }
}
