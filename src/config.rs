//! Configuration file parsing.
//!
//! The configuration is read once at startup and passed by reference into
//! every component constructor. It is never mutated afterwards.
//!
//! TOML is the primary format; a file ending in `.json` is parsed as JSON
//! with the same field layout.
//!
//! ```toml
//! tenant_id = "00000000-0000-0000-0000-000000000000"
//! client_id = "11111111-1111-1111-1111-111111111111"
//! client_secret = "..."
//!
//! [sharepoint]
//! site_hostname = "contoso.sharepoint.com"
//! site_path = "/sites/Engineering"
//! drive_name = "Documents"
//! # folder_path = "Specs/2024"
//!
//! [azure_openai]
//! endpoint = "https://my-resource.openai.azure.com"
//! api_key = "..."
//! deployment = "gpt-4o-mini"
//! api_version = "2024-06-01"
//! max_chars_per_chunk = 12000
//!
//! [prompts.summarize]
//! system = "You are a helpful assistant that writes concise, accurate summaries."
//! user = "Summarize the following content."
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AZURE_OPENAI_ENDPOINT` | `azure_openai.endpoint` |
//! | `AZURE_OPENAI_API_KEY` | `azure_openai.api_key` |
//! | `AZURE_OPENAI_CHAT_DEPLOYMENT` | `azure_openai.deployment` |
//! | `AZURE_OPENAI_API_VERSION` | `azure_openai.api_version` |
//! | `AZDO_PAT` | `azure_devops.pat` |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A secret string. Renders as `***` in `Debug` and `Display` so it can
/// never leak through a log line or an error message.
#[derive(Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for placing into an outbound request only.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Secret,
    #[serde(default)]
    pub graph: GraphConfig,
    pub sharepoint: SharePointConfig,
    /// Only `spsum run` needs it; see [`AzureOpenAiConfig::ensure_complete`].
    #[serde(default)]
    pub azure_openai: AzureOpenAiConfig,
    #[serde(default)]
    pub prompts: PromptsConfig,
    /// Where downloaded artifacts are written before extraction.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub azure_devops: Option<AzureDevOpsConfig>,
}

fn default_download_dir() -> PathBuf {
    std::env::temp_dir()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Downloads larger than this fail with `DownloadError{too_large}`.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            authority_host: default_authority_host(),
            scope: default_scope(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}
fn default_scope() -> String {
    "https://graph.microsoft.com/.default".to_string()
}
fn default_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_download_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct SharePointConfig {
    pub site_hostname: String,
    pub site_path: String,
    /// Display name of the document library, matched case-sensitively.
    pub drive_name: String,
    #[serde(default)]
    pub folder_path: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AzureOpenAiConfig {
    pub endpoint: String,
    pub api_key: Secret,
    pub deployment: String,
    pub api_version: String,
    #[serde(default = "default_max_chars_per_chunk")]
    pub max_chars_per_chunk: usize,
    /// Number of chunk summaries requested concurrently. 1 = sequential.
    #[serde(default = "default_chunk_workers")]
    pub chunk_workers: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for AzureOpenAiConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: Secret::default(),
            deployment: String::new(),
            api_version: String::new(),
            max_chars_per_chunk: default_max_chars_per_chunk(),
            chunk_workers: default_chunk_workers(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout_secs(),
        }
    }
}

impl AzureOpenAiConfig {
    /// Fail unless every field a completion call needs is set.
    pub fn ensure_complete(&self) -> Result<()> {
        for (field, value) in [
            ("azure_openai.endpoint", &self.endpoint),
            ("azure_openai.deployment", &self.deployment),
            ("azure_openai.api_version", &self.api_version),
        ] {
            if value.trim().is_empty() {
                anyhow::bail!("{} must not be empty", field);
            }
        }
        if self.api_key.is_empty() {
            anyhow::bail!("azure_openai.api_key must not be empty (or set AZURE_OPENAI_API_KEY)");
        }
        Ok(())
    }
}

fn default_max_chars_per_chunk() -> usize {
    12_000
}
fn default_chunk_workers() -> usize {
    1
}
fn default_max_tokens() -> u32 {
    300
}
fn default_temperature() -> f32 {
    0.2
}
fn default_completion_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptsConfig {
    #[serde(default)]
    pub summarize: PromptPair,
}

/// System and user prompt sent with every completion call.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PromptPair {
    #[serde(default = "default_system_prompt")]
    pub system: String,
    #[serde(default = "default_user_prompt")]
    pub user: String,
}

impl Default for PromptPair {
    fn default() -> Self {
        Self {
            system: default_system_prompt(),
            user: default_user_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are a helpful assistant that writes concise, accurate summaries.".to_string()
}
fn default_user_prompt() -> String {
    "Summarize the following content in 8-12 bullet points with headings and key takeaways."
        .to_string()
}

/// Optional work item creation from the generated summary.
#[derive(Debug, Deserialize, Clone)]
pub struct AzureDevOpsConfig {
    /// Organization URL, e.g. `https://dev.azure.com/contoso`.
    pub organization: String,
    pub project: String,
    pub pat: Secret,
    #[serde(default)]
    pub area_path: Option<String>,
    #[serde(default)]
    pub iteration_path: Option<String>,
    #[serde(default = "default_work_item_type")]
    pub work_item_type: String,
    #[serde(default = "default_azdo_api_version")]
    pub api_version: String,
}

fn default_work_item_type() -> String {
    "User Story".to_string()
}
fn default_azdo_api_version() -> String {
    "7.1-preview.3".to_string()
}

/// Load, apply environment overrides, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read config file: {} (copy config.example.toml and fill in values)",
            path.display()
        )
    })?;

    let mut config = parse_config(path, &content)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&mut config)?;
    Ok(config)
}

fn parse_config(path: &Path, content: &str) -> Result<Config> {
    let is_json = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(content).with_context(|| "Failed to parse config file")
    } else {
        toml::from_str(content).with_context(|| "Failed to parse config file")
    }
}

/// Override completion settings (and the DevOps PAT) from the environment.
///
/// `lookup` abstracts `std::env::var` so the precedence rules are testable.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let present = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = present("AZURE_OPENAI_ENDPOINT") {
        config.azure_openai.endpoint = v;
    }
    if let Some(v) = present("AZURE_OPENAI_API_KEY") {
        config.azure_openai.api_key = Secret::new(v);
    }
    if let Some(v) = present("AZURE_OPENAI_CHAT_DEPLOYMENT") {
        config.azure_openai.deployment = v;
    }
    if let Some(v) = present("AZURE_OPENAI_API_VERSION") {
        config.azure_openai.api_version = v;
    }
    if let Some(devops) = config.azure_devops.as_mut() {
        if let Some(v) = present("AZDO_PAT") {
            devops.pat = Secret::new(v);
        }
    }
}

fn validate(config: &mut Config) -> Result<()> {
    for (field, value) in [
        ("tenant_id", &config.tenant_id),
        ("client_id", &config.client_id),
        ("sharepoint.site_hostname", &config.sharepoint.site_hostname),
        ("sharepoint.drive_name", &config.sharepoint.drive_name),
    ] {
        if value.trim().is_empty() {
            anyhow::bail!("{} must not be empty", field);
        }
    }

    if config.client_secret.is_empty() {
        anyhow::bail!("client_secret must not be empty");
    }

    // Graph expects `/sites/Name`; accept `sites/Name` as well.
    if !config.sharepoint.site_path.starts_with('/') {
        config.sharepoint.site_path = format!("/{}", config.sharepoint.site_path);
    }

    if let Some(folder) = &config.sharepoint.folder_path {
        if folder.trim_matches('/').trim().is_empty() {
            config.sharepoint.folder_path = None;
        }
    }

    if config.azure_openai.max_chars_per_chunk == 0 {
        anyhow::bail!("azure_openai.max_chars_per_chunk must be > 0");
    }
    if config.azure_openai.chunk_workers == 0 {
        anyhow::bail!("azure_openai.chunk_workers must be >= 1");
    }
    if config.graph.max_download_bytes == 0 {
        anyhow::bail!("graph.max_download_bytes must be > 0");
    }

    if let Some(devops) = &config.azure_devops {
        if devops.organization.trim().is_empty() || devops.project.trim().is_empty() {
            anyhow::bail!("azure_devops.organization and azure_devops.project must be set");
        }
        if devops.pat.is_empty() {
            anyhow::bail!("azure_devops.pat must not be empty (or set AZDO_PAT)");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
tenant_id = "tenant"
client_id = "client"
client_secret = "s3cr3t"

[sharepoint]
site_hostname = "contoso.sharepoint.com"
site_path = "sites/Engineering"
drive_name = "Documents"

[azure_openai]
endpoint = "https://example.openai.azure.com"
api_key = "key-from-file"
deployment = "gpt"
api_version = "2024-06-01"
"#;

    fn parsed(content: &str) -> Config {
        let mut cfg = parse_config(Path::new("config.toml"), content).unwrap();
        validate(&mut cfg).unwrap();
        cfg
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = parsed(MINIMAL);
        assert_eq!(cfg.azure_openai.max_chars_per_chunk, 12_000);
        assert_eq!(cfg.azure_openai.chunk_workers, 1);
        assert_eq!(cfg.graph.scope, "https://graph.microsoft.com/.default");
        assert_eq!(cfg.prompts.summarize, PromptPair::default());
        assert!(cfg.sharepoint.folder_path.is_none());
        assert!(cfg.azure_devops.is_none());
    }

    #[test]
    fn site_path_gets_leading_slash() {
        let cfg = parsed(MINIMAL);
        assert_eq!(cfg.sharepoint.site_path, "/sites/Engineering");
    }

    #[test]
    fn secrets_are_redacted_in_debug() {
        let cfg = parsed(MINIMAL);
        let dump = format!("{:?}", cfg);
        assert!(!dump.contains("s3cr3t"));
        assert!(!dump.contains("key-from-file"));
        assert!(dump.contains("***"));
    }

    #[test]
    fn env_overrides_completion_settings() {
        let mut cfg = parsed(MINIMAL);
        apply_env_overrides(&mut cfg, |key| match key {
            "AZURE_OPENAI_ENDPOINT" => Some("https://override.example".to_string()),
            "AZURE_OPENAI_API_KEY" => Some("env-key".to_string()),
            "AZURE_OPENAI_CHAT_DEPLOYMENT" => Some("gpt-env".to_string()),
            "AZURE_OPENAI_API_VERSION" => Some("".to_string()),
            _ => None,
        });
        assert_eq!(cfg.azure_openai.endpoint, "https://override.example");
        assert_eq!(cfg.azure_openai.api_key.expose(), "env-key");
        assert_eq!(cfg.azure_openai.deployment, "gpt-env");
        // Empty values do not override.
        assert_eq!(cfg.azure_openai.api_version, "2024-06-01");
    }

    #[test]
    fn completion_section_is_optional_until_used() {
        let storage_only = &MINIMAL[..MINIMAL.find("[azure_openai]").unwrap()];
        let cfg = parsed(storage_only);
        assert_eq!(cfg.azure_openai.max_chars_per_chunk, 12_000);
        let err = cfg.azure_openai.ensure_complete().unwrap_err();
        assert!(err.to_string().contains("azure_openai.endpoint"));

        assert!(parsed(MINIMAL).azure_openai.ensure_complete().is_ok());
    }

    #[test]
    fn zero_chunk_limit_is_rejected() {
        let content = format!("{}max_chars_per_chunk = 0\n", MINIMAL);
        let mut cfg = parse_config(Path::new("config.toml"), &content).unwrap();
        assert!(validate(&mut cfg).is_err());
    }

    #[test]
    fn json_config_is_accepted() {
        let json = r#"{
            "tenant_id": "t", "client_id": "c", "client_secret": "s",
            "sharepoint": {"site_hostname": "h", "site_path": "/sites/x", "drive_name": "Documents", "folder_path": "/"},
            "azure_openai": {"endpoint": "e", "api_key": "k", "deployment": "d", "api_version": "v"}
        }"#;
        let mut cfg = parse_config(Path::new("config.json"), json).unwrap();
        validate(&mut cfg).unwrap();
        assert_eq!(cfg.sharepoint.drive_name, "Documents");
        // A bare "/" folder means the drive root.
        assert!(cfg.sharepoint.folder_path.is_none());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, MINIMAL).unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.tenant_id, "tenant");
    }
}
