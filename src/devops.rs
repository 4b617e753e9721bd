//! Azure DevOps work item creation from a generated summary.
//!
//! The summary is expected to follow a small layout:
//!
//! ```text
//! TITLE: <one line title>
//! ---
//! <markdown body>
//! ```
//!
//! [`parse_title_and_body`] tolerates output that strays from it: a missing
//! title falls back to [`DEFAULT_TITLE`], and without a `---` line the whole
//! text (minus any `TITLE:` line) becomes the body.

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::config::AzureDevOpsConfig;
use crate::graph::encode_segment;

pub const DEFAULT_TITLE: &str = "Generated User Story";

/// Split model output into a work item title and description body.
pub fn parse_title_and_body(summary: &str) -> (String, String) {
    let title = summary
        .lines()
        .filter_map(|line| line.strip_prefix("TITLE:"))
        .map(str::trim)
        .find(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    let mut sections: Vec<Vec<&str>> = vec![Vec::new()];
    for line in summary.lines() {
        if line.trim_end() == "---" {
            sections.push(Vec::new());
        } else if let Some(current) = sections.last_mut() {
            current.push(line);
        }
    }

    let body = if sections.len() >= 2 {
        sections[1..]
            .iter()
            .map(|lines| lines.join("\n").trim().to_string())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    } else {
        summary
            .lines()
            .filter(|line| !line.starts_with("TITLE:"))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    };

    (title, body)
}

/// JSON Patch document for a new work item.
pub fn patch_operations(title: &str, body: &str, config: &AzureDevOpsConfig) -> Value {
    let mut ops = vec![
        json!({"op": "add", "path": "/fields/System.Title", "value": title}),
        json!({"op": "add", "path": "/fields/System.Description", "value": body}),
    ];
    if let Some(area) = config.area_path.as_deref().filter(|s| !s.is_empty()) {
        ops.push(json!({"op": "add", "path": "/fields/System.AreaPath", "value": area}));
    }
    if let Some(iteration) = config.iteration_path.as_deref().filter(|s| !s.is_empty()) {
        ops.push(json!({"op": "add", "path": "/fields/System.IterationPath", "value": iteration}));
    }
    Value::Array(ops)
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedWorkItem {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

pub struct WorkItemClient<'a> {
    http: reqwest::Client,
    config: &'a AzureDevOpsConfig,
}

impl<'a> WorkItemClient<'a> {
    pub fn new(config: &'a AzureDevOpsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/_apis/wit/workitems/${}?api-version={}",
            self.config.organization.trim_end_matches('/'),
            encode_segment(&self.config.project),
            encode_segment(&self.config.work_item_type),
            encode_segment(&self.config.api_version)
        )
    }

    /// PAT basic auth: empty user name, token as password.
    fn authorization(&self) -> String {
        let raw = format!(":{}", self.config.pat.expose());
        format!("Basic {}", STANDARD.encode(raw))
    }

    /// Create a work item from `summary`.
    pub async fn create_from_summary(&self, summary: &str) -> Result<CreatedWorkItem> {
        let (title, body) = parse_title_and_body(summary);
        let ops = patch_operations(&title, &body, self.config);
        let url = self.endpoint();
        debug!(url = %url, title = %title, "POST work item");

        let resp = self
            .http
            .post(&url)
            .header(reqwest::header::AUTHORIZATION, self.authorization())
            .header(reqwest::header::CONTENT_TYPE, "application/json-patch+json")
            .body(serde_json::to_vec(&ops)?)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.config.organization))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!(
                "Error creating work item: {} {}",
                status.as_u16(),
                text.chars().take(500).collect::<String>()
            );
        }
        resp.json::<CreatedWorkItem>()
            .await
            .context("Malformed work item response")
    }
}
