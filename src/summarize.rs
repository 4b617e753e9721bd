//! Chunked summarization over a chat-completion endpoint.
//!
//! Text that fits in one chunk is summarized with a single call. Longer text
//! is split into char-bounded chunks, each chunk is summarized (map), and the
//! partial summaries are merged by one synthesis call (reduce). Chunk calls
//! may run concurrently up to `chunk_workers`; partials are always kept in
//! chunk order.
//!
//! When the joined partials are themselves longer than one chunk, they are
//! re-chunked and mapped again, at most [`MAX_COMBINE_ROUNDS`] times. After
//! that the synthesis call is sent with whatever remains.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{AzureOpenAiConfig, PromptPair, Secret};
use crate::error::SummarizationError;
use crate::graph::encode_segment;

/// Upper bound on re-chunking passes over the partial summaries.
pub const MAX_COMBINE_ROUNDS: usize = 3;

/// Instruction sent with the partial summaries in the reduce call.
pub const SYNTHESIS_INSTRUCTION: &str = "You will receive multiple partial summaries from segments of a document. \
Produce the final requested output exactly per the user instructions (which may include returning a title and Markdown body). \
Keep factual fidelity.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// One chat-completion round trip.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, SummarizationError>;
}

// ============ Azure OpenAI ============

#[derive(Serialize)]
struct CompletionRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {endpoint}/openai/deployments/{deployment}/chat/completions`.
pub struct AzureOpenAiClient {
    http: reqwest::Client,
    url: String,
    endpoint: String,
    deployment: String,
    api_key: Secret,
    temperature: f32,
    max_tokens: u32,
}

impl AzureOpenAiClient {
    pub fn new(config: &AzureOpenAiConfig) -> anyhow::Result<Self> {
        config.ensure_complete()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let url = format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            endpoint,
            encode_segment(&config.deployment),
            encode_segment(&config.api_version)
        );
        Ok(Self {
            http,
            url,
            endpoint,
            deployment: config.deployment.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionApi for AzureOpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, SummarizationError> {
        let body = CompletionRequest {
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        debug!(deployment = %self.deployment, messages = messages.len(), "POST chat completion");

        let resp = self
            .http
            .post(&self.url)
            .header("api-key", self.api_key.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| SummarizationError::EndpointUnreachable {
                endpoint: self.endpoint.clone(),
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(status_error(
                status.as_u16(),
                &text,
                &self.endpoint,
                &self.deployment,
            ));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| SummarizationError::InvalidResponse {
                message: e.to_string(),
            })?;
        parse_completion(&text)
    }
}

/// Map a non-success completion status onto the error taxonomy.
fn status_error(status: u16, body: &str, endpoint: &str, deployment: &str) -> SummarizationError {
    match status {
        401 | 403 => SummarizationError::AuthRejected {
            endpoint: endpoint.to_string(),
            status,
        },
        404 => SummarizationError::ModelNotFound {
            deployment: deployment.to_string(),
        },
        _ => SummarizationError::InvalidResponse {
            message: format!(
                "HTTP {}: {}",
                status,
                body.chars().take(500).collect::<String>()
            ),
        },
    }
}

/// Pull `choices[0].message.content` out of a completion body.
fn parse_completion(body: &str) -> Result<String, SummarizationError> {
    let parsed: CompletionResponse =
        serde_json::from_str(body).map_err(|e| SummarizationError::InvalidResponse {
            message: format!("malformed completion body: {}", e),
        })?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| SummarizationError::InvalidResponse {
            message: "completion returned no content".to_string(),
        })
}

// ============ Chunking ============

/// Split `text` into consecutive pieces of at most `limit` chars.
///
/// Boundaries fall on char boundaries only; concatenating the pieces yields
/// `text` exactly. Empty text yields no pieces.
pub fn split_chunks(text: &str, limit: usize) -> Vec<&str> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut count = 0;
    for (idx, _) in text.char_indices() {
        if count == limit {
            chunks.push(&text[start..idx]);
            start = idx;
            count = 0;
        }
        count += 1;
    }
    if start < text.len() {
        chunks.push(&text[start..]);
    }
    chunks
}

// ============ Map / reduce ============

pub struct Summarizer<'a> {
    api: &'a dyn CompletionApi,
    prompts: &'a PromptPair,
    chunk_limit: usize,
    workers: usize,
}

impl<'a> Summarizer<'a> {
    pub fn new(
        api: &'a dyn CompletionApi,
        prompts: &'a PromptPair,
        chunk_limit: usize,
        workers: usize,
    ) -> Self {
        Self {
            api,
            prompts,
            chunk_limit: chunk_limit.max(1),
            workers: workers.max(1),
        }
    }

    pub async fn summarize(&self, text: &str) -> Result<String, SummarizationError> {
        let chunks = split_chunks(text, self.chunk_limit);
        if chunks.len() <= 1 {
            debug!(chars = text.chars().count(), "single-call summary");
            let messages = [
                ChatMessage::system(&self.prompts.system),
                ChatMessage::user(format!("{}\n\nCONTENT:\n{}", self.prompts.user, text)),
            ];
            return self.api.complete(&messages).await;
        }

        info!(chunks = chunks.len(), workers = self.workers, "summarizing in chunks");
        let mut partials = self.map_chunks(&chunks).await?;

        for round in 1..=MAX_COMBINE_ROUNDS {
            let joined = partials.join("\n\n");
            if joined.chars().count() <= self.chunk_limit {
                break;
            }
            let pieces = split_chunks(&joined, self.chunk_limit);
            debug!(
                round,
                pieces = pieces.len(),
                "partial summaries exceed chunk limit, condensing"
            );
            partials = self.map_chunks(&pieces).await?;
        }

        self.combine(&partials).await
    }

    /// Summarize every chunk, returning partials in chunk order.
    async fn map_chunks(&self, chunks: &[&str]) -> Result<Vec<String>, SummarizationError> {
        let total = chunks.len();
        stream::iter(
            chunks
                .iter()
                .enumerate()
                .map(|(i, chunk)| self.summarize_chunk(i + 1, total, chunk)),
        )
        .buffered(self.workers)
        .try_collect()
        .await
    }

    async fn summarize_chunk(
        &self,
        index: usize,
        total: usize,
        chunk: &str,
    ) -> Result<String, SummarizationError> {
        debug!(index, total, chars = chunk.chars().count(), "summarizing chunk");
        let messages = [
            ChatMessage::system(&self.prompts.system),
            ChatMessage::user(format!(
                "Chunk {}/{}. {}\n\nCONTENT:\n{}",
                index, total, self.prompts.user, chunk
            )),
        ];
        self.api.complete(&messages).await
    }

    async fn combine(&self, partials: &[String]) -> Result<String, SummarizationError> {
        let messages = [
            ChatMessage::system(&self.prompts.system),
            ChatMessage::user(format!(
                "{}\n\nPARTIAL SUMMARIES:\n{}",
                SYNTHESIS_INSTRUCTION,
                partials.join("\n\n")
            )),
        ];
        self.api.complete(&messages).await
    }
}
