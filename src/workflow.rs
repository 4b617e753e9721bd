//! The end-to-end run: authenticate, resolve, list, select, download,
//! extract, summarize, clean up.
//!
//! # States
//!
//! ```text
//! Idle → Authenticated → Resolved → Listed → Selected → Downloaded
//!      → Extracted → Summarized → Cleaned
//! ```
//!
//! Any component error moves the run to `Failed`. The downloaded artifact,
//! once it exists, is removed on every exit path: explicitly after the run
//! (reported on the output) and by its drop guard otherwise.
//!
//! An empty listing, a cancelled selection and an empty extraction all end
//! the run without error.

use async_trait::async_trait;
use chrono::SecondsFormat;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tracing::{debug, info, warn};

use crate::artifact::LocalArtifact;
use crate::auth::CredentialProvider;
use crate::config::Config;
use crate::devops::WorkItemClient;
use crate::error::WorkflowError;
use crate::extract::extract;
use crate::graph::StorageApi;
use crate::listing::Lister;
use crate::models::{ContainerHandle, Entry};
use crate::resolver::Resolver;
use crate::summarize::{CompletionApi, Summarizer};

const SELECTION_PROMPT: &str =
    "Enter the number of the document to download (or press Enter to cancel): ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Authenticated,
    Resolved,
    Listed,
    Selected,
    Downloaded,
    Extracted,
    Summarized,
    Cleaned,
    Failed,
}

/// How a run that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Summarized(String),
    /// The container holds no files.
    NothingToSelect,
    Cancelled,
    /// The document decoded to blank text; nothing was sent for completion.
    EmptyText,
}

/// Source of the operator's selection input.
///
/// Reads are awaited so an interrupt can cancel a run waiting at the prompt.
#[async_trait]
pub trait EntrySelector: Send {
    /// One line of input, or `None` at end of input.
    async fn read_choice(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// Reads selections from stdin, printing the prompt only on a terminal.
pub struct StdinSelector {
    interactive: bool,
    input: BufReader<Stdin>,
}

impl StdinSelector {
    pub fn new() -> Self {
        Self {
            interactive: atty::is(atty::Stream::Stdin),
            input: BufReader::new(tokio::io::stdin()),
        }
    }
}

impl Default for StdinSelector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntrySelector for StdinSelector {
    async fn read_choice(&mut self, prompt: &str) -> io::Result<Option<String>> {
        if self.interactive {
            let mut stdout = io::stdout();
            write!(stdout, "{}", prompt)?;
            stdout.flush()?;
        }
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line))
    }
}

/// Pre-supplied answers (`--select N`); end of input once exhausted.
pub struct ScriptedSelector {
    inputs: VecDeque<String>,
}

impl ScriptedSelector {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl EntrySelector for ScriptedSelector {
    async fn read_choice(&mut self, _prompt: &str) -> io::Result<Option<String>> {
        Ok(self.inputs.pop_front())
    }
}

pub struct Workflow<'a> {
    config: &'a Config,
    credentials: &'a CredentialProvider,
    storage: &'a dyn StorageApi,
    state: RunState,
}

impl<'a> Workflow<'a> {
    pub fn new(
        config: &'a Config,
        credentials: &'a CredentialProvider,
        storage: &'a dyn StorageApi,
    ) -> Self {
        Self {
            config,
            credentials,
            storage,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn lister(&self) -> Lister<'a> {
        Lister::new(
            self.storage,
            self.config.download_dir.clone(),
            self.config.graph.max_download_bytes,
        )
    }

    /// Authenticate, resolve the configured location and list it.
    async fn retrieve(&mut self) -> Result<(ContainerHandle, Vec<Entry>), WorkflowError> {
        self.credentials.get_token().await?;
        self.transition(RunState::Authenticated);

        let sp = &self.config.sharepoint;
        let resolver = Resolver::new(self.storage);
        let site = resolver
            .resolve_site(&sp.site_hostname, &sp.site_path)
            .await?;
        let library = resolver.resolve_library(&site, &sp.drive_name).await?;
        let container = resolver
            .resolve_folder(&library, sp.folder_path.as_deref())
            .await?;
        self.transition(RunState::Resolved);

        let entries = self.lister().list(&container).await?;
        self.transition(RunState::Listed);
        Ok((container, entries))
    }

    /// Resolve and print the configured location without downloading.
    pub async fn list(&mut self, out: &mut dyn Write) -> Result<Vec<Entry>, WorkflowError> {
        let result = self.list_steps(out).await;
        if result.is_err() {
            self.transition(RunState::Failed);
        }
        result
    }

    async fn list_steps(&mut self, out: &mut dyn Write) -> Result<Vec<Entry>, WorkflowError> {
        let (container, entries) = self.retrieve().await?;
        writeln!(out, "Location: {}", container.describe())?;
        let files: Vec<&Entry> = entries.iter().filter(|e| e.is_file()).collect();
        write_file_list(out, &files)?;
        for folder in entries.iter().filter(|e| !e.is_file()) {
            writeln!(out, "-  {}/  [folder]", folder.name)?;
        }
        if entries.is_empty() {
            writeln!(out, "The location is empty.")?;
        }
        Ok(entries)
    }

    /// Full run. The artifact, if one was downloaded, is gone when this returns.
    ///
    /// Dropping the returned future mid-run (on interrupt) drops the artifact
    /// slot, whose guard deletes the file.
    pub async fn run(
        &mut self,
        completion: &dyn CompletionApi,
        selector: &mut dyn EntrySelector,
        out: &mut dyn Write,
    ) -> Result<RunOutcome, WorkflowError> {
        let mut artifact: Option<LocalArtifact> = None;
        let result = self
            .run_steps(completion, selector, out, &mut artifact)
            .await;

        let cleaned = artifact.take().map(|a| remove_artifact(a, out)).is_some();
        match result {
            Ok(outcome) => {
                if cleaned {
                    self.transition(RunState::Cleaned);
                }
                Ok(outcome)
            }
            Err(e) => {
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    async fn run_steps(
        &mut self,
        completion: &dyn CompletionApi,
        selector: &mut dyn EntrySelector,
        out: &mut dyn Write,
        artifact_slot: &mut Option<LocalArtifact>,
    ) -> Result<RunOutcome, WorkflowError> {
        let retrieval_started = Instant::now();
        let (_, entries) = self.retrieve().await?;
        let retrieval_time = retrieval_started.elapsed();

        let files: Vec<&Entry> = entries.iter().filter(|e| e.is_file()).collect();
        write_file_list(out, &files)?;
        if files.is_empty() {
            writeln!(out, "No files found to download in the specified location.")?;
            return Ok(RunOutcome::NothingToSelect);
        }
        writeln!(out, "Retrieval Time: {}", format_duration(retrieval_time))?;

        let selected = match choose_entry(&files, selector, out).await? {
            Some(entry) => entry,
            None => {
                writeln!(out, "Cancelled.")?;
                return Ok(RunOutcome::Cancelled);
            }
        };
        self.transition(RunState::Selected);
        info!(entry = %selected.name, size = selected.size, "selected entry");

        writeln!(out, "Downloading '{}'...", selected.name)?;
        let download_started = Instant::now();
        let local = artifact_slot.insert(self.lister().download(selected).await?);
        let download_time = download_started.elapsed();
        self.transition(RunState::Downloaded);
        writeln!(out, "Download complete: '{}'", local.path().display())?;
        writeln!(
            out,
            "Download Time: {}  |  Downloaded Size: {} bytes",
            format_duration(download_time),
            local.size().unwrap_or(0)
        )?;

        let text = extract(local)?;
        self.transition(RunState::Extracted);
        if text.trim().is_empty() {
            writeln!(
                out,
                "Downloaded file appears empty or unreadable for text extraction."
            )?;
            return Ok(RunOutcome::EmptyText);
        }

        let ai = &self.config.azure_openai;
        writeln!(
            out,
            "Preparing AI summarization with deployment '{}'... this may take a few moments.",
            ai.deployment
        )?;
        let summarize_started = Instant::now();
        let summary = Summarizer::new(
            completion,
            &self.config.prompts.summarize,
            ai.max_chars_per_chunk,
            ai.chunk_workers,
        )
        .summarize(&text)
        .await?;
        let summarize_time = summarize_started.elapsed();
        self.transition(RunState::Summarized);

        writeln!(out, "\n===== SUMMARY =====\n")?;
        writeln!(out, "{}", summary)?;
        writeln!(out, "\n===================\n")?;
        writeln!(
            out,
            "AI Summarization Time: {} | Input Chars: {} | Output Chars: {}",
            format_duration(summarize_time),
            text.chars().count(),
            summary.chars().count()
        )?;

        self.create_work_item(&summary, out).await?;
        Ok(RunOutcome::Summarized(summary))
    }

    /// Optional follow-up; failures are reported, never fatal.
    async fn create_work_item(&self, summary: &str, out: &mut dyn Write) -> io::Result<()> {
        let Some(devops) = self.config.azure_devops.as_ref() else {
            return Ok(());
        };
        let started = Instant::now();
        let result = match WorkItemClient::new(devops) {
            Ok(client) => client.create_from_summary(summary).await,
            Err(e) => Err(e),
        };
        let elapsed = format_duration(started.elapsed());
        match result {
            Ok(item) => {
                let location = item
                    .url
                    .or_else(|| item.id.map(|id| id.to_string()))
                    .unwrap_or_default();
                writeln!(out, "Azure DevOps work item created: {}", location)?;
                writeln!(out, "Azure DevOps Work Item Creation Time: {}", elapsed)?;
            }
            Err(e) => {
                warn!(error = %e, "work item creation failed");
                writeln!(out, "Failed to create Azure DevOps work item: {:#}", e)?;
            }
        }
        Ok(())
    }
}

async fn choose_entry<'e>(
    files: &[&'e Entry],
    selector: &mut dyn EntrySelector,
    out: &mut dyn Write,
) -> Result<Option<&'e Entry>, WorkflowError> {
    loop {
        let Some(input) = selector.read_choice(SELECTION_PROMPT).await? else {
            return Ok(None);
        };
        let input = input.trim();
        if input.is_empty() {
            return Ok(None);
        }
        match input.parse::<usize>() {
            Ok(n) if (1..=files.len()).contains(&n) => return Ok(Some(files[n - 1])),
            Ok(_) => writeln!(out, "Please enter a number between 1 and {}.", files.len())?,
            Err(_) => writeln!(out, "Invalid input. Please enter a number.")?,
        }
    }
}

fn write_file_list(out: &mut dyn Write, files: &[&Entry]) -> io::Result<()> {
    writeln!(out, "Files:")?;
    for (idx, entry) in files.iter().enumerate() {
        writeln!(out, "{}", format_entry_line(idx + 1, entry))?;
    }
    Ok(())
}

/// `1. plan.txt  [text/plain]  42 bytes  modified 2024-03-01T10:00:00Z`
pub fn format_entry_line(index: usize, entry: &Entry) -> String {
    let modified = entry
        .last_modified
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}. {}  [{}]  {} bytes  modified {}",
        index,
        entry.name,
        entry.mime_type.as_deref().unwrap_or("file"),
        entry.size,
        modified
    )
}

/// `MM:SS.ssss`, truncated to a tenth of a millisecond.
pub fn format_duration(elapsed: Duration) -> String {
    let tenths_ms = elapsed.as_micros() / 100;
    let minutes = tenths_ms / 600_000;
    let rest = tenths_ms % 600_000;
    format!("{:02}:{:02}.{:04}", minutes, rest / 10_000, rest % 10_000)
}

fn remove_artifact(artifact: LocalArtifact, out: &mut dyn Write) {
    let path = artifact.path().to_path_buf();
    match artifact.remove() {
        Ok(()) => {
            debug!(path = %path.display(), "artifact removed");
            let _ = writeln!(out, "Deleted temporary file: {}", path.display());
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to delete artifact");
            let _ = writeln!(out, "Warning: failed to delete '{}': {}", path.display(), e);
        }
    }
}
