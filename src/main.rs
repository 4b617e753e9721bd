//! # SharePoint Summarizer CLI (`spsum`)
//!
//! ## Usage
//!
//! ```bash
//! spsum --config ./config.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `spsum run` | List the configured location, pick a file, summarize it |
//! | `spsum list` | Resolve the configured location and print its entries |
//! | `spsum grant add` | Grant an application a role on the configured site |
//! | `spsum grant list` | Show the site's application permission grants |
//! | `spsum grant remove <id>` | Revoke a permission grant |
//!
//! ## Examples
//!
//! ```bash
//! # Interactive run
//! spsum run
//!
//! # Non-interactive: summarize the second file in the listing
//! spsum run --select 2
//!
//! # Let the app read the site (run with an identity allowed to manage grants)
//! spsum grant add --app-id 11111111-1111-1111-1111-111111111111 \
//!     --display-name "Doc Summarizer" --role read
//! ```
//!
//! Failures print `Error: <Kind>{variant}: <message>` on stderr and exit
//! non-zero. Ctrl-C during `run` deletes any downloaded file and exits
//! with status 130.

use anyhow::Result;
use clap::builder::PossibleValuesParser;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use sharepoint_summarizer::auth::CredentialProvider;
use sharepoint_summarizer::config::{self, Config};
use sharepoint_summarizer::graph::{GraphClient, SITE_ROLES};
use sharepoint_summarizer::resolver::Resolver;
use sharepoint_summarizer::summarize::AzureOpenAiClient;
use sharepoint_summarizer::workflow::{EntrySelector, ScriptedSelector, StdinSelector, Workflow};

/// Conventional status for termination by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Summarize a SharePoint document with Azure OpenAI.
#[derive(Parser)]
#[command(
    name = "spsum",
    about = "Summarize a SharePoint document with Azure OpenAI",
    version
)]
struct Cli {
    /// Path to the configuration file (TOML, or JSON when it ends in `.json`).
    #[arg(long, global = true, env = "GRAPH_APP_CONFIG", default_value = "config.toml")]
    config: PathBuf,

    /// Debug logging on stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List, select, download, summarize, clean up.
    Run {
        /// Select the Nth file instead of prompting.
        #[arg(long)]
        select: Option<usize>,
    },

    /// Resolve the configured location and print its entries.
    List,

    /// Manage the site permission grants app-only access depends on.
    Grant {
        #[command(subcommand)]
        action: GrantAction,
    },
}

#[derive(Subcommand)]
enum GrantAction {
    /// Grant an application one or more roles on the configured site.
    Add {
        /// Application (client) id to grant.
        #[arg(long)]
        app_id: String,

        #[arg(long)]
        display_name: String,

        /// Repeat for several roles.
        #[arg(
            long = "role",
            required = true,
            value_parser = PossibleValuesParser::new(SITE_ROLES.iter().copied())
        )]
        roles: Vec<String>,
    },

    /// Show existing grants.
    List,

    /// Revoke a grant by permission id.
    Remove { permission_id: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sharepoint_summarizer=debug,spsum=debug,warn"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;
    let credentials = Arc::new(CredentialProvider::from_config(&cfg)?);
    let graph = GraphClient::new(&cfg, credentials.clone())?;
    let mut out = io::stdout();

    match cli.command {
        Commands::Run { select } => {
            let completion = AzureOpenAiClient::new(&cfg.azure_openai)?;
            let mut selector: Box<dyn EntrySelector> = match select {
                Some(n) => Box::new(ScriptedSelector::new([n.to_string()])),
                None => Box::new(StdinSelector::new()),
            };
            let mut workflow = Workflow::new(&cfg, &credentials, &graph);

            // Losing the race drops the run future and with it the
            // artifact guard, so the file is gone before we exit.
            let interrupted = tokio::select! {
                biased;
                Ok(()) = tokio::signal::ctrl_c() => true,
                result = workflow.run(&completion, selector.as_mut(), &mut out) => {
                    result?;
                    false
                }
            };
            if interrupted {
                out.flush()?;
                eprintln!("Interrupted; temporary files removed.");
                std::process::exit(INTERRUPTED_EXIT_CODE);
            }
        }
        Commands::List => {
            Workflow::new(&cfg, &credentials, &graph)
                .list(&mut out)
                .await?;
        }
        Commands::Grant { action } => {
            run_grant(&cfg, &graph, action, &mut out).await?;
        }
    }

    out.flush()?;
    Ok(())
}

async fn run_grant(
    cfg: &Config,
    graph: &GraphClient,
    action: GrantAction,
    out: &mut dyn Write,
) -> Result<()> {
    let sp = &cfg.sharepoint;
    let site = Resolver::new(graph)
        .resolve_site(&sp.site_hostname, &sp.site_path)
        .await?;

    match action {
        GrantAction::Add {
            app_id,
            display_name,
            roles,
        } => {
            let created = graph
                .grant_permission(site.as_str(), &roles, &app_id, &display_name)
                .await?;
            writeln!(
                out,
                "Granted [{}] on {} to {} ({}); permission id {}",
                created.roles.join(", "),
                site,
                display_name,
                app_id,
                created.id
            )?;
        }
        GrantAction::List => {
            let permissions = graph.list_permissions(site.as_str()).await?;
            if permissions.is_empty() {
                writeln!(out, "No application permissions on {}.", site)?;
            }
            for p in permissions {
                let apps: Vec<String> = p
                    .granted_to_identities
                    .iter()
                    .map(|g| format!("{} ({})", g.application.display_name, g.application.id))
                    .collect();
                writeln!(out, "{}  [{}]  {}", p.id, p.roles.join(", "), apps.join("; "))?;
            }
        }
        GrantAction::Remove { permission_id } => {
            graph.delete_permission(site.as_str(), &permission_id).await?;
            writeln!(out, "Removed permission {} from {}", permission_id, site)?;
        }
    }
    Ok(())
}
