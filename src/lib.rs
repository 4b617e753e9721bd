//! # SharePoint Summarizer
//!
//! Pulls one document out of a SharePoint document library with app-only
//! (client-credential) access and summarizes it with an Azure OpenAI chat
//! deployment.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────┐   ┌─────────────┐   ┌────────────┐
//! │ Credential │──▶│  Resolver  │──▶│   Lister /  │──▶│ Extractor  │
//! │  Provider  │   │ site→lib→  │   │ Downloader  │   │ txt/pdf/   │
//! └────────────┘   │   folder   │   └─────────────┘   │   docx     │
//!                  └────────────┘                     └─────┬──────┘
//!                                                           ▼
//!                        ┌──────────┐              ┌────────────────┐
//!                        │ cleanup  │◀─────────────│   Summarizer   │
//!                        └──────────┘              │ map → reduce   │
//!                                                  └────────────────┘
//! ```
//!
//! [`workflow::Workflow`] drives the whole run and is the only component
//! holding state across steps.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML/JSON configuration, env overrides, secrets |
//! | [`error`] | Failure taxonomy |
//! | [`auth`] | Client-credential tokens with caching |
//! | [`graph`] | Microsoft Graph client behind [`graph::StorageApi`] |
//! | [`models`] | Handles and entries |
//! | [`resolver`] | Name → site / library / folder handles |
//! | [`listing`] | Paged listing and downloads |
//! | [`artifact`] | Self-deleting local copies |
//! | [`extract`] | Plain text from txt, pdf, docx |
//! | [`summarize`] | Chunked chat-completion summaries |
//! | [`devops`] | Optional Azure DevOps work item |
//! | [`workflow`] | Run state machine |

pub mod artifact;
pub mod auth;
pub mod config;
pub mod devops;
pub mod error;
pub mod extract;
pub mod graph;
pub mod listing;
pub mod models;
pub mod resolver;
pub mod summarize;
pub mod workflow;
