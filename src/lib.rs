//! # invoice-describer
//!
//! Turn batches of vehicle invoice PDFs into marketing descriptions with an
//! LLM.
//!
//! Dealer systems export many invoices into a single PDF. This crate pulls
//! the text out of every page, splits the page stream back into one group
//! per vehicle, and asks a completion endpoint for a description of each
//! group using a brand-specific prompt. Individual descriptions can then be
//! refined with follow-up instructions while their earlier versions are kept.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDFs
//!  │
//!  ├─ 1. Input    validate %PDF magic and size per file
//!  ├─ 2. Extract  page texts via pdf-extract (spawn_blocking, files in parallel)
//!  ├─ 3. Segment  header / blank-page heuristics → invoice groups
//!  ├─ 4. Curate   optional: deselect groups after a preview
//!  ├─ 5. Generate one request per selected group, strictly in order
//!  ├─ 6. Clean    strip code fences and stray whitespace
//!  └─ 7. Refine   optional: revise one result, keep its history
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_describer::{
//!     load_document, AuxiliaryParams, DescriberConfig, DocumentTypeKey,
//!     GenerationOrchestrator, OpenAiBackend,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DescriberConfig::default();
//!     // Fails here, before any request, when OPENAI_API_KEY is unset.
//!     let backend = OpenAiBackend::from_env(&config)?;
//!     let orchestrator = GenerationOrchestrator::new(backend, config)?;
//!
//!     let doc = load_document(Path::new("invoices.pdf"), 20 * 1024 * 1024).await?;
//!     let aux = AuxiliaryParams::default().mileage("45000");
//!     let run = orchestrator.run(&[doc], None, &DocumentTypeKey::Used, &aux).await;
//!
//!     for result in run.into_result()? {
//!         println!("## {}\n\n{}\n", result.source_group_id, result.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `describe-invoices` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! invoice-describer = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod refine;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{
    AuxiliaryParams, DocumentTypeKey, GenerationRequest, Message, PromptCatalog, PromptTemplate,
    Role,
};
pub use config::{DescriberConfig, DescriberConfigBuilder};
pub use error::{DescriberError, ErrorKind, FileError};
pub use orchestrator::GenerationOrchestrator;
pub use output::{AnalysisRun, GenerationResult, RunState};
pub use pipeline::extract::Extraction;
pub use pipeline::input::{load_document, SourceDocument};
pub use pipeline::llm::{GenerationBackend, OpenAiBackend, ProviderBackend};
pub use pipeline::postprocess::ExportFormat;
pub use pipeline::segment::{HeuristicRules, InvoiceGroup, InvoiceSegmenter, SegmentationRules};
pub use pipeline::source::{PageText, PageTextSource, PdfExtractSource};
pub use progress::{NoopProgressCallback, ProgressCallback, RunProgressCallback};
pub use refine::{RefinementTracker, RevisionEntry};
