//! End-to-end analysis runs: segmentation → prompt construction →
//! sequential generation → result accumulation.
//!
//! ## Why sequential dispatch?
//!
//! Results must mirror group order exactly, and the completion endpoint
//! rate-limits per key. Awaiting each call before starting the next gives
//! both for free; extraction is the only concurrent stage.
//!
//! ## Failure policy
//!
//! | Remote outcome | Effect on the run |
//! |----------------|-------------------|
//! | completion | result recorded, run continues |
//! | success with no usable content | sentinel result recorded, run continues |
//! | transport / status / malformed body | run stops in [`RunState::Failed`], earlier results kept |
//!
//! There is no retry. The queue cursor stays on the failed group, so
//! [`GenerationOrchestrator::resume`] can pick the run up later without
//! re-dispatching anything that already has a result.

use crate::catalog::{AuxiliaryParams, DocumentTypeKey, PromptCatalog};
use crate::config::DescriberConfig;
use crate::error::DescriberError;
use crate::output::{AnalysisRun, GenerationResult, RunState};
use crate::pipeline::extract::{extract_groups, Extraction};
use crate::pipeline::input::SourceDocument;
use crate::pipeline::llm::GenerationBackend;
use crate::pipeline::postprocess::clean_completion;
use crate::pipeline::segment::{HeuristicRules, InvoiceGroup, InvoiceSegmenter, SegmentationRules};
use crate::pipeline::source::{PageTextSource, PdfExtractSource};
use crate::progress::{percent_complete, ProgressCallback};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Drives analysis runs against one generation backend.
pub struct GenerationOrchestrator<B> {
    backend: B,
    catalog: PromptCatalog,
    source: Arc<dyn PageTextSource>,
    segmenter: InvoiceSegmenter,
    config: DescriberConfig,
}

impl<B: GenerationBackend> GenerationOrchestrator<B> {
    /// Orchestrator with the built-in catalog, `pdf-extract` and the
    /// heuristic segmentation rules taken from `config`.
    pub fn new(backend: B, config: DescriberConfig) -> Result<Self, DescriberError> {
        let rules = HeuristicRules::from_config(&config)?;
        Ok(Self {
            backend,
            catalog: PromptCatalog::from_config(&config),
            source: Arc::new(PdfExtractSource),
            segmenter: InvoiceSegmenter::new(Arc::new(rules)),
            config,
        })
    }

    pub fn with_catalog(mut self, catalog: PromptCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_source(mut self, source: Arc<dyn PageTextSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_rules(mut self, rules: Arc<dyn SegmentationRules>) -> Self {
        self.segmenter = InvoiceSegmenter::new(rules);
        self
    }

    pub fn catalog(&self) -> &PromptCatalog {
        &self.catalog
    }

    /// Session overrides go through here.
    pub fn catalog_mut(&mut self) -> &mut PromptCatalog {
        &mut self.catalog
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &DescriberConfig {
        &self.config
    }

    /// Extract and segment without dispatching anything.
    ///
    /// The returned groups can be curated (deselected) and passed back to
    /// [`Self::run`].
    pub async fn preview(&self, documents: &[SourceDocument]) -> Extraction {
        extract_groups(
            &self.source,
            &self.segmenter,
            documents,
            self.config.extraction_concurrency,
            self.progress(),
        )
        .await
    }

    /// Run a full analysis.
    ///
    /// When `curated` holds at least one selected group, those groups are
    /// dispatched in their given order and `documents` is not re-read.
    /// Otherwise every document is extracted and segmented first.
    ///
    /// Never returns `Err`: a transport failure is recorded in the returned
    /// run, alongside whatever results were already produced.
    pub async fn run(
        &self,
        documents: &[SourceDocument],
        curated: Option<&[InvoiceGroup]>,
        type_key: &DocumentTypeKey,
        aux: &AuxiliaryParams,
    ) -> AnalysisRun {
        let start = Instant::now();
        let mut run = AnalysisRun::new(type_key.clone(), aux.clone());
        info!(
            "Starting analysis run: type {} (template {})",
            type_key,
            self.catalog.resolve_key(type_key)
        );

        self.transition(&mut run, RunState::Segmenting);
        let curated_selected: Vec<InvoiceGroup> = curated
            .unwrap_or_default()
            .iter()
            .filter(|g| g.selected)
            .cloned()
            .collect();

        if curated_selected.is_empty() {
            let extraction = self.preview(documents).await;
            run.file_errors = extraction.file_errors.clone();
            run.queue = extraction.selected();
        } else {
            debug!(
                "Using {} curated groups, skipping segmentation",
                curated_selected.len()
            );
            run.queue = curated_selected;
        }

        self.dispatch(&mut run).await;

        info!(
            "Run {:?}: {}/{} results ({} sentinel) in {}ms",
            run.state,
            run.results.len(),
            run.queue.len(),
            run.sentinel_count(),
            start.elapsed().as_millis()
        );
        run
    }

    /// Continue a failed run from its cursor.
    ///
    /// Groups that already have a result are not dispatched again. Runs in
    /// any state other than [`RunState::Failed`] are left unchanged.
    pub async fn resume(&self, run: &mut AnalysisRun) {
        if run.state != RunState::Failed {
            debug!("Resume ignored: run is {:?}", run.state);
            return;
        }
        info!(
            "Resuming run at group {}/{}",
            run.cursor + 1,
            run.queue.len()
        );
        run.error = None;
        self.dispatch(run).await;
    }

    async fn dispatch(&self, run: &mut AnalysisRun) {
        let total = run.queue.len();
        self.transition(run, RunState::Dispatching);
        if let Some(cb) = self.progress() {
            cb.on_run_start(total);
        }

        while run.cursor < total {
            let position = run.cursor + 1;
            let group = &run.queue[run.cursor];
            let group_id = group.id.clone();
            let request =
                self.catalog
                    .build_request(&group.concatenated_text, &run.type_key, &run.aux);

            if let Some(cb) = self.progress() {
                cb.on_group_start(position, total, &group_id);
            }
            debug!(
                "Dispatching {} ({}/{}, {} pages)",
                group_id,
                position,
                total,
                group.pages.len()
            );

            let result = match self.backend.generate(&request).await {
                Ok(Some(text)) => {
                    let cleaned = clean_completion(&text);
                    if cleaned.is_empty() {
                        warn!("{}: completion was empty after cleanup", group_id);
                        GenerationResult::no_result(run.cursor, group_id)
                    } else {
                        GenerationResult::generated(run.cursor, group_id, cleaned)
                    }
                }
                Ok(None) => {
                    warn!("{}: endpoint returned no content", group_id);
                    GenerationResult::no_result(run.cursor, group_id)
                }
                Err(e) => {
                    error!("{}: {}", group_id, e);
                    let completed = run.results.len();
                    let aborted = DescriberError::RunAborted {
                        group_id,
                        position,
                        total,
                        completed,
                        source: Box::new(e),
                    };
                    if let Some(cb) = self.progress() {
                        cb.on_run_failed(completed, total, &aborted.to_string());
                    }
                    run.error = Some(aborted);
                    self.transition(run, RunState::Failed);
                    return;
                }
            };

            let sentinel = result.sentinel;
            run.results.push(result);
            run.cursor += 1;
            run.progress = percent_complete(run.cursor, total);

            if let Some(cb) = self.progress() {
                cb.on_group_complete(position, total, run.progress, sentinel);
            }
        }

        run.progress = percent_complete(total, total);
        self.transition(run, RunState::Completed);
        if let Some(cb) = self.progress() {
            cb.on_run_complete(run.results.len(), run.sentinel_count());
        }
    }

    fn transition(&self, run: &mut AnalysisRun, state: RunState) {
        debug!("Run state {:?} → {:?}", run.state, state);
        run.state = state;
        if let Some(cb) = self.progress() {
            cb.on_state_change(state);
        }
    }

    fn progress(&self) -> Option<&ProgressCallback> {
        self.config.progress_callback.as_ref()
    }
}

impl<B> std::fmt::Debug for GenerationOrchestrator<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationOrchestrator")
            .field("catalog", &self.catalog)
            .field("segmenter", &self.segmenter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
