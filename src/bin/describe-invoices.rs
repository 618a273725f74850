//! CLI binary for invoice-describer.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DescriberConfig`, drives one analysis run plus any requested
//! refinements, and prints the descriptions.

use anyhow::{Context, Result};
use clap::Parser;
use invoice_describer::catalog::DEFAULT_MODEL;
use invoice_describer::pipeline::extract::extract_groups;
use invoice_describer::pipeline::segment::clean_page_text;
use invoice_describer::{
    load_document, AuxiliaryParams, DescriberConfig, DocumentTypeKey, ExportFormat, FileError,
    GenerationBackend, GenerationOrchestrator, GenerationResult, HeuristicRules, InvoiceSegmenter,
    OpenAiBackend, PageTextSource, PdfExtractSource, ProgressCallback, ProviderBackend,
    RefinementTracker, RevisionEntry, RunProgressCallback, RunState, SourceDocument,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner while files are extracted, then a
/// bar with one log line per invoice group.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Start of the group currently in flight. Groups are dispatched one at
    /// a time, so a single slot is enough.
    group_start: Mutex<Option<Instant>>,
    file_errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(SPINNER);

        bar.set_style(spinner_style);
        bar.set_prefix("Extracting");
        bar.set_message("Reading PDFs…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            group_start: Mutex::new(None),
            file_errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} groups  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Describing");
        self.bar.reset_eta();
    }

    fn elapsed_secs(&self) -> f64 {
        self.group_start
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunProgressCallback for CliProgressCallback {
    fn on_file_error(&self, file: &str, error: &str) {
        self.file_errors.fetch_add(1, Ordering::SeqCst);
        self.bar
            .println(format!("  {} {}  {}", red("✗"), file, red(&truncate(error, 80))));
    }

    fn on_run_start(&self, total_groups: usize) {
        self.activate_bar(total_groups);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Describing {total_groups} invoice groups…"))
        ));
    }

    fn on_group_start(&self, _position: usize, _total: usize, group_id: &str) {
        if let Ok(mut slot) = self.group_start.lock() {
            *slot = Some(Instant::now());
        }
        self.bar.set_message(group_id.to_string());
    }

    fn on_group_complete(&self, position: usize, total: usize, percent: u8, sentinel: bool) {
        let secs = self.elapsed_secs();
        let mark = if sentinel { yellow("∅") } else { green("✓") };
        let note = if sentinel { yellow("no response") } else { String::new() };
        self.bar.println(format!(
            "  {} Group {:>3}/{:<3}  {}  {}  {}",
            mark,
            position,
            total,
            dim(&format!("{percent:>3}%")),
            dim(&format!("{secs:.1}s")),
            note,
        ));
        self.bar.inc(1);
    }

    fn on_run_failed(&self, completed: usize, total: usize, error: &str) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {}/{} groups described before the run stopped",
            red("✘"),
            bold(&completed.to_string()),
            total
        );
        eprintln!("  {}", red(&truncate(error, 160)));
    }

    fn on_run_complete(&self, total: usize, sentinels: usize) {
        self.bar.finish_and_clear();
        if sentinels == 0 {
            eprintln!("{} {} groups described", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {} groups described  ({} without a response)",
                cyan("⚠"),
                bold(&total.to_string()),
                yellow(&sentinels.to_string()),
            );
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let cut: String = s.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{cut}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Describe every vehicle in a dealer export (MINI template)
  describe-invoices export.pdf

  # Used vehicles with mileage, tone and a call to action
  describe-invoices --type used --mileage 45000 --tone "warm, family-friendly" \
      --cta "Book a test drive today" trade-ins.pdf

  # See how the pages were grouped, without calling the API
  describe-invoices --preview march.pdf april.pdf

  # Skip a misgrouped invoice, then refine the first description
  describe-invoices --exclude march.pdf#3 --refine "1=Mention the panoramic roof" march.pdf

  # Replace the BMW instructions for this run, write plain text to a file
  describe-invoices --type bmw --system-prompt house-style.txt --format plain -o copy.txt export.pdf

  # Another provider through edgequake-llm
  describe-invoices --provider anthropic --model claude-sonnet-4-20250514 export.pdf

DOCUMENT TYPES:
  MINI      New MINI vehicles (default)
  BMW       New BMW vehicles
  USED      Used vehicles of any brand; the only type that uses --mileage
  DEEPSEEK  Experimental narrator voice

SEGMENTATION:
  A page whose text starts with the header pattern (default "Vehicle Inquiry",
  case-insensitive) starts a new group. A page with fewer than
  --blank-threshold characters ends the current group and is dropped.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key (required unless --provider is set)
  ANTHROPIC_API_KEY       Anthropic API key (with --provider anthropic)
  GEMINI_API_KEY          Google Gemini API key (with --provider gemini)
  RUST_LOG                Override the log filter
"#;

/// Generate marketing descriptions from vehicle invoice PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "describe-invoices",
    version,
    about = "Generate marketing descriptions from vehicle invoice PDFs",
    long_about = "Extract the text of one or more vehicle invoice PDFs, split it into one group per \
vehicle, and ask an LLM for a marketing description of each group using a brand-specific prompt. \
Works with OpenAI and any OpenAI-compatible endpoint, or any provider supported by edgequake-llm.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF files, described in the order given.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Document type: mini, bmw, used, deepseek. Unknown types fall back to mini.
    #[arg(short = 't', long = "type", env = "DESCRIBER_TYPE", default_value = "MINI")]
    doc_type: String,

    /// Odometer reading, used by the USED template.
    #[arg(long, env = "DESCRIBER_MILEAGE")]
    mileage: Option<String>,

    /// Tone descriptor appended to every request.
    #[arg(long, env = "DESCRIBER_TONE")]
    tone: Option<String>,

    /// Call-to-action phrase appended to every request.
    #[arg(long = "cta", env = "DESCRIBER_CTA")]
    call_to_action: Option<String>,

    /// Text file whose contents replace the selected type's instructions.
    #[arg(long, env = "DESCRIBER_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Model ID (default: gpt-4o-mini).
    #[arg(long, env = "DESCRIBER_MODEL")]
    model: Option<String>,

    /// Use an edgequake-llm provider (anthropic, gemini, ollama…) instead
    /// of the OpenAI HTTP endpoint.
    #[arg(long, env = "DESCRIBER_PROVIDER")]
    provider: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    #[arg(long, env = "DESCRIBER_API_BASE", default_value = "https://api.openai.com/v1")]
    api_base: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "DESCRIBER_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Regex that marks the first page of an invoice.
    #[arg(long, env = "DESCRIBER_HEADER_PATTERN", default_value = "(?i)^Vehicle Inquiry")]
    header_pattern: String,

    /// Pages with fewer characters than this are separators.
    #[arg(long, env = "DESCRIBER_BLANK_THRESHOLD", default_value_t = 20)]
    blank_threshold: usize,

    /// Largest accepted PDF in MiB.
    #[arg(long, env = "DESCRIBER_MAX_FILE_MB", default_value_t = 20,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    max_file_mb: u64,

    /// Number of files extracted at once.
    #[arg(short, long, env = "DESCRIBER_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// List the invoice groups and exit without calling the API.
    #[arg(long)]
    preview: bool,

    /// Group id to leave out, e.g. "march.pdf#3". Repeatable.
    #[arg(long = "exclude", value_name = "GROUP_ID")]
    exclude: Vec<String>,

    /// Refine result N (1-based) with instructions, e.g. "2=Shorter". Repeatable.
    #[arg(long = "refine", value_name = "N=INSTRUCTIONS")]
    refine: Vec<String>,

    /// Output format.
    #[arg(long, env = "DESCRIBER_FORMAT", value_enum, default_value = "markdown")]
    format: FormatArg,

    /// Write output to this file instead of stdout.
    #[arg(short, long, env = "DESCRIBER_OUTPUT")]
    output: Option<PathBuf>,

    /// Disable progress bar.
    #[arg(long, env = "DESCRIBER_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DESCRIBER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DESCRIBER_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Markdown,
    Plain,
    Json,
}

/// One `--refine` request, already converted to a 0-based index.
#[derive(Debug, PartialEq, Eq)]
struct RefineArg {
    index: usize,
    instructions: String,
}

/// JSON output document.
#[derive(Serialize)]
struct Report<'a> {
    state: RunState,
    progress: u8,
    results: &'a [GenerationResult],
    revisions: Vec<RevisionEntry>,
    file_errors: &'a [FileError],
    error: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.preview;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let refinements = cli
        .refine
        .iter()
        .map(|s| parse_refinement(s))
        .collect::<Result<Vec<_>>>()?;
    let Ok(type_key) = cli.doc_type.parse::<DocumentTypeKey>();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn RunProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, &type_key, progress_cb)?;

    // ── Load and validate inputs ─────────────────────────────────────────
    let mut load_errors = Vec::new();
    let mut documents = Vec::new();
    for path in &cli.inputs {
        match load_document(path, config.max_file_bytes).await {
            Ok(doc) => documents.push(doc),
            Err(e) => {
                if !cli.quiet {
                    eprintln!("{} {}", red("✗"), e);
                }
                load_errors.push(FileError::new(path.display().to_string(), &e));
            }
        }
    }
    if documents.is_empty() {
        anyhow::bail!("No readable PDF among {} input(s)", cli.inputs.len());
    }

    // ── Preview mode ─────────────────────────────────────────────────────
    if cli.preview {
        return preview(&cli, &config, &documents).await;
    }

    // ── Backend selection ────────────────────────────────────────────────
    // Credentials are checked here, before any file is extracted.
    match cli.provider.as_deref() {
        Some(provider) => {
            let model = cli.model.as_deref().unwrap_or(DEFAULT_MODEL);
            let backend = ProviderBackend::from_name(provider, model)
                .context("Failed to initialise LLM provider")?;
            run_with(backend, config, &cli, type_key, documents, load_errors, refinements).await
        }
        None => {
            let backend =
                OpenAiBackend::from_env(&config).context("Failed to initialise OpenAI client")?;
            run_with(backend, config, &cli, type_key, documents, load_errors, refinements).await
        }
    }
}

/// Map CLI args to `DescriberConfig`.
fn build_config(
    cli: &Cli,
    type_key: &DocumentTypeKey,
    progress: Option<ProgressCallback>,
) -> Result<DescriberConfig> {
    let mut builder = DescriberConfig::builder()
        .header_pattern(cli.header_pattern.clone())
        .blank_threshold(cli.blank_threshold)
        .max_file_bytes(max_file_bytes(cli.max_file_mb))
        .extraction_concurrency(cli.concurrency)
        .default_type(type_key.clone())
        .api_base_url(cli.api_base.clone())
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Print the groups segmentation produced; no credentials needed.
async fn preview(cli: &Cli, config: &DescriberConfig, documents: &[SourceDocument]) -> Result<()> {
    let source: Arc<dyn PageTextSource> = Arc::new(PdfExtractSource);
    let rules = HeuristicRules::from_config(config).context("Invalid header pattern")?;
    let segmenter = InvoiceSegmenter::new(Arc::new(rules));
    let extraction = extract_groups(
        &source,
        &segmenter,
        documents,
        config.extraction_concurrency,
        None,
    )
    .await;

    if cli.format == FormatArg::Json {
        let json = serde_json::to_string_pretty(&extraction).context("Failed to serialise groups")?;
        return write_output(cli, &json);
    }

    let mut out = String::new();
    for group in &extraction.groups {
        let pages = group
            .page_numbers()
            .iter()
            .map(|n| n.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let excluded = cli.exclude.iter().any(|id| id == &group.id);
        let first_line = group
            .pages
            .first()
            .map(|p| clean_page_text(&p.raw_text))
            .unwrap_or_default();
        out.push_str(&format!(
            "{:<24} pages {:<12} {}{}\n",
            group.id,
            pages,
            truncate(first_line, 60),
            if excluded { "  (excluded)" } else { "" }
        ));
    }
    for err in &extraction.file_errors {
        out.push_str(&format!("{:<24} skipped: {}\n", err.file, err.detail));
    }
    if !cli.quiet {
        eprintln!(
            "{} {} groups from {} files",
            cyan("◆"),
            extraction.groups.len(),
            documents.len()
        );
    }
    write_output(cli, &out)
}

/// Run the analysis and refinements with whichever backend was selected.
async fn run_with<B: GenerationBackend>(
    backend: B,
    config: DescriberConfig,
    cli: &Cli,
    type_key: DocumentTypeKey,
    documents: Vec<SourceDocument>,
    mut file_errors: Vec<FileError>,
    refinements: Vec<RefineArg>,
) -> Result<()> {
    let mut orchestrator =
        GenerationOrchestrator::new(backend, config).context("Invalid configuration")?;

    if orchestrator.catalog().resolve_key(&type_key) != &type_key && !cli.quiet {
        eprintln!(
            "{} No template for type {}, using {}",
            cyan("⚠"),
            type_key,
            orchestrator.catalog().resolve_key(&type_key)
        );
    }

    if let Some(ref path) = cli.system_prompt {
        let instructions = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        if instructions.trim().is_empty() {
            anyhow::bail!("System prompt file {:?} is empty", path);
        }
        orchestrator
            .catalog_mut()
            .set_override(type_key.clone(), instructions.trim());
    }

    let aux = AuxiliaryParams {
        mileage: cli.mileage.clone(),
        tone: cli.tone.clone(),
        call_to_action: cli.call_to_action.clone(),
    };

    // ── Curation ─────────────────────────────────────────────────────────
    let curated = if cli.exclude.is_empty() {
        None
    } else {
        let mut extraction = orchestrator.preview(&documents).await;
        for id in &cli.exclude {
            match extraction.group_mut(id) {
                Some(group) => group.set_selected(false),
                None => eprintln!("{} No group with id {}", cyan("⚠"), id),
            }
        }
        if extraction.selected().is_empty() {
            anyhow::bail!("Every invoice group was excluded; nothing to describe");
        }
        file_errors.extend(extraction.file_errors.iter().cloned());
        Some(extraction.groups)
    };

    // ── Run ──────────────────────────────────────────────────────────────
    let run = orchestrator
        .run(&documents, curated.as_deref(), &type_key, &aux)
        .await;
    let state = run.state();
    let progress = run.progress();
    file_errors.extend(run.file_errors().iter().cloned());
    let failure = run.error().map(|e| e.to_string());
    if !cli.quiet && cli.no_progress {
        eprintln!(
            "Run {:?}: {} results, {} without a response",
            state,
            run.results().len(),
            run.sentinel_count()
        );
    }

    // ── Refinements ──────────────────────────────────────────────────────
    let mut tracker = RefinementTracker::from_run(run);
    if failure.is_none() {
        for refinement in &refinements {
            let outcome = match tracker.open_refinement(refinement.index) {
                Ok(()) => tracker
                    .refine(
                        orchestrator.backend(),
                        orchestrator.catalog(),
                        refinement.index,
                        &refinement.instructions,
                    )
                    .await
                    .map(|_| ()),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) if !cli.quiet => {
                    eprintln!("{} Refined result {}", green("✓"), refinement.index + 1)
                }
                Ok(()) => {}
                Err(e) => eprintln!(
                    "{} Refinement of result {} failed: {}",
                    red("✗"),
                    refinement.index + 1,
                    e
                ),
            }
        }
    } else if !refinements.is_empty() {
        eprintln!("{} Refinements skipped because the run failed", cyan("⚠"));
    }

    // ── Output ───────────────────────────────────────────────────────────
    let rendered = match cli.format {
        FormatArg::Json => {
            let report = Report {
                state,
                progress,
                results: tracker.results(),
                revisions: tracker.revisions(),
                file_errors: &file_errors,
                error: failure.clone(),
            };
            serde_json::to_string_pretty(&report).context("Failed to serialise output")?
        }
        FormatArg::Markdown => render_results(tracker.results(), ExportFormat::Markdown),
        FormatArg::Plain => render_results(tracker.results(), ExportFormat::PlainText),
    };
    write_output(cli, &rendered)?;

    match failure {
        Some(message) => Err(anyhow::anyhow!(message)),
        None => Ok(()),
    }
}

/// One section per result, in result order.
fn render_results(results: &[GenerationResult], format: ExportFormat) -> String {
    results
        .iter()
        .map(|r| {
            let body = format.render(&r.text);
            match format {
                ExportFormat::Markdown => {
                    format!("## {}. {}\n\n{}\n", r.index + 1, r.source_group_id, body)
                }
                ExportFormat::PlainText => {
                    format!("{}. {}\n\n{}\n", r.index + 1, r.source_group_id, body)
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn write_output(cli: &Cli, content: &str) -> Result<()> {
    match cli.output {
        Some(ref path) => std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(content.as_bytes())
                .context("Failed to write to stdout")?;
            if !content.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

/// `--max-file-mb` in bytes, clamped instead of overflowing.
fn max_file_bytes(mb: u64) -> u64 {
    mb.saturating_mul(1024 * 1024)
}

/// Parse a `--refine` value: `"N=instructions"`, N 1-based.
fn parse_refinement(s: &str) -> Result<RefineArg> {
    let (n, instructions) = s
        .split_once('=')
        .with_context(|| format!("Expected N=INSTRUCTIONS, got '{s}'"))?;
    let n: usize = n
        .trim()
        .parse()
        .with_context(|| format!("Invalid result number '{}'", n.trim()))?;
    if n < 1 {
        anyhow::bail!("Results are 1-indexed, minimum is 1 (got {})", n);
    }
    if instructions.trim().is_empty() {
        anyhow::bail!("Refinement instructions for result {} are empty", n);
    }
    Ok(RefineArg {
        index: n - 1,
        instructions: instructions.trim().to_string(),
    })
}
