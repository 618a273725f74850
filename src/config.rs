//! Configuration types for invoice segmentation and description runs.
//!
//! All run behaviour is controlled through [`DescriberConfig`], built via its
//! [`DescriberConfigBuilder`]. The config is constructed once and injected into
//! [`crate::orchestrator::GenerationOrchestrator`]; nothing reads global
//! state at dispatch time, so two runs with equal configs behave identically.

use crate::catalog::DocumentTypeKey;
use crate::error::DescriberError;
use crate::progress::ProgressCallback;
use regex::Regex;
use std::fmt;

/// Environment variable holding the API credential for the HTTP backend.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Configuration for segmentation and generation.
///
/// Built via [`DescriberConfig::builder()`] or using
/// [`DescriberConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice_describer::DescriberConfig;
///
/// let config = DescriberConfig::builder()
///     .blank_threshold(25)
///     .header_pattern(r"(?i)^Purchase Order")
///     .model("gpt-4o")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct DescriberConfig {
    /// Pages whose cleaned text is shorter than this many characters are
    /// separators. Default: 20.
    pub blank_threshold: usize,

    /// Regex matched against each page's cleaned text; a match starts a new
    /// invoice group. Default: `(?i)^Vehicle Inquiry`.
    pub header_pattern: String,

    /// Largest accepted upload in bytes. Default: 20 MiB.
    pub max_file_bytes: u64,

    /// Number of files extracted at once. Default: 4.
    ///
    /// Extraction is CPU-bound and runs on the blocking pool; generation is
    /// always sequential regardless of this value.
    pub extraction_concurrency: usize,

    /// Document type used when a caller does not pick one. Default: MINI.
    pub default_type: DocumentTypeKey,

    /// Model identifier applied to every template. If None, each template's
    /// own model is used.
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible API. Default: `https://api.openai.com/v1`.
    pub api_base_url: String,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Receives run events (state changes, per-group progress).
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DescriberConfig {
    fn default() -> Self {
        Self {
            blank_threshold: 20,
            header_pattern: r"(?i)^Vehicle Inquiry".to_string(),
            max_file_bytes: 20 * 1024 * 1024,
            extraction_concurrency: 4,
            default_type: DocumentTypeKey::Mini,
            model: None,
            api_base_url: "https://api.openai.com/v1".to_string(),
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DescriberConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriberConfig")
            .field("blank_threshold", &self.blank_threshold)
            .field("header_pattern", &self.header_pattern)
            .field("max_file_bytes", &self.max_file_bytes)
            .field("extraction_concurrency", &self.extraction_concurrency)
            .field("default_type", &self.default_type)
            .field("model", &self.model)
            .field("api_base_url", &self.api_base_url)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RunProgressCallback>"),
            )
            .finish()
    }
}

impl DescriberConfig {
    /// Create a new builder for `DescriberConfig`.
    pub fn builder() -> DescriberConfigBuilder {
        DescriberConfigBuilder {
            config: Self::default(),
        }
    }

    /// Compile [`Self::header_pattern`].
    pub fn header_regex(&self) -> Result<Regex, DescriberError> {
        Regex::new(&self.header_pattern).map_err(|e| {
            DescriberError::InvalidConfig(format!(
                "header pattern '{}' is not a valid regex: {}",
                self.header_pattern, e
            ))
        })
    }
}

/// Builder for [`DescriberConfig`].
#[derive(Debug)]
pub struct DescriberConfigBuilder {
    config: DescriberConfig,
}

impl DescriberConfigBuilder {
    pub fn blank_threshold(mut self, chars: usize) -> Self {
        self.config.blank_threshold = chars;
        self
    }

    pub fn header_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.header_pattern = pattern.into();
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes.max(1);
        self
    }

    pub fn extraction_concurrency(mut self, n: usize) -> Self {
        self.config.extraction_concurrency = n.max(1);
        self
    }

    pub fn default_type(mut self, key: DocumentTypeKey) -> Self {
        self.config.default_type = key;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_base_url = url.into();
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DescriberConfig, DescriberError> {
        let c = &self.config;
        c.header_regex()?;
        if c.extraction_concurrency == 0 {
            return Err(DescriberError::InvalidConfig(
                "Extraction concurrency must be ≥ 1".into(),
            ));
        }
        if !c.api_base_url.starts_with("http://") && !c.api_base_url.starts_with("https://") {
            return Err(DescriberError::InvalidConfig(format!(
                "API base URL must be http(s), got '{}'",
                c.api_base_url
            )));
        }
        if matches!(c.model.as_deref(), Some(m) if m.trim().is_empty()) {
            return Err(DescriberError::InvalidConfig("Model name is empty".into()));
        }
        Ok(self.config)
    }
}
