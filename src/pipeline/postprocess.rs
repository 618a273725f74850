//! Post-processing: deterministic cleanup of generated descriptions.
//!
//! Models asked for Markdown still wrap answers in ```` ```markdown ````
//! fences, emit CRLF line endings or leave zero-width characters that break
//! copy-paste into dealer listing sites. Each rule below is a pure
//! `&str → String` pass so they can be tested and re-ordered independently.
//!
//! ## Rule Order
//!
//! Outer fences are stripped before the stray-fence pass, otherwise the
//! language tag of the outer fence would be left behind as a lone word.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Apply all cleanup rules to a raw completion.
///
/// Rules (applied in order):
/// 1. Strip an outer ```` ```markdown ```` … ```` ``` ```` wrapper
/// 2. Remove any remaining ```` ``` ```` markers
/// 3. Normalise line endings (CRLF → LF)
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive newlines down to one blank line
/// 6. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 7. Trim leading/trailing blank space
pub fn clean_completion(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = remove_stray_fences(&s);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    s.trim().to_string()
}

// ── Rule 1: Strip outer markdown fences ──────────────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\r?\n(.*)\r?\n```\s*$").unwrap());

fn strip_outer_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 2: Remove stray fences ──────────────────────────────────────────────

fn remove_stray_fences(input: &str) -> String {
    input.replace("```", "")
}

// ── Rule 3: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 6: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Export ───────────────────────────────────────────────────────────────────

/// How a description is handed to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExportFormat {
    /// Verbatim Markdown. (default)
    #[default]
    Markdown,
    /// Markdown emphasis and heading markers removed.
    PlainText,
}

impl ExportFormat {
    pub fn render(&self, text: &str) -> String {
        match self {
            ExportFormat::Markdown => text.to_string(),
            ExportFormat::PlainText => to_plain_text(text),
        }
    }
}

static RE_MARKUP: Lazy<Regex> = Lazy::new(|| Regex::new(r"[#*_]").unwrap());
static RE_LINE_LEAD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]+").unwrap());

/// Drop `#`, `*` and `_` and the indentation they leave behind.
///
/// Bullet lines keep a `- ` marker when written with `-`; `*` bullets lose
/// theirs.
pub fn to_plain_text(markdown: &str) -> String {
    let stripped = RE_MARKUP.replace_all(markdown, "");
    RE_LINE_LEAD.replace_all(&stripped, "").into_owned()
}

// ── Tests ────────────────────────────────────────────────────────────────────
