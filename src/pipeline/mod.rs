//! Pipeline stages for turning uploaded PDFs into vehicle descriptions.
//!
//! Each submodule implements exactly one step, so each is testable on its
//! own and the extraction library or the completion endpoint can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ source ──▶ segment ──▶ llm ──▶ postprocess
//! (%PDF check) (pages)  (groups)   (remote)  (cleanup)
//!            └──── extract ────┘
//! ```
//!
//! 1. [`input`]   — read local files and reject wrong types or oversize uploads
//! 2. [`source`]  — PDF bytes to ordered page texts; all-or-nothing per file
//! 3. [`segment`] — split a file's pages into invoice groups
//! 4. [`extract`] — run `source` + `segment` over many files at once, on the
//!    blocking pool, keeping upload order
//! 5. [`llm`]     — the single request/response call; the only stage with
//!    network I/O
//! 6. [`postprocess`] — deterministic cleanup of completions and export

pub mod extract;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod segment;
pub mod source;
