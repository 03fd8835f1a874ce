//! # VibeManga Core
//!
//! Identity-and-parsing engine for a local manga library: scan a four-level
//! directory tree into a typed [`types::Library`], parse messy release titles
//! into structured records, index every series by external ID and normalized
//! synonym, and resolve external entries back to library series through a
//! deterministic cascade.
//!
//! The crate performs no network I/O and never opens archives; metadata
//! arrives pre-populated (`series.json`) and the terminal UI, CLI dispatch,
//! and download control planes are external collaborators. Progress and
//! cancellation cross that boundary through [`progress::ProgressSink`] and
//! [`progress::CancelToken`].
//!
//! ## Modules
//!
//! - [`types`]: the library tree (volumes, subgroups, series, categories) and
//!   the metadata record
//! - [`scanner`]: incremental four-level scan with `(size, mtime)` reuse
//! - [`parser`] / [`normalize`] / [`analysis`]: title parsing and range math
//! - [`index`] / [`matcher`]: identity index and the ID → synonym → fuzzy
//!   match cascade
//! - [`renamer`] / [`dedupe`]: rename planning and duplicate detection
//! - [`cache`]: fast binary + durable JSON snapshot store

pub mod analysis;
pub mod cache;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod index;
pub mod matcher;
pub mod normalize;
pub mod parser;
pub mod progress;
pub mod renamer;
pub mod scanner;
pub mod types;

pub use config::CoreConfig;
pub use error::{Diagnostic, DiagnosticKind, Diagnostics, MangaError, Result};
pub use progress::{CancelToken, NoopSink, ProgressEvent, ProgressPhase, ProgressSink};
pub use types::{Category, Library, Series, SeriesMetadata, SubGroup, Volume};
