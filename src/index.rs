use crate::error::{DiagnosticKind, Diagnostics};
use crate::normalize::normalize;
use crate::progress::CancelToken;
use crate::types::{Library, Series};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Identity index over a library: external ID to series (one-to-one, first
/// binding wins) and normalized title to every series claiming it.
///
/// Immutable once built; a rebuild produces a new index.
#[derive(Debug)]
pub struct LibraryIndex<'a> {
    by_id: HashMap<u32, &'a Series>,
    by_title: HashMap<String, Vec<&'a Series>>,
    /// ID collisions recorded during the build.
    pub diagnostics: Diagnostics,
    /// False when the build was cancelled part-way.
    pub complete: bool,
}

impl<'a> LibraryIndex<'a> {
    /// Build from a library, traversing categories in their stable order.
    pub fn build(library: &'a Library, cancel: &CancelToken) -> Self {
        let mut by_id: HashMap<u32, &'a Series> = HashMap::new();
        let mut by_title: HashMap<String, Vec<&'a Series>> = HashMap::new();
        let mut diagnostics = Diagnostics::new();
        let mut complete = true;

        debug!("building library index");
        for series in library.iter_series() {
            if cancel.is_cancelled() {
                complete = false;
                break;
            }

            if let Some(mal_id) = series.metadata.mal_id {
                if let Some(existing) = by_id.get(&mal_id) {
                    warn!(
                        "duplicate external ID {mal_id}: {:?} vs {:?}; keeping the first",
                        existing.name, series.name
                    );
                    diagnostics.push(
                        DiagnosticKind::IndexCollision,
                        Some(series.path.clone()),
                        format!(
                            "ID {mal_id} already bound to {:?}; ignoring {:?}",
                            existing.name, series.name
                        ),
                    );
                } else {
                    by_id.insert(mal_id, series);
                }
            }

            for identity in series.identities() {
                let key = normalize(identity);
                if key.is_empty() {
                    continue;
                }
                let bucket = by_title.entry(key).or_default();
                if !bucket.iter().any(|s| std::ptr::eq(*s, series)) {
                    bucket.push(series);
                }
            }
        }

        info!(
            "index built: {} IDs, {} title keys",
            by_id.len(),
            by_title.len()
        );
        Self {
            by_id,
            by_title,
            diagnostics,
            complete,
        }
    }

    /// Exact lookup by normalized title. The returned list preserves
    /// insertion (traversal) order; duplicates across series are possible.
    pub fn search(&self, query: &str) -> &[&'a Series] {
        let key = normalize(query);
        self.by_title.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get_by_id(&self, mal_id: u32) -> Option<&'a Series> {
        self.by_id.get(&mal_id).copied()
    }

    pub fn id_count(&self) -> usize {
        self.by_id.len()
    }

    pub fn title_key_count(&self) -> usize {
        self.by_title.len()
    }

    /// Iterate every (normalized identity, series) pair, for fuzzy scans.
    pub fn iter_titles(&self) -> impl Iterator<Item = (&str, &[&'a Series])> {
        self.by_title.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
