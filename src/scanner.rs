use crate::cache::LibraryCache;
use crate::config::CoreConfig;
use crate::error::{DiagnosticKind, Diagnostics, MangaError, Result};
use crate::progress::{CancelToken, ProgressEvent, ProgressPhase, ProgressSink};
use crate::types::metadata::METADATA_FILENAME;
use crate::types::{Category, Library, Series, SeriesMetadata, SubGroup, Volume};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// File extensions recognized as volumes, case-insensitive.
pub const VOLUME_EXTENSIONS: &[&str] = &["cbz", "cbr", "zip", "rar", "pdf", "epub"];

/// Four-level library scanner with incremental reuse.
///
/// The directory contract is a precondition, not inferred: root holds main
/// categories, mains hold sub categories, subs hold series, series hold
/// volumes and optional one-level subgroups. Entries violating the contract
/// at a given depth are logged and ignored.
#[derive(Debug, Clone)]
pub struct LibraryScanner {
    pub volume_extensions: Vec<String>,
    /// 0 means one worker per available core.
    pub worker_threads: usize,
}

impl Default for LibraryScanner {
    fn default() -> Self {
        Self {
            volume_extensions: VOLUME_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            worker_threads: 0,
        }
    }
}

/// A finished scan: the library plus everything recovered along the way.
/// `library.complete` is false when the scan was cancelled mid-way.
#[derive(Debug)]
pub struct ScanOutcome {
    pub library: Library,
    pub diagnostics: Diagnostics,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.library.complete
    }
}

struct DirEntryInfo {
    name: String,
    path: PathBuf,
    is_dir: bool,
}

impl LibraryScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            worker_threads: config.worker_threads,
            ..Self::default()
        }
    }

    pub fn is_volume_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let lower = e.to_lowercase();
                self.volume_extensions.contains(&lower)
            })
            .unwrap_or(false)
    }

    fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Scan `root`, reusing volumes from `prior` whose `(size, mtime)` are
    /// unchanged. Series scanning fans out over a fixed-size worker pool;
    /// the result is assembled in stable alphabetic order regardless of
    /// completion order.
    pub fn scan(
        &self,
        root: &Path,
        prior: Option<&Library>,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<ScanOutcome> {
        if !root.exists() {
            return Err(MangaError::Precondition(format!(
                "library root does not exist: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(MangaError::Precondition(format!(
                "library root is not a directory: {}",
                root.display()
            )));
        }

        let mut diagnostics = Diagnostics::new();

        // Serial enumeration of the category levels; only series content is
        // worth parallelizing.
        let mut mains: Vec<Category> = Vec::new();
        let mut tasks: Vec<(usize, usize, PathBuf, String)> = Vec::new();

        let root_entries = read_sorted_entries(root).map_err(|e| {
            MangaError::Precondition(format!("library root unreadable: {e}"))
        })?;

        for main_entry in root_entries.iter().filter(|e| e.is_dir) {
            let main_index = mains.len();
            let mut main = Category::new(main_entry.name.clone(), main_entry.path.clone());

            match read_sorted_entries(&main.path) {
                Ok(sub_entries) => {
                    for sub_entry in sub_entries.iter().filter(|e| e.is_dir) {
                        let sub_index = main.sub_categories.len();
                        let sub = Category::new(sub_entry.name.clone(), sub_entry.path.clone());

                        match read_sorted_entries(&sub.path) {
                            Ok(series_entries) => {
                                for series_entry in series_entries {
                                    if !series_entry.is_dir {
                                        debug!(
                                            "ignoring non-directory at series depth: {}",
                                            series_entry.path.display()
                                        );
                                        continue;
                                    }
                                    tasks.push((
                                        main_index,
                                        sub_index,
                                        series_entry.path,
                                        series_entry.name,
                                    ));
                                }
                            }
                            Err(e) => diagnostics.push(
                                DiagnosticKind::PerItem,
                                Some(sub.path.clone()),
                                format!("unreadable sub category: {e}"),
                            ),
                        }
                        main.sub_categories.push(sub);
                    }
                }
                Err(e) => diagnostics.push(
                    DiagnosticKind::PerItem,
                    Some(main.path.clone()),
                    format!("unreadable main category: {e}"),
                ),
            }
            mains.push(main);
        }

        let total = tasks.len() as u64;
        sink.emit(ProgressEvent {
            phase: ProgressPhase::Enumerate,
            done: total,
            total: Some(total),
            label: None,
        });
        info!("enumerated {} series under {}", total, root.display());

        let prior_series: HashMap<&Path, &Series> = prior
            .map(|lib| lib.iter_series().map(|s| (s.path.as_path(), s)).collect())
            .unwrap_or_default();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.effective_workers())
            .build()
            .map_err(|e| MangaError::Precondition(format!("worker pool: {e}")))?;

        let done = AtomicU64::new(0);
        let results: Vec<Option<(usize, usize, Series, Diagnostics)>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|(main_index, sub_index, path, name)| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let (series, series_diags) = self.scan_series(
                        path,
                        name,
                        prior_series.get(path.as_path()).copied(),
                    );
                    let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                    sink.emit(ProgressEvent {
                        phase: ProgressPhase::ScanSeries,
                        done: finished,
                        total: Some(total),
                        label: Some(name.clone()),
                    });
                    Some((*main_index, *sub_index, series, series_diags))
                })
                .collect()
        });

        let cancelled = cancel.is_cancelled();
        let mut library = Library::new(root.to_path_buf());
        library.complete = !cancelled;
        library.categories = mains;

        for (main_index, sub_index, series, series_diags) in results.into_iter().flatten() {
            diagnostics.extend(series_diags);
            library.categories[main_index].sub_categories[sub_index]
                .series
                .push(series);
        }

        if cancelled {
            warn!("scan of {} cancelled; library is partial", root.display());
        } else {
            info!(
                "scanned {} series / {} volumes",
                library.total_series(),
                library.total_volumes()
            );
        }

        Ok(ScanOutcome {
            library,
            diagnostics,
        })
    }

    /// Scan one series directory: classify entries as volumes, subgroups,
    /// or `series.json`; reuse prior volumes whose `(size, mtime)` match.
    /// Failures stay local to the series.
    fn scan_series(
        &self,
        path: &Path,
        name: &str,
        prior: Option<&Series>,
    ) -> (Series, Diagnostics) {
        let mut series = Series::new(name.to_string(), path.to_path_buf());
        let mut diagnostics = Diagnostics::new();

        let prior_volumes: HashMap<&str, &Volume> = prior
            .map(|p| p.all_volumes().map(|v| (v.stem.as_str(), v)).collect())
            .unwrap_or_default();

        let entries = match read_sorted_entries(path) {
            Ok(entries) => entries,
            Err(e) => {
                diagnostics.push(
                    DiagnosticKind::PerItem,
                    Some(path.to_path_buf()),
                    format!("unreadable series directory: {e}"),
                );
                return (series, diagnostics);
            }
        };

        for entry in entries {
            if entry.is_dir {
                let mut group = SubGroup {
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                    volumes: Vec::new(),
                };
                match read_sorted_entries(&entry.path) {
                    Ok(children) => {
                        for child in children {
                            if !child.is_dir && self.is_volume_file(&child.path) {
                                match make_volume(&child.path, &prior_volumes) {
                                    Ok(volume) => group.volumes.push(volume),
                                    Err(e) => diagnostics.push(
                                        DiagnosticKind::PerItem,
                                        Some(child.path),
                                        e.to_string(),
                                    ),
                                }
                            }
                        }
                    }
                    Err(e) => diagnostics.push(
                        DiagnosticKind::PerItem,
                        Some(entry.path.clone()),
                        format!("unreadable subgroup: {e}"),
                    ),
                }
                series.sub_groups.push(group);
            } else if entry.name == METADATA_FILENAME {
                // Loaded below so malformed metadata never hides volumes.
            } else if self.is_volume_file(&entry.path) {
                match make_volume(&entry.path, &prior_volumes) {
                    Ok(volume) => series.volumes.push(volume),
                    Err(e) => diagnostics.push(
                        DiagnosticKind::PerItem,
                        Some(entry.path),
                        e.to_string(),
                    ),
                }
            } else {
                debug!("ignoring non-volume entry {}", entry.path.display());
            }
        }

        match SeriesMetadata::load(path) {
            Ok(Some(metadata)) => series.metadata = metadata,
            Ok(None) => {}
            Err(e) => diagnostics.push(
                DiagnosticKind::PerItem,
                Some(path.join(METADATA_FILENAME)),
                format!("malformed {METADATA_FILENAME}: {e}"),
            ),
        }

        (series, diagnostics)
    }
}

fn make_volume(path: &Path, prior: &HashMap<&str, &Volume>) -> Result<Volume> {
    let metadata = fs::metadata(path)?;
    let size_bytes = metadata.len();
    let modified: DateTime<Utc> = metadata.modified()?.into();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(previous) = prior.get(stem.as_str()) {
        if previous.size_bytes == size_bytes && previous.modified == modified {
            return Ok((*previous).clone());
        }
    }
    Ok(Volume::new(path.to_path_buf(), size_bytes, modified))
}

fn read_sorted_entries(path: &Path) -> io::Result<Vec<DirEntryInfo>> {
    let mut entries: Vec<DirEntryInfo> = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        entries.push(DirEntryInfo {
            name,
            path: entry.path(),
            is_dir: file_type.is_dir(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Scan using the configured root, consulting the snapshot store for the
/// prior library and persisting the result when the scan completed.
pub fn scan_library(
    config: &CoreConfig,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<ScanOutcome> {
    let cache = LibraryCache::from_config(config);
    let (prior, cache_diags) = cache.load(&config.library_root);
    let scanner = LibraryScanner::from_config(config);

    let mut outcome = scanner.scan(&config.library_root, prior.as_ref(), sink, cancel)?;
    outcome.diagnostics.extend(cache_diags);

    if outcome.is_complete() {
        let write_diags = cache.store(&outcome.library);
        outcome.diagnostics.extend(write_diags);
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::test_support::CollectingSink;
    use crate::progress::NoopSink;
    use tempfile::TempDir;

    fn build_tree(root: &Path) {
        for (dir, files) in [
            ("Manga/Shounen/One Piece", vec!["One Piece v01.cbz", "One Piece v02.cbz"]),
            ("Manga/Shounen/Naruto", vec!["Naruto v01.cbz"]),
            ("Manga/Seinen/Berserk", vec!["Berserk v01.cbz"]),
            ("Light Novels/Isekai/Overlord", vec!["Overlord v01.epub"]),
        ] {
            let dir_path = root.join(dir);
            fs::create_dir_all(&dir_path).unwrap();
            for file in files {
                fs::write(dir_path.join(file), file.as_bytes()).unwrap();
            }
        }
    }

    fn scan(root: &Path, prior: Option<&Library>) -> ScanOutcome {
        LibraryScanner::new()
            .scan(root, prior, &NoopSink, &CancelToken::new())
            .unwrap()
    }

    #[test]
    fn scans_four_levels_in_alphabetic_order() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());

        let outcome = scan(dir.path(), None);
        assert!(outcome.is_complete());
        assert!(outcome.diagnostics.is_empty());

        let library = &outcome.library;
        let names: Vec<&str> = library.categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Light Novels", "Manga"]);

        let manga = &library.categories[1];
        let sub_names: Vec<&str> = manga.sub_categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(sub_names, vec!["Seinen", "Shounen"]);

        let shounen = &manga.sub_categories[1];
        let series_names: Vec<&str> = shounen.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(series_names, vec!["Naruto", "One Piece"]);

        let one_piece = &shounen.series[1];
        assert_eq!(one_piece.volumes.len(), 2);
        assert_eq!(one_piece.volumes[0].stem, "One Piece v01");
    }

    #[test]
    fn unchanged_volumes_are_reused_with_enrichment() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());

        let mut first = scan(dir.path(), None);
        for series in first.library.iter_series_mut() {
            for volume in &mut series.volumes {
                volume.page_count = Some(180);
            }
        }

        let second = scan(dir.path(), Some(&first.library));
        assert_eq!(second.library.total_volumes(), first.library.total_volumes());
        for series in second.library.iter_series() {
            for volume in &series.volumes {
                assert_eq!(volume.page_count, Some(180), "{}", volume.stem);
            }
        }
    }

    #[test]
    fn changed_volume_is_rescanned_fresh() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());

        let mut first = scan(dir.path(), None);
        for series in first.library.iter_series_mut() {
            for volume in &mut series.volumes {
                volume.page_count = Some(180);
            }
        }

        // Grow one file so its size changes.
        let target = dir
            .path()
            .join("Manga/Shounen/One Piece/One Piece v01.cbz");
        fs::write(&target, b"new content with a different length").unwrap();

        let second = scan(dir.path(), Some(&first.library));
        let one_piece = second
            .library
            .iter_series()
            .find(|s| s.name == "One Piece")
            .unwrap();
        let changed = one_piece.volumes.iter().find(|v| v.stem == "One Piece v01").unwrap();
        let untouched = one_piece.volumes.iter().find(|v| v.stem == "One Piece v02").unwrap();
        assert_eq!(changed.page_count, None);
        assert_eq!(untouched.page_count, Some(180));
    }

    #[test]
    fn subgroups_scan_one_level_deep() {
        let dir = TempDir::new().unwrap();
        let series_dir = dir.path().join("Manga/Seinen/Vagabond");
        let group_dir = series_dir.join("v01-v10");
        fs::create_dir_all(&group_dir).unwrap();
        fs::write(series_dir.join("Vagabond v11.cbz"), b"x").unwrap();
        fs::write(group_dir.join("Vagabond v01.cbz"), b"y").unwrap();

        let outcome = scan(dir.path(), None);
        let series = outcome.library.iter_series().next().unwrap();
        assert_eq!(series.volumes.len(), 1);
        assert_eq!(series.sub_groups.len(), 1);
        assert_eq!(series.sub_groups[0].name, "v01-v10");
        assert_eq!(series.sub_groups[0].volumes.len(), 1);
        assert_eq!(series.total_volume_count(), 2);
    }

    #[test]
    fn series_json_feeds_metadata_and_bad_json_is_a_diagnostic() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("Manga/Shounen/Attack on Titan");
        let bad = dir.path().join("Manga/Shounen/Broken");
        fs::create_dir_all(&good).unwrap();
        fs::create_dir_all(&bad).unwrap();
        fs::write(good.join("Attack on Titan v01.cbz"), b"x").unwrap();
        fs::write(
            good.join(METADATA_FILENAME),
            r#"{ "mal_id": 23390, "title_english": "Attack on Titan" }"#,
        )
        .unwrap();
        fs::write(bad.join(METADATA_FILENAME), b"{ not json").unwrap();

        let outcome = scan(dir.path(), None);
        let aot = outcome
            .library
            .iter_series()
            .find(|s| s.name == "Attack on Titan")
            .unwrap();
        assert_eq!(aot.metadata.mal_id, Some(23390));

        let broken = outcome
            .library
            .iter_series()
            .find(|s| s.name == "Broken")
            .unwrap();
        assert!(broken.metadata.is_empty());
        assert_eq!(outcome.diagnostics.of_kind(DiagnosticKind::PerItem).count(), 1);
    }

    #[test]
    fn non_directories_at_series_depth_are_ignored() {
        let dir = TempDir::new().unwrap();
        let sub = dir.path().join("Manga/Shounen");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("stray.txt"), b"not a series").unwrap();

        let outcome = scan(dir.path(), None);
        assert_eq!(outcome.library.total_series(), 0);
        assert!(outcome.diagnostics.is_empty());
    }

    #[test]
    fn missing_root_is_a_precondition_error() {
        let err = LibraryScanner::new()
            .scan(
                Path::new("/definitely/not/here"),
                None,
                &NoopSink,
                &CancelToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, MangaError::Precondition(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn cancellation_yields_incomplete_library() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = LibraryScanner::new()
            .scan(dir.path(), None, &NoopSink, &cancel)
            .unwrap();
        assert!(!outcome.is_complete());
        assert_eq!(outcome.library.total_series(), 0);
    }

    #[test]
    fn progress_events_cover_every_series() {
        let dir = TempDir::new().unwrap();
        build_tree(dir.path());

        let sink = CollectingSink::default();
        LibraryScanner::new()
            .scan(dir.path(), None, &sink, &CancelToken::new())
            .unwrap();

        let events = sink.events.lock().unwrap();
        let scans: Vec<_> = events
            .iter()
            .filter(|e| e.phase == ProgressPhase::ScanSeries)
            .collect();
        assert_eq!(scans.len(), 4);
        assert!(events.iter().any(|e| e.phase == ProgressPhase::Enumerate));
    }

    #[test]
    fn scan_library_round_trips_through_the_cache() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("library");
        fs::create_dir(&root).unwrap();
        build_tree(&root);

        let config = CoreConfig {
            library_root: root.clone(),
            cache_dir: dir.path().to_path_buf(),
            ..CoreConfig::default()
        };

        let first = scan_library(&config, &NoopSink, &CancelToken::new()).unwrap();
        assert!(first.is_complete());

        let cache = LibraryCache::from_config(&config);
        let (cached, diags) = cache.load(&root);
        assert!(diags.is_empty());
        assert_eq!(cached.unwrap(), first.library);

        let second = scan_library(&config, &NoopSink, &CancelToken::new()).unwrap();
        assert_eq!(second.library, first.library);
    }
}
