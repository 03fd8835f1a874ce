use crate::config::CoreConfig;
use crate::error::{MangaError, Result};
use crate::matcher::similarity;
use crate::normalize::normalize;
use crate::progress::{CancelToken, ProgressEvent, ProgressPhase, ProgressSink};
use crate::types::{Library, Series, Volume};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Two or more series claiming the same external ID.
#[derive(Debug, Clone)]
pub struct IdCollisionGroup<'a> {
    pub mal_id: u32,
    pub series: Vec<&'a Series>,
    pub confidence: f64,
}

/// Two or more volumes with matching content proxies.
#[derive(Debug, Clone)]
pub struct ContentCollisionGroup<'a> {
    pub size_bytes: u64,
    pub page_count: Option<u32>,
    pub volumes: Vec<&'a Volume>,
    pub confidence: f64,
}

/// A pair of series whose identities are suspiciously similar.
#[derive(Debug, Clone)]
pub struct FuzzyPair<'a> {
    pub left: &'a Series,
    pub right: &'a Series,
    pub score: f64,
}

#[derive(Debug)]
pub struct DedupeReport<'a> {
    pub id_collisions: Vec<IdCollisionGroup<'a>>,
    pub content_collisions: Vec<ContentCollisionGroup<'a>>,
    pub fuzzy_pairs: Vec<FuzzyPair<'a>>,
    /// False when cancellation cut the fuzzy pass short.
    pub complete: bool,
}

/// Run all three detectors over the library on a fixed-size worker pool.
/// The ID and content passes are cheap groupings; the fuzzy pass is the
/// O(n²) one and shares the pool, checking the cancellation token between
/// rows.
pub fn detect<'a>(
    library: &'a Library,
    config: &CoreConfig,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Result<DedupeReport<'a>> {
    let workers = config.effective_workers();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| MangaError::Precondition(format!("worker pool: {e}")))?;

    let ((id_collisions, content_collisions), fuzzy_pairs) = pool.install(|| {
        rayon::join(
            || {
                rayon::join(
                    || detect_id_collisions(library),
                    || detect_content_collisions(library),
                )
            },
            || detect_fuzzy(library, config, sink, cancel),
        )
    });

    let report = DedupeReport {
        id_collisions,
        content_collisions,
        fuzzy_pairs,
        complete: !cancel.is_cancelled(),
    };
    info!(
        "dedupe: {} ID groups, {} content groups, {} fuzzy pairs",
        report.id_collisions.len(),
        report.content_collisions.len(),
        report.fuzzy_pairs.len()
    );
    Ok(report)
}

/// Group series by external ID; any group of two or more is a duplicate
/// with full confidence.
pub fn detect_id_collisions(library: &Library) -> Vec<IdCollisionGroup<'_>> {
    let mut by_id: BTreeMap<u32, Vec<&Series>> = BTreeMap::new();
    for series in library.iter_series() {
        if let Some(mal_id) = series.metadata.mal_id {
            by_id.entry(mal_id).or_default().push(series);
        }
    }
    by_id
        .into_iter()
        .filter(|(_, group)| group.len() >= 2)
        .map(|(mal_id, series)| {
            debug!("ID collision on {mal_id}: {} series", series.len());
            IdCollisionGroup {
                mal_id,
                series,
                confidence: 1.0,
            }
        })
        .collect()
}

/// Group volumes by `(size, page_count)` when the page count is known, by
/// size alone otherwise.
pub fn detect_content_collisions(library: &Library) -> Vec<ContentCollisionGroup<'_>> {
    let mut by_key: BTreeMap<(u64, Option<u32>), Vec<&Volume>> = BTreeMap::new();
    for series in library.iter_series() {
        for volume in series.all_volumes() {
            by_key
                .entry((volume.size_bytes, volume.page_count))
                .or_default()
                .push(volume);
        }
    }
    by_key
        .into_iter()
        .filter(|(_, group)| group.len() >= 2)
        .map(|((size_bytes, page_count), volumes)| ContentCollisionGroup {
            size_bytes,
            page_count,
            volumes,
            confidence: if page_count.is_some() { 0.95 } else { 0.75 },
        })
        .collect()
}

/// All-pairs identity similarity with a token-length prefilter: pairs whose
/// token counts differ by more than 2x never get scored. Pairs of series
/// carrying different external IDs are skipped outright; the IDs already
/// prove them distinct.
pub fn detect_fuzzy<'a>(
    library: &'a Library,
    config: &CoreConfig,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Vec<FuzzyPair<'a>> {
    let series_list: Vec<&Series> = library.iter_series().collect();
    let identities: Vec<Vec<String>> = series_list
        .iter()
        .map(|s| {
            s.identities()
                .iter()
                .map(|i| normalize(i))
                .filter(|n| !n.is_empty())
                .collect()
        })
        .collect();
    let token_counts: Vec<Vec<usize>> = identities
        .iter()
        .map(|names| names.iter().map(|n| n.split_whitespace().count()).collect())
        .collect();

    let total = series_list.len() as u64;
    let done = AtomicU64::new(0);

    let nested: Vec<Vec<FuzzyPair<'a>>> = (0..series_list.len())
        .into_par_iter()
        .map(|i| {
            let mut found: Vec<FuzzyPair<'a>> = Vec::new();
            if cancel.is_cancelled() {
                return found;
            }
            for j in (i + 1)..series_list.len() {
                if let (Some(a), Some(b)) = (
                    series_list[i].metadata.mal_id,
                    series_list[j].metadata.mal_id,
                ) {
                    if a != b {
                        continue;
                    }
                }

                let mut best = 0.0f64;
                for (name_a, &tokens_a) in identities[i].iter().zip(&token_counts[i]) {
                    for (name_b, &tokens_b) in identities[j].iter().zip(&token_counts[j]) {
                        let ratio = tokens_a as f64 / tokens_b as f64;
                        if !(0.5..=2.0).contains(&ratio) {
                            continue;
                        }
                        let score =
                            similarity(name_a, name_b, config.fuzzy_refine_threshold);
                        if score > best {
                            best = score;
                        }
                    }
                }
                if best >= config.dedupe_similarity_threshold {
                    found.push(FuzzyPair {
                        left: series_list[i],
                        right: series_list[j],
                        score: best,
                    });
                }
            }
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            sink.emit(ProgressEvent {
                phase: ProgressPhase::Dedupe,
                done: finished,
                total: Some(total),
                label: Some(series_list[i].name.clone()),
            });
            found
        })
        .collect();

    nested.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use crate::types::Category;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;

    fn volume(series_path: &str, name: &str, size: u64, pages: Option<u32>) -> Volume {
        let mut v = Volume::new(
            PathBuf::from(format!("{series_path}/{name}")),
            size,
            Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap(),
        );
        v.page_count = pages;
        v
    }

    fn series(name: &str, mal_id: Option<u32>) -> Series {
        let mut s = Series::new(name.into(), PathBuf::from(format!("/lib/Manga/Shounen/{name}")));
        s.metadata.mal_id = mal_id;
        s
    }

    fn library_with(series_list: Vec<Series>) -> Library {
        let mut sub = Category::new("Shounen".into(), PathBuf::from("/lib/Manga/Shounen"));
        sub.series = series_list;
        let mut main = Category::new("Manga".into(), PathBuf::from("/lib/Manga"));
        main.sub_categories.push(sub);
        let mut library = Library::new(PathBuf::from("/lib"));
        library.categories.push(main);
        library
    }

    #[test]
    fn id_collisions_group_with_full_confidence() {
        let library = library_with(vec![
            series("Berserk", Some(2)),
            series("Berserk Deluxe", Some(2)),
            series("Claymore", Some(583)),
        ]);
        let groups = detect_id_collisions(&library);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].mal_id, 2);
        assert_eq!(groups[0].series.len(), 2);
        assert_eq!(groups[0].confidence, 1.0);
    }

    #[test]
    fn content_collisions_use_page_count_when_known() {
        let mut a = series("Alpha", None);
        a.volumes.push(volume("/a", "Alpha v01.cbz", 1000, Some(180)));
        let mut b = series("Beta", None);
        b.volumes.push(volume("/b", "Beta v01.cbz", 1000, Some(180)));
        let mut c = series("Gamma", None);
        c.volumes.push(volume("/c", "Gamma v01.cbz", 2000, None));
        let mut d = series("Delta", None);
        d.volumes.push(volume("/d", "Delta v01.cbz", 2000, None));

        let library = library_with(vec![a, b, c, d]);
        let groups = detect_content_collisions(&library);
        assert_eq!(groups.len(), 2);

        let with_pages = groups.iter().find(|g| g.page_count.is_some()).unwrap();
        assert_eq!(with_pages.confidence, 0.95);
        let size_only = groups.iter().find(|g| g.page_count.is_none()).unwrap();
        assert_eq!(size_only.confidence, 0.75);
    }

    #[test]
    fn near_identical_names_pair_up() {
        let library = library_with(vec![
            series("Berserk", None),
            series("Berserk.", None),
            series("Vinland Saga", None),
        ]);
        let config = CoreConfig::default();
        let pairs = detect_fuzzy(&library, &config, &NoopSink, &CancelToken::new());
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].left.name, "Berserk");
        assert_eq!(pairs[0].right.name, "Berserk.");
        assert!(pairs[0].score >= 0.95);
    }

    #[test]
    fn distinct_external_ids_suppress_fuzzy_pairs() {
        let library = library_with(vec![
            series("Berserk", Some(2)),
            series("Berserk.", Some(99)),
        ]);
        let config = CoreConfig::default();
        let pairs = detect_fuzzy(&library, &config, &NoopSink, &CancelToken::new());
        assert!(pairs.is_empty());
    }

    #[test]
    fn token_length_prefilter_rejects_lopsided_pairs() {
        let library = library_with(vec![
            series("Blame", None),
            series("Blame And Several More Words Here", None),
        ]);
        let config = CoreConfig::default();
        let pairs = detect_fuzzy(&library, &config, &NoopSink, &CancelToken::new());
        assert!(pairs.is_empty());
    }

    #[test]
    fn full_detect_runs_all_passes() {
        let mut a = series("Berserk", Some(2));
        a.volumes.push(volume("/a", "Berserk v01.cbz", 1000, None));
        let mut b = series("Berserk Deluxe", Some(2));
        b.volumes.push(volume("/b", "Berserk Deluxe v01.cbz", 1000, None));

        let library = library_with(vec![a, b]);
        let config = CoreConfig {
            worker_threads: 2,
            ..CoreConfig::default()
        };
        let report = detect(&library, &config, &NoopSink, &CancelToken::new()).unwrap();
        assert!(report.complete);
        assert_eq!(report.id_collisions.len(), 1);
        assert_eq!(report.content_collisions.len(), 1);
    }

    #[test]
    fn cancellation_marks_report_incomplete() {
        let library = library_with(vec![series("Berserk", None), series("Berserk.", None)]);
        let config = CoreConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = detect(&library, &config, &NoopSink, &cancel).unwrap();
        assert!(!report.complete);
        assert!(report.fuzzy_pairs.is_empty());
    }
}
