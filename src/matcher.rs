use crate::analysis::{merge_ranges, UnitRange};
use crate::config::CoreConfig;
use crate::index::LibraryIndex;
use crate::normalize::normalize;
use crate::parser::ParsedTitle;
use crate::progress::{CancelToken, ProgressEvent, ProgressPhase, ProgressSink};
use crate::types::Series;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Which rung of the cascade produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchReason {
    Id,
    Synonym,
    Fuzzy,
}

/// Result of resolving one external entry against the index.
#[derive(Debug, Clone)]
pub enum MatchOutcome<'a> {
    Matched {
        series: &'a Series,
        confidence: f64,
        reason: MatchReason,
    },
    NoMatch,
}

impl<'a> MatchOutcome<'a> {
    pub fn series(&self) -> Option<&'a Series> {
        match self {
            MatchOutcome::Matched { series, .. } => Some(*series),
            MatchOutcome::NoMatch => None,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Similarity between two normalized strings: token-set Jaccard, replaced
/// by the character-level LCS ratio when that ratio clears
/// `refine_threshold` and beats the Jaccard. Deterministic and symmetric.
pub fn similarity(a: &str, b: &str, refine_threshold: f64) -> f64 {
    let jaccard = token_set_jaccard(a, b);
    if jaccard >= 1.0 {
        return 1.0;
    }
    let lcs = lcs_ratio(a, b);
    if lcs >= refine_threshold {
        jaccard.max(lcs)
    } else {
        jaccard
    }
}

fn token_set_jaccard(a: &str, b: &str) -> f64 {
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}

/// `2 * LCS(a, b) / (|a| + |b|)` over characters.
fn lcs_ratio(a: &str, b: &str) -> f64 {
    let chars_a: Vec<char> = a.chars().collect();
    let chars_b: Vec<char> = b.chars().collect();
    if chars_a.is_empty() && chars_b.is_empty() {
        return 1.0;
    }
    if chars_a.is_empty() || chars_b.is_empty() {
        return 0.0;
    }

    let mut previous = vec![0usize; chars_b.len() + 1];
    let mut current = vec![0usize; chars_b.len() + 1];
    for &ca in &chars_a {
        for (j, &cb) in chars_b.iter().enumerate() {
            current[j + 1] = if ca == cb {
                previous[j] + 1
            } else {
                previous[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    let lcs = previous[chars_b.len()] as f64;
    2.0 * lcs / (chars_a.len() + chars_b.len()) as f64
}

/// Resolve one parsed entry: ID hint, then exact synonym, then fuzzy.
/// First rung to produce a result wins; output is fully deterministic for a
/// given index snapshot and input.
pub fn match_entry<'a>(
    index: &LibraryIndex<'a>,
    parsed: &ParsedTitle,
    hint_id: Option<u32>,
    config: &CoreConfig,
) -> MatchOutcome<'a> {
    if let Some(id) = hint_id {
        if let Some(series) = index.get_by_id(id) {
            debug!("ID match {id} -> {:?}", series.name);
            return MatchOutcome::Matched {
                series,
                confidence: 1.0,
                reason: MatchReason::Id,
            };
        }
    }

    let query_norm = normalize(&parsed.cleaned);
    if query_norm.is_empty() {
        return MatchOutcome::NoMatch;
    }

    let candidates = index.search(&parsed.cleaned);
    if candidates.len() == 1 {
        return MatchOutcome::Matched {
            series: candidates[0],
            confidence: 0.95,
            reason: MatchReason::Synonym,
        };
    }
    if candidates.len() > 1 {
        let series = break_synonym_tie(candidates, &query_norm);
        return MatchOutcome::Matched {
            series,
            confidence: 0.85,
            reason: MatchReason::Synonym,
        };
    }

    // Fuzzy fallback over every identity in the index.
    let mut best_score = 0.0f64;
    let mut best_series: Option<&'a Series> = None;
    for (identity_norm, series_list) in sorted_titles(index) {
        let score = similarity(&query_norm, identity_norm, config.fuzzy_refine_threshold);
        if score > best_score {
            best_score = score;
            best_series = series_list.first().copied();
        }
    }

    match best_series {
        Some(series) if best_score >= config.fuzzy_threshold => {
            debug!(
                "fuzzy match {:?} -> {:?} ({best_score:.3})",
                parsed.cleaned, series.name
            );
            MatchOutcome::Matched {
                series,
                confidence: best_score,
                reason: MatchReason::Fuzzy,
            }
        }
        _ => MatchOutcome::NoMatch,
    }
}

/// Tie-break an ambiguous synonym hit: prefer the series whose folder name
/// is the matched identity, then the one with the longest normalized
/// identity, then the lexicographically first folder name.
fn break_synonym_tie<'a>(candidates: &[&'a Series], query_norm: &str) -> &'a Series {
    let mut ranked: Vec<&'a Series> = candidates.to_vec();
    ranked.sort_by(|a, b| {
        let a_folder = normalize(&a.name) == query_norm;
        let b_folder = normalize(&b.name) == query_norm;
        b_folder
            .cmp(&a_folder)
            .then_with(|| longest_identity(b).cmp(&longest_identity(a)))
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked[0]
}

fn longest_identity(series: &Series) -> usize {
    series
        .identities()
        .iter()
        .map(|i| normalize(i).chars().count())
        .max()
        .unwrap_or(0)
}

/// Index titles in a deterministic iteration order (HashMap order is not).
fn sorted_titles<'a, 'b>(index: &'b LibraryIndex<'a>) -> Vec<(&'b str, &'b [&'a Series])> {
    let mut titles: Vec<(&str, &[&Series])> = index.iter_titles().collect();
    titles.sort_by(|a, b| a.0.cmp(b.0));
    titles
}

/// Match a batch of entries, then propagate: an unmatched entry whose
/// normalized cleaned title is shared with matched entries inherits their
/// match when exactly one series is involved.
pub fn match_batch<'a>(
    index: &LibraryIndex<'a>,
    entries: &[(ParsedTitle, Option<u32>)],
    config: &CoreConfig,
    sink: &dyn ProgressSink,
    cancel: &CancelToken,
) -> Vec<MatchOutcome<'a>> {
    let total = entries.len() as u64;
    let mut outcomes: Vec<MatchOutcome<'a>> = Vec::with_capacity(entries.len());

    for (done, (parsed, hint_id)) in entries.iter().enumerate() {
        if cancel.is_cancelled() {
            outcomes.push(MatchOutcome::NoMatch);
            continue;
        }
        let outcome = match_entry(index, parsed, *hint_id, config);
        sink.emit(ProgressEvent {
            phase: ProgressPhase::Match,
            done: done as u64 + 1,
            total: Some(total),
            label: Some(parsed.cleaned.clone()),
        });
        outcomes.push(outcome);
    }

    propagate_matches(entries, &mut outcomes);
    outcomes
}

/// Group entries by normalized cleaned title and propagate a group's match
/// to unmatched members, but only when the group agrees on one series.
fn propagate_matches<'a>(
    entries: &[(ParsedTitle, Option<u32>)],
    outcomes: &mut [MatchOutcome<'a>],
) {
    let mut group_match: HashMap<String, Option<usize>> = HashMap::new();

    for (i, (parsed, _)) in entries.iter().enumerate() {
        let key = normalize(&parsed.cleaned);
        if key.is_empty() || !outcomes[i].is_match() {
            continue;
        }
        let series_path = outcomes[i].series().unwrap().path.clone();
        match group_match.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(Some(i));
            }
            Entry::Occupied(mut slot) => {
                if let Some(existing) = *slot.get() {
                    let existing_path = &outcomes[existing].series().unwrap().path;
                    if *existing_path != series_path {
                        // Conflicting matches: ambiguous, propagate nothing.
                        slot.insert(None);
                    }
                }
            }
        }
    }

    let mut propagated = 0usize;
    for (i, (parsed, _)) in entries.iter().enumerate() {
        if outcomes[i].is_match() {
            continue;
        }
        let key = normalize(&parsed.cleaned);
        if let Some(Some(source)) = group_match.get(&key) {
            outcomes[i] = outcomes[*source].clone();
            propagated += 1;
        }
    }
    if propagated > 0 {
        debug!("propagated matches to {propagated} related entries");
    }
}

/// Several parsed records resolved to the same series, with their ranges
/// merged.
#[derive(Debug, Clone)]
pub struct ConsolidatedMatch<'a> {
    pub series: &'a Series,
    pub volumes: Vec<UnitRange>,
    pub chapters: Vec<UnitRange>,
    pub entry_count: usize,
}

/// Group matched records by series and merge their volume/chapter ranges.
/// Output is ordered by series folder name.
pub fn consolidate<'a>(
    entries: &[ParsedTitle],
    outcomes: &[MatchOutcome<'a>],
) -> Vec<ConsolidatedMatch<'a>> {
    let mut by_series: HashMap<&std::path::Path, (usize, Vec<UnitRange>, Vec<UnitRange>, &'a Series)> =
        HashMap::new();

    for (parsed, outcome) in entries.iter().zip(outcomes.iter()) {
        let Some(series) = outcome.series() else {
            continue;
        };
        let slot = by_series
            .entry(series.path.as_path())
            .or_insert_with(|| (0, Vec::new(), Vec::new(), series));
        slot.0 += 1;
        slot.1.extend(parsed.volumes.iter().copied());
        slot.2.extend(parsed.chapters.iter().copied());
    }

    let mut consolidated: Vec<ConsolidatedMatch<'a>> = by_series
        .into_values()
        .map(|(entry_count, volumes, chapters, series)| ConsolidatedMatch {
            series,
            volumes: merge_ranges(&volumes),
            chapters: merge_ranges(&chapters),
            entry_count,
        })
        .collect();
    consolidated.sort_by(|a, b| a.series.name.cmp(&b.series.name));
    consolidated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::TitleParser;
    use crate::progress::NoopSink;
    use crate::types::{Category, Library, Series};
    use std::path::PathBuf;

    fn library_with(series_list: Vec<Series>) -> Library {
        let mut sub = Category::new("Shounen".into(), PathBuf::from("/lib/Manga/Shounen"));
        sub.series = series_list;
        let mut main = Category::new("Manga".into(), PathBuf::from("/lib/Manga"));
        main.sub_categories.push(sub);
        let mut library = Library::new(PathBuf::from("/lib"));
        library.categories.push(main);
        library
    }

    fn series(name: &str, mal_id: Option<u32>) -> Series {
        let mut s = Series::new(name.into(), PathBuf::from(format!("/lib/Manga/Shounen/{name}")));
        s.metadata.mal_id = mal_id;
        s
    }

    fn parse(raw: &str) -> ParsedTitle {
        TitleParser::new(&CoreConfig::default()).parse(raw, None)
    }

    fn config() -> CoreConfig {
        CoreConfig::default()
    }

    #[test]
    fn id_hint_wins_with_full_confidence() {
        let library = library_with(vec![series("Berserk", Some(2))]);
        let index = LibraryIndex::build(&library, &CancelToken::new());

        let outcome = match_entry(&index, &parse("anything at all"), Some(2), &config());
        match outcome {
            MatchOutcome::Matched {
                series,
                confidence,
                reason,
            } => {
                assert_eq!(series.name, "Berserk");
                assert_eq!(confidence, 1.0);
                assert_eq!(reason, MatchReason::Id);
            }
            MatchOutcome::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn synonym_match_through_metadata_title() {
        let mut aot = series("Attack on Titan", None);
        aot.metadata.title = Some("Shingeki no Kyojin".into());
        aot.metadata.title_english = Some("Attack on Titan".into());
        let library = library_with(vec![aot]);
        let index = LibraryIndex::build(&library, &CancelToken::new());

        let outcome = match_entry(&index, &parse("Shingeki no Kyojin"), None, &config());
        match outcome {
            MatchOutcome::Matched {
                series,
                confidence,
                reason,
            } => {
                assert_eq!(series.name, "Attack on Titan");
                assert_eq!(confidence, 0.95);
                assert_eq!(reason, MatchReason::Synonym);
            }
            MatchOutcome::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn ambiguous_synonym_tie_breaks_deterministically() {
        let mut a = series("Alpha", None);
        a.metadata.synonyms = vec!["Shared Name".into()];
        let mut b = series("Shared Name", None);
        b.metadata.synonyms = vec!["Something Else".into()];
        let library = library_with(vec![a, b]);
        let index = LibraryIndex::build(&library, &CancelToken::new());

        for _ in 0..3 {
            let outcome = match_entry(&index, &parse("Shared Name"), None, &config());
            match &outcome {
                MatchOutcome::Matched {
                    series,
                    confidence,
                    reason,
                } => {
                    // Folder-name identity wins the tie.
                    assert_eq!(series.name, "Shared Name");
                    assert_eq!(*confidence, 0.85);
                    assert_eq!(*reason, MatchReason::Synonym);
                }
                MatchOutcome::NoMatch => panic!("expected a match"),
            }
        }
    }

    #[test]
    fn fuzzy_fallback_meets_the_spy_family_bar() {
        let library = library_with(vec![series("Spy x Family", None)]);
        let index = LibraryIndex::build(&library, &CancelToken::new());

        let outcome = match_entry(&index, &parse("Spy Family"), None, &config());
        match outcome {
            MatchOutcome::Matched {
                series,
                confidence,
                reason,
            } => {
                assert_eq!(series.name, "Spy x Family");
                assert!(confidence >= 0.90, "confidence {confidence}");
                assert_eq!(reason, MatchReason::Fuzzy);
            }
            MatchOutcome::NoMatch => panic!("expected a fuzzy match"),
        }
    }

    #[test]
    fn unrelated_titles_do_not_match() {
        let library = library_with(vec![series("Spy x Family", None)]);
        let index = LibraryIndex::build(&library, &CancelToken::new());
        assert!(!match_entry(&index, &parse("Vinland Saga"), None, &config()).is_match());
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        for (a, b) in [
            ("spy family", "spy x family"),
            ("berserk", "berserk"),
            ("one piece", "two pieces"),
            ("", "x"),
        ] {
            let fwd = similarity(a, b, 0.80);
            let rev = similarity(b, a, 0.80);
            assert!((fwd - rev).abs() < 1e-9);
            assert!((0.0..=1.0).contains(&fwd));
        }
        assert_eq!(similarity("berserk", "berserk", 0.80), 1.0);
    }

    #[test]
    fn batch_propagates_group_matches() {
        // The folder name is the only identity, so the romanized title can
        // resolve through the ID hint alone.
        let library = library_with(vec![series("Attack on Titan", Some(23390))]);
        let index = LibraryIndex::build(&library, &CancelToken::new());

        let entries = vec![
            (parse("Shingeki no Kyojin v01"), Some(23390)),
            (parse("Shingeki no Kyojin v02"), None),
        ];
        let outcomes = match_batch(&index, &entries, &config(), &NoopSink, &CancelToken::new());

        assert!(outcomes[0].is_match());
        match &outcomes[1] {
            MatchOutcome::Matched { series, reason, .. } => {
                assert_eq!(series.name, "Attack on Titan");
                assert_eq!(*reason, MatchReason::Id);
            }
            MatchOutcome::NoMatch => panic!("expected the match to propagate"),
        }
    }

    #[test]
    fn consolidation_merges_ranges_per_series() {
        let library = library_with(vec![series("Berserk", Some(2))]);
        let index = LibraryIndex::build(&library, &CancelToken::new());

        let parsed: Vec<ParsedTitle> = vec![
            parse("Berserk v01-03"),
            parse("Berserk v04"),
            parse("Berserk v09"),
        ];
        let outcomes: Vec<MatchOutcome> = parsed
            .iter()
            .map(|p| match_entry(&index, p, None, &config()))
            .collect();
        assert!(outcomes.iter().all(|o| o.is_match()));

        let groups = consolidate(&parsed, &outcomes);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.entry_count, 3);
        assert_eq!(
            group.volumes,
            vec![UnitRange::new(1.0, 4.0), UnitRange::new(9.0, 9.0)]
        );
    }
}
