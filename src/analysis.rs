use crate::config::CoreConfig;
use crate::parser::{ParsedTitle, TitleParser};
use crate::types::Series;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// An inclusive numeric range with an optional decimal tail, as extracted
/// from a filename (`[1,1]` for `v01`, `[44.5,52]` for `c44.5-52`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitRange {
    pub low: f64,
    pub high: f64,
}

impl UnitRange {
    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    pub fn singleton(value: f64) -> Self {
        Self {
            low: value,
            high: value,
        }
    }

    pub fn is_singleton(&self) -> bool {
        (self.high - self.low).abs() < f64::EPSILON
    }

    /// Integer positions this range covers (decimal tails round down).
    fn covered_ints(&self) -> impl Iterator<Item = i64> {
        (self.low.floor() as i64)..=(self.high.floor() as i64)
    }
}

/// What kind of numbering a parsed record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    VolumesOnly,
    ChaptersOnly,
    Mixed,
    Empty,
}

/// Classify a parsed record by which range sets are populated.
pub fn classify_unit(parsed: &ParsedTitle) -> UnitKind {
    match (!parsed.volumes.is_empty(), !parsed.chapters.is_empty()) {
        (true, false) => UnitKind::VolumesOnly,
        (false, true) => UnitKind::ChaptersOnly,
        (true, true) => UnitKind::Mixed,
        (false, false) => UnitKind::Empty,
    }
}

/// Merge adjacent or overlapping ranges: with `a <= c`, `[a,b]` and `[c,d]`
/// merge iff `c <= b + 1`. Output is sorted by lower bound.
pub fn merge_ranges(ranges: &[UnitRange]) -> Vec<UnitRange> {
    let mut sorted: Vec<UnitRange> = ranges.to_vec();
    sorted.sort_by(|a, b| {
        a.low
            .partial_cmp(&b.low)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.high
                    .partial_cmp(&b.high)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });

    let mut merged: Vec<UnitRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.low <= last.high + 1.0 => {
                if range.high > last.high {
                    last.high = range.high;
                }
            }
            _ => merged.push(range),
        }
    }
    merged
}

fn format_number(value: f64, pad: usize) -> String {
    if value.fract() == 0.0 {
        format!("{:0width$}", value as i64, width = pad)
    } else {
        format!("{value}")
    }
}

/// Render ranges human-readably: merged, singletons zero-padded
/// (`v01`), true ranges as `prefix{low}-{high}`, comma-separated.
pub fn format_ranges(ranges: &[UnitRange], prefix: &str, pad: usize) -> String {
    let merged = merge_ranges(ranges);
    let parts: Vec<String> = merged
        .iter()
        .map(|r| {
            if r.is_singleton() {
                format!("{prefix}{}", format_number(r.low, pad))
            } else {
                format!(
                    "{prefix}{}-{}",
                    format_number(r.low, 0),
                    format_number(r.high, 0)
                )
            }
        })
        .collect();
    parts.join(", ")
}

/// Missing positions in `[1, expected_total]`, or only the internal gaps
/// when the total is unknown. Returned as integer-valued ranges.
pub fn find_gaps(ranges: &[UnitRange], expected_total: Option<u32>) -> Vec<UnitRange> {
    if ranges.is_empty() {
        return match expected_total {
            Some(total) if total > 0 => vec![UnitRange::new(1.0, f64::from(total))],
            _ => Vec::new(),
        };
    }

    let mut covered: Vec<i64> = ranges.iter().flat_map(|r| r.covered_ints()).collect();
    covered.sort_unstable();
    covered.dedup();

    let (start, end) = match expected_total {
        Some(total) => (1, i64::from(total)),
        None => (covered[0], *covered.last().unwrap()),
    };

    let mut gaps: Vec<UnitRange> = Vec::new();
    let mut cursor = start;
    for &n in covered.iter().filter(|&&n| n >= start && n <= end) {
        if n > cursor {
            gaps.push(UnitRange::new(cursor as f64, (n - 1) as f64));
        }
        cursor = cursor.max(n + 1);
    }
    if cursor <= end {
        gaps.push(UnitRange::new(cursor as f64, end as f64));
    }
    gaps
}

static SIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*([\d.]+)\s*([kmgt]?)i?b?\s*$").unwrap());

/// Parse a human-readable size string (`"300 MiB"`, `"1.2 GB"`, `"512"`)
/// into bytes. Binary multipliers throughout. Returns 0 for unparseable
/// input.
pub fn parse_size(raw: &str) -> u64 {
    let Some(caps) = SIZE_PATTERN.captures(raw) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier: f64 = match caps[2].to_lowercase().as_str() {
        "" => 1.0,
        "k" => 1024.0,
        "m" => 1024.0 * 1024.0,
        "g" => 1024.0 * 1024.0 * 1024.0,
        "t" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return 0,
    };
    (value * multiplier) as u64
}

/// Gap analysis across every volume of a series, in report form.
///
/// When volume numbering exists and is gap-free the series is treated as
/// structurally complete and chapter gaps are suppressed; chapter parsing is
/// messy in the wild while volume sequences are reliable.
pub fn series_gap_report(series: &Series, config: &CoreConfig) -> Vec<String> {
    let parser = TitleParser::new(config);
    let mut volumes: Vec<UnitRange> = Vec::new();
    let mut chapters: Vec<UnitRange> = Vec::new();

    for volume in series.all_volumes() {
        let parsed = parser.parse(&volume.stem, Some(volume.size_bytes));
        volumes.extend(parsed.volumes);
        chapters.extend(parsed.chapters);
    }

    let vol_gaps = find_gaps(&volumes, series.metadata.total_volumes);
    if !volumes.is_empty() && vol_gaps.is_empty() {
        return Vec::new();
    }

    let mut messages: Vec<String> = Vec::new();
    if !volumes.is_empty() {
        messages.extend(vol_gaps.iter().map(|g| gap_message("Vol", g)));
    }
    if !chapters.is_empty() {
        let ch_gaps = find_gaps(&chapters, series.metadata.total_chapters);
        messages.extend(ch_gaps.iter().map(|g| gap_message("Ch", g)));
    }
    messages
}

fn gap_message(unit: &str, gap: &UnitRange) -> String {
    if gap.is_singleton() {
        format!("Missing {unit} #{}", format_number(gap.low, 0))
    } else {
        format!(
            "Missing {unit} #{}-{}",
            format_number(gap.low, 0),
            format_number(gap.high, 0)
        )
    }
}
