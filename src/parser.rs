use crate::analysis::UnitRange;
use crate::config::CoreConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// What a release title refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Manga,
    LightNovel,
    VisualNovel,
    Audiobook,
    Anthology,
    Periodical,
    /// A manga entry whose byte size is too small for the ranges it claims.
    Undersized,
}

/// Structured result of parsing a messy filename stem or torrent title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTitle {
    pub source: String,
    pub cleaned: String,
    pub kind: EntryKind,
    pub volumes: Vec<UnitRange>,
    pub chapters: Vec<UnitRange>,
    /// Free-text fragments captured from bracketed tags and oddities.
    pub notes: Vec<String>,
    pub size_bytes: Option<u64>,
}

const YEAR_MIN: f64 = 1900.0;
const YEAR_MAX: f64 = 2150.0;

fn in_year_window(n: f64) -> bool {
    (YEAR_MIN..=YEAR_MAX).contains(&n)
}

static ARCHIVE_EXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(?:cbz|cbr|zip|rar|7z|pdf|epub)$").unwrap());

/// Ordered type indicators; first hit wins, otherwise Manga.
static KIND_PATTERNS: Lazy<Vec<(EntryKind, Regex)>> = Lazy::new(|| {
    [
        (EntryKind::LightNovel, r"(?i)light\s*novels?"),
        (EntryKind::LightNovel, r"(?i)\blns?\b"),
        (EntryKind::LightNovel, r"(?i)j-novel"),
        (EntryKind::LightNovel, r"(?i)web\s*novels?"),
        (EntryKind::VisualNovel, r"(?i)visual\s*novels?"),
        (EntryKind::VisualNovel, r"(?i)\bvns?\b"),
        (EntryKind::Audiobook, r"(?i)audiobook"),
        (EntryKind::Anthology, r"(?i)archives\s*[a-z]-[a-z]"),
        (EntryKind::Periodical, r"(?i)\bweekly\b"),
        (EntryKind::Periodical, r"(?i)alpha\s*manga"),
    ]
    .iter()
    .map(|(kind, pat)| (*kind, Regex::new(pat).unwrap()))
    .collect()
});

/// One bracketed group, innermost first when nested (the classes exclude
/// brackets, so only leaf groups match; the caller loops).
static TAG_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\[\]]*)\]|\(([^()]*)\)|\{([^{}]*)\}").unwrap());

/// Tag content that is really a range ("(Chapters 210-220)") gets unwrapped
/// back into the working string instead of dropped to notes.
static RANGE_RESCUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:chapters?|chap|ch|c|volumes?|vol|v|parts?)\.?\s*\d").unwrap()
});

/// "Chapters 210-220 V2": the V2 is a release version, not a volume.
static VERSION_AFTER_CHAPTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\bchapters?\s+[\d.\-]+\s+)(v\d+)\b").unwrap());

/// Bare numeric range token, checked against the year window and the
/// maximum span before number extraction runs.
static RANGE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+(?:\.\d+)?)\s*[-~]\s*(\d+(?:\.\d+)?)\b").unwrap());

static STANDALONE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{4}\b").unwrap());

/// "chapters 210-220 as v24" style volume-to-chapter mapping.
static MAP_AS_VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xi)
        \b chapters? \s*
        ( \d+ (?: \.\d+ )? )                      # chapter start
        (?: \s* - \s* ( \d+ (?: \.\d+ )? ) )?     # chapter end
        \s+ as \s+
        (?: vol (?: ume )? \.? | v ) \s*
        ( \d+ )                                   # volume number
        ",
    )
    .unwrap()
});

/// Run-together volume tokens like v01v02v03 or v01_05.
static MESSY_VOLUME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bv\d+(?:[v_-]\d+)+\b").unwrap());

static VOLUME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xi)
        \b (?: volumes? | vol\.? | parts? | v )
        [\s._]*
        ( \d+ (?: \.\d+ )? )                      # start
        (?:
            \s* - \s*
            (?: volumes? | vol\.? | v )? \s*
            ( \d+ (?: \.\d+ )? )                  # end
        )?
        ",
    )
    .unwrap()
});

// \x23 is '#': a literal hash would open a comment in verbose mode.
static CHAPTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xi)
        (?: \b (?: chapters? | chap | ch\.? | c ) | \x23 )
        [\s._]*
        ( \d+ (?: \.\d+ )? )                      # start
        (?:
            \s* - \s*
            (?: chapters? | chap | ch\.? | c | \x23 )? \s*
            ( \d+ (?: \.\d+ )? )                  # end
        )?
        ",
    )
    .unwrap()
});

static NAKED_TAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+(?:\.\d+)?)(?:\s*-\s*(\d+(?:\.\d+)?))?\s*$").unwrap());

static TRAILING_JUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s+,&]+$").unwrap());

static EDGE_JUNK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s\-+,&|•~_]+|[\s\-+,&|•~_]+$").unwrap());

/// Title parser with the configured noise and protection vocabulary
/// compiled once. Stateless and deterministic; safe to share across workers.
pub struct TitleParser {
    noise: Vec<Regex>,
    protected: Vec<Regex>,
    max_range_size: f64,
    undersized_volume_bytes: u64,
    undersized_chapter_bytes: u64,
}

impl TitleParser {
    pub fn new(config: &CoreConfig) -> Self {
        let compile = |sources: &[String], what: &str| -> Vec<Regex> {
            sources
                .iter()
                .filter_map(|src| match Regex::new(src) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("skipping invalid {what} pattern {src:?}: {e}");
                        None
                    }
                })
                .collect()
        };
        Self {
            noise: compile(&config.noise_phrases, "noise"),
            protected: compile(&config.protected_tokens, "protected-token"),
            max_range_size: f64::from(config.max_range_size),
            undersized_volume_bytes: config.undersized_volume_bytes,
            undersized_chapter_bytes: config.undersized_chapter_bytes,
        }
    }

    /// Parse a raw title through the fixed pipeline: type discrimination,
    /// tag extraction, noise stripping, year elision, token masking,
    /// dual-language split, then range extraction from most to least
    /// explicit, finishing with the undersized check.
    pub fn parse(&self, raw: &str, size_bytes: Option<u64>) -> ParsedTitle {
        let mut notes: Vec<String> = Vec::new();
        let mut volumes: Vec<UnitRange> = Vec::new();
        let mut chapters: Vec<UnitRange> = Vec::new();

        let mut kind = discriminate(raw);
        let mut work = ARCHIVE_EXT.replace(raw, "").into_owned();

        // Tags, innermost first; range-bearing tag content is unwrapped.
        loop {
            let Some(caps) = TAG_GROUP.captures(&work) else {
                break;
            };
            let whole = caps.get(0).unwrap().range();
            let content = caps
                .get(1)
                .or_else(|| caps.get(2))
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let replacement = if RANGE_RESCUE.is_match(&content) {
                format!(" {content} ")
            } else {
                if !content.is_empty() {
                    notes.push(content);
                }
                " ".to_string()
            };
            work.replace_range(whole, &replacement);
        }

        // Noise vocabulary, plus the chapter-version special case.
        work = VERSION_AFTER_CHAPTER.replace_all(&work, "$1").into_owned();
        for pattern in &self.noise {
            work = pattern.replace_all(&work, " ").into_owned();
        }

        // Year elision: oversized or year-touching range tokens vanish
        // whole, then lone years vanish.
        work = RANGE_TOKEN
            .replace_all(&work, |caps: &regex::Captures| {
                let low: f64 = caps[1].parse().unwrap_or(0.0);
                let high: f64 = caps[2].parse().unwrap_or(0.0);
                if high - low > self.max_range_size
                    || in_year_window(low)
                    || in_year_window(high)
                {
                    debug!("discarding range token {:?}", &caps[0]);
                    " ".to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();
        work = STANDALONE_YEAR
            .replace_all(&work, |caps: &regex::Captures| {
                let n: f64 = caps[0].parse().unwrap_or(0.0);
                if in_year_window(n) {
                    " ".to_string()
                } else {
                    caps[0].to_string()
                }
            })
            .into_owned();

        // Mask protected tokens so title numerals survive extraction.
        let mut masks: Vec<(String, String)> = Vec::new();
        for pattern in &self.protected {
            while let Some(m) = pattern.find(&work) {
                let placeholder = format!("__MASK_{}__", mask_tag(masks.len()));
                masks.push((placeholder.clone(), m.as_str().to_string()));
                let range = m.range();
                work.replace_range(range, &placeholder);
            }
        }

        // Dual-language split: keep the stronger segment.
        if work.contains(['|', '｜', '•']) {
            let parts: Vec<String> = work
                .split(['|', '｜', '•'])
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
            if !parts.is_empty() {
                let mut best = 0;
                for i in 1..parts.len() {
                    if segment_beats(&parts[i], &parts[best]) {
                        best = i;
                    }
                }
                for (i, part) in parts.iter().enumerate() {
                    if i != best {
                        notes.push(part.clone());
                    }
                }
                work = parts[best].clone();
            }
        }

        // Numbers occurring before the first range prefix belong to the
        // title ("Persona 5 v01"); remember where the prefixes start.
        let earliest_prefix = [&*MAP_AS_VOLUME, &*MESSY_VOLUME, &*VOLUME, &*CHAPTER]
            .iter()
            .filter_map(|re| re.find(&work).map(|m| m.start()))
            .min();
        let prefix_found = earliest_prefix.is_some();
        let protected_len = earliest_prefix.unwrap_or(0);

        // Volume-to-chapter mapping.
        if let Some(caps) = MAP_AS_VOLUME.captures(&work) {
            let whole = caps.get(0).unwrap().range();
            let low: f64 = caps[1].parse().unwrap_or(-1.0);
            let high: f64 = caps.get(2).map_or(low, |m| m.as_str().parse().unwrap_or(low));
            self.accept_range(low, high, &mut chapters, "mapped chapter");
            let vol: f64 = caps[3].parse().unwrap_or(-1.0);
            self.accept_range(vol, vol, &mut volumes, "mapped volume");
            work.replace_range(whole, " ");
        }

        // Messy volume tokens reduce to the widest consistent range.
        while let Some(m) = MESSY_VOLUME.find(&work) {
            let token = m.as_str().to_string();
            let range = m.range();
            let nums: Vec<f64> = token
                .split(|c: char| !c.is_ascii_digit() && c != '.')
                .filter(|p| !p.is_empty())
                .filter_map(|p| p.parse().ok())
                .collect();
            if let (Some(&low), Some(&high)) = (
                nums.iter()
                    .min_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
                nums.iter()
                    .max_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)),
            ) {
                self.accept_range(low, high, &mut volumes, "messy volume");
                notes.push(format!("Messy volume: {token}"));
            }
            work.replace_range(range, " ");
        }

        // Standard volume tokens.
        while let Some(caps) = VOLUME.captures(&work) {
            let whole = caps.get(0).unwrap().range();
            let low: f64 = caps[1].parse().unwrap_or(-1.0);
            let high: f64 = caps.get(2).map_or(low, |m| m.as_str().parse().unwrap_or(low));
            self.accept_range(low, high, &mut volumes, "volume");
            work.replace_range(whole, " ");
        }

        // Standard chapter tokens.
        while let Some(caps) = CHAPTER.captures(&work) {
            let whole = caps.get(0).unwrap().range();
            let low: f64 = caps[1].parse().unwrap_or(-1.0);
            let high: f64 = caps.get(2).map_or(low, |m| m.as_str().parse().unwrap_or(low));
            self.accept_range(low, high, &mut chapters, "chapter");
            work.replace_range(whole, " ");
        }

        // Naked numbers: peel trailing ranges/singletons off the residual,
        // but never eat the title itself.
        if chapters.is_empty() {
            loop {
                let trimmed = TRAILING_JUNK.replace(&work, "").into_owned();
                work = trimmed;
                let Some(caps) = NAKED_TAIL.captures(&work) else {
                    break;
                };
                let start = caps.get(0).unwrap().start();
                if prefix_found && start < protected_len {
                    break;
                }
                if start == 0 || EDGE_JUNK.replace_all(&work[..start], "").is_empty() {
                    break;
                }
                let low: f64 = caps[1].parse().unwrap_or(-1.0);
                let high: f64 = caps.get(2).map_or(low, |m| m.as_str().parse().unwrap_or(low));
                if low < 0.0 || high < low || in_year_window(low) || in_year_window(high) {
                    break;
                }
                self.accept_range(low, high, &mut chapters, "naked number");
                work.truncate(start);
            }
        }

        // Restore masked tokens into the title, then tidy the edges.
        for (placeholder, original) in &masks {
            work = work.replace(placeholder, original);
        }
        let cleaned = EDGE_JUNK
            .replace_all(&work, "")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        // Undersized check: a claimed range needs the bytes to back it.
        if kind == EntryKind::Manga {
            if let Some(size) = size_bytes {
                if !volumes.is_empty() && size < self.undersized_volume_bytes {
                    kind = EntryKind::Undersized;
                } else if volumes.is_empty()
                    && !chapters.is_empty()
                    && size < self.undersized_chapter_bytes
                {
                    kind = EntryKind::Undersized;
                }
            }
        }

        ParsedTitle {
            source: raw.to_string(),
            cleaned,
            kind,
            volumes,
            chapters,
            notes,
            size_bytes,
        }
    }

    fn accept_range(&self, low: f64, high: f64, target: &mut Vec<UnitRange>, what: &str) {
        if low < 0.0 || high < low {
            debug!("rejecting {what} range [{low}, {high}]: out of order");
            return;
        }
        if high - low > self.max_range_size {
            debug!("rejecting {what} range [{low}, {high}]: span too wide");
            return;
        }
        if in_year_window(low) || in_year_window(high) {
            debug!("rejecting {what} range [{low}, {high}]: year-like endpoint");
            return;
        }
        target.push(UnitRange::new(low, high));
    }
}

/// One-shot convenience over [`TitleParser`]. Callers parsing in bulk should
/// build the parser once.
pub fn parse_title(raw: &str, size_bytes: Option<u64>, config: &CoreConfig) -> ParsedTitle {
    TitleParser::new(config).parse(raw, size_bytes)
}

fn discriminate(raw: &str) -> EntryKind {
    for (kind, pattern) in KIND_PATTERNS.iter() {
        if pattern.is_match(raw) {
            return *kind;
        }
    }
    EntryKind::Manga
}

fn ascii_letters(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_alphabetic()).count()
}

fn segment_beats(candidate: &str, incumbent: &str) -> bool {
    let (c_len, i_len) = (candidate.chars().count(), incumbent.chars().count());
    c_len > i_len || (c_len == i_len && ascii_letters(candidate) > ascii_letters(incumbent))
}

/// Excel-style letter tag, so placeholders never contain digits that the
/// number extraction could pick up.
fn mask_tag(idx: usize) -> String {
    let mut n = idx + 1;
    let mut out: Vec<u8> = Vec::new();
    while n > 0 {
        n -= 1;
        out.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap()
}
