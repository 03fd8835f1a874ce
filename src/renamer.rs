use crate::config::TitlePolicy;
use crate::error::MangaError;
use crate::parser::TitleParser;
use crate::types::{Library, Series};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenameKind {
    Folder,
    FileExtension,
    FileName,
}

impl RenameKind {
    /// Execution rank within one depth: extension normalization must land
    /// before the name rewrite that assumes it, folders last.
    fn rank(self) -> u8 {
        match self {
            RenameKind::FileExtension => 0,
            RenameKind::FileName => 1,
            RenameKind::Folder => 2,
        }
    }
}

/// One rename intent. Safety 1 is trivial (case/whitespace/extension),
/// 2 is safe, 3 is aggressive; `uncertain` marks entries built without any
/// parsed range to anchor on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub kind: RenameKind,
    pub safety: u8,
    pub uncertain: bool,
    pub collision: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RenameOptions {
    pub policy: TitlePolicy,
    /// Resolve new-path collisions by suffixing " (2)" instead of skipping.
    pub allow_suffix: bool,
    /// Series folder names to leave untouched.
    pub skip: HashSet<String>,
}

/// Strip characters illegal on the strictest supported filesystem, collapse
/// space runs, and drop trailing dots and spaces.
pub fn sanitize_name(raw: &str) -> String {
    let filtered: String = raw
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') && !c.is_control())
        .collect();
    filtered
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(['.', ' '])
        .to_string()
}

/// Pick the target series name: the preferred title, falling back through
/// the remaining titles and finally the folder name.
pub fn target_name(series: &Series, policy: TitlePolicy) -> String {
    let meta = &series.metadata;
    let ordered: Vec<&Option<String>> = match policy {
        TitlePolicy::English => vec![&meta.title_english, &meta.title, &meta.title_japanese],
        TitlePolicy::Romanized => vec![&meta.title, &meta.title_english, &meta.title_japanese],
        TitlePolicy::Native => vec![&meta.title_japanese, &meta.title, &meta.title_english],
        TitlePolicy::Folder => vec![],
    };
    for candidate in ordered.into_iter().flatten() {
        let sanitized = sanitize_name(candidate);
        if !sanitized.is_empty() {
            return sanitized;
        }
    }
    sanitize_name(&series.name)
}

fn equal_modulo_case_and_whitespace(a: &str, b: &str) -> bool {
    let fold = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    fold(a) == fold(b)
}

/// Case-insensitive prefix strip that never slices mid-character.
fn strip_prefix_ci<'s>(stem: &'s str, prefix: &str) -> Option<&'s str> {
    if prefix.is_empty() {
        return None;
    }
    let mut end = 0usize;
    let mut stem_chars = stem.char_indices();
    for prefix_char in prefix.chars() {
        match stem_chars.next() {
            Some((i, stem_char)) if stem_char.to_lowercase().eq(prefix_char.to_lowercase()) => {
                end = i + stem_char.len_utf8();
            }
            _ => return None,
        }
    }
    Some(stem[end..].trim_start())
}

/// Build the rename plan for one series: folder alignment, `.zip`/`.rar`
/// extension normalization, and file-name rewrites that keep the parsed
/// volume/chapter segment verbatim. The plan is ordered deepest first so
/// parent renames never invalidate child paths; it does not touch the
/// filesystem.
pub fn build_plan(series: &Series, parser: &TitleParser, options: &RenameOptions) -> Vec<PlanEntry> {
    if options.skip.contains(&series.name) {
        debug!("skipping {:?}: in skip set", series.name);
        return Vec::new();
    }

    let target = target_name(series, options.policy);
    let mut entries: Vec<PlanEntry> = Vec::new();

    for volume in series.all_volumes() {
        let ext = volume.extension().unwrap_or_default();
        let normalized_ext = match ext.as_str() {
            "zip" => "cbz".to_string(),
            "rar" => "cbr".to_string(),
            other => other.to_string(),
        };
        let parent = volume
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        if normalized_ext != ext {
            entries.push(PlanEntry {
                old_path: volume.path.clone(),
                new_path: parent.join(format!("{}.{normalized_ext}", volume.stem)),
                kind: RenameKind::FileExtension,
                safety: 1,
                uncertain: false,
                collision: false,
            });
        }

        let parsed = parser.parse(&volume.stem, Some(volume.size_bytes));
        if parsed.cleaned == target {
            continue;
        }

        let sanitized_folder = sanitize_name(&series.name);
        let segment = [
            sanitized_folder.as_str(),
            series.name.as_str(),
            parsed.cleaned.as_str(),
        ]
        .iter()
        .find_map(|prefix| strip_prefix_ci(&volume.stem, prefix))
        .unwrap_or(&volume.stem);

        let new_stem = if segment.is_empty() {
            target.clone()
        } else {
            format!("{target} {segment}")
        };
        let new_stem = new_stem.split_whitespace().collect::<Vec<_>>().join(" ");
        let old_name = format!("{}.{normalized_ext}", volume.stem);
        let new_name = format!("{new_stem}.{normalized_ext}");
        if new_name == old_name {
            continue;
        }

        let anchored = !parsed.volumes.is_empty() || !parsed.chapters.is_empty();
        entries.push(PlanEntry {
            old_path: parent.join(&old_name),
            new_path: parent.join(&new_name),
            kind: RenameKind::FileName,
            safety: if anchored { 2 } else { 3 },
            uncertain: !anchored,
            collision: false,
        });
    }

    if target != series.name {
        let parent = series
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let trivial = equal_modulo_case_and_whitespace(&target, &series.name);
        entries.push(PlanEntry {
            old_path: series.path.clone(),
            new_path: parent.join(&target),
            kind: RenameKind::Folder,
            safety: if trivial { 1 } else { 2 },
            uncertain: false,
            collision: false,
        });
    }

    resolve_collisions(&mut entries, options.allow_suffix);
    sort_plan(&mut entries);
    entries
}

/// Plan across a whole library, one deterministic ordering end to end.
pub fn build_library_plan(
    library: &Library,
    parser: &TitleParser,
    options: &RenameOptions,
) -> Vec<PlanEntry> {
    let mut entries: Vec<PlanEntry> = Vec::new();
    for series in library.iter_series() {
        entries.extend(build_plan(series, parser, options));
    }
    sort_plan(&mut entries);
    entries
}

fn resolve_collisions(entries: &mut [PlanEntry], allow_suffix: bool) {
    let mut seen: HashMap<PathBuf, Vec<usize>> = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        seen.entry(entry.new_path.clone()).or_default().push(i);
    }
    for indices in seen.values() {
        if indices.len() < 2 {
            continue;
        }
        if allow_suffix {
            for (ordinal, &i) in indices.iter().enumerate().skip(1) {
                entries[i].new_path = suffixed(&entries[i].new_path, ordinal + 1);
            }
        } else {
            for &i in indices {
                entries[i].collision = true;
            }
            warn!(
                "collision on {}: {} entries skipped",
                entries[indices[0]].new_path.display(),
                indices.len()
            );
        }
    }
}

fn suffixed(path: &Path, ordinal: usize) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem} ({ordinal}).{}", ext.to_string_lossy()),
        None => format!("{stem} ({ordinal})"),
    };
    path.with_file_name(name)
}

fn sort_plan(entries: &mut [PlanEntry]) {
    entries.sort_by(|a, b| {
        let depth_a = a.old_path.components().count();
        let depth_b = b.old_path.components().count();
        depth_b
            .cmp(&depth_a)
            .then_with(|| a.kind.rank().cmp(&b.kind.rank()))
            .then_with(|| a.new_path.cmp(&b.new_path))
    });
}

/// Outcome of executing a plan: the index of the last entry that applied,
/// and the error that stopped execution, if any.
#[derive(Debug)]
pub struct ApplyReport {
    pub last_applied: Option<usize>,
    pub error: Option<MangaError>,
}

impl ApplyReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Execute a plan in order, skipping collision-marked entries, stopping at
/// the first filesystem error.
pub fn apply_plan(plan: &[PlanEntry]) -> ApplyReport {
    let mut last_applied = None;
    for (i, entry) in plan.iter().enumerate() {
        if entry.collision {
            debug!("skipping collision entry {}", entry.new_path.display());
            continue;
        }
        match fs::rename(&entry.old_path, &entry.new_path) {
            Ok(()) => {
                debug!(
                    "renamed {} -> {}",
                    entry.old_path.display(),
                    entry.new_path.display()
                );
                last_applied = Some(i);
            }
            Err(e) => {
                warn!(
                    "rename failed at entry {i} ({} -> {}): {e}",
                    entry.old_path.display(),
                    entry.new_path.display()
                );
                return ApplyReport {
                    last_applied,
                    error: Some(e.into()),
                };
            }
        }
    }
    if let Some(last) = last_applied {
        info!("applied {} renames", last + 1);
    }
    ApplyReport {
        last_applied,
        error: None,
    }
}
