use crate::error::{MangaError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use tracing::info;

const MIB: u64 = 1024 * 1024;

/// Which metadata title the renamer prefers when aligning folder and file
/// names. Remaining titles and finally the folder name are the fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TitlePolicy {
    #[default]
    English,
    Romanized,
    Native,
    Folder,
}

fn default_library_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_cache_max_age_secs() -> u64 {
    3_000
}

fn default_fuzzy_threshold() -> f64 {
    0.90
}

fn default_fuzzy_refine_threshold() -> f64 {
    0.80
}

fn default_dedupe_similarity_threshold() -> f64 {
    0.95
}

fn default_undersized_volume_bytes() -> u64 {
    35 * MIB
}

fn default_undersized_chapter_bytes() -> u64 {
    4 * MIB
}

fn default_max_range_size() -> u32 {
    200
}

/// Release-noise phrases stripped from titles before number extraction.
/// New phrases are added here, never in parser code.
fn default_noise_phrases() -> Vec<String> {
    [
        r"(?i)\bcomplete\s+edition\b",
        r"(?i)\bnew\s+edition\b",
        r"(?i)\bthe\s+complete\s+manga\s+collection\b",
        r"(?i)\bcomic\s+anthology\b",
        r"(?i)\bspecial\s+issue\b",
        r"(?i)\bofficial\b",
        r"(?i)\bdigital\b",
        r"(?i)\bcolou?red\b",
        r"(?i)\bremastered\b",
        r"(?i)\bseason\s+\d+\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Substrings masked before number extraction and restored into the cleaned
/// title afterwards, so title numerals ("Kaiju No. 8", "Part 2") never leak
/// into volume or chapter ranges.
fn default_protected_tokens() -> Vec<String> {
    [
        r"(?i)\bpart\s+\d+\b",
        r"(?i)\bno\.\s*\d+\b",
        r"(?i)\bkaiju\s+no\.?\s*8\b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// All tunables of the core, injected into every operation. No component
/// reads process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Root of the four-level library tree (root/main/sub/series).
    pub library_root: PathBuf,
    /// Worker-pool size for scanning and pair scoring. 0 means one worker
    /// per available core.
    pub worker_threads: usize,
    /// Directory holding the fast/durable snapshot pair.
    pub cache_dir: PathBuf,
    /// Maximum age of the fast snapshot before a reuse must re-validate
    /// every volume's `(size, mtime)` against the filesystem.
    pub cache_max_age_secs: u64,
    /// Minimum fuzzy score the matcher accepts.
    pub fuzzy_threshold: f64,
    /// Floor above which the LCS ratio refines a Jaccard score.
    pub fuzzy_refine_threshold: f64,
    /// Minimum similarity for the deduper's fuzzy-name detector.
    pub dedupe_similarity_threshold: f64,
    /// Manga entries with a volume range below this byte size are Undersized.
    pub undersized_volume_bytes: u64,
    /// Chapter-only entries below this byte size are Undersized.
    pub undersized_chapter_bytes: u64,
    /// Widest span a parsed range may cover; wider tokens are discarded.
    pub max_range_size: u32,
    pub noise_phrases: Vec<String>,
    pub protected_tokens: Vec<String>,
    pub title_policy: TitlePolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            library_root: default_library_root(),
            worker_threads: 0,
            cache_dir: default_cache_dir(),
            cache_max_age_secs: default_cache_max_age_secs(),
            fuzzy_threshold: default_fuzzy_threshold(),
            fuzzy_refine_threshold: default_fuzzy_refine_threshold(),
            dedupe_similarity_threshold: default_dedupe_similarity_threshold(),
            undersized_volume_bytes: default_undersized_volume_bytes(),
            undersized_chapter_bytes: default_undersized_chapter_bytes(),
            max_range_size: default_max_range_size(),
            noise_phrases: default_noise_phrases(),
            protected_tokens: default_protected_tokens(),
            title_policy: TitlePolicy::default(),
        }
    }
}

/// Source that produced the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
}

impl CoreConfig {
    /// Load configuration overrides from the environment. Evaluation order:
    /// 1) `$VIBEMANGA_CONFIG_PATH` (JSON file),
    /// 2) `$VIBEMANGA_CONFIG_JSON` (inline JSON),
    /// 3) defaults if neither is set.
    pub fn load_from_env() -> Result<(Self, ConfigSource)> {
        if let Ok(path_str) = env::var("VIBEMANGA_CONFIG_PATH") {
            if !path_str.trim().is_empty() {
                let path = PathBuf::from(path_str);
                let raw = fs::read_to_string(&path).map_err(|e| {
                    MangaError::Precondition(format!(
                        "config file {} unreadable: {e}",
                        path.display()
                    ))
                })?;
                let config: CoreConfig = serde_json::from_str(&raw).map_err(|e| {
                    MangaError::Precondition(format!(
                        "config file {} invalid: {e}",
                        path.display()
                    ))
                })?;
                info!("loaded configuration from {}", path.display());
                return Ok((config, ConfigSource::EnvPath(path)));
            }
        }

        if let Ok(inline) = env::var("VIBEMANGA_CONFIG_JSON") {
            if !inline.trim().is_empty() {
                let config: CoreConfig = serde_json::from_str(&inline).map_err(|e| {
                    MangaError::Precondition(format!("inline config invalid: {e}"))
                })?;
                info!("loaded configuration from VIBEMANGA_CONFIG_JSON");
                return Ok((config, ConfigSource::EnvInline));
            }
        }

        Ok((CoreConfig::default(), ConfigSource::Default))
    }

    /// Effective worker count: the configured number, or one per core.
    pub fn effective_workers(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_documented_thresholds() {
        let config = CoreConfig::default();
        assert_eq!(config.cache_max_age_secs, 3_000);
        assert_eq!(config.undersized_volume_bytes, 35 * MIB);
        assert_eq!(config.undersized_chapter_bytes, 4 * MIB);
        assert_eq!(config.max_range_size, 200);
        assert!((config.fuzzy_threshold - 0.90).abs() < f64::EPSILON);
        assert_eq!(config.title_policy, TitlePolicy::English);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: CoreConfig =
            serde_json::from_str(r#"{ "worker_threads": 4, "fuzzy_threshold": 0.85 }"#).unwrap();
        assert_eq!(config.worker_threads, 4);
        assert!((config.fuzzy_threshold - 0.85).abs() < f64::EPSILON);
        assert_eq!(config.cache_max_age_secs, 3_000);
        assert!(!config.noise_phrases.is_empty());
    }

    #[test]
    fn effective_workers_never_zero() {
        let mut config = CoreConfig::default();
        assert!(config.effective_workers() >= 1);
        config.worker_threads = 3;
        assert_eq!(config.effective_workers(), 3);
    }
}
