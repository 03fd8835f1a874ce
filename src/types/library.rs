use crate::error::Result;
use crate::types::metadata::SeriesMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A single manga archive file. Identity within a series is the filename
/// stem; `page_count` and `corrupt` are enrichment carried through rescans
/// while `(size_bytes, modified)` stays unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub path: PathBuf,
    pub stem: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub page_count: Option<u32>,
    pub corrupt: bool,
}

impl Volume {
    pub fn new(path: PathBuf, size_bytes: u64, modified: DateTime<Utc>) -> Self {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            stem,
            size_bytes,
            modified,
            page_count: None,
            corrupt: false,
        }
    }

    /// Lowercased extension without the dot, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// A named subdirectory inside a series folder (e.g. `v01-v10`,
/// `Side Stories`) owning its own volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubGroup {
    pub name: String,
    pub path: PathBuf,
    pub volumes: Vec<Volume>,
}

impl SubGroup {
    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.volumes.iter().map(|v| v.size_bytes).sum()
    }

    pub fn total_pages(&self) -> u64 {
        self.volumes
            .iter()
            .filter_map(|v| v.page_count)
            .map(u64::from)
            .sum()
    }
}

/// One manga title: volumes directly in the folder plus optional subgroups,
/// anchored by its metadata record (always present, possibly empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub path: PathBuf,
    pub volumes: Vec<Volume>,
    pub sub_groups: Vec<SubGroup>,
    pub metadata: SeriesMetadata,
}

impl Series {
    pub fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            volumes: Vec::new(),
            sub_groups: Vec::new(),
            metadata: SeriesMetadata::default(),
        }
    }

    /// Every string that names this series: folder name, the three titles,
    /// and all synonyms, deduplicated in that order with empties removed.
    pub fn identities(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        let candidates = std::iter::once(self.name.as_str())
            .chain(self.metadata.titles())
            .chain(self.metadata.synonyms.iter().map(|s| s.as_str()));
        for candidate in candidates {
            if !candidate.is_empty() && !seen.contains(&candidate) {
                seen.push(candidate);
            }
        }
        seen
    }

    /// All volumes, root-level first, then per subgroup.
    pub fn all_volumes(&self) -> impl Iterator<Item = &Volume> {
        self.volumes
            .iter()
            .chain(self.sub_groups.iter().flat_map(|sg| sg.volumes.iter()))
    }

    pub fn total_volume_count(&self) -> usize {
        self.volumes.len()
            + self
                .sub_groups
                .iter()
                .map(|sg| sg.volume_count())
                .sum::<usize>()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.all_volumes().map(|v| v.size_bytes).sum()
    }

    pub fn total_pages(&self) -> u64 {
        self.all_volumes()
            .filter_map(|v| v.page_count)
            .map(u64::from)
            .sum()
    }

    pub fn has_sub_groups(&self) -> bool {
        !self.sub_groups.is_empty()
    }
}

/// A main or sub category. The tree is exactly two levels deep: main
/// categories hold sub categories, sub categories hold series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    pub path: PathBuf,
    pub sub_categories: Vec<Category>,
    pub series: Vec<Series>,
}

impl Category {
    pub fn new(name: String, path: PathBuf) -> Self {
        Self {
            name,
            path,
            sub_categories: Vec::new(),
            series: Vec::new(),
        }
    }

    pub fn total_series_count(&self) -> usize {
        self.series.len()
            + self
                .sub_categories
                .iter()
                .map(|c| c.total_series_count())
                .sum::<usize>()
    }

    pub fn total_volume_count(&self) -> usize {
        self.series
            .iter()
            .map(|s| s.total_volume_count())
            .sum::<usize>()
            + self
                .sub_categories
                .iter()
                .map(|c| c.total_volume_count())
                .sum::<usize>()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.series.iter().map(|s| s.total_size_bytes()).sum::<u64>()
            + self
                .sub_categories
                .iter()
                .map(|c| c.total_size_bytes())
                .sum::<u64>()
    }
}

fn default_complete() -> bool {
    true
}

/// The root of the collection: an ordered tree of main categories.
///
/// A library produced by a cancelled scan carries `complete = false` and is
/// never written to cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub root: PathBuf,
    #[serde(default = "default_complete")]
    pub complete: bool,
    pub categories: Vec<Category>,
}

impl Library {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            complete: true,
            categories: Vec::new(),
        }
    }

    /// Every series in traversal order (main, then sub, alphabetic at each
    /// level as the scanner assembled them).
    pub fn iter_series(&self) -> impl Iterator<Item = &Series> {
        self.categories.iter().flat_map(|main| {
            main.series
                .iter()
                .chain(main.sub_categories.iter().flat_map(|sub| sub.series.iter()))
        })
    }

    pub fn iter_series_mut(&mut self) -> impl Iterator<Item = &mut Series> {
        self.categories.iter_mut().flat_map(|main| {
            main.series.iter_mut().chain(
                main.sub_categories
                    .iter_mut()
                    .flat_map(|sub| sub.series.iter_mut()),
            )
        })
    }

    /// Main plus sub category count.
    pub fn total_categories(&self) -> usize {
        self.categories.len()
            + self
                .categories
                .iter()
                .map(|c| c.sub_categories.len())
                .sum::<usize>()
    }

    pub fn total_series(&self) -> usize {
        self.categories
            .iter()
            .map(|c| c.total_series_count())
            .sum()
    }

    pub fn total_volumes(&self) -> usize {
        self.categories
            .iter()
            .map(|c| c.total_volume_count())
            .sum()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.categories.iter().map(|c| c.total_size_bytes()).sum()
    }

    pub fn total_pages(&self) -> u64 {
        self.iter_series().map(|s| s.total_pages()).sum()
    }

    /// The library as a JSON value (nested categories → series →
    /// subgroups/volumes plus metadata).
    pub fn to_dict(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_dict(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Find a series by its absolute path, re-deriving ownership through path
/// comparison instead of back-references.
pub fn find_series_by_path<'a>(library: &'a Library, path: &Path) -> Option<&'a Series> {
    library.iter_series().find(|s| s.path == path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn vol(name: &str, size: u64) -> Volume {
        let modified = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        Volume::new(PathBuf::from(format!("/lib/m/s/t/{name}")), size, modified)
    }

    fn sample_library() -> Library {
        let mut series = Series::new("One Piece".into(), "/lib/Manga/Shounen/One Piece".into());
        series.volumes.push(vol("One Piece v01.cbz", 60 << 20));
        series.volumes.push(vol("One Piece v02.cbz", 64 << 20));
        series.sub_groups.push(SubGroup {
            name: "Omnibus".into(),
            path: "/lib/Manga/Shounen/One Piece/Omnibus".into(),
            volumes: vec![vol("One Piece Omnibus v01-03.cbz", 180 << 20)],
        });
        series.metadata.mal_id = Some(13);
        series.metadata.title_english = Some("One Piece".into());

        let mut sub = Category::new("Shounen".into(), "/lib/Manga/Shounen".into());
        sub.series.push(series);
        let mut main = Category::new("Manga".into(), "/lib/Manga".into());
        main.sub_categories.push(sub);

        let mut library = Library::new("/lib".into());
        library.categories.push(main);
        library
    }

    #[test]
    fn totals_aggregate_across_subgroups() {
        let library = sample_library();
        assert_eq!(library.total_categories(), 2);
        assert_eq!(library.total_series(), 1);
        assert_eq!(library.total_volumes(), 3);
        assert_eq!(library.total_size_bytes(), (60 + 64 + 180) << 20);
    }

    #[test]
    fn dict_round_trip_yields_equal_library() {
        let library = sample_library();
        let value = library.to_dict().unwrap();
        let reloaded = Library::from_dict(value).unwrap();
        assert_eq!(library, reloaded);
    }

    #[test]
    fn identities_skip_empties_and_duplicates() {
        let mut series = Series::new("Attack on Titan".into(), "/x/Attack on Titan".into());
        series.metadata.title = Some("Shingeki no Kyojin".into());
        series.metadata.title_english = Some("Attack on Titan".into());
        series.metadata.synonyms = vec!["AoT".into(), "".into(), "AoT".into()];

        assert_eq!(
            series.identities(),
            vec!["Attack on Titan", "Shingeki no Kyojin", "AoT"]
        );
    }

    #[test]
    fn volume_stem_and_extension_derive_from_path() {
        let v = vol("Berserk v01.CBZ", 10);
        assert_eq!(v.stem, "Berserk v01");
        assert_eq!(v.extension().as_deref(), Some("cbz"));
        assert_eq!(v.page_count, None);
        assert!(!v.corrupt);
    }

    #[test]
    fn find_series_by_path_walks_the_tree() {
        let library = sample_library();
        let path = Path::new("/lib/Manga/Shounen/One Piece");
        assert!(find_series_by_path(&library, path).is_some());
        assert!(find_series_by_path(&library, Path::new("/lib/nope")).is_none());
    }
}
