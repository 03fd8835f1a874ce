use crate::error::Result;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Name of the per-series metadata file.
pub const METADATA_FILENAME: &str = "series.json";

/// Publication status of a series.
///
/// Deserialization is lenient: it accepts the canonical lowercase strings as
/// well as the labels external catalogs use ("Finished", "Publishing",
/// "On Hiatus", "Discontinued"); anything unrecognized maps to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicationStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
    #[default]
    Unknown,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Ongoing => "ongoing",
            PublicationStatus::Completed => "completed",
            PublicationStatus::Hiatus => "hiatus",
            PublicationStatus::Cancelled => "cancelled",
            PublicationStatus::Unknown => "unknown",
        }
    }

    /// Map an external status label onto the enum.
    pub fn from_external(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "ongoing" | "publishing" => PublicationStatus::Ongoing,
            "completed" | "finished" => PublicationStatus::Completed,
            "hiatus" | "on hiatus" => PublicationStatus::Hiatus,
            "cancelled" | "canceled" | "discontinued" => PublicationStatus::Cancelled,
            _ => PublicationStatus::Unknown,
        }
    }
}

impl std::fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for PublicationStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PublicationStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(PublicationStatus::from_external(&raw))
    }
}

/// The metadata record anchoring a series to its external identity.
///
/// Mirrors the `series.json` schema exactly; unknown keys are ignored on
/// load and absent keys default to empty. An all-default record is "empty
/// metadata".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeriesMetadata {
    pub mal_id: Option<u32>,
    /// Romanized title.
    pub title: Option<String>,
    pub title_english: Option<String>,
    pub title_japanese: Option<String>,
    pub synonyms: Vec<String>,
    pub authors: Vec<String>,
    pub synopsis: Option<String>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub demographic: Option<String>,
    pub status: PublicationStatus,
    pub total_volumes: Option<u32>,
    pub total_chapters: Option<u32>,
    pub year: Option<i32>,
}

impl SeriesMetadata {
    pub fn is_empty(&self) -> bool {
        *self == SeriesMetadata::default()
    }

    /// The three title fields, in romanized/english/native order, skipping
    /// empty ones.
    pub fn titles(&self) -> impl Iterator<Item = &str> {
        [&self.title, &self.title_english, &self.title_japanese]
            .into_iter()
            .filter_map(|t| t.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Load `series.json` from a series folder. `Ok(None)` when the file is
    /// absent; a malformed file is an error for the caller to downgrade to a
    /// per-item diagnostic.
    pub fn load(series_path: &Path) -> Result<Option<Self>> {
        let meta_path = series_path.join(METADATA_FILENAME);
        if !meta_path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&meta_path)?;
        let metadata: SeriesMetadata = serde_json::from_str(&raw)?;
        debug!("loaded metadata from {}", meta_path.display());
        Ok(Some(metadata))
    }

    /// Write `series.json` atomically with sorted keys and two-space
    /// indentation for human diffability.
    pub fn save(&self, series_path: &Path) -> Result<()> {
        let meta_path = series_path.join(METADATA_FILENAME);
        let rendered = self.to_sorted_json()?;
        let mut tmp = tempfile::NamedTempFile::new_in(series_path)?;
        tmp.write_all(rendered.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&meta_path).map_err(|e| e.error)?;
        debug!("wrote metadata to {}", meta_path.display());
        Ok(())
    }

    /// Render with sorted keys and two-space indentation. Round-trips to
    /// byte-equal output.
    pub fn to_sorted_json(&self) -> Result<String> {
        // serde_json's Map is a BTreeMap without the preserve_order feature,
        // so going through Value sorts the keys.
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}
