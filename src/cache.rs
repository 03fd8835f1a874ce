use crate::config::CoreConfig;
use crate::error::{DiagnosticKind, Diagnostics, MangaError, Result};
use crate::types::Library;
use chrono::{DateTime, TimeZone, Utc};
use std::fs;
use std::hash::Hasher;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use twox_hash::XxHash64;

const MAGIC: &[u8; 4] = b"VMCB";
const VERSION: u16 = 1;
// magic + version + root hash + written-at millis + payload length
const HEADER_LEN: usize = 4 + 2 + 8 + 8 + 8;

/// Two-file snapshot store keyed by the library root path: a versioned
/// binary frame for fast loads plus a durable JSON rendering the binary
/// falls back to. Writes are atomic (temp file + rename in the same
/// directory); concurrent writers are not supported. The store never
/// deletes itself; [`LibraryCache::clear`] is the caller's explicit
/// invalidation.
#[derive(Debug, Clone)]
pub struct LibraryCache {
    cache_dir: PathBuf,
    max_age_secs: u64,
}

impl LibraryCache {
    pub fn new(cache_dir: PathBuf, max_age_secs: u64) -> Self {
        Self {
            cache_dir,
            max_age_secs,
        }
    }

    pub fn from_config(config: &CoreConfig) -> Self {
        Self::new(config.cache_dir.clone(), config.cache_max_age_secs)
    }

    /// 64-bit key over the normalized absolute root path.
    fn root_key(root: &Path) -> u64 {
        let normalized = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(normalized.to_string_lossy().as_bytes());
        hasher.finish()
    }

    pub fn fast_path(&self, root: &Path) -> PathBuf {
        self.cache_dir
            .join(format!("fast_{:016x}.bin", Self::root_key(root)))
    }

    pub fn durable_path(&self, root: &Path) -> PathBuf {
        self.cache_dir
            .join(format!("durable_{:016x}.json", Self::root_key(root)))
    }

    /// Load the snapshot for `root`, preferring the binary and falling back
    /// to the durable JSON. Unreadable or incompatible files never fail the
    /// call; they are reported as diagnostics.
    pub fn load(&self, root: &Path) -> (Option<Library>, Diagnostics) {
        let mut diagnostics = Diagnostics::new();

        match self.load_fast(root) {
            Ok(Some(library)) => {
                debug!("loaded fast snapshot for {}", root.display());
                return (Some(library), diagnostics);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("fast snapshot unusable for {}: {e}", root.display());
                diagnostics.push(
                    DiagnosticKind::CacheRead,
                    Some(self.fast_path(root)),
                    e.to_string(),
                );
            }
        }

        match self.load_durable(root) {
            Ok(Some(library)) => {
                debug!("loaded durable snapshot for {}", root.display());
                (Some(library), diagnostics)
            }
            Ok(None) => (None, diagnostics),
            Err(e) => {
                warn!("durable snapshot unusable for {}: {e}", root.display());
                diagnostics.push(
                    DiagnosticKind::CacheRead,
                    Some(self.durable_path(root)),
                    e.to_string(),
                );
                (None, diagnostics)
            }
        }
    }

    fn load_fast(&self, root: &Path) -> Result<Option<Library>> {
        let path = self.fast_path(root);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let (library, _written_at) = decode_frame(&bytes, Self::root_key(root))?;
        if library.root != root {
            return Err(invalid_data(format!(
                "snapshot root {} does not match {}",
                library.root.display(),
                root.display()
            )));
        }
        Ok(Some(library))
    }

    fn load_durable(&self, root: &Path) -> Result<Option<Library>> {
        let path = self.durable_path(root);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let library: Library = serde_json::from_str(&raw)?;
        if library.root != root {
            return Err(invalid_data(format!(
                "snapshot root {} does not match {}",
                library.root.display(),
                root.display()
            )));
        }
        Ok(Some(library))
    }

    /// Whether the fast snapshot is young enough that a caller may reuse it
    /// without re-validating every volume's `(size, mtime)`. Staleness
    /// never invalidates the durable JSON.
    pub fn is_fresh(&self, root: &Path) -> bool {
        match self.fast_written_at(root) {
            Some(written_at) => {
                let age = Utc::now().signed_duration_since(written_at);
                age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.max_age_secs
            }
            None => false,
        }
    }

    /// Creation stamp of the fast snapshot, read from the frame header.
    pub fn fast_written_at(&self, root: &Path) -> Option<DateTime<Utc>> {
        let bytes = fs::read(self.fast_path(root)).ok()?;
        let header = parse_header(&bytes, Self::root_key(root)).ok()?;
        Utc.timestamp_millis_opt(header.written_at_ms as i64).single()
    }

    /// Write both files atomically. Failures are non-fatal diagnostics; the
    /// in-memory library stays valid either way. Incomplete libraries are
    /// never persisted.
    pub fn store(&self, library: &Library) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        if !library.complete {
            warn!("refusing to cache incomplete library for {}", library.root.display());
            return diagnostics;
        }

        if let Err(e) = self.store_fast(library) {
            warn!("fast snapshot write failed: {e}");
            diagnostics.push(
                DiagnosticKind::CacheWrite,
                Some(self.fast_path(&library.root)),
                e.to_string(),
            );
        }
        if let Err(e) = self.store_durable(library) {
            warn!("durable snapshot write failed: {e}");
            diagnostics.push(
                DiagnosticKind::CacheWrite,
                Some(self.durable_path(&library.root)),
                e.to_string(),
            );
        }
        if diagnostics.is_empty() {
            info!(
                "cached {} series for {}",
                library.total_series(),
                library.root.display()
            );
        }
        diagnostics
    }

    fn store_fast(&self, library: &Library) -> Result<()> {
        let payload = bincode::serialize(library).map_err(|e| invalid_data(e.to_string()))?;
        let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
        frame.extend_from_slice(MAGIC);
        frame.extend_from_slice(&VERSION.to_be_bytes());
        frame.extend_from_slice(&Self::root_key(&library.root).to_be_bytes());
        frame.extend_from_slice(&(Utc::now().timestamp_millis() as u64).to_be_bytes());
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        frame.extend_from_slice(&payload);
        self.write_atomic(&self.fast_path(&library.root), &frame)
    }

    fn store_durable(&self, library: &Library) -> Result<()> {
        let value = library.to_dict()?;
        let rendered = serde_json::to_string_pretty(&value)?;
        self.write_atomic(&self.durable_path(&library.root), rendered.as_bytes())
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let dir = target.parent().unwrap_or(&self.cache_dir);
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(target).map_err(|e| MangaError::Io(e.error))?;
        Ok(())
    }

    /// Remove both snapshot files for `root`.
    pub fn clear(&self, root: &Path) -> Result<()> {
        for path in [self.fast_path(root), self.durable_path(root)] {
            match fs::remove_file(&path) {
                Ok(()) => info!("removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

struct FrameHeader {
    written_at_ms: u64,
    payload_len: usize,
}

fn invalid_data(msg: impl Into<String>) -> MangaError {
    MangaError::Io(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}

fn parse_header(bytes: &[u8], expected_key: u64) -> Result<FrameHeader> {
    if bytes.len() < HEADER_LEN {
        return Err(invalid_data("frame shorter than header"));
    }
    if &bytes[0..4] != MAGIC {
        return Err(invalid_data("bad magic"));
    }
    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(invalid_data(format!("unsupported snapshot version {version}")));
    }
    let key = u64::from_be_bytes(bytes[6..14].try_into().unwrap());
    if key != expected_key {
        return Err(invalid_data("snapshot belongs to a different root"));
    }
    let written_at_ms = u64::from_be_bytes(bytes[14..22].try_into().unwrap());
    let payload_len = u64::from_be_bytes(bytes[22..30].try_into().unwrap()) as usize;
    Ok(FrameHeader {
        written_at_ms,
        payload_len,
    })
}

fn decode_frame(bytes: &[u8], expected_key: u64) -> Result<(Library, u64)> {
    let header = parse_header(bytes, expected_key)?;
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.payload_len {
        return Err(invalid_data("payload length mismatch"));
    }
    let library: Library =
        bincode::deserialize(payload).map_err(|e| invalid_data(e.to_string()))?;
    Ok((library, header.written_at_ms))
}
