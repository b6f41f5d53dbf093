//! Knowledge source discovery from an on-disk layout.
//!
//! Sources live in a two-level directory structure. The first level names
//! the routing category, the second the source id, and each source keeps
//! its current version under `latest/`:
//!
//! ```text
//! <root>/
//!   clinical_guidelines/
//!     ada_standards/
//!       latest -> 2025          # symlink target name is the version
//!         metadata.json         # optional descriptor
//!         standards.pdf
//!   user_sources/
//!     pump_manual/
//!       latest/
//!         manual.pdf
//!   knowledge_base/
//!     community_wiki/
//!       latest/
//!         .git/                 # marker: repository source
//! ```
//!
//! Discovery never fails: a missing root yields an empty map, and bad
//! descriptors fall back to defaults with a warning.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RegistryConfig;
use crate::models::{Category, KnowledgeSource, SourceKind, StalenessTier};

pub const LATEST_DIR: &str = "latest";
pub const METADATA_FILE: &str = "metadata.json";
const REPOSITORY_MARKER: &str = ".repository";

/// Sources updated within this many days are current.
pub const CURRENT_MAX_DAYS: i64 = 180;
/// Sources updated within this many days (and not current) are stale.
pub const STALE_MAX_DAYS: i64 = 365;

/// Optional per-source descriptor written by ingestion.
#[derive(Debug, Deserialize, Default)]
struct SourceMetadata {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    last_updated: Option<String>,
    /// Primary document file inside `latest/`.
    #[serde(default)]
    file: Option<String>,
    /// `"document"` or `"repository"`.
    #[serde(default)]
    kind: Option<String>,
}

/// A source with its staleness computed at read time.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source: KnowledgeSource,
    pub staleness: StalenessTier,
    pub age_days: Option<i64>,
}

/// Scans the registry root and maps directories to routing categories.
#[derive(Debug, Clone)]
pub struct SourceRegistry {
    root: PathBuf,
    category_dirs: HashMap<String, Category>,
}

impl SourceRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            category_dirs: HashMap::new(),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self {
            root: config.root.clone(),
            category_dirs: config.category_dirs.clone(),
        }
    }

    /// Add an explicit directory-name → category route.
    pub fn with_category_dir(mut self, dir: impl Into<String>, category: Category) -> Self {
        self.category_dirs.insert(dir.into(), category);
        self
    }

    /// Category for a top-level directory. Unknown directories route to
    /// the knowledge base.
    pub fn category_for_dir(&self, dir: &str) -> Category {
        self.category_dirs
            .get(dir)
            .copied()
            .or_else(|| Category::from_dir_name(dir))
            .unwrap_or(Category::KnowledgeBase)
    }

    /// Scan `root/<category>/<id>/latest` and return every source by key.
    pub fn discover(&self) -> BTreeMap<String, KnowledgeSource> {
        let mut sources = BTreeMap::new();

        if !self.root.is_dir() {
            tracing::debug!(root = %self.root.display(), "registry root absent, no sources");
            return sources;
        }

        for category_dir in list_dirs(&self.root) {
            let dir_name = file_name(&category_dir);
            let category = self.category_for_dir(&dir_name);

            for source_dir in list_dirs(&category_dir) {
                let latest = source_dir.join(LATEST_DIR);
                if !latest.is_dir() {
                    tracing::debug!(path = %source_dir.display(), "skipping source without latest/");
                    continue;
                }

                let id = file_name(&source_dir);
                let source = load_source(&dir_name, &id, &source_dir, &latest, category);
                sources.insert(source.key.clone(), source);
            }
        }

        tracing::info!(root = %self.root.display(), count = sources.len(), "discovered knowledge sources");
        sources
    }

    /// Discover sources and compute staleness relative to now.
    pub fn list_with_staleness(&self) -> Vec<SourceStatus> {
        list_with_staleness_at(&self.discover(), Utc::now())
    }
}

/// A registry whose discovery runs once, on first access.
///
/// The snapshot lives as long as this value; recreate it to rescan.
#[derive(Debug)]
pub struct LazyRegistry {
    registry: SourceRegistry,
    snapshot: OnceLock<BTreeMap<String, KnowledgeSource>>,
}

impl LazyRegistry {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry,
            snapshot: OnceLock::new(),
        }
    }

    pub fn sources(&self) -> &BTreeMap<String, KnowledgeSource> {
        self.snapshot.get_or_init(|| self.registry.discover())
    }

    pub fn get(&self, key: &str) -> Option<&KnowledgeSource> {
        self.sources().get(key)
    }

    pub fn list_with_staleness(&self) -> Vec<SourceStatus> {
        list_with_staleness_at(self.sources(), Utc::now())
    }
}

/// Compute staleness for each source relative to `now`, in key order.
pub fn list_with_staleness_at(
    sources: &BTreeMap<String, KnowledgeSource>,
    now: DateTime<Utc>,
) -> Vec<SourceStatus> {
    sources
        .values()
        .map(|source| {
            let age_days = source.last_updated.map(|ts| (now - ts).num_days());
            SourceStatus {
                source: source.clone(),
                staleness: staleness_tier(age_days),
                age_days,
            }
        })
        .collect()
}

/// Map an age in days to a staleness tier.
pub fn staleness_tier(age_days: Option<i64>) -> StalenessTier {
    match age_days {
        None => StalenessTier::Unknown,
        Some(d) if d <= CURRENT_MAX_DAYS => StalenessTier::Current,
        Some(d) if d <= STALE_MAX_DAYS => StalenessTier::Stale,
        Some(_) => StalenessTier::Outdated,
    }
}

fn load_source(
    category_dir: &str,
    id: &str,
    source_dir: &Path,
    latest: &Path,
    category: Category,
) -> KnowledgeSource {
    let metadata = read_metadata(latest)
        .or_else(|| read_metadata(source_dir))
        .unwrap_or_default();

    let kind = match metadata.kind.as_deref() {
        Some("repository") | Some("repo") => SourceKind::Repository,
        Some("document") | Some("documents") => SourceKind::DocumentBundle,
        _ if is_repository(latest) => SourceKind::Repository,
        _ => SourceKind::DocumentBundle,
    };

    let location = match kind {
        SourceKind::Repository => latest.to_path_buf(),
        SourceKind::DocumentBundle => metadata
            .file
            .as_ref()
            .map(|f| latest.join(f))
            .or_else(|| primary_document(latest))
            .unwrap_or_else(|| latest.to_path_buf()),
    };

    let version = metadata
        .version
        .filter(|v| !v.trim().is_empty())
        .or_else(|| symlink_version(latest));

    let last_updated = metadata.last_updated.as_deref().and_then(|raw| {
        let parsed = parse_timestamp(raw);
        if parsed.is_none() {
            tracing::warn!(source = %id, value = raw, "unparsable last_updated, treating as unknown");
        }
        parsed
    });

    let display_name = metadata
        .display_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| humanize(id));

    KnowledgeSource {
        key: format!("{}/{}", category_dir, id),
        display_name,
        kind,
        version,
        last_updated,
        location,
        category_dir: category_dir.to_string(),
        category,
    }
}

fn read_metadata(dir: &Path) -> Option<SourceMetadata> {
    let path = dir.join(METADATA_FILE);
    let content = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&content) {
        Ok(m) => Some(m),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "invalid source metadata, using defaults");
            None
        }
    }
}

/// Returns `true` if the directory carries a repository marker.
pub fn is_repository(dir: &Path) -> bool {
    dir.join(".git").exists() || dir.join(REPOSITORY_MARKER).exists()
}

/// First PDF in name order, else the first regular non-metadata file.
fn primary_document(latest: &Path) -> Option<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(latest)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            let name = file_name(p);
            !name.starts_with('.') && name != METADATA_FILE
        })
        .collect();
    files.sort();

    let is_pdf = |p: &PathBuf| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
    };

    files
        .iter()
        .find(|p| is_pdf(p))
        .cloned()
        .or_else(|| files.into_iter().next())
}

/// Version from a `latest -> <version>` symlink.
fn symlink_version(latest: &Path) -> Option<String> {
    let target = std::fs::read_link(latest).ok()?;
    let name = target.file_name()?.to_string_lossy().to_string();
    if name.is_empty() || name == LATEST_DIR {
        None
    } else {
        Some(name)
    }
}

/// Parse RFC 3339 or `YYYY-MM-DD`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn humanize(id: &str) -> String {
    id.replace(['_', '-'], " ")
}

fn list_dirs(dir: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(read) => read
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_dir() && !file_name(p).starts_with('.'))
            .collect(),
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "failed to read registry directory");
            Vec::new()
        }
    };
    dirs.sort();
    dirs
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
