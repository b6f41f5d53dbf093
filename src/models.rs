//! Core data models used throughout the triage pipeline.
//!
//! These types represent the categories, classifications, knowledge sources,
//! remote handles, and search results that flow from the classifier through
//! retrieval into synthesis.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TriageError;

/// Fixed routing tag a query is classified under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// The user's own device data. Routed outside this subsystem.
    PersonalData,
    /// Published clinical guidelines and standards of care.
    ClinicalGuidelines,
    /// User-provided documents such as device manuals.
    UserSources,
    /// The broad, vector-indexed knowledge base.
    KnowledgeBase,
    /// Needs synthesis across several sources.
    Hybrid,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Category; 5] = [
        Category::PersonalData,
        Category::ClinicalGuidelines,
        Category::UserSources,
        Category::KnowledgeBase,
        Category::Hybrid,
    ];

    /// Canonical snake_case name, as used in prompts and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::PersonalData => "personal_data",
            Category::ClinicalGuidelines => "clinical_guidelines",
            Category::UserSources => "user_sources",
            Category::KnowledgeBase => "knowledge_base",
            Category::Hybrid => "hybrid",
        }
    }

    /// Map a registry directory name to a category.
    ///
    /// Recognizes the canonical names plus a few common directory spellings.
    /// Returns `None` for anything else; the registry routes those to
    /// [`Category::KnowledgeBase`].
    pub fn from_dir_name(name: &str) -> Option<Category> {
        match normalize_token(name).as_str() {
            "clinicalguidelines" | "guidelines" | "clinical" => Some(Category::ClinicalGuidelines),
            "usersources" | "user" | "manuals" | "devicemanuals" => Some(Category::UserSources),
            "knowledgebase" | "knowledge" | "kb" => Some(Category::KnowledgeBase),
            "personaldata" | "personal" => Some(Category::PersonalData),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "personaldata" => Ok(Category::PersonalData),
            "clinicalguidelines" => Ok(Category::ClinicalGuidelines),
            "usersources" => Ok(Category::UserSources),
            "knowledgebase" => Ok(Category::KnowledgeBase),
            "hybrid" => Ok(Category::Hybrid),
            _ => Err(TriageError::Parse(format!("unknown category: '{}'", s))),
        }
    }
}

/// Lower-case and strip separators so `PERSONAL_DATA`, `PersonalData` and
/// `personal data` compare equal.
fn normalize_token(s: &str) -> String {
    s.trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Clamp a confidence into `[0, 1]`, mapping NaN to `0`.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// The classifier's routing decision for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub category: Category,
    /// Always in `[0, 1]`.
    pub confidence: f64,
    pub reasoning: String,
    /// Ordered, deduplicated, never contains `category`.
    pub secondary: Vec<Category>,
}

impl Classification {
    /// Build a classification, clamping confidence and normalizing secondaries.
    pub fn new(
        category: Category,
        confidence: f64,
        reasoning: impl Into<String>,
        secondary: impl IntoIterator<Item = Category>,
    ) -> Self {
        let mut deduped = Vec::new();
        for c in secondary {
            if c != category && !deduped.contains(&c) {
                deduped.push(c);
            }
        }
        Self {
            category,
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            secondary: deduped,
        }
    }
}

/// How a knowledge source is stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// One or more documents (PDF, Markdown) uploaded to the provider.
    DocumentBundle,
    /// A version-controlled repository, searched through the vector index.
    Repository,
}

/// Coarse freshness classification derived from `last_updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessTier {
    Current,
    Stale,
    Outdated,
    Unknown,
}

impl StalenessTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StalenessTier::Current => "current",
            StalenessTier::Stale => "stale",
            StalenessTier::Outdated => "outdated",
            StalenessTier::Unknown => "unknown",
        }
    }
}

/// A discovered knowledge collection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KnowledgeSource {
    /// `"<category_dir>/<id>"`, unique within a registry snapshot.
    pub key: String,
    pub display_name: String,
    pub kind: SourceKind,
    pub version: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Primary document file, or the `latest` directory for repositories.
    pub location: PathBuf,
    /// Top-level registry directory this source was found under.
    pub category_dir: String,
    /// Category this source is searched for.
    pub category: Category,
}

impl KnowledgeSource {
    /// Label used to tag search results: display name plus version suffix.
    pub fn label(&self) -> String {
        match &self.version {
            Some(v) => format!("{} (v{})", self.display_name, v.trim_start_matches('v')),
            None => self.display_name.clone(),
        }
    }
}

/// Lifecycle state of a remote file object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    Processing,
    Active,
    Failed,
}

/// Opaque reference to a file held by the remote file store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteHandle {
    /// Provider-side identifier (e.g. `"files/abc123"`).
    pub id: String,
    /// URI used to attach the file to a generation call.
    pub uri: String,
    pub display_name: String,
    pub mime_type: String,
    pub state: HandleState,
}

impl RemoteHandle {
    pub fn is_active(&self) -> bool {
        self.state == HandleState::Active
    }
}

/// A verbatim quote returned by a per-source search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub quote: String,
    /// Display name with version suffix.
    pub source: String,
    pub page: Option<u32>,
    /// Always in `[0, 1]`.
    pub confidence: f64,
    pub context: String,
}

impl SearchResult {
    pub fn new(
        quote: impl Into<String>,
        source: impl Into<String>,
        page: Option<u32>,
        confidence: f64,
        context: impl Into<String>,
    ) -> Self {
        Self {
            quote: quote.into(),
            source: source.into(),
            page,
            confidence: clamp_confidence(confidence),
            context: context.into(),
        }
    }

    /// Provenance citation, e.g. `[ADA Standards (v2025), p. 12]`.
    pub fn citation(&self) -> String {
        match self.page {
            Some(p) => format!("[{}, p. {}]", self.source, p),
            None => format!("[{}]", self.source),
        }
    }
}

/// One source that failed during a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source_key: String,
    pub label: String,
    pub error: String,
}
