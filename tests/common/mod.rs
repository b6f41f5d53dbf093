//! Fake collaborators and registry fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use context_triage::error::ProviderError;
use context_triage::models::{HandleState, RemoteHandle};
use context_triage::provider::{Embedder, FileStore, GenerateOptions, Generator};
use context_triage::registry::{LazyRegistry, SourceRegistry, LATEST_DIR, METADATA_FILE};
use context_triage::vector::{VectorHit, VectorIndex};
use tempfile::TempDir;

// ─── Registry fixture ───────────────────────────────────────────────

pub fn make_source(root: &Path, category: &str, id: &str, files: &[(&str, &str)]) -> PathBuf {
    let latest = root.join(category).join(id).join(LATEST_DIR);
    fs::create_dir_all(&latest).unwrap();
    for (name, content) in files {
        fs::write(latest.join(name), content).unwrap();
    }
    latest
}

/// Three document sources, one repository, and one personal-data source:
///
/// | Key | Label |
/// |-----|-------|
/// | `clinical_guidelines/ada` | `ADA Standards (v2025)` |
/// | `user_sources/pump_manual` | `Pump Manual (v2)` |
/// | `user_sources/cgm_guide` | `cgm guide` |
/// | `knowledge_base/community_wiki` | `Community Wiki` (repository) |
/// | `personal_data/readings` | `readings` |
pub fn registry_fixture() -> (TempDir, Arc<LazyRegistry>) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("sources");

    make_source(
        &root,
        "clinical_guidelines",
        "ada",
        &[
            ("standards.pdf", "%PDF-1.7 ADA standards"),
            (
                METADATA_FILE,
                r#"{"display_name":"ADA Standards","version":"2025","last_updated":"2025-01-01"}"#,
            ),
        ],
    );
    make_source(
        &root,
        "user_sources",
        "pump_manual",
        &[
            ("manual.pdf", "%PDF-1.7 pump manual"),
            (METADATA_FILE, r#"{"display_name":"Pump Manual","version":"v2"}"#),
        ],
    );
    make_source(&root, "user_sources", "cgm_guide", &[("guide.pdf", "%PDF-1.7 cgm guide")]);
    make_source(
        &root,
        "knowledge_base",
        "community_wiki",
        &[
            (".repository", ""),
            (METADATA_FILE, r#"{"display_name":"Community Wiki"}"#),
        ],
    );
    make_source(&root, "personal_data", "readings", &[("export.csv", "ts,mgdl")]);

    let registry = Arc::new(LazyRegistry::new(SourceRegistry::new(root)));
    (tmp, registry)
}

// ─── File store ─────────────────────────────────────────────────────

/// In-memory file store. Uploads start `processing` for `processing_polls`
/// `get` calls, then turn `active`.
#[derive(Default)]
pub struct FakeFileStore {
    pub uploads: AtomicU32,
    pub gets: AtomicU32,
    processing_polls: u32,
    final_state: Option<HandleState>,
    handles: Mutex<HashMap<String, (RemoteHandle, u32)>>,
}

impl FakeFileStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(processing_polls: u32) -> Arc<Self> {
        Arc::new(Self {
            processing_polls,
            ..Self::default()
        })
    }

    /// Handles go `processing` and then `failed`.
    pub fn failing_processing() -> Arc<Self> {
        Arc::new(Self {
            processing_polls: 1,
            final_state: Some(HandleState::Failed),
            ..Self::default()
        })
    }

    pub fn upload_count(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Forget a handle so the next liveness check fails.
    pub fn expire(&self, handle_id: &str) {
        self.handles.lock().unwrap().remove(handle_id);
    }

    /// Forget every handle uploaded so far.
    pub fn expire_all(&self) {
        self.handles.lock().unwrap().clear();
    }

    pub fn is_live(&self, handle_id: &str) -> bool {
        self.handles.lock().unwrap().contains_key(handle_id)
    }
}

#[async_trait]
impl FileStore for FakeFileStore {
    async fn upload(&self, path: &Path, display_name: &str) -> Result<RemoteHandle, ProviderError> {
        assert!(path.is_file(), "upload of missing file {}", path.display());
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = RemoteHandle {
            id: format!("files/{}", n),
            uri: format!("https://files.test/files/{}", n),
            display_name: display_name.to_string(),
            mime_type: "application/pdf".to_string(),
            state: if self.processing_polls > 0 {
                HandleState::Processing
            } else {
                HandleState::Active
            },
        };
        self.handles
            .lock()
            .unwrap()
            .insert(handle.id.clone(), (handle.clone(), 0));
        Ok(handle)
    }

    async fn get(&self, handle_id: &str) -> Result<RemoteHandle, ProviderError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut handles = self.handles.lock().unwrap();
        let (handle, polls) = handles
            .get_mut(handle_id)
            .ok_or_else(|| ProviderError::Fatal(format!("404 {}", handle_id)))?;
        *polls += 1;
        if handle.state == HandleState::Processing && *polls >= self.processing_polls {
            handle.state = self.final_state.unwrap_or(HandleState::Active);
        }
        Ok(handle.clone())
    }
}

// ─── Generator ──────────────────────────────────────────────────────

/// What the generator does for one attached document.
#[derive(Clone)]
pub enum Reply {
    Json(String),
    Fail(String),
    Panic,
    Slow(Duration, String),
}

/// Answers retrieval prompts by the attached document's display name,
/// classification prompts with `classification`, and everything else with
/// `synthesis`. With `checking_handles`, an attachment the store no longer
/// knows is rejected with a 404.
pub struct FakeGenerator {
    pub calls: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
    store: Option<Arc<FakeFileStore>>,
    retrieval: HashMap<String, Reply>,
    classification: Option<String>,
    synthesis: Option<String>,
}

impl FakeGenerator {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
            store: None,
            retrieval: HashMap::new(),
            classification: None,
            synthesis: None,
        }
    }

    pub fn on_document(mut self, display_name: &str, reply: Reply) -> Self {
        self.retrieval.insert(display_name.to_string(), reply);
        self
    }

    pub fn checking_handles(mut self, store: Arc<FakeFileStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn classify_as(mut self, json: &str) -> Self {
        self.classification = Some(json.to_string());
        self
    }

    pub fn synthesize_as(mut self, text: &str) -> Self {
        self.synthesis = Some(text.to_string());
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A one-quote retrieval response.
pub fn quote_json(quote: &str, page: u32, confidence: f64) -> String {
    format!(
        r#"[{{"quote":"{}","page":{},"confidence":{},"context":"fixture"}}]"#,
        quote, page, confidence
    )
}

#[async_trait]
impl Generator for FakeGenerator {
    fn model_name(&self) -> &str {
        "fake"
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        if let Some(handle) = options.attachments.first() {
            if let Some(store) = &self.store {
                if !store.is_live(&handle.id) {
                    return Err(ProviderError::Fatal(format!("404 file not found: {}", handle.id)));
                }
            }
            let reply = self
                .retrieval
                .get(&handle.display_name)
                .cloned()
                .unwrap_or_else(|| Reply::Json("[]".to_string()));
            return match reply {
                Reply::Json(json) => Ok(json),
                Reply::Fail(msg) => Err(ProviderError::Fatal(msg)),
                Reply::Panic => panic!("generator blew up for {}", handle.display_name),
                Reply::Slow(delay, json) => {
                    tokio::time::sleep(delay).await;
                    Ok(json)
                }
            };
        }

        if prompt.starts_with("You route questions") {
            return self
                .classification
                .clone()
                .ok_or_else(|| ProviderError::Fatal("no classification scripted".to_string()));
        }

        self.synthesis
            .clone()
            .ok_or_else(|| ProviderError::Fatal("no synthesis scripted".to_string()))
    }
}

// ─── Vector index ───────────────────────────────────────────────────

/// Records every collection searched and returns fixed hits per collection.
#[derive(Default)]
pub struct FakeVectorIndex {
    pub searches: Mutex<Vec<String>>,
    hits: HashMap<String, Vec<VectorHit>>,
}

impl FakeVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hit(mut self, collection: &str, text: &str, score: f64) -> Self {
        self.hits.entry(collection.to_string()).or_default().push(VectorHit {
            text: text.to_string(),
            source: None,
            page: None,
            score,
        });
        self
    }

    pub fn with_named_hit(mut self, collection: &str, text: &str, source: &str, score: f64) -> Self {
        self.hits.entry(collection.to_string()).or_default().push(VectorHit {
            text: text.to_string(),
            source: Some(source.to_string()),
            page: None,
            score,
        });
        self
    }

    pub fn searches_of(&self, collection: &str) -> usize {
        self.searches
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.as_str() == collection)
            .count()
    }
}

#[async_trait]
impl VectorIndex for FakeVectorIndex {
    async fn search(&self, collection: &str, _query: &str, k: usize) -> Result<Vec<VectorHit>, ProviderError> {
        self.searches.lock().unwrap().push(collection.to_string());
        let mut hits = self.hits.get(collection).cloned().unwrap_or_default();
        hits.truncate(k);
        Ok(hits)
    }
}

/// Embedder that is never expected to be called.
pub struct UnusedEmbedder;

#[async_trait]
impl Embedder for UnusedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::Fatal("embedder not expected".to_string()))
    }
}
