//! Multi-source retrieval orchestration.
//!
//! A category set resolves to a deterministic list of [`SearchPlan`]s: one
//! per registry source routed to the requested categories, plus at most one
//! knowledge-base-wide vector search. Each plan runs on its own spawned
//! task; the orchestrator collects reports from a channel and merges them
//! by label.
//!
//! A failing source produces an empty entry and a [`SourceFailure`]; it
//! never aborts the request. With a budget, sources that have not reported
//! by the deadline are recorded as failures and their tasks keep running in
//! the background, still filling the caches.

mod worker;

pub use worker::retrieval_prompt;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cache::{SearchCache, UploadCache};
use crate::config::RetrievalConfig;
use crate::error::{ProviderError, Result, TriageError};
use crate::models::{Category, KnowledgeSource, SearchResult, SourceFailure};
use crate::provider::{GenerateOptions, Generator};
use crate::registry::{LazyRegistry, SourceStatus};
use crate::vector::VectorIndex;

/// Search-cache key of the knowledge-base-wide search. Registry keys always
/// contain a `/`, so this cannot collide with a source.
pub const KNOWLEDGE_BASE_KEY: &str = "knowledge_base";
/// Label the knowledge-base-wide results are merged under.
pub const KNOWLEDGE_BASE_LABEL: &str = "Knowledge Base";

/// What a single plan searches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// A registry source, by key.
    Source(String),
    /// The vector-indexed knowledge base.
    KnowledgeBase,
}

/// One unit of fan-out work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchPlan {
    pub target: SearchTarget,
    /// Search-cache key.
    pub key: String,
    /// Label results are merged under.
    pub label: String,
}

/// Merged results of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Label → results, best first. Every planned source has an entry.
    pub results: BTreeMap<String, Vec<SearchResult>>,
    pub failures: Vec<SourceFailure>,
    /// Number of plans that were fanned out.
    pub searched: usize,
}

impl SearchOutcome {
    pub fn total_results(&self) -> usize {
        self.results.values().map(Vec::len).sum()
    }

    /// `true` if sources were searched and every one of them failed.
    pub fn all_failed(&self) -> bool {
        self.searched > 0 && self.failures.len() >= self.searched
    }
}

pub(crate) struct SearchContext {
    registry: Arc<LazyRegistry>,
    uploads: Arc<UploadCache>,
    cache: Arc<SearchCache>,
    generator: Arc<dyn Generator>,
    vector_index: Arc<dyn VectorIndex>,
    options: GenerateOptions,
    knowledge_base_collection: String,
    knowledge_base_k: usize,
}

pub struct RetrievalOrchestrator {
    ctx: Arc<SearchContext>,
}

impl RetrievalOrchestrator {
    pub fn new(
        config: &RetrievalConfig,
        registry: Arc<LazyRegistry>,
        uploads: Arc<UploadCache>,
        cache: Arc<SearchCache>,
        generator: Arc<dyn Generator>,
        vector_index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            ctx: Arc::new(SearchContext {
                registry,
                uploads,
                cache,
                generator,
                vector_index,
                options: GenerateOptions::new(config.temperature, config.max_output_tokens).json(),
                knowledge_base_collection: config.knowledge_base_collection.clone(),
                knowledge_base_k: config.knowledge_base_k,
            }),
        }
    }

    pub fn search_cache(&self) -> &SearchCache {
        &self.ctx.cache
    }

    /// Registry listing with staleness tiers.
    pub fn sources_with_staleness(&self) -> Vec<SourceStatus> {
        self.ctx.registry.list_with_staleness()
    }

    /// Resolve categories to search plans.
    ///
    /// PersonalData is never searched here. Hybrid expands to every
    /// non-personal source. KnowledgeBase and Hybrid both imply the
    /// knowledge-base-wide search, which appears at most once. Duplicates
    /// keep their first position.
    ///
    /// Every plan gets a distinct label. A source whose label is already
    /// taken, or equals [`KNOWLEDGE_BASE_LABEL`], is qualified with its
    /// category directory, then with its full key.
    pub fn resolve_targets(&self, categories: &[Category]) -> Vec<SearchPlan> {
        let sources = self.ctx.registry.sources();
        let mut plans: Vec<SearchPlan> = Vec::new();

        for category in categories {
            if *category == Category::PersonalData {
                continue;
            }

            for source in sources.values() {
                let routed = match category {
                    Category::Hybrid => source.category != Category::PersonalData,
                    c => source.category == *c,
                };
                let target = SearchTarget::Source(source.key.clone());
                if routed && !plans.iter().any(|p| p.target == target) {
                    let label = unique_label(&plans, source);
                    plans.push(SearchPlan {
                        target,
                        key: source.key.clone(),
                        label,
                    });
                }
            }

            if matches!(category, Category::KnowledgeBase | Category::Hybrid) {
                push_unique(
                    &mut plans,
                    SearchPlan {
                        target: SearchTarget::KnowledgeBase,
                        key: KNOWLEDGE_BASE_KEY.to_string(),
                        label: KNOWLEDGE_BASE_LABEL.to_string(),
                    },
                );
            }
        }

        plans
    }

    /// Search every source routed to `categories` and merge by label.
    pub async fn search(&self, query: &str, categories: &[Category]) -> SearchOutcome {
        self.fan_out(query, self.resolve_targets(categories), None).await
    }

    /// Like [`search`](Self::search), but stop waiting after `budget`.
    pub async fn search_with_budget(
        &self,
        query: &str,
        categories: &[Category],
        budget: Duration,
    ) -> SearchOutcome {
        self.fan_out(query, self.resolve_targets(categories), Some(budget))
            .await
    }

    /// Search one registry source directly.
    ///
    /// # Errors
    ///
    /// [`TriageError::SourceNotFound`] if `source_key` is not registered;
    /// otherwise whatever the upload, generation, or vector search raised.
    pub async fn search_source(&self, source_key: &str, query: &str) -> Result<Vec<SearchResult>> {
        let source = self
            .ctx
            .registry
            .get(source_key)
            .ok_or_else(|| TriageError::SourceNotFound(source_key.to_string()))?;
        let plan = SearchPlan {
            target: SearchTarget::Source(source.key.clone()),
            key: source.key.clone(),
            label: source.label(),
        };
        worker::run(&self.ctx, &plan, query).await
    }

    async fn fan_out(
        &self,
        query: &str,
        plans: Vec<SearchPlan>,
        budget: Option<Duration>,
    ) -> SearchOutcome {
        let mut outcome = SearchOutcome {
            searched: plans.len(),
            ..SearchOutcome::default()
        };
        if plans.is_empty() {
            tracing::debug!("no sources to search");
            return outcome;
        }

        let (tx, mut rx) = mpsc::channel::<(usize, Result<Vec<SearchResult>>)>(plans.len());

        for (index, plan) in plans.iter().enumerate() {
            let ctx = Arc::clone(&self.ctx);
            let plan = plan.clone();
            let query = query.to_string();
            let worker = tokio::spawn(async move { worker::run(&ctx, &plan, &query).await });

            let tx = tx.clone();
            tokio::spawn(async move {
                let result = worker.await.unwrap_or_else(|e| {
                    Err(ProviderError::Fatal(format!("search task aborted: {}", e)).into())
                });
                // The receiver is gone once the budget expired.
                let _ = tx.send((index, result)).await;
            });
        }
        drop(tx);

        for plan in &plans {
            outcome.results.entry(plan.label.clone()).or_default();
        }

        let deadline = budget.map(|b| Instant::now() + b);
        let mut reported = vec![false; plans.len()];

        loop {
            let received = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => break,
                },
                None => rx.recv().await,
            };
            let Some((index, result)) = received else {
                break;
            };
            reported[index] = true;
            let plan = &plans[index];

            match result {
                Ok(results) => {
                    tracing::debug!(source_key = %plan.key, results = results.len(), "source searched");
                    if let Some(entry) = outcome.results.get_mut(&plan.label) {
                        entry.extend(results);
                    }
                }
                Err(e) => {
                    tracing::warn!(source_key = %plan.key, error = %e, "source search failed");
                    outcome.failures.push(SourceFailure {
                        source_key: plan.key.clone(),
                        label: plan.label.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for (plan, _) in plans.iter().zip(&reported).filter(|(_, done)| !**done) {
            tracing::warn!(source_key = %plan.key, "source did not report within budget");
            outcome.failures.push(SourceFailure {
                source_key: plan.key.clone(),
                label: plan.label.clone(),
                error: "no response within the request budget".to_string(),
            });
        }

        for results in outcome.results.values_mut() {
            sort_by_confidence(results);
        }

        tracing::info!(
            sources = plans.len(),
            results = outcome.total_results(),
            failures = outcome.failures.len(),
            "retrieval fan-out complete"
        );
        outcome
    }
}

/// Merge label for `source` that no earlier plan uses.
fn unique_label(plans: &[SearchPlan], source: &KnowledgeSource) -> String {
    let taken = |label: &str| label == KNOWLEDGE_BASE_LABEL || plans.iter().any(|p| p.label == label);

    let label = source.label();
    if !taken(&label) {
        return label;
    }
    let qualified = format!("{} [{}]", label, source.category_dir);
    if !taken(&qualified) {
        return qualified;
    }
    format!("{} [{}]", label, source.key)
}

fn push_unique(plans: &mut Vec<SearchPlan>, plan: SearchPlan) {
    if !plans.iter().any(|p| p.target == plan.target) {
        plans.push(plan);
    }
}

/// Sort best first. Stable, so equal scores keep arrival order.
pub fn sort_by_confidence(results: &mut [SearchResult]) {
    results.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
