//! End-to-end question answering: classify, retrieve, synthesize.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Serialize;

use crate::cache::{SearchCache, UploadCache};
use crate::classifier::{routing_categories, Classifier};
use crate::config::Config;
use crate::models::{Category, Classification, SearchResult, SourceFailure};
use crate::provider::{create_provider, ProviderSet};
use crate::registry::{LazyRegistry, SourceRegistry, SourceStatus};
use crate::retrieval::RetrievalOrchestrator;
use crate::synthesis::Synthesizer;
use crate::vector::{InMemoryVectorIndex, VectorIndex};

/// Returned when every searched source failed.
pub const SOURCES_UNAVAILABLE: &str =
    "I'm having trouble reaching my knowledge sources right now. Please try again in a moment, and contact your care team for anything urgent.";

/// The result of answering one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub classification: Classification,
    /// Categories that were routed for retrieval.
    pub categories: Vec<Category>,
    /// Empty for PersonalData questions, which are answered elsewhere.
    pub text: String,
    /// Merged retrieval results by label.
    pub sources: BTreeMap<String, Vec<SearchResult>>,
    pub failures: Vec<SourceFailure>,
}

pub struct TriageService {
    classifier: Classifier,
    orchestrator: RetrievalOrchestrator,
    synthesizer: Synthesizer,
    confidence_threshold: f64,
    request_budget: Option<Duration>,
}

impl TriageService {
    /// Wire up every component from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the provider cannot be created or the configured vector
    /// index file cannot be loaded.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        if !config.provider.is_enabled() {
            tracing::warn!("no provider configured, classification and synthesis will use fallbacks");
        }
        let providers = create_provider(&config.provider)?;

        let vector_index: Arc<dyn VectorIndex> = match &config.retrieval.knowledge_base_index {
            Some(path) => Arc::new(
                InMemoryVectorIndex::load_json(providers.embedder.clone(), path)
                    .with_context(|| format!("Failed to load vector index: {}", path.display()))?,
            ),
            None => Arc::new(InMemoryVectorIndex::new(providers.embedder.clone())),
        };

        Ok(Self::new(config, providers, vector_index))
    }

    /// Build a service from explicit collaborators.
    pub fn new(config: &Config, providers: ProviderSet, vector_index: Arc<dyn VectorIndex>) -> Self {
        let registry = Arc::new(LazyRegistry::new(SourceRegistry::from_config(&config.registry)));
        let uploads = Arc::new(
            UploadCache::new(
                Arc::clone(&registry),
                providers.file_store.clone(),
                config.cache.dir.clone(),
            )
            .with_provider_config(&config.provider),
        );
        let search_cache = Arc::new(SearchCache::new(config.cache.search_max_entries));

        Self {
            classifier: Classifier::new(providers.generator.clone(), &config.classifier),
            orchestrator: RetrievalOrchestrator::new(
                &config.retrieval,
                registry,
                uploads,
                search_cache,
                providers.generator.clone(),
                vector_index,
            ),
            synthesizer: Synthesizer::new(providers.generator, &config.synthesis),
            confidence_threshold: config.classifier.confidence_threshold,
            request_budget: config.retrieval.request_budget_secs.map(Duration::from_secs),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn sources(&self) -> Vec<SourceStatus> {
        self.orchestrator.sources_with_staleness()
    }

    /// Answer a question. Per-source failures are reported in
    /// [`Answer::failures`] and never abort the request.
    pub async fn answer(&self, query: &str) -> Answer {
        let classification = self.classifier.classify(query).await;
        let categories = routing_categories(&classification, self.confidence_threshold);

        let outcome = match self.request_budget {
            Some(budget) => {
                self.orchestrator
                    .search_with_budget(query, &categories, budget)
                    .await
            }
            None => self.orchestrator.search(query, &categories).await,
        };

        let text = if classification.category != Category::PersonalData && outcome.all_failed() {
            tracing::warn!(failures = outcome.failures.len(), "every source failed");
            SOURCES_UNAVAILABLE.to_string()
        } else {
            self.synthesizer
                .synthesize(query, &classification, &outcome.results)
                .await
        };

        Answer {
            classification,
            categories,
            text,
            sources: outcome.results,
            failures: outcome.failures,
        }
    }
}
