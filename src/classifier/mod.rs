//! Query classification.
//!
//! [`Classifier::classify`] runs three stages in order:
//!
//! 1. [`pre_filter`]: keyword override for recurring meal-response
//!    questions. When it fires the model is not called.
//! 2. Model stage: a structured prompt parsed by
//!    [`Classification::from_model_response`]. Any call or parse failure
//!    degrades to [`fallback_classification`].
//! 3. [`post_filter`]: personal-data correction, applied to whatever the
//!    earlier stages produced.
//!
//! [`routing_categories`] turns the result into the category set handed to
//! the retrieval orchestrator.

mod keywords;

pub use keywords::{contains_phrase, post_filter, pre_filter, KeywordHits};

use std::sync::Arc;

use crate::config::ClassifierConfig;
use crate::models::{Category, Classification};
use crate::provider::{GenerateOptions, Generator};

/// Confidence assigned when the model stage fails.
pub const FALLBACK_CONFIDENCE: f64 = 0.5;

pub struct Classifier {
    generator: Arc<dyn Generator>,
    options: GenerateOptions,
}

impl Classifier {
    pub fn new(generator: Arc<dyn Generator>, config: &ClassifierConfig) -> Self {
        Self {
            generator,
            options: GenerateOptions::new(config.temperature, config.max_output_tokens).json(),
        }
    }

    /// Classify a query. Never fails; model problems surface in `reasoning`.
    pub async fn classify(&self, query: &str) -> Classification {
        let staged = match pre_filter(query) {
            Some(c) => {
                tracing::debug!(category = %c.category, "keyword pre-filter matched");
                c
            }
            None => self.model_stage(query).await,
        };

        let classification = post_filter(query, staged);
        tracing::info!(
            category = %classification.category,
            confidence = classification.confidence,
            secondary = ?classification.secondary,
            "query classified"
        );
        classification
    }

    async fn model_stage(&self, query: &str) -> Classification {
        let prompt = classification_prompt(query);
        let raw = match self.generator.generate(&prompt, &self.options).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "classification model call failed");
                return fallback_classification(format!("Classification model call failed: {}", e));
            }
        };

        match Classification::from_model_response(&raw) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "classification response unusable");
                fallback_classification(format!("Classification response could not be parsed: {}", e))
            }
        }
    }
}

/// The degraded result used when the model stage fails.
pub fn fallback_classification(reasoning: impl Into<String>) -> Classification {
    Classification::new(Category::Hybrid, FALLBACK_CONFIDENCE, reasoning, [])
}

/// Categories to search: the primary, plus secondaries when the
/// classification is below `threshold`.
pub fn routing_categories(classification: &Classification, threshold: f64) -> Vec<Category> {
    let mut categories = vec![classification.category];
    if classification.confidence < threshold {
        for c in &classification.secondary {
            if !categories.contains(c) {
                categories.push(*c);
            }
        }
    }
    categories
}

fn classification_prompt(query: &str) -> String {
    format!(
        r#"You route questions for a diabetes management assistant. Pick the single best category for the question below.

Categories:
- personal_data: the user's own glucose readings, trends, statistics, or device data
- clinical_guidelines: published clinical guidelines, standards of care, targets, and recommendations
- user_sources: the user's own documents, such as pump or CGM manuals and device instructions
- knowledge_base: general diabetes knowledge, physiology, nutrition, and community experience
- hybrid: needs several of the above combined to answer well

Respond with JSON only, no prose:
{{"category": "<one of the five>", "confidence": <0.0-1.0>, "reasoning": "<one sentence>", "secondary_categories": ["<optional further categories>"]}}

Question: {query}"#
    )
}
