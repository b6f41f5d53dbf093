//! Answer synthesis from merged search results.
//!
//! Results below the confidence floor are dropped. If nothing passes, the
//! answer is exactly [`NO_RELEVANT_INFORMATION`]. Otherwise the passing
//! quotes, with provenance, go to the model in one call. A failed or empty
//! model call falls back to listing the quotes with their citations.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::SynthesisConfig;
use crate::models::{Category, Classification, SearchResult};
use crate::provider::{GenerateOptions, Generator};
use crate::retrieval::sort_by_confidence;

/// Returned when no result clears the confidence floor.
pub const NO_RELEVANT_INFORMATION: &str =
    "I couldn't find relevant information in the available sources to answer that question.";

pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    confidence_floor: f64,
    max_context_results: usize,
    options: GenerateOptions,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: &SynthesisConfig) -> Self {
        Self {
            generator,
            confidence_floor: config.confidence_floor,
            max_context_results: config.max_context_results,
            options: GenerateOptions::new(config.temperature, config.max_output_tokens),
        }
    }

    /// Results that clear the floor, best first, capped.
    pub fn passing_results(&self, merged: &BTreeMap<String, Vec<SearchResult>>) -> Vec<SearchResult> {
        let mut passing: Vec<SearchResult> = merged
            .values()
            .flatten()
            .filter(|r| r.confidence >= self.confidence_floor)
            .cloned()
            .collect();
        sort_by_confidence(&mut passing);
        passing.truncate(self.max_context_results);
        passing
    }

    /// Produce the answer text.
    ///
    /// PersonalData questions are answered elsewhere and yield an empty
    /// string.
    pub async fn synthesize(
        &self,
        query: &str,
        classification: &Classification,
        merged: &BTreeMap<String, Vec<SearchResult>>,
    ) -> String {
        if classification.category == Category::PersonalData {
            return String::new();
        }

        let passing = self.passing_results(merged);
        if passing.is_empty() {
            tracing::info!(floor = self.confidence_floor, "no results above confidence floor");
            return NO_RELEVANT_INFORMATION.to_string();
        }

        let prompt = synthesis_prompt(query, &passing);
        match self.generator.generate(&prompt, &self.options).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("empty synthesis response, listing quotes instead");
                fallback_answer(&passing)
            }
            Err(e) => {
                tracing::warn!(error = %e, "synthesis call failed, listing quotes instead");
                fallback_answer(&passing)
            }
        }
    }
}

/// Numbered context block: one quote per entry with its citation.
pub fn context_block(results: &[SearchResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut entry = format!("[{}] {} \"{}\"", i + 1, r.citation(), r.quote);
            if !r.context.is_empty() {
                entry.push_str(&format!("\n    Context: {}", r.context));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn synthesis_prompt(query: &str, results: &[SearchResult]) -> String {
    format!(
        r#"You are a friendly diabetes education assistant. Answer the question using only the sources below.

Sources:
{context}

Guidelines:
- Answer conversationally in a few short paragraphs.
- Cite one or two of the most relevant sources inline using their bracketed citation, e.g. [Source, p. 4].
- Do not give specific insulin doses or dosing changes; suggest discussing those with the care team.
- If the sources only partly answer the question, say what is missing.

Question: {query}"#,
        context = context_block(results),
    )
}

/// Answer used when the model cannot be reached.
pub fn fallback_answer(results: &[SearchResult]) -> String {
    let mut answer = String::from("Here is what the available sources say:\n");
    for r in results {
        answer.push_str(&format!("\n- \"{}\" {}", r.quote, r.citation()));
    }
    answer
}
