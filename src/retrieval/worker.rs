//! Per-plan search: cache check, then the source-specific lookup.

use super::{sort_by_confidence, SearchContext, SearchPlan, SearchTarget};
use crate::error::{Result, TriageError};
use crate::models::{KnowledgeSource, SearchResult, SourceKind};
use crate::response::parse_search_results;
use crate::vector::VectorHit;

/// Prompt asking the model for verbatim quotes from an attached document.
pub fn retrieval_prompt(source_label: &str, query: &str) -> String {
    format!(
        r#"You are searching the attached document "{source_label}" for passages relevant to the question below.

Return a JSON array. Each element must be:
{{"quote": "<exact text copied from the document>", "page": <page number, or null if unknown>, "confidence": <0.0-1.0, how directly the passage answers the question>, "context": "<one short sentence on where the passage appears>"}}

Rules:
- Quote the document word for word. Do not paraphrase or summarize.
- Return at most 5 elements, most relevant first.
- If nothing in the document is relevant, return [].

Question: {query}"#
    )
}

pub(crate) async fn run(ctx: &SearchContext, plan: &SearchPlan, query: &str) -> Result<Vec<SearchResult>> {
    if let Some(mut hit) = ctx.cache.get(&plan.key, query) {
        tracing::debug!(source_key = %plan.key, "search cache hit");
        // Registry results always carry the label of the current plan.
        if matches!(plan.target, SearchTarget::Source(_)) {
            for r in &mut hit {
                r.source.clone_from(&plan.label);
            }
        }
        return Ok(hit);
    }

    let mut results = match &plan.target {
        SearchTarget::KnowledgeBase => {
            let hits = ctx
                .vector_index
                .search(&ctx.knowledge_base_collection, query, ctx.knowledge_base_k)
                .await?;
            hits_to_results(hits, &plan.label, true)
        }
        SearchTarget::Source(key) => {
            let source = ctx
                .registry
                .get(key)
                .ok_or_else(|| TriageError::SourceNotFound(key.clone()))?;
            match source.kind {
                SourceKind::Repository => {
                    let hits = ctx.vector_index.search(key, query, ctx.knowledge_base_k).await?;
                    hits_to_results(hits, &plan.label, false)
                }
                SourceKind::DocumentBundle => match search_document(ctx, source, &plan.label, query).await? {
                    Some(results) => results,
                    None => return Ok(Vec::new()),
                },
            }
        }
    };

    sort_by_confidence(&mut results);
    ctx.cache.put(&plan.key, query, results.clone());
    Ok(results)
}

/// Ask the model to quote from the uploaded document.
///
/// Returns `Ok(None)` when the response could not be parsed; that degrades
/// to an empty, uncached result. A non-transient generation failure drops
/// the cached handle, so the next search re-resolves it.
async fn search_document(
    ctx: &SearchContext,
    source: &KnowledgeSource,
    label: &str,
    query: &str,
) -> Result<Option<Vec<SearchResult>>> {
    let handle = ctx.uploads.get_or_create_handle(&source.key).await?;
    let options = ctx.options.clone().with_attachment(handle);
    let raw = match ctx
        .generator
        .generate(&retrieval_prompt(label, query), &options)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            if !e.is_transient() {
                tracing::warn!(source_key = %source.key, error = %e, "generation with attached handle failed, invalidating upload");
                ctx.uploads.invalidate(&source.key);
            }
            return Err(e.into());
        }
    };

    match parse_search_results(&raw, label) {
        Ok(results) => Ok(Some(results)),
        Err(e) => {
            tracing::warn!(source_key = %source.key, error = %e, "unusable retrieval response");
            Ok(None)
        }
    }
}

/// With `keep_hit_source`, a hit's own document name becomes the result
/// source when the index recorded one; otherwise every result carries `label`.
fn hits_to_results(hits: Vec<VectorHit>, label: &str, keep_hit_source: bool) -> Vec<SearchResult> {
    hits.into_iter()
        .filter(|h| !h.text.trim().is_empty())
        .map(|h| {
            let source = match &h.source {
                Some(name) if keep_hit_source => name.clone(),
                _ => label.to_string(),
            };
            SearchResult::new(h.text, source, h.page, h.score, String::new())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_asks_for_verbatim_json() {
        let prompt = retrieval_prompt("Pump Manual (v2)", "How do I set a temp basal?");
        assert!(prompt.contains("\"Pump Manual (v2)\""));
        assert!(prompt.contains("return []"));
        assert!(prompt.ends_with("Question: How do I set a temp basal?"));
    }

    #[test]
    fn hits_fall_back_to_label() {
        let hits = vec![
            VectorHit {
                text: "Carbs raise glucose.".into(),
                source: Some("Nutrition Wiki".into()),
                page: Some(3),
                score: 0.8,
            },
            VectorHit {
                text: "Fat slows absorption.".into(),
                source: None,
                page: None,
                score: 1.4,
            },
            VectorHit {
                text: "   ".into(),
                source: None,
                page: None,
                score: 0.9,
            },
        ];
        let results = hits_to_results(hits.clone(), "Knowledge Base", true);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].citation(), "[Nutrition Wiki, p. 3]");
        assert_eq!(results[1].source, "Knowledge Base");
        assert_eq!(results[1].confidence, 1.0);

        let tagged = hits_to_results(hits, "Community Wiki (v3)", false);
        assert!(tagged.iter().all(|r| r.source == "Community Wiki (v3)"));
    }
}
