//! Parsing of structured model responses.
//!
//! Models are asked for JSON but return it wrapped in code fences, as a
//! bare list or under a key, with numbers as strings, or with prose around
//! it. Everything is normalized here, once; a payload that still does not
//! fit yields [`TriageError::Parse`].

use serde::Deserialize;

use crate::error::{Result, TriageError};
use crate::models::{Category, Classification, SearchResult};

/// Strip a surrounding Markdown code fence (```` ```json ... ``` ````).
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// Deserialize `T` from a model response, falling back to the outermost
/// `{...}` or `[...]` span when the model wrapped the JSON in prose.
fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T> {
    let body = strip_code_fences(raw);
    let first_err = match serde_json::from_str(body) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (body.find(open), body.rfind(close)) {
            if start < end {
                if let Ok(v) = serde_json::from_str(&body[start..=end]) {
                    return Ok(v);
                }
            }
        }
    }

    Err(TriageError::Parse(format!(
        "response is not the expected JSON: {}",
        first_err
    )))
}

/// A number the model may have emitted as a string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

impl Number {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Number::Float(v) => Some(*v),
            Number::Text(s) => s.trim().trim_end_matches('%').parse().ok(),
        }
    }

    fn as_page(&self) -> Option<u32> {
        let v = self.as_f64()?;
        (v >= 1.0 && v.fract() == 0.0 && v <= u32::MAX as f64).then_some(v as u32)
    }
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    category: String,
    confidence: Number,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "secondary")]
    secondary_categories: Vec<String>,
}

impl Classification {
    /// Parse the classifier model's JSON response.
    ///
    /// The primary category must be recognized; unrecognized secondary
    /// categories are dropped.
    pub fn from_model_response(raw: &str) -> Result<Self> {
        parse_classification(raw)
    }
}

fn parse_classification(raw: &str) -> Result<Classification> {
    let parsed: RawClassification = parse_json(raw)?;

    let category: Category = parsed.category.parse()?;
    let confidence = parsed.confidence.as_f64().ok_or_else(|| {
        TriageError::Parse("classification confidence is not a number".to_string())
    })?;

    let secondary = parsed
        .secondary_categories
        .iter()
        .filter_map(|s| s.parse::<Category>().ok());

    Ok(Classification::new(
        category,
        confidence,
        parsed.reasoning,
        secondary,
    ))
}

#[derive(Debug, Deserialize)]
struct RawResult {
    #[serde(alias = "text", alias = "quoted_text")]
    quote: String,
    #[serde(default, alias = "page_number")]
    page: Option<Number>,
    #[serde(default, alias = "score", alias = "relevance")]
    confidence: Option<Number>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawResults {
    List(Vec<RawResult>),
    Keyed {
        #[serde(alias = "quotes", alias = "items")]
        results: Vec<RawResult>,
    },
}

/// Parse a retrieval response into results labeled with `source_label`.
///
/// Accepts a bare array or an object with a `results`/`quotes` key. Entries
/// with an empty quote are skipped. A missing confidence scores `0.0` and a
/// non-positive or fractional page becomes `None`.
pub fn parse_search_results(raw: &str, source_label: &str) -> Result<Vec<SearchResult>> {
    let parsed: RawResults = parse_json(raw)?;
    let entries = match parsed {
        RawResults::List(entries) => entries,
        RawResults::Keyed { results } => results,
    };

    Ok(entries
        .into_iter()
        .filter(|r| !r.quote.trim().is_empty())
        .map(|r| {
            SearchResult::new(
                r.quote.trim(),
                source_label,
                r.page.as_ref().and_then(Number::as_page),
                r.confidence.as_ref().and_then(Number::as_f64).unwrap_or(0.0),
                r.context.unwrap_or_default(),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  [1]  "), "[1]");
        assert_eq!(strip_code_fences("```\n[]\n```\n"), "[]");
    }

    #[test]
    fn classification_with_secondary_alias() {
        let c = Classification::from_model_response(
            r#"```json
{"category": "HYBRID", "confidence": "0.82", "reasoning": "mixed", "secondary": ["user_sources", "nonsense", "hybrid"]}
```"#,
        )
        .unwrap();
        assert_eq!(c.category, Category::Hybrid);
        assert!((c.confidence - 0.82).abs() < 1e-9);
        assert_eq!(c.secondary, vec![Category::UserSources]);
    }

    #[test]
    fn classification_clamps_confidence() {
        let c = Classification::from_model_response(
            r#"{"category":"knowledge_base","confidence":1.7,"reasoning":"r","secondary_categories":[]}"#,
        )
        .unwrap();
        assert_eq!(c.confidence, 1.0);
    }

    #[test]
    fn classification_rejects_unknown_category() {
        let err = Classification::from_model_response(r#"{"category":"weather","confidence":0.9}"#).unwrap_err();
        assert!(matches!(err, TriageError::Parse(_)));
    }

    #[test]
    fn classification_rejects_prose() {
        assert!(Classification::from_model_response("I think this is about guidelines.").is_err());
    }

    #[test]
    fn classification_inside_prose() {
        let c = Classification::from_model_response(
            "Sure! {\"category\":\"user_sources\",\"confidence\":0.9,\"reasoning\":\"manual\"} Hope that helps.",
        )
        .unwrap();
        assert_eq!(c.category, Category::UserSources);
    }

    #[test]
    fn results_bare_list() {
        let results = parse_search_results(
            r#"[{"quote":"Use an extended bolus.","page":12,"confidence":0.9,"context":"meals"},
                {"quote":"  ","page":1,"confidence":0.9}]"#,
            "Pump Manual (v2)",
        )
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "Pump Manual (v2)");
        assert_eq!(results[0].page, Some(12));
        assert_eq!(results[0].context, "meals");
    }

    #[test]
    fn results_keyed_with_string_numbers() {
        let results = parse_search_results(
            r#"{"results":[{"text":"Check ketones.","page_number":"4","score":"0.75"},
                           {"quote":"No page.","page":0}]}"#,
            "ADA",
        )
        .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].quote, "Check ketones.");
        assert_eq!(results[0].page, Some(4));
        assert!((results[0].confidence - 0.75).abs() < 1e-9);
        assert_eq!(results[1].page, None);
        assert_eq!(results[1].confidence, 0.0);
    }

    #[test]
    fn results_empty_list_is_ok() {
        assert!(parse_search_results("[]", "x").unwrap().is_empty());
    }

    #[test]
    fn results_wrong_shape_is_parse_error() {
        let err = parse_search_results(r#"{"answer":"none"}"#, "x").unwrap_err();
        assert!(matches!(err, TriageError::Parse(_)));
    }
}
