//! Keyword groups and the deterministic classification stages.
//!
//! Matching is case-insensitive and respects word boundaries, so `rice`
//! does not fire on `price`. Each phrase counts at most once per query.

use crate::models::{Category, Classification};

/// Meals known for delayed or prolonged glucose responses.
pub const FOOD_TERMS: &[&str] = &[
    "pizza",
    "pasta",
    "spaghetti",
    "lasagna",
    "burger",
    "burgers",
    "fries",
    "fried chicken",
    "chinese food",
    "takeout",
    "tacos",
    "burrito",
    "curry",
    "ice cream",
    "cheesecake",
    "donut",
    "doughnut",
    "high fat",
    "high-fat",
    "fatty meal",
    "fatty food",
    "high protein",
    "high-protein",
    "steak",
    "barbecue",
    "bbq",
    "ramen",
    "pad thai",
    "sushi",
    "rice",
    "bagel",
    "pancakes",
];

/// Phrases describing a glucose rise well after eating.
pub const DELAYED_PATTERN_PHRASES: &[&str] = &[
    "hours later",
    "hours after",
    "hrs later",
    "delayed spike",
    "delayed rise",
    "delayed high",
    "late spike",
    "late rise",
    "next morning",
    "overnight high",
    "overnight spike",
    "middle of the night",
    "long after",
    "slow rise",
    "second spike",
    "double spike",
    "later that night",
];

/// Pump and CGM features used to manage meals.
pub const MANAGEMENT_TERMS: &[&str] = &[
    "extended bolus",
    "dual wave",
    "square wave",
    "combo bolus",
    "split bolus",
    "temp basal",
    "temporary basal",
    "basal rate",
    "pre-bolus",
    "prebolus",
    "control-iq",
    "control iq",
    "exercise mode",
    "sleep mode",
    "activity mode",
    "auto mode",
    "insulin on board",
    "correction factor",
    "carb ratio",
];

/// Generic "it went high" phrasing. Not counted toward the match total.
pub const HIGH_SPIKE_PHRASES: &[&str] = &[
    "spike",
    "spikes",
    "spiking",
    "spiked",
    "goes high",
    "go high",
    "went high",
    "running high",
    "runs high",
    "stays high",
    "high after",
    "high blood sugar",
    "high glucose",
    "shoots up",
    "skyrockets",
];

/// First-person references to the user's own data.
pub const PERSONAL_DATA_PHRASES: &[&str] = &[
    "my glucose",
    "my blood sugar",
    "my blood sugars",
    "my bg",
    "my sugar",
    "my sugars",
    "my readings",
    "my levels",
    "my numbers",
    "my data",
    "my cgm",
    "my a1c",
    "my time in range",
    "my tir",
    "my trends",
    "my graph",
    "my average",
];

/// First-person timing and pattern questions.
pub const PERSONAL_PATTERN_PHRASES: &[&str] = &[
    "my pattern",
    "my patterns",
    "when do i",
    "when am i",
    "do i usually",
    "do i tend",
    "do i always",
    "i usually",
    "i tend to",
    "what time do i",
    "am i trending",
];

/// Requests for advice or a plan of action.
pub const ACTION_PHRASES: &[&str] = &[
    "how do i",
    "how can i",
    "how should i",
    "what should i",
    "what can i",
    "should i",
    "how to",
    "what to do",
    "tips",
    "strategy",
    "strategies",
    "fix",
    "prevent",
    "avoid",
    "reduce",
    "improve",
    "lower",
    "manage",
    "adjust",
    "deal with",
    "help me",
];

/// Confidence assigned when personal data is paired with an action request.
pub const PERSONAL_ACTION_CONFIDENCE: f64 = 0.85;
/// Confidence assigned to a personal-data override.
pub const PERSONAL_DATA_CONFIDENCE: f64 = 0.9;

/// Returns `true` if `phrase` occurs in `text` on word boundaries.
///
/// Both arguments must already be lower-cased.
pub fn contains_phrase(text: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric();
    let mut start = 0;
    while let Some(pos) = text[start..].find(phrase) {
        let begin = start + pos;
        let end = begin + phrase.len();
        let before_ok = text[..begin].chars().next_back().map_or(true, |c| !is_word(c));
        let after_ok = text[end..].chars().next().map_or(true, |c| !is_word(c));
        if before_ok && after_ok {
            return true;
        }
        start = begin + text[begin..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Phrases from `group` found in the (lower-cased) text, in group order.
pub fn matches<'a>(text: &str, group: &[&'a str]) -> Vec<&'a str> {
    group
        .iter()
        .copied()
        .filter(|p| contains_phrase(text, p))
        .collect()
}

/// Keyword hits used by the pre-filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordHits {
    pub food: Vec<&'static str>,
    pub delayed: Vec<&'static str>,
    pub management: Vec<&'static str>,
    pub high_spike: Vec<&'static str>,
}

impl KeywordHits {
    pub fn scan(query: &str) -> Self {
        let text = query.to_lowercase();
        Self {
            food: matches(&text, FOOD_TERMS),
            delayed: matches(&text, DELAYED_PATTERN_PHRASES),
            management: matches(&text, MANAGEMENT_TERMS),
            high_spike: matches(&text, HIGH_SPIKE_PHRASES),
        }
    }

    /// Food, delayed-pattern, and management hits combined.
    pub fn total(&self) -> usize {
        self.food.len() + self.delayed.len() + self.management.len()
    }
}

/// Stage 1: route recurring meal-response questions straight to Hybrid.
///
/// Fires on food+delayed, food+management, food+generic spike, or three or
/// more hits overall. Returns `None` when the model should decide.
pub fn pre_filter(query: &str) -> Option<Classification> {
    let hits = KeywordHits::scan(query);
    let has_food = !hits.food.is_empty();

    let reason = if has_food && !hits.delayed.is_empty() {
        "food-type term with delayed glucose pattern"
    } else if has_food && !hits.management.is_empty() {
        "food-type term with device feature management"
    } else if has_food && !hits.high_spike.is_empty() {
        "food-type term with glucose spike"
    } else if hits.total() >= 3 {
        "multiple meal-management signals"
    } else {
        return None;
    };

    let total = hits.total();
    let confidence = (0.7 + 0.1 * total as f64).min(0.95);
    let matched: Vec<&str> = hits
        .food
        .iter()
        .chain(&hits.delayed)
        .chain(&hits.management)
        .chain(&hits.high_spike)
        .copied()
        .collect();

    Some(Classification::new(
        Category::Hybrid,
        confidence,
        format!(
            "Keyword override: {} (matched: {})",
            reason,
            matched.join(", ")
        ),
        [
            Category::UserSources,
            Category::KnowledgeBase,
            Category::ClinicalGuidelines,
        ],
    ))
}

/// Stage 3: correct under-detected personal-data intent.
///
/// Personal phrasing plus an action request becomes Hybrid over personal
/// data and the knowledge base. Personal phrasing alone becomes
/// PersonalData, unless the current result is already PersonalData or is
/// at least as confident.
pub fn post_filter(query: &str, current: Classification) -> Classification {
    let text = query.to_lowercase();
    let personal: Vec<&str> = matches(&text, PERSONAL_DATA_PHRASES)
        .into_iter()
        .chain(matches(&text, PERSONAL_PATTERN_PHRASES))
        .collect();

    if personal.is_empty() {
        return current;
    }

    let actions = matches(&text, ACTION_PHRASES);
    if !actions.is_empty() {
        return Classification::new(
            Category::Hybrid,
            PERSONAL_ACTION_CONFIDENCE,
            format!(
                "Personal data with action request (matched: {}; {})",
                personal.join(", "),
                actions.join(", ")
            ),
            [Category::PersonalData, Category::KnowledgeBase],
        );
    }

    if current.category == Category::PersonalData || current.confidence >= PERSONAL_DATA_CONFIDENCE {
        return current;
    }

    Classification::new(
        Category::PersonalData,
        PERSONAL_DATA_CONFIDENCE,
        format!("Personal data reference (matched: {})", personal.join(", ")),
        [],
    )
}
