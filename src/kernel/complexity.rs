//! Complexity detection — decides fast-path vs. full pipeline.
//!
//! Pure heuristics over the raw input: length, sentence count,
//! conjunctive cues, domain verbs, and explicit multi-step markers are
//! combined into a normalized score, then bucketed. Never fails and
//! never suspends.

use crate::types::{ComplexityLevel, ComplexityResult};

/// Score below which an input is `simple`.
const SIMPLE_THRESHOLD: f64 = 0.33;
/// Score below which an input is `moderate`; above is `complex`.
const MODERATE_THRESHOLD: f64 = 0.66;

/// Conjunctions suggesting several chained actions.
const CONJUNCTIVE_CUES: &[&str] = &[" and ", " then ", " after ", " before ", " also ", "; "];

/// Verbs that indicate heavier, multi-stage work.
const DOMAIN_VERBS: &[&str] = &[
    "analyze",
    "analyse",
    "generate",
    "synchronize",
    "synchronise",
    "refactor",
    "summarize",
    "compare",
    "migrate",
    "deploy",
];

/// Verbs that make even a short input actionable.
const ACTION_VERBS: &[&str] = &[
    "read", "write", "create", "delete", "list", "open", "run", "execute", "search", "find",
    "fetch", "download", "check", "show", "save", "recall", "remember", "analyze", "generate",
    "sync",
];

/// Explicit markers that the user wants stepwise execution.
const MULTI_STEP_MARKERS: &[&str] = &[
    "step by step",
    "first",
    "finally",
    "in parallel",
    "at the same time",
    "one by one",
];

/// Stateless complexity detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComplexityDetector;

impl ComplexityDetector {
    /// Create a detector.
    pub fn new() -> Self {
        Self
    }

    /// Score an input and decide whether the full pipeline should run.
    ///
    /// Empty input yields `simple`, score 0, pipeline off.
    pub fn detect(&self, input: &str) -> ComplexityResult {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return ComplexityResult {
                level: ComplexityLevel::Simple,
                score: 0.0,
                reasoning: "empty input".to_owned(),
                should_use_pipeline: false,
                estimated_steps: None,
            };
        }

        let lower = trimmed.to_lowercase();
        let mut reasons = Vec::new();

        // Length signal: saturates at ~200 characters.
        let length_score = (to_f64(trimmed.chars().count()) / 200.0).min(1.0);
        if length_score > 0.5 {
            reasons.push("long input".to_owned());
        }

        // Sentence signal: saturates at five sentences.
        let sentences = count_sentences(trimmed);
        let sentence_score = (to_f64(sentences.saturating_sub(1)) / 4.0).min(1.0);
        if sentences > 1 {
            reasons.push(format!("{sentences} sentences"));
        }

        // Conjunctive cues and enumerations.
        let mut cues = CONJUNCTIVE_CUES
            .iter()
            .filter(|cue| lower.contains(**cue))
            .count();
        if has_enumeration(&lower) {
            cues = cues.saturating_add(1);
        }
        let cue_score = (to_f64(cues) / 3.0).min(1.0);
        if cues > 0 {
            reasons.push(format!("{cues} conjunctive cues"));
        }

        // Domain verbs.
        let domain_hits = DOMAIN_VERBS
            .iter()
            .filter(|verb| lower.contains(**verb))
            .count();
        let domain_score = (to_f64(domain_hits) / 2.0).min(1.0);
        if domain_hits > 0 {
            reasons.push("domain verbs present".to_owned());
        }

        // Explicit multi-step markers.
        let marker_hits = MULTI_STEP_MARKERS
            .iter()
            .filter(|marker| lower.contains(**marker))
            .count();
        let marker_score = if marker_hits > 0 { 1.0 } else { 0.0 };
        if marker_hits > 0 {
            reasons.push("explicit multi-step markers".to_owned());
        }

        let score = (length_score * 0.2
            + sentence_score * 0.15
            + cue_score * 0.25
            + domain_score * 0.2
            + marker_score * 0.2)
            .min(1.0);

        let level = if score < SIMPLE_THRESHOLD {
            ComplexityLevel::Simple
        } else if score < MODERATE_THRESHOLD {
            ComplexityLevel::Moderate
        } else {
            ComplexityLevel::Complex
        };

        let has_action_verb = ACTION_VERBS
            .iter()
            .any(|verb| contains_word(&lower, verb));
        let should_use_pipeline = !(level == ComplexityLevel::Simple && !has_action_verb);

        let estimated_steps = if should_use_pipeline {
            let estimate = u32::try_from(cues.saturating_add(1)).unwrap_or(u32::MAX);
            Some(estimate.clamp(1, 8))
        } else {
            None
        };

        let reasoning = if reasons.is_empty() {
            "no complexity signals".to_owned()
        } else {
            reasons.join(", ")
        };

        ComplexityResult {
            level,
            score,
            reasoning,
            should_use_pipeline,
            estimated_steps,
        }
    }
}

/// Count sentence-ish fragments separated by `.`, `!`, or `?`.
fn count_sentences(input: &str) -> usize {
    let count = input
        .split(['.', '!', '?'])
        .filter(|fragment| !fragment.trim().is_empty())
        .count();
    count.max(1)
}

/// Detect `1.` / `2)` style enumerations.
fn has_enumeration(input: &str) -> bool {
    input.split_whitespace().any(|token| {
        let mut chars = token.chars();
        matches!(
            (chars.next(), chars.next()),
            (Some(d), Some('.' | ')')) if d.is_ascii_digit()
        )
    })
}

/// Word-boundary containment check without a regex.
fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.split(|c: char| !c.is_alphanumeric()).any(|t| t == word)
}

/// Lossless usize→f64 for the small counts used in scoring.
fn to_f64(n: usize) -> f64 {
    u32::try_from(n.min(1_000_000)).map(f64::from).unwrap_or(0.0)
}
