//! Keyword priority triage.
//!
//! Content is scanned for the urgent keywords first, then the high ones.
//! Anything else is `medium`.  Nothing assigns `low`: monitors have no signal
//! that an event is less important than ordinary traffic, so the level exists
//! only for events built elsewhere.

use aho_corasick::AhoCorasick;

use intentflow_core::Priority;

pub const URGENT_KEYWORDS: &[&str] = &["urgent", "emergency", "asap", "immediately", "critical"];
pub const HIGH_KEYWORDS: &[&str] = &[
    "important",
    "priority",
    "deadline",
    "appointment",
    "prescription",
];

/// Case-insensitive keyword matcher.
#[derive(Debug, Clone)]
pub struct PriorityHeuristic {
    urgent: Option<AhoCorasick>,
    high: Option<AhoCorasick>,
}

impl Default for PriorityHeuristic {
    fn default() -> Self {
        Self::new(URGENT_KEYWORDS, HIGH_KEYWORDS)
    }
}

impl PriorityHeuristic {
    pub fn new(urgent: &[&str], high: &[&str]) -> Self {
        Self {
            urgent: build_automaton(urgent),
            high: build_automaton(high),
        }
    }

    pub fn assess(&self, text: &str) -> Priority {
        let hit = |ac: &Option<AhoCorasick>| ac.as_ref().is_some_and(|ac| ac.is_match(text));
        if hit(&self.urgent) {
            Priority::Urgent
        } else if hit(&self.high) {
            Priority::High
        } else {
            Priority::Medium
        }
    }
}

fn build_automaton(keywords: &[&str]) -> Option<AhoCorasick> {
    if keywords.is_empty() {
        return None;
    }
    match AhoCorasick::builder().ascii_case_insensitive(true).build(keywords) {
        Ok(ac) => Some(ac),
        Err(e) => {
            tracing::error!(error = %e, "failed to build priority keyword automaton");
            None
        }
    }
}
