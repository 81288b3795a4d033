//! Intent Classifier
//!
//! Routes an incoming chat message to one of three paths:
//! - `@analysis` marker → precomputed analysis documents
//! - entity vocabulary (patients, rooms, staff, equipment, inventory) → database
//! - anything else → general assistant
//!
//! Classification is pure and lock-free; one instance is shared by all
//! requests.

use crate::domain::intent::{DatabaseIntent, EntityHint, QueryIntent};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;

pub const ANALYSIS_MARKER: &str = "@analysis";

/// Analysis topics, each backed by one result document.
pub const ANALYSIS_TOPICS: &[&str] = &[
    "staffing",
    "staff_load",
    "average_los",
    "tool_utilisation",
    "inventory_expiry",
    "census_forecast",
    "admission_split",
    "los_prediction",
    "burn_rate",
];

/// Keyword → topic. Matched longest keyword first, whole words only.
const TOPIC_KEYWORDS: &[(&str, &str)] = &[
    ("staffing", "staffing"),
    ("staff needs", "staffing"),
    ("staff requirements", "staffing"),
    ("staff forecast", "staffing"),
    ("nursing staff", "staffing"),
    ("workforce", "staffing"),
    ("nurse", "staffing"),
    ("doctor", "staffing"),
    ("staff_load", "staff_load"),
    ("staff load", "staff_load"),
    ("staff_workload", "staff_load"),
    ("workload", "staff_load"),
    ("patient assignments", "staff_load"),
    ("staff burden", "staff_load"),
    ("staff capacity", "staff_load"),
    ("overworked", "staff_load"),
    ("staff utilization", "staff_load"),
    ("average_los", "average_los"),
    ("alos", "average_los"),
    ("los", "average_los"),
    ("length_of_stay", "average_los"),
    ("length of stay", "average_los"),
    ("average stay", "average_los"),
    ("ward statistics", "average_los"),
    ("patient stay", "average_los"),
    ("bed days", "average_los"),
    ("discharge", "average_los"),
    ("tool_utilisation", "tool_utilisation"),
    ("tool_utilization", "tool_utilisation"),
    ("tool utilisation", "tool_utilisation"),
    ("tool utilization", "tool_utilisation"),
    ("equipment", "tool_utilisation"),
    ("devices", "tool_utilisation"),
    ("medical tools", "tool_utilisation"),
    ("infusion pump", "tool_utilisation"),
    ("ventilator", "tool_utilisation"),
    ("defibrillator", "tool_utilisation"),
    ("monitoring", "tool_utilisation"),
    ("inventory_expiry", "inventory_expiry"),
    ("expiry", "inventory_expiry"),
    ("expired", "inventory_expiry"),
    ("expiration", "inventory_expiry"),
    ("inventory", "inventory_expiry"),
    ("blood units", "inventory_expiry"),
    ("blood bank", "inventory_expiry"),
    ("consumables", "inventory_expiry"),
    ("medical supplies", "inventory_expiry"),
    ("census_forecast", "census_forecast"),
    ("bed_forecast", "census_forecast"),
    ("bed forecast", "census_forecast"),
    ("bed census", "census_forecast"),
    ("bed occupancy", "census_forecast"),
    ("bed utilization", "census_forecast"),
    ("bed availability", "census_forecast"),
    ("census", "census_forecast"),
    ("capacity", "census_forecast"),
    ("admission_split", "admission_split"),
    ("admission type", "admission_split"),
    ("admission pattern", "admission_split"),
    ("admission", "admission_split"),
    ("elective", "admission_split"),
    ("emergency", "admission_split"),
    ("planned", "admission_split"),
    ("urgent", "admission_split"),
    ("los_prediction", "los_prediction"),
    ("los prediction", "los_prediction"),
    ("stay prediction", "los_prediction"),
    ("discharge prediction", "los_prediction"),
    ("length prediction", "los_prediction"),
    ("expected stay", "los_prediction"),
    ("burn_rate", "burn_rate"),
    ("burn rate", "burn_rate"),
    ("consumption", "burn_rate"),
    ("usage rate", "burn_rate"),
    ("usage", "burn_rate"),
    ("inventory usage", "burn_rate"),
    ("supply consumption", "burn_rate"),
];

struct EntityMatcher {
    hint: EntityHint,
    /// Higher wins when several matchers fire; ties go to declaration order.
    specificity: u8,
    pattern: Regex,
}

impl EntityMatcher {
    fn new(hint: EntityHint, specificity: u8, pattern: &str) -> Self {
        Self {
            hint,
            specificity,
            pattern: Regex::new(pattern).unwrap(),
        }
    }
}

static ENTITY_MATCHERS: Lazy<Vec<EntityMatcher>> = Lazy::new(|| {
    use EntityHint::*;
    vec![
        // Explicit identifiers
        EntityMatcher::new(Room, 4, r"(?i)\brooms?\s+(?:no\.?\s*|number\s+|#)?[a-z]?\d+[a-z]?\b"),
        EntityMatcher::new(
            Patient,
            4,
            r"(?i)\bpatients?\s+(?:named?|called)\s+\w+|\bmedical records?\s+(?:for|of)\s+\w+",
        ),
        // Role words and named equipment
        EntityMatcher::new(
            Staff,
            3,
            r"(?i)\b(?:doctors?|nurses?|physicians?|surgeons?|cardiologists?|receptionists?)\b",
        ),
        EntityMatcher::new(
            Equipment,
            3,
            r"(?i)\b(?:ventilators?|defibrillators?|infusion pumps?|monitors?|wheelchairs?|stretchers?|scanners?|x-ray)\b",
        ),
        // Generic entity nouns
        EntityMatcher::new(
            Patient,
            2,
            r"(?i)\b(?:patients?|allerg(?:y|ies)|blood groups?|blood types?|medical history|admitted)\b",
        ),
        EntityMatcher::new(Room, 2, r"(?i)\b(?:rooms?|beds?|wards?|occupancy|occupied|vacant)\b"),
        EntityMatcher::new(Staff, 2, r"(?i)\b(?:staff|employees?|personnel)\b"),
        EntityMatcher::new(Equipment, 2, r"(?i)\b(?:equipment|tools?|devices?)\b"),
        // Statistics and inventory vocabulary
        EntityMatcher::new(
            Generic,
            1,
            r"(?i)\b(?:inventory|supplies|stock|blood units?|statistics|stats|how many|total|overview|hospital)\b",
        ),
    ]
});

static TOPIC_MATCHERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    let mut keywords: Vec<&(&str, &str)> = TOPIC_KEYWORDS.iter().collect();
    // Longest first; stable sort keeps table order among equal lengths
    keywords.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    keywords
        .into_iter()
        .map(|(keyword, topic)| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
            (Regex::new(&pattern).unwrap(), *topic)
        })
        .collect()
});

#[derive(Debug, Default, Clone, Copy)]
pub struct IntentClassifier;

impl IntentClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, message: &str) -> QueryIntent {
        let text = message.trim();
        if text.is_empty() {
            return QueryIntent::General;
        }

        // Analysis marker has absolute priority
        if text.to_lowercase().contains(ANALYSIS_MARKER) {
            return QueryIntent::Analysis {
                matched_topics: Self::match_topics(text),
            };
        }

        match Self::match_entity(text) {
            Some(entity_hint) => QueryIntent::Database(DatabaseIntent {
                entity_hint,
                raw_text: text.to_string(),
            }),
            None => QueryIntent::General,
        }
    }

    /// Topics mentioned in the message, longest keyword first. A region
    /// consumed by a longer keyword cannot match a shorter one.
    pub fn match_topics(message: &str) -> BTreeSet<String> {
        let mut topics = BTreeSet::new();
        let mut consumed: Vec<Range<usize>> = Vec::new();

        for (pattern, topic) in TOPIC_MATCHERS.iter() {
            for m in pattern.find_iter(message) {
                let range = m.range();
                let overlaps = consumed
                    .iter()
                    .any(|c| c.start < range.end && range.start < c.end);
                if overlaps {
                    continue;
                }
                consumed.push(range);
                topics.insert((*topic).to_string());
            }
        }

        topics
    }

    fn match_entity(message: &str) -> Option<EntityHint> {
        let mut best: Option<&EntityMatcher> = None;
        for matcher in ENTITY_MATCHERS.iter() {
            if !matcher.pattern.is_match(message) {
                continue;
            }
            match best {
                Some(current) if current.specificity >= matcher.specificity => {}
                _ => best = Some(matcher),
            }
        }
        best.map(|m| m.hint)
    }
}
