//! Deterministic SQL templates
//!
//! Maps an entity hint to a parameterized query over the hospital schema.
//! This generator never fails: when the schema lacks the tables a template
//! needs, it returns a static hint row instead. User text only ever reaches
//! the database as the bound `$1` parameter.

use super::sql_generator::SqlGenerator;
use crate::domain::error::GenError;
use crate::domain::intent::{DatabaseIntent, EntityHint};
use crate::domain::query::{GeneratedSql, SqlSource};
use crate::domain::schema::SchemaContext;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

static LIMIT_BEFORE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:top|first|last|latest|list|show(?:\s+me)?|limit|give\s+me)\s+(\d{1,9})\b")
        .unwrap()
});
static LIMIT_AFTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(\d{1,9})\s+(?:patients?|rooms?|beds?|nurses?|doctors?|staff|tools?|items?|records?|rows?|results?|entries|people)\b",
    )
    .unwrap()
});
static ROOM_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\brooms?\s+(?:no\.?\s*|number\s+|#)?([a-z]?\d+[a-z]?)\b").unwrap()
});
static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]+").unwrap());
static INVENTORY_WORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:inventory|supplies|supply|stock|blood|consumables?|items?)\b").unwrap());

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // question and command words
        "what", "which", "who", "whom", "whose", "where", "when", "how", "many", "much",
        "show", "list", "find", "give", "get", "tell", "display", "fetch", "search", "lookup",
        "please", "can", "could", "would", "you", "me", "our", "your", "all", "any", "some",
        "the", "and", "for", "with", "without", "from", "into", "about", "are", "was", "were",
        "is", "there", "their", "this", "that", "these", "those", "have", "has", "had",
        "currently", "current", "now", "today", "top", "first", "last", "latest", "limit",
        "named", "name", "names", "called", "number", "details", "detail", "information",
        "info", "data", "record", "records", "entries", "rows", "results", "each", "every",
        "not", "but", "who", "also", "them", "they", "give", "group", "groups", "type", "types",
        // entity vocabulary
        "patient", "patients", "room", "rooms", "bed", "beds", "ward", "wards", "occupancy",
        "occupied", "vacant", "empty", "free", "available", "availability", "staff", "doctor",
        "doctors", "nurse", "nurses", "physician", "physicians", "employee", "employees",
        "personnel", "equipment", "tool", "tools", "device", "devices", "inventory", "supplies",
        "stock", "statistics", "stats", "total", "overview", "hospital", "admitted", "assigned",
        "medical", "people", "items", "item",
    ]
    .into_iter()
    .collect()
});

const HINT_SQL: &str = "SELECT 'Hospital Overview' AS info, \
'Try a more specific question such as: patient John, room R001, available equipment, hospital stats' AS suggestion \
LIMIT 1";

pub struct FallbackSqlGenerator {
    default_limit: u32,
    max_limit: u32,
}

impl FallbackSqlGenerator {
    pub fn new(default_limit: u32, max_limit: u32) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            default_limit: default_limit.clamp(1, max_limit),
            max_limit,
        }
    }

    pub fn generate(&self, intent: &DatabaseIntent, schema: &SchemaContext) -> GeneratedSql {
        let limit = self.requested_limit(&intent.raw_text);
        let term = search_term(intent.entity_hint, &intent.raw_text);

        let (required, sql) = match intent.entity_hint {
            EntityHint::Patient => (
                &["users", "patient_records", "occupancy", "rooms"][..],
                patient_sql(term.is_some(), limit),
            ),
            EntityHint::Room => (
                &["rooms", "occupancy", "patient_records", "users"][..],
                room_sql(term.is_some(), limit),
            ),
            EntityHint::Staff => (
                &["users"][..],
                staff_sql(staff_role(&intent.raw_text), term.is_some(), limit),
            ),
            EntityHint::Equipment => (
                &["tools", "storage_rooms"][..],
                equipment_sql(term.is_some(), limit),
            ),
            EntityHint::Generic if INVENTORY_WORDS.is_match(&intent.raw_text) => (
                &["hospital_inventory", "storage_rooms"][..],
                inventory_sql(term.is_some(), limit),
            ),
            EntityHint::Generic => (
                &["users", "rooms", "occupancy", "tools"][..],
                overview_sql(limit),
            ),
        };

        if !schema.has_tables(required) {
            return GeneratedSql::new(HINT_SQL, SqlSource::Fallback);
        }

        // The overview template has no placeholder
        let uses_param = sql.contains("$1");
        let params = match term {
            Some(term) if uses_param => vec![json!(format!("%{}%", term))],
            _ => Vec::new(),
        };

        GeneratedSql::new(sql, SqlSource::Fallback).with_params(params)
    }

    /// Explicit numeric bound in the message, clamped to `[1, max_limit]`,
    /// otherwise the default limit. Room numbers are never bounds.
    pub fn requested_limit(&self, text: &str) -> u32 {
        let text = ROOM_NUMBER.replace_all(text, "room");
        LIMIT_BEFORE
            .captures(&text)
            .or_else(|| LIMIT_AFTER.captures(&text))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .map(|n| n.clamp(1, self.max_limit as u64) as u32)
            .unwrap_or(self.default_limit)
    }
}

#[async_trait]
impl SqlGenerator for FallbackSqlGenerator {
    fn source(&self) -> SqlSource {
        SqlSource::Fallback
    }

    async fn generate_sql(
        &self,
        intent: &DatabaseIntent,
        schema: &SchemaContext,
        _cancel: &CancellationToken,
    ) -> Result<GeneratedSql, GenError> {
        Ok(self.generate(intent, schema))
    }
}

/// Free-text search term: the room number for room questions, otherwise
/// the longest alphabetic word of three or more letters that is not a
/// stopword (first one wins on ties).
pub fn search_term(hint: EntityHint, text: &str) -> Option<String> {
    if hint == EntityHint::Room {
        if let Some(number) = ROOM_NUMBER.captures(text).and_then(|c| c.get(1)) {
            return Some(number.as_str().to_uppercase());
        }
    }

    let mut best: Option<&str> = None;
    for word in WORD.find_iter(text).map(|m| m.as_str()) {
        if word.len() < 3 || STOPWORDS.contains(word.to_lowercase().as_str()) {
            continue;
        }
        if best.map(|b| word.len() > b.len()).unwrap_or(true) {
            best = Some(word);
        }
    }

    best.map(|word| singular(&word.to_lowercase()))
}

fn singular(word: &str) -> String {
    if word.len() > 4 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

fn staff_role(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    if lower.contains("doctor") || lower.contains("physician") {
        Some("doctor")
    } else if lower.contains("nurse") {
        Some("nurse")
    } else {
        None
    }
}

fn patient_sql(search: bool, limit: u32) -> String {
    let filter = if search {
        "\n  AND (u.full_name ILIKE $1 OR pr.allergies ILIKE $1 OR pr.medical_history ILIKE $1)"
    } else {
        ""
    };
    format!(
        "SELECT u.full_name, pr.blood_group, pr.allergies, r.room_number, pr.date_of_birth, pr.gender\n\
FROM users u\n\
JOIN patient_records pr ON pr.user_id = u.id\n\
LEFT JOIN occupancy o ON o.patient_id = pr.id AND o.discharged_at IS NULL\n\
LEFT JOIN rooms r ON r.id = o.room_id\n\
WHERE u.role = 'patient'{filter}\n\
ORDER BY u.full_name\n\
LIMIT {limit}"
    )
}

fn room_sql(search: bool, limit: u32) -> String {
    let filter = if search {
        "\nWHERE (r.room_number ILIKE $1 OR r.room_type ILIKE $1)"
    } else {
        ""
    };
    format!(
        "SELECT r.room_number, r.room_type, r.bed_capacity, r.floor_number,\n\
  CASE WHEN o.id IS NOT NULL THEN 'Occupied' ELSE 'Available' END AS status,\n\
  u.full_name AS patient_name, o.assigned_at\n\
FROM rooms r\n\
LEFT JOIN occupancy o ON o.room_id = r.id AND o.discharged_at IS NULL\n\
LEFT JOIN patient_records pr ON pr.id = o.patient_id\n\
LEFT JOIN users u ON u.id = pr.user_id{filter}\n\
ORDER BY r.room_number\n\
LIMIT {limit}"
    )
}

fn staff_sql(role: Option<&str>, search: bool, limit: u32) -> String {
    let role_filter = match role {
        Some(role) => format!("u.role = '{}'", role),
        None => "u.role IN ('doctor', 'nurse', 'staff', 'admin')".to_string(),
    };
    let filter = if search {
        "\n  AND (u.full_name ILIKE $1 OR u.staff_type ILIKE $1)"
    } else {
        ""
    };
    format!(
        "SELECT u.full_name, u.role, u.staff_type, u.email\n\
FROM users u\n\
WHERE {role_filter}{filter}\n\
ORDER BY u.full_name\n\
LIMIT {limit}"
    )
}

fn equipment_sql(search: bool, limit: u32) -> String {
    let filter = if search {
        "\n  AND (t.tool_name ILIKE $1 OR t.category ILIKE $1)"
    } else {
        ""
    };
    format!(
        "SELECT t.tool_name, t.category, t.quantity_available, t.quantity_total,\n\
  sr.storage_number, t.location_description\n\
FROM tools t\n\
LEFT JOIN storage_rooms sr ON sr.id = t.location_storage_id\n\
WHERE t.quantity_available > 0{filter}\n\
ORDER BY t.category, t.tool_name\n\
LIMIT {limit}"
    )
}

fn inventory_sql(search: bool, limit: u32) -> String {
    let filter = if search {
        "\nWHERE (hi.item_name ILIKE $1 OR hi.item_type ILIKE $1)"
    } else {
        ""
    };
    format!(
        "SELECT hi.item_name, hi.item_type, hi.quantity_available, hi.quantity_total,\n\
  hi.expiry_date, sr.storage_number\n\
FROM hospital_inventory hi\n\
LEFT JOIN storage_rooms sr ON sr.id = hi.location_storage_id{filter}\n\
ORDER BY hi.expiry_date NULLS LAST, hi.item_name\n\
LIMIT {limit}"
    )
}

fn overview_sql(limit: u32) -> String {
    format!(
        "SELECT 'Total Patients' AS metric, COUNT(*) AS value FROM users WHERE role = 'patient'\n\
UNION ALL SELECT 'Staff Members', COUNT(*) FROM users WHERE role <> 'patient'\n\
UNION ALL SELECT 'Total Rooms', COUNT(*) FROM rooms\n\
UNION ALL SELECT 'Occupied Beds', COUNT(*) FROM occupancy WHERE discharged_at IS NULL\n\
UNION ALL SELECT 'Available Equipment', COALESCE(SUM(quantity_available), 0) FROM tools\n\
LIMIT {limit}"
    )
}
