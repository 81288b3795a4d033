//! Result Formatter
//!
//! Deterministic, table-driven rendering of query rows into a short
//! human-readable summary. Each entity hint has a profile naming the column
//! that titles an entry and the columns surfaced next to it. Columns a
//! profile does not know about are ignored, unless none of the profile's
//! columns are present, in which case every column is shown.

use crate::domain::intent::EntityHint;
use crate::domain::query::QueryResult;
use serde_json::Value;
use std::fmt::Write;

const MISSING: &str = "N/A";

struct Field {
    column: &'static str,
    label: &'static str,
}

const fn field(column: &'static str, label: &'static str) -> Field {
    Field { column, label }
}

struct EntityProfile {
    singular: &'static str,
    plural: &'static str,
    title_column: &'static str,
    title_prefix: &'static str,
    fields: &'static [Field],
}

static PATIENT: EntityProfile = EntityProfile {
    singular: "patient",
    plural: "patients",
    title_column: "full_name",
    title_prefix: "",
    fields: &[
        field("blood_group", "blood group"),
        field("allergies", "allergies"),
        field("room_number", "room"),
        field("gender", "gender"),
        field("date_of_birth", "born"),
    ],
};

static ROOM: EntityProfile = EntityProfile {
    singular: "room",
    plural: "rooms",
    title_column: "room_number",
    title_prefix: "Room ",
    fields: &[
        field("room_type", "type"),
        field("status", "status"),
        field("bed_capacity", "beds"),
        field("floor_number", "floor"),
        field("patient_name", "patient"),
    ],
};

static STAFF: EntityProfile = EntityProfile {
    singular: "staff member",
    plural: "staff members",
    title_column: "full_name",
    title_prefix: "",
    fields: &[
        field("staff_type", "type"),
        field("role", "role"),
        field("email", "email"),
    ],
};

static EQUIPMENT: EntityProfile = EntityProfile {
    singular: "equipment item",
    plural: "equipment items",
    title_column: "tool_name",
    title_prefix: "",
    fields: &[
        field("category", "category"),
        field("quantity_available", "available"),
        field("quantity_total", "total"),
        field("storage_number", "storage"),
    ],
};

static GENERIC: EntityProfile = EntityProfile {
    singular: "record",
    plural: "records",
    title_column: "item_name",
    title_prefix: "",
    fields: &[
        field("item_type", "type"),
        field("quantity_available", "available"),
        field("quantity_total", "total"),
        field("expiry_date", "expires"),
        field("storage_number", "storage"),
    ],
};

fn profile(hint: EntityHint) -> &'static EntityProfile {
    match hint {
        EntityHint::Patient => &PATIENT,
        EntityHint::Room => &ROOM,
        EntityHint::Staff => &STAFF,
        EntityHint::Equipment => &EQUIPMENT,
        EntityHint::Generic => &GENERIC,
    }
}

/// Render a cell. Strings are shown bare, nulls as `N/A`.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => MISSING.to_string(),
        Value::String(s) if s.trim().is_empty() => MISSING.to_string(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResultFormatter {
    /// Entries rendered before the remainder is summarized as a count.
    max_listed: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self { max_listed: 50 }
    }
}

impl ResultFormatter {
    pub fn new(max_listed: usize) -> Self {
        Self {
            max_listed: max_listed.max(1),
        }
    }

    pub fn format(&self, result: &QueryResult, hint: EntityHint) -> String {
        let profile = profile(hint);
        let count = result.rows.len();

        if count == 0 {
            return format!("No results found (0 rows) for {}.", profile.plural);
        }

        let mut out = String::new();
        let noun = if count == 1 {
            profile.singular
        } else {
            profile.plural
        };
        let _ = write!(out, "Found {} {}", count, noun);
        if result.truncated {
            let _ = write!(out, " (result truncated; more rows matched)");
        }
        out.push_str(":\n");

        if let (Some(metric), Some(value)) =
            (result.column_index("metric"), result.column_index("value"))
        {
            self.write_metrics(&mut out, result, metric, value);
        } else {
            if hint == EntityHint::Room {
                Self::write_room_summary(&mut out, result);
            }
            self.write_entries(&mut out, result, profile);
        }

        out.trim_end().to_string()
    }

    fn write_metrics(&self, out: &mut String, result: &QueryResult, metric: usize, value: usize) {
        for row in result.rows.iter().take(self.max_listed) {
            let _ = writeln!(
                out,
                "• {}: {}",
                row.get(metric).map(display_value).unwrap_or_else(|| MISSING.to_string()),
                row.get(value).map(display_value).unwrap_or_else(|| MISSING.to_string())
            );
        }
        self.write_remainder(out, result.rows.len());
    }

    fn write_room_summary(out: &mut String, result: &QueryResult) {
        let Some(status) = result.column_index("status") else {
            return;
        };
        let count_of = |wanted: &str| {
            result
                .rows
                .iter()
                .filter(|row| {
                    row.get(status)
                        .and_then(Value::as_str)
                        .is_some_and(|s| s.eq_ignore_ascii_case(wanted))
                })
                .count()
        };
        let _ = writeln!(
            out,
            "Available: {}, Occupied: {}",
            count_of("Available"),
            count_of("Occupied")
        );
    }

    fn write_entries(&self, out: &mut String, result: &QueryResult, profile: &EntityProfile) {
        let title = result.column_index(profile.title_column);
        let known: Vec<(&str, usize)> = profile
            .fields
            .iter()
            .filter_map(|f| result.column_index(f.column).map(|idx| (f.label, idx)))
            .collect();

        for (n, row) in result.rows.iter().take(self.max_listed).enumerate() {
            let _ = write!(out, "{}. ", n + 1);

            if title.is_none() && known.is_empty() {
                // Unknown shape: show every column
                let cells: Vec<String> = result
                    .columns
                    .iter()
                    .zip(row.iter())
                    .map(|(column, value)| format!("{}: {}", column, display_value(value)))
                    .collect();
                let _ = writeln!(out, "{}", cells.join(", "));
                continue;
            }

            let heading = match title.and_then(|idx| row.get(idx)) {
                Some(value) => format!("{}{}", profile.title_prefix, display_value(value)),
                None => format!("{} {}", capitalize(profile.singular), n + 1),
            };
            let details: Vec<String> = known
                .iter()
                .filter_map(|(label, idx)| {
                    let value = row.get(*idx)?;
                    if value.is_null() {
                        None
                    } else {
                        Some(format!("{}: {}", label, display_value(value)))
                    }
                })
                .collect();

            if details.is_empty() {
                let _ = writeln!(out, "{}", heading);
            } else {
                let _ = writeln!(out, "{} ({})", heading, details.join(", "));
            }
        }

        self.write_remainder(out, result.rows.len());
    }

    fn write_remainder(&self, out: &mut String, total: usize) {
        if total > self.max_listed {
            let _ = writeln!(out, "... and {} more not shown", total - self.max_listed);
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<Value>>, truncated: bool) -> QueryResult {
        QueryResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: rows.len(),
            rows,
            truncated,
        }
    }

    #[test]
    fn test_zero_rows_is_never_empty() {
        let formatter = ResultFormatter::default();
        for hint in [
            EntityHint::Patient,
            EntityHint::Room,
            EntityHint::Staff,
            EntityHint::Equipment,
            EntityHint::Generic,
        ] {
            let text = formatter.format(&QueryResult::default(), hint);
            assert!(text.starts_with("No results found (0 rows)"));
        }
    }

    #[test]
    fn test_patient_rows_use_profile_columns() {
        let rows = result(
            &["full_name", "blood_group", "allergies", "room_number", "password_hint"],
            vec![
                vec![json!("Ana Lima"), json!("O+"), json!("penicillin"), json!("R101"), json!("x")],
                vec![json!("Ben Cole"), json!("A-"), Value::Null, Value::Null, json!("y")],
            ],
            false,
        );
        let text = ResultFormatter::default().format(&rows, EntityHint::Patient);

        assert_eq!(
            text,
            "Found 2 patients:\n\
             1. Ana Lima (blood group: O+, allergies: penicillin, room: R101)\n\
             2. Ben Cole (blood group: A-)"
        );
    }

    #[test]
    fn test_truncation_is_noted() {
        let rows = result(&["tool_name"], vec![vec![json!("ECG Machine")]], true);
        let text = ResultFormatter::default().format(&rows, EntityHint::Equipment);
        assert!(text.starts_with("Found 1 equipment item (result truncated; more rows matched):"));
    }

    #[test]
    fn test_room_summary_counts_status() {
        let rows = result(
            &["room_number", "room_type", "status"],
            vec![
                vec![json!("R001"), json!("ICU"), json!("Occupied")],
                vec![json!("R002"), json!("General"), json!("Available")],
                vec![json!("R003"), json!("General"), json!("Available")],
            ],
            false,
        );
        let text = ResultFormatter::default().format(&rows, EntityHint::Room);
        assert!(text.contains("Available: 2, Occupied: 1"));
        assert!(text.contains("1. Room R001 (type: ICU, status: Occupied)"));
    }

    #[test]
    fn test_metric_rows_render_as_statistics() {
        let rows = result(
            &["metric", "value"],
            vec![
                vec![json!("Total Patients"), json!(42)],
                vec![json!("Total Rooms"), json!(12)],
            ],
            false,
        );
        let text = ResultFormatter::default().format(&rows, EntityHint::Generic);
        assert!(text.contains("• Total Patients: 42"));
        assert!(text.contains("• Total Rooms: 12"));
    }

    #[test]
    fn test_unknown_columns_fall_back_to_all_cells() {
        let rows = result(&["blood_group", "count"], vec![vec![json!("O+"), json!(7)]], false);
        let text = ResultFormatter::default().format(&rows, EntityHint::Staff);
        assert!(text.contains("1. blood_group: O+, count: 7"));
    }

    #[test]
    fn test_listing_is_capped() {
        let rows = result(
            &["full_name"],
            (0..5).map(|i| vec![json!(format!("Nurse {}", i))]).collect(),
            false,
        );
        let text = ResultFormatter::new(2).format(&rows, EntityHint::Staff);
        assert!(text.contains("2. Nurse 1"));
        assert!(!text.contains("3. Nurse 2"));
        assert!(text.ends_with("... and 3 more not shown"));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&Value::Null), "N/A");
        assert_eq!(display_value(&json!("")), "N/A");
        assert_eq!(display_value(&json!(3.5)), "3.5");
        assert_eq!(display_value(&json!(true)), "yes");
    }
}
