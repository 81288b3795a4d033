//! Static description of the operational database
//!
//! The schema is loaded once at startup and shared read-only between
//! requests. It feeds both the AI prompt (as rendered text) and the
//! fallback generator (to check that its templates still apply).

use crate::domain::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default)]
    pub is_foreign_key: bool,
    /// Target table of a foreign key.
    #[serde(default)]
    pub references: Option<String>,
}

impl ColumnDescriptor {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_foreign_key: false,
            references: None,
        }
    }

    pub fn foreign_key(name: &str, data_type: &str, references: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_foreign_key: true,
            references: Some(references.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    /// Discriminator column that must be filtered on to scope rows to one
    /// kind of record (e.g. `users.role`).
    #[serde(default)]
    pub role_filter: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaContext {
    version: String,
    tables: Vec<TableDescriptor>,
}

impl SchemaContext {
    /// Build a schema, checking that table names are unique and that every
    /// foreign key points at a table of this schema.
    pub fn new(version: impl Into<String>, tables: Vec<TableDescriptor>) -> Result<Self> {
        let mut names = HashSet::new();
        for table in &tables {
            if !names.insert(table.name.as_str()) {
                return Err(AppError::ValidationError(format!(
                    "Duplicate table '{}' in schema",
                    table.name
                )));
            }
        }

        for table in &tables {
            for column in &table.columns {
                if let Some(target) = &column.references {
                    if !names.contains(target.as_str()) {
                        return Err(AppError::ValidationError(format!(
                            "Column '{}.{}' references unknown table '{}'",
                            table.name, column.name, target
                        )));
                    }
                }
            }
            if let Some(role_column) = &table.role_filter {
                if !table.has_column(role_column) {
                    return Err(AppError::ValidationError(format!(
                        "Role filter column '{}' does not exist on table '{}'",
                        role_column, table.name
                    )));
                }
            }
        }

        Ok(Self {
            version: version.into(),
            tables,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn has_tables(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.table(name).is_some())
    }

    /// Render the schema as prompt text: tables with typed columns, then the
    /// foreign-key relationships and role filters.
    pub fn to_prompt_context(&self) -> String {
        let mut ctx = String::new();
        let _ = writeln!(ctx, "## Tables (schema version {})", self.version);

        for table in &self.tables {
            let _ = write!(ctx, "- {}", table.name);
            if let Some(description) = &table.description {
                let _ = write!(ctx, ": {}", description);
            }
            ctx.push('\n');

            let columns: Vec<String> = table
                .columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect();
            let _ = writeln!(ctx, "  columns: {}", columns.join(", "));
        }

        let relationships: Vec<String> = self
            .tables
            .iter()
            .flat_map(|table| {
                table.columns.iter().filter_map(move |c| {
                    c.references
                        .as_ref()
                        .map(|target| format!("- {}.{} = {}.id", table.name, c.name, target))
                })
            })
            .collect();

        if !relationships.is_empty() {
            ctx.push_str("\n## Relationships\n");
            for rel in relationships {
                ctx.push_str(&rel);
                ctx.push('\n');
            }
        }

        let role_filters: Vec<String> = self
            .tables
            .iter()
            .filter_map(|t| {
                t.role_filter
                    .as_ref()
                    .map(|col| format!("- {}.{} selects the kind of record", t.name, col))
            })
            .collect();

        if !role_filters.is_empty() {
            ctx.push_str("\n## Role filters\n");
            for filter in role_filters {
                ctx.push_str(&filter);
                ctx.push('\n');
            }
        }

        ctx
    }

    /// The hospital operations schema.
    pub fn hospital() -> Self {
        use ColumnDescriptor as C;

        let tables = vec![
            TableDescriptor {
                name: "users".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::new("full_name", "VARCHAR(255)"),
                    C::new("email", "VARCHAR(255)"),
                    C::new("phone_number", "JSONB"),
                    C::new("emergency_contact", "JSONB"),
                    C::new("password_hash", "VARCHAR(255)"),
                    C::new("role", "VARCHAR(50)"),
                    C::new("staff_type", "VARCHAR(100)"),
                ],
                role_filter: Some("role".to_string()),
                description: Some(
                    "Patients and staff; role is one of patient, doctor, nurse, staff, admin"
                        .to_string(),
                ),
            },
            TableDescriptor {
                name: "patient_records".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::foreign_key("user_id", "INTEGER", "users"),
                    C::new("date_of_birth", "DATE"),
                    C::new("gender", "CHAR(1)"),
                    C::new("blood_group", "VARCHAR(10)"),
                    C::new("allergies", "TEXT"),
                    C::new("medical_history", "TEXT"),
                    C::new("emergency_contact", "JSONB"),
                    C::new("contact_phone", "JSONB"),
                ],
                role_filter: None,
                description: Some("Medical records and personal details of patients".to_string()),
            },
            TableDescriptor {
                name: "rooms".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::new("room_number", "VARCHAR(50)"),
                    C::new("room_type", "VARCHAR(100)"),
                    C::new("bed_capacity", "INTEGER"),
                    C::new("table_count", "INTEGER"),
                    C::new("has_oxygen_outlet", "BOOLEAN"),
                    C::new("floor_number", "INTEGER"),
                    C::new("notes", "TEXT"),
                ],
                role_filter: None,
                description: Some("Hospital rooms with capacity and type".to_string()),
            },
            TableDescriptor {
                name: "occupancy".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::foreign_key("room_id", "INTEGER", "rooms"),
                    C::new("bed_number", "INTEGER"),
                    C::foreign_key("patient_id", "INTEGER", "patient_records"),
                    C::new("attendee", "JSONB"),
                    C::new("assigned_at", "TIMESTAMP"),
                    C::new("discharged_at", "TIMESTAMP"),
                    C::new("tools", "JSONB"),
                    C::new("hospital_inventory", "JSONB"),
                ],
                role_filter: None,
                description: Some(
                    "Room assignments; discharged_at IS NULL means currently admitted".to_string(),
                ),
            },
            TableDescriptor {
                name: "storage_rooms".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::new("storage_number", "VARCHAR(50)"),
                    C::new("storage_type", "VARCHAR(100)"),
                    C::new("floor_number", "INTEGER"),
                    C::new("capacity", "INTEGER"),
                    C::new("notes", "TEXT"),
                ],
                role_filter: None,
                description: Some("Storage locations for equipment and inventory".to_string()),
            },
            TableDescriptor {
                name: "tools".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::new("tool_name", "VARCHAR(255)"),
                    C::new("description", "TEXT"),
                    C::new("category", "VARCHAR(100)"),
                    C::new("quantity_total", "INTEGER"),
                    C::new("quantity_available", "INTEGER"),
                    C::foreign_key("location_storage_id", "INTEGER", "storage_rooms"),
                    C::new("location_description", "VARCHAR(255)"),
                    C::new("purchase_date", "DATE"),
                    C::new("last_maintenance_date", "DATE"),
                ],
                role_filter: None,
                description: Some("Medical tools and equipment".to_string()),
            },
            TableDescriptor {
                name: "hospital_inventory".to_string(),
                columns: vec![
                    C::new("id", "INTEGER PRIMARY KEY"),
                    C::new("item_name", "VARCHAR(255)"),
                    C::new("item_type", "VARCHAR(100)"),
                    C::new("quantity_total", "INTEGER"),
                    C::new("quantity_available", "INTEGER"),
                    C::foreign_key("location_storage_id", "INTEGER", "storage_rooms"),
                    C::new("location_description", "VARCHAR(255)"),
                    C::new("details", "TEXT"),
                    C::new("expiry_date", "DATE"),
                ],
                role_filter: None,
                description: Some(
                    "Consumables and supplies; blood units have item_type = 'blood_unit'"
                        .to_string(),
                ),
            },
        ];

        Self {
            version: "hospital-v1".to_string(),
            tables,
        }
    }
}
