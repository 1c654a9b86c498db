use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// SQLite rowids
pub type Id = i64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogRecord {
    pub id: Id,
    pub date_of_incident: NaiveDate,
    /// `HH:MM` or `HH:MM:SS`, as submitted
    #[schema(example = "14:30")]
    pub time_of_incident: Option<String>,
    pub category: String,
    pub description_of_incident: String,
    pub impact_types: Vec<String>,
    pub impact_details: Option<String>,
    pub supporting_evidence_snippet: Option<String>,
    pub exhibit_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attachment_count: i64,
}

/// Raw `log_records` row joined with its attachment count. `impact_types` is
/// still the serialized JSON text here.
#[derive(Debug, sqlx::FromRow)]
pub struct LogRecordRow {
    pub id: Id,
    pub date_of_incident: NaiveDate,
    pub time_of_incident: Option<String>,
    pub category: String,
    pub description_of_incident: String,
    pub impact_types: Option<String>,
    pub impact_details: Option<String>,
    pub supporting_evidence_snippet: Option<String>,
    pub exhibit_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub attachment_count: i64,
}

impl From<LogRecordRow> for LogRecord {
    fn from(row: LogRecordRow) -> Self {
        let impact_types = decode_impact_types(row.impact_types.as_deref());
        Self {
            id: row.id,
            date_of_incident: row.date_of_incident,
            time_of_incident: row.time_of_incident,
            category: row.category,
            description_of_incident: row.description_of_incident,
            impact_types,
            impact_details: row.impact_details,
            supporting_evidence_snippet: row.supporting_evidence_snippet,
            exhibit_reference: row.exhibit_reference,
            created_at: row.created_at,
            attachment_count: row.attachment_count,
        }
    }
}

/// Stored impact tags back to a list. Empty or unreadable values become `[]`.
pub fn decode_impact_types(raw: Option<&str>) -> Vec<String> {
    match raw.map(str::trim) {
        None | Some("") => Vec::new(),
        Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
            log::warn!("unreadable impact_types value {text:?}: {e}");
            Vec::new()
        }),
    }
}

pub const REQUIRED_FIELDS: [&str; 4] = [
    "date_of_incident",
    "category",
    "description_of_incident",
    "impact_types",
];

/// Validated input for a create or full replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogRecord {
    pub date_of_incident: NaiveDate,
    pub time_of_incident: Option<String>,
    pub category: String,
    pub description_of_incident: String,
    pub impact_types: Vec<String>,
    pub impact_details: Option<String>,
    pub supporting_evidence_snippet: Option<String>,
    pub exhibit_reference: Option<String>,
}

impl NewLogRecord {
    /// Build a record from multipart text fields. The error names the field
    /// that failed.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, String> {
        for field in REQUIRED_FIELDS {
            if fields.get(field).map_or(true, |v| v.trim().is_empty()) {
                return Err(format!("Missing or empty required field: {field}"));
            }
        }
        let required = |key: &str| fields.get(key).cloned().unwrap_or_default();

        let date_of_incident = parse_date(&required("date_of_incident"))
            .ok_or_else(|| "date_of_incident must be an ISO date (YYYY-MM-DD)".to_string())?;

        // validated, but kept in the submitted form
        let time_of_incident = match optional_field(fields, "time_of_incident") {
            Some(raw) => {
                let raw = raw.trim().to_string();
                parse_time(&raw)
                    .ok_or_else(|| "time_of_incident must be HH:MM or HH:MM:SS".to_string())?;
                Some(raw)
            }
            None => None,
        };

        let impact_types: Vec<String> = serde_json::from_str(&required("impact_types"))
            .map_err(|_| "impact_types must be a valid JSON array of strings".to_string())?;
        if impact_types.is_empty() {
            return Err("impact_types must contain at least one entry".into());
        }

        Ok(Self {
            date_of_incident,
            time_of_incident,
            category: required("category"),
            description_of_incident: required("description_of_incident"),
            impact_types,
            impact_details: optional_field(fields, "impact_details"),
            supporting_evidence_snippet: optional_field(fields, "supporting_evidence_snippet"),
            exhibit_reference: optional_field(fields, "exhibit_reference"),
        })
    }

    pub fn impact_types_json(&self) -> String {
        // Vec<String> always serializes
        serde_json::to_string(&self.impact_types).unwrap_or_else(|_| "[]".into())
    }
}

// browser clients send the literal "null" for cleared inputs
fn optional_field(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields
        .get(key)
        .filter(|v| !v.trim().is_empty() && v.as_str() != "null")
        .cloned()
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Attachment {
    pub id: Id,
    pub log_record_id: Id,
    pub filename: String,
    pub stored_filename: String,
    pub filepath: String,
    pub filetype: String,
    pub filesize_bytes: i64,
    pub upload_date: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Id,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    /// Username with surrounding whitespace removed, plus the password as
    /// given. `None` when either ends up empty.
    pub fn checked(self) -> Option<(String, String)> {
        let username = self.username.trim().to_string();
        (!username.is_empty() && !self.password.is_empty()).then_some((username, self.password))
    }
}

// ---------------- listing ----------------

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogRecordQuery {
    /// Exact category match
    pub category: Option<String>,
    /// Inclusive lower bound on date_of_incident (YYYY-MM-DD)
    pub start_date: Option<String>,
    /// Inclusive upper bound on date_of_incident (YYYY-MM-DD)
    pub end_date: Option<String>,
    /// One of date_of_incident, category, created_at
    pub sort_by: Option<String>,
    /// asc or desc (default desc)
    pub sort_order: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortColumn {
    #[default]
    DateOfIncident,
    Category,
    CreatedAt,
}

impl SortColumn {
    pub fn column(self) -> &'static str {
        match self {
            SortColumn::DateOfIncident => "lr.date_of_incident",
            SortColumn::Category => "lr.category",
            SortColumn::CreatedAt => "lr.created_at",
        }
    }
}

impl FromStr for SortColumn {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date_of_incident" => Ok(SortColumn::DateOfIncident),
            "category" => Ok(SortColumn::Category),
            "created_at" => Ok(SortColumn::CreatedAt),
            other => Err(format!("Invalid sort_by column: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(format!("Invalid sort_order: {s}")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecordFilter {
    pub category: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub sort_by: SortColumn,
    pub sort_order: SortOrder,
}

impl TryFrom<LogRecordQuery> for LogRecordFilter {
    type Error = String;

    fn try_from(q: LogRecordQuery) -> Result<Self, Self::Error> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let date = |name: &str, v: Option<String>| -> Result<Option<NaiveDate>, String> {
            present(v)
                .map(|raw| parse_date(&raw).ok_or_else(|| format!("Invalid {name}: {raw}")))
                .transpose()
        };
        Ok(Self {
            category: present(q.category),
            start_date: date("start_date", q.start_date)?,
            end_date: date("end_date", q.end_date)?,
            sort_by: present(q.sort_by).map(|s| s.parse()).transpose()?.unwrap_or_default(),
            sort_order: present(q.sort_order).map(|s| s.parse()).transpose()?.unwrap_or_default(),
        })
    }
}
