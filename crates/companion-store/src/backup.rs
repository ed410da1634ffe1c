//! JSON backup export and import of the class list.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::classes::{new_id, ClassRecord};
use crate::{Result, StoreError};

/// Envelope version written by [`export_backup`].
pub const BACKUP_VERSION: u32 = 1;

/// Backup file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub version: u32,
    pub exported_at: String,
    pub classes: Vec<ClassRecord>,
}

fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Serialize the class list as a pretty-printed backup.
pub fn export_backup(classes: &[ClassRecord], at: DateTime<Utc>) -> Result<String> {
    let backup = Backup {
        version: BACKUP_VERSION,
        exported_at: iso_timestamp(at),
        classes: classes.to_vec(),
    };
    info!(count = classes.len(), "Exporting backup");
    Ok(serde_json::to_string_pretty(&backup)?)
}

/// Suggested download name, e.g. `student-planner-backup-2024-09-01T08-30-00-000Z.json`.
pub fn backup_file_name(at: DateTime<Utc>) -> String {
    let stamp = iso_timestamp(at).replace([':', '.'], "-");
    format!("student-planner-backup-{}.json", stamp)
}

/// Parse a backup: either the envelope or a bare array of records.
///
/// Entries are normalized field by field. Entries without a name are dropped.
pub fn import_backup(json: &str) -> Result<Vec<ClassRecord>> {
    let parsed: Value = serde_json::from_str(json)?;
    let entries = match &parsed {
        Value::Object(map) => match map.get("classes") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(StoreError::InvalidFormat(
                    "expected a \"classes\" array".to_string(),
                ))
            }
        },
        Value::Array(entries) => entries,
        _ => {
            return Err(StoreError::InvalidFormat(
                "expected an object or an array".to_string(),
            ))
        }
    };

    let records: Vec<ClassRecord> = entries
        .iter()
        .map(normalize)
        .filter(|record| !record.name.trim().is_empty())
        .collect();
    debug!(
        entries = entries.len(),
        kept = records.len(),
        "Parsed backup"
    );
    Ok(records)
}

fn normalize(entry: &Value) -> ClassRecord {
    let field = |name: &str| text(entry.get(name));
    let id = field("id");
    ClassRecord {
        id: if id.is_empty() { new_id() } else { id },
        name: field("name"),
        section: field("section"),
        days_times: field("daysTimes"),
        location: field("location"),
        notes: field("notes"),
    }
}

/// Stringify a loosely typed field; absent, null and false become empty.
fn text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => String::new(),
        Some(other) => other.to_string(),
    }
}
