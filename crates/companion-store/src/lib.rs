//! # Companion Store
//!
//! The record-keeping side of the planner: everything the page persists in
//! local storage, plus the text parsers behind photo autofill.
//!
//! ## Storage keys
//!
//! | key | contents |
//! |---|---|
//! | `student_planner.classes.v1` | JSON array of [`ClassRecord`] |
//! | `course_companion.profile.v1` | [`Profile`] |
//! | `language` | `en` or `es` |

use thiserror::Error;

pub mod backup;
pub mod classes;
pub mod i18n;
pub mod profile;
pub mod scan;
pub mod storage;

pub use backup::{backup_file_name, export_backup, import_backup, Backup, BACKUP_VERSION};
pub use classes::{ClassBook, ClassRecord, Direction, CLASSES_KEY};
pub use i18n::{translate, Language, LANGUAGE_KEY};
pub use profile::{Profile, PROFILE_KEY};
pub use scan::{ClassInfo, StudentInfo, TextScanner};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};

/// Errors from the planner store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid backup format: {0}")]
    InvalidFormat(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
