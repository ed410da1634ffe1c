//! Class records and the ordered list they live in.

use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::LocalStorage;
use crate::{Result, StoreError};

/// Storage key for the class list.
pub const CLASSES_KEY: &str = "student_planner.classes.v1";

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// One class in the planner.
///
/// Missing fields deserialize as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassRecord {
    pub id: String,
    pub name: String,
    pub section: String,
    pub days_times: String,
    pub location: String,
    pub notes: String,
}

impl ClassRecord {
    /// Build a record from form input: fields are trimmed and a blank id gets a fresh one.
    pub fn from_form(
        id: &str,
        name: &str,
        section: &str,
        days_times: &str,
        location: &str,
        notes: &str,
    ) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(StoreError::InvalidRecord("name is required".to_string()));
        }
        Ok(Self {
            id: if id.is_empty() { new_id() } else { id.to_string() },
            name: name.trim().to_string(),
            section: section.trim().to_string(),
            days_times: days_times.trim().to_string(),
            location: location.trim().to_string(),
            notes: notes.trim().to_string(),
        })
    }

    /// Case-insensitive substring match over every text field except the id.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        [
            &self.name,
            &self.section,
            &self.days_times,
            &self.location,
            &self.notes,
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(&query))
    }
}

/// Generate a record id: 8 random base-36 characters, then the last 4
/// base-36 digits of the millisecond clock.
pub fn new_id() -> String {
    let mut rng = rand::thread_rng();
    let mut id: String = (0..8)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();

    let clock = to_base36(chrono::Utc::now().timestamp_millis().unsigned_abs());
    id.push_str(&clock[clock.len().saturating_sub(4)..]);
    id
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Move direction within the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// The ordered class list, written back to storage after every change.
pub struct ClassBook {
    storage: Arc<dyn LocalStorage>,
    classes: Vec<ClassRecord>,
}

impl ClassBook {
    /// Load the list from storage.
    ///
    /// Corrupt data is logged and removed; the book then starts empty.
    pub fn load(storage: Arc<dyn LocalStorage>) -> Result<Self> {
        let classes = match storage.get(CLASSES_KEY) {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<ClassRecord>>(&raw) {
                Ok(classes) => classes,
                Err(e) => {
                    warn!(key = CLASSES_KEY, error = %e, "Failed to parse class list, resetting");
                    storage.remove(CLASSES_KEY)?;
                    Vec::new()
                }
            },
        };
        debug!(count = classes.len(), "Loaded classes");
        Ok(Self { storage, classes })
    }

    pub fn classes(&self) -> &[ClassRecord] {
        &self.classes
    }

    pub fn get(&self, id: &str) -> Option<&ClassRecord> {
        self.classes.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Replace the record with the same id, or append it.
    pub fn upsert(&mut self, record: ClassRecord) -> Result<()> {
        if record.name.trim().is_empty() {
            return Err(StoreError::InvalidRecord("name is required".to_string()));
        }
        match self.classes.iter_mut().find(|c| c.id == record.id) {
            Some(existing) => *existing = record,
            None => self.classes.push(record),
        }
        self.save()
    }

    /// Delete by id. Returns whether a record was removed.
    pub fn delete(&mut self, id: &str) -> Result<bool> {
        let before = self.classes.len();
        self.classes.retain(|c| c.id != id);
        if self.classes.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    /// Move a record one position. Unknown ids and moves past either end do nothing.
    pub fn move_item(&mut self, id: &str, direction: Direction) -> Result<bool> {
        let Some(index) = self.classes.iter().position(|c| c.id == id) else {
            return Ok(false);
        };
        let target = match direction {
            Direction::Up => index.checked_sub(1),
            Direction::Down => Some(index + 1).filter(|&i| i < self.classes.len()),
        };
        let Some(target) = target else {
            return Ok(false);
        };
        self.classes.swap(index, target);
        self.save()?;
        Ok(true)
    }

    /// Records matching `query`; a blank query returns all of them.
    pub fn filter(&self, query: &str) -> Vec<&ClassRecord> {
        self.classes.iter().filter(|c| c.matches(query)).collect()
    }

    /// Replace the whole list (used by backup import).
    pub fn replace_all(&mut self, classes: Vec<ClassRecord>) -> Result<()> {
        info!(count = classes.len(), "Replacing class list");
        self.classes = classes;
        self.save()
    }

    fn save(&self) -> Result<()> {
        let raw = serde_json::to_string(&self.classes)?;
        self.storage.set(CLASSES_KEY, &raw)
    }
}
