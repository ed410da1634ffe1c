//! Student profile.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::LocalStorage;
use crate::Result;

/// Storage key for the profile.
pub const PROFILE_KEY: &str = "course_companion.profile.v1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Profile {
    pub student_id: String,
    pub student_email: String,
}

impl Profile {
    /// Load the stored profile. Corrupt data is removed and an empty profile returned.
    pub fn load(storage: &dyn LocalStorage) -> Result<Self> {
        let Some(raw) = storage.get(PROFILE_KEY) else {
            return Ok(Self::default());
        };
        match serde_json::from_str(&raw) {
            Ok(profile) => Ok(profile),
            Err(e) => {
                warn!(key = PROFILE_KEY, error = %e, "Failed to parse profile, resetting");
                storage.remove(PROFILE_KEY)?;
                Ok(Self::default())
            }
        }
    }

    /// Store the profile with surrounding whitespace removed.
    pub fn save(&self, storage: &dyn LocalStorage) -> Result<Profile> {
        let trimmed = Profile {
            student_id: self.student_id.trim().to_string(),
            student_email: self.student_email.trim().to_string(),
        };
        storage.set(PROFILE_KEY, &serde_json::to_string(&trimmed)?)?;
        Ok(trimmed)
    }

    pub fn is_empty(&self) -> bool {
        self.student_id.is_empty() && self.student_email.is_empty()
    }
}
