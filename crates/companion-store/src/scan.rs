//! Field extraction from recognized photo text.
//!
//! Text recognition happens elsewhere; these parsers only pick fields out of
//! the resulting string.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

/// Fields read from a student card.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentInfo {
    pub student_id: String,
    pub student_email: String,
}

/// Fields read from a class schedule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub name: String,
    pub section: String,
    pub days_times: String,
    pub location: String,
    pub notes: String,
}

/// Compiled extraction patterns.
#[derive(Debug, Clone)]
pub struct TextScanner {
    email: Regex,
    student_id: Regex,
    course_code: Regex,
    section: Regex,
    days: Regex,
    time: Regex,
    location: Regex,
}

impl TextScanner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            email: Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}")?,
            student_id: Regex::new(r"\b([A-Za-z]?[0-9]{6,10}|[A-Za-z][A-Za-z0-9]{6,12})\b")?,
            course_code: Regex::new(r"\b[A-Z]{2,5}\s?-?\d{2,4}\b")?,
            section: Regex::new(r"(?i)\b(?:Section|Sec)[:\s-]*([A-Za-z0-9]{1,6})\b")?,
            days: Regex::new(
                r"(?i)(Mon|Tue|Tues|Wed|Thu|Thur|Fri|Sat|Sun|MWF|TR|MTWThF|Mon/?Wed/?Fri|Tue/?Thu)",
            )?,
            time: Regex::new(
                r"(?i)((1[0-2]|0?[1-9]):[0-5]\d\s?(AM|PM))\s?(?:[-–—]\s?((1[0-2]|0?[1-9]):[0-5]\d\s?(AM|PM)))?",
            )?,
            location: Regex::new(
                r"(?i)\b(Room|Rm\.?|Hall|Building|Bldg\.?|Lab|Auditorium)\b[^\n]*",
            )?,
        })
    }

    /// First e-mail address and first id-like token.
    pub fn student_info(&self, text: &str) -> StudentInfo {
        let info = StudentInfo {
            student_id: first_match(&self.student_id, text),
            student_email: first_match(&self.email, text),
        };
        debug!(
            id_found = !info.student_id.is_empty(),
            email_found = !info.student_email.is_empty(),
            "Parsed student info"
        );
        info
    }

    /// Class fields. The name is the first line carrying a course code, or the first line.
    pub fn class_info(&self, text: &str) -> ClassInfo {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        let name = lines
            .iter()
            .find(|line| self.course_code.is_match(line))
            .or_else(|| lines.first())
            .map(|line| line.to_string())
            .unwrap_or_default();

        let section = self
            .section
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let days_times = lines
            .iter()
            .find(|line| self.days.is_match(line) || self.time.is_match(line))
            .map(|line| line.to_string())
            .unwrap_or_default();

        let location = first_match(&self.location, text).trim_end().to_string();

        ClassInfo {
            name,
            section,
            days_times,
            location,
            notes: String::new(),
        }
    }
}

fn first_match(pattern: &Regex, text: &str) -> String {
    pattern
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}
