//! Ad-hoc movie filter queries.
//!
//! A `MovieFilter` compiles to a parameterized WHERE fragment over the
//! movies/screenings join. Fuzzy string predicates go through the
//! `levenshtein` scalar function the store registers on every connection;
//! exact predicates fall back to case-insensitive LIKE.

use chrono::NaiveDate;
use rusqlite::types::Value;

use crate::error::{AppError, AppResult};

/// Maximum edit distance for a fuzzy string match.
const FUZZY_DISTANCE: i64 = 3;

#[derive(Debug, Clone, Default)]
pub struct MovieFilter {
    pub titles: Vec<String>,
    pub directors: Vec<String>,
    pub min_duration: Option<i64>,
    pub max_duration: Option<i64>,
    /// "YYYY-MM-DD HH:MM" or "YYYY-MM-DD"
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub fuzzy: bool,
}

impl MovieFilter {
    /// Reject malformed caller input before any query runs.
    pub fn validate(&self) -> AppResult<()> {
        for date in [&self.start_date, &self.end_date].into_iter().flatten() {
            parse_filter_date(date)?;
        }
        if let (Some(min), Some(max)) = (self.min_duration, self.max_duration) {
            if min > max {
                return Err(AppError::InvalidInput(format!(
                    "min duration {} exceeds max duration {}",
                    min, max
                )));
            }
        }
        if self.min_duration.is_some_and(|d| d < 0) || self.max_duration.is_some_and(|d| d < 0) {
            return Err(AppError::InvalidInput(
                "duration bounds must be non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Compile to a WHERE fragment plus its positional parameters.
    /// Columns are referenced as `m.*` (movies) and `s.*` (screenings).
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut conditions = vec!["1=1".to_string()];
        let mut params: Vec<Value> = Vec::new();

        if !self.titles.is_empty() {
            conditions.push(string_conditions("m.title", &self.titles, self.fuzzy));
            params.extend(self.titles.iter().map(|t| string_param(t, self.fuzzy)));
        }

        if !self.directors.is_empty() {
            conditions.push(string_conditions("m.director", &self.directors, self.fuzzy));
            params.extend(self.directors.iter().map(|d| string_param(d, self.fuzzy)));
        }

        if let Some(min) = self.min_duration {
            conditions.push("m.duration >= ?".to_string());
            params.push(Value::Integer(min));
        }

        if let Some(max) = self.max_duration {
            conditions.push("m.duration <= ?".to_string());
            params.push(Value::Integer(max));
        }

        if let Some(ref start) = self.start_date {
            conditions.push("s.screening_date >= ?".to_string());
            params.push(Value::Text(start.clone()));
        }

        if let Some(ref end) = self.end_date {
            conditions.push("s.screening_date <= ?".to_string());
            params.push(Value::Text(end.clone()));
        }

        (conditions.join(" AND "), params)
    }
}

fn string_conditions(column: &str, values: &[String], fuzzy: bool) -> String {
    let comparison = if fuzzy {
        format!("levenshtein({}, ?) < {}", column, FUZZY_DISTANCE)
    } else {
        format!("LOWER({}) LIKE LOWER(?)", column)
    };
    let comparisons = vec![comparison; values.len()];
    format!("({})", comparisons.join(" OR "))
}

fn string_param(value: &str, fuzzy: bool) -> Value {
    if fuzzy {
        Value::Text(value.to_string())
    } else {
        Value::Text(format!("%{}%", value))
    }
}

fn parse_filter_date(date: &str) -> AppResult<()> {
    let date_part = date.split_whitespace().next().unwrap_or(date);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| AppError::InvalidInput(format!("invalid date '{}'", date)))?;
    if let Some(time_part) = date.split_whitespace().nth(1) {
        chrono::NaiveTime::parse_from_str(time_part, "%H:%M")
            .map_err(|_| AppError::InvalidInput(format!("invalid time in '{}'", date)))?;
    }
    Ok(())
}

/// Case-insensitive Levenshtein edit distance, registered with SQLite as the
/// `levenshtein(a, b)` scalar so fuzzy predicates run inside the engine.
pub fn levenshtein(a: &str, b: &str) -> i64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() {
        return b.len() as i64;
    }
    if b.is_empty() {
        return a.len() as i64;
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut current = vec![i + 1];
        for (j, cb) in b.iter().enumerate() {
            let insertions = previous[j + 1] + 1;
            let deletions = current[j] + 1;
            let substitutions = previous[j] + usize::from(ca != cb);
            current.push(insertions.min(deletions).min(substitutions));
        }
        previous = current;
    }
    previous[b.len()] as i64
}
