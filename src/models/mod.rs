use serde::{Deserialize, Serialize};

/// One block of a date's listing page: a movie title, its detail-page link
/// and the raw showtime strings ("HH:MM") found next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub title: String,
    pub href: String,
    pub showtimes: Vec<String>,
}

/// A movie as stored. Identity is (title, director); every other field is
/// refreshed by upsert on later scrapes. All detail-page fields are optional
/// because the site omits them freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub title: String,
    pub duration: Option<i64>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub production: Option<String>,
    pub description: Option<String>,
    pub href: String,
}

/// One showtime occurrence of a movie. Append-only;
/// `date` is "YYYY-MM-DD HH:MM".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screening {
    pub movie_id: i64,
    pub date: String,
}

/// A movie joined with its aggregated screening dates
/// (newline-separated, as produced by GROUP_CONCAT).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieWithScreenings {
    pub title: String,
    pub duration: Option<i64>,
    pub director: Option<String>,
    pub genre: Option<String>,
    pub production: Option<String>,
    pub description: Option<String>,
    pub href: String,
    pub screenings: String,
}

impl MovieWithScreenings {
    pub fn screening_dates(&self) -> impl Iterator<Item = &str> {
        self.screenings.lines().filter(|l| !l.is_empty())
    }
}

/// A movie selected for embedding: no embedding row yet, description present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMovie {
    pub id: i64,
    pub description: String,
}

/// Aggregate numbers for the `stats` report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats {
    pub total_movies: i64,
    pub future_movies: i64,
    pub future_screenings: i64,
    pub last_scraped: Option<String>,
    pub most_screened: Option<String>,
    pub most_screened_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screening_dates_splits_group_concat() {
        let movie = MovieWithScreenings {
            title: "Ida".to_string(),
            duration: Some(80),
            director: Some("Paweł Pawlikowski".to_string()),
            genre: None,
            production: None,
            description: None,
            href: "https://example.com/f/2".to_string(),
            screenings: "2026-08-24 18:00\n2026-08-25 20:30".to_string(),
        };
        let dates: Vec<_> = movie.screening_dates().collect();
        assert_eq!(dates, vec!["2026-08-24 18:00", "2026-08-25 20:30"]);
    }

    #[test]
    fn test_movie_serialization_roundtrip() {
        let movie = Movie {
            title: "Ida".to_string(),
            duration: Some(80),
            director: Some("Paweł Pawlikowski".to_string()),
            genre: Some("dramat".to_string()),
            production: None,
            description: None,
            href: "https://example.com/f/2".to_string(),
        };
        let json = serde_json::to_string(&movie).unwrap();
        let back: Movie = serde_json::from_str(&json).unwrap();
        assert_eq!(movie, back);
    }
}
