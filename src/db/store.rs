//! SQLite persistence with idempotent upsert/ignore semantics.
//!
//! One `Store` wraps an r2d2 pool over a single database file. Every
//! connection gets the `levenshtein` scalar function for fuzzy filter
//! predicates, and sqlite-vec is registered process-wide as an
//! auto-extension so the `embeddings` vec0 virtual table and its k-NN
//! `MATCH ... AND k = ?` queries work on all connections.
//!
//! All methods are synchronous and commit per logical unit; async callers
//! off-load through [`Store::call`]. No transaction spans a movie insert and
//! its screenings insert — replay is idempotent instead.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, OptionalExtension, Row};
use zerocopy::AsBytes;

use crate::db::filters::{levenshtein, MovieFilter};
use crate::error::{AppError, AppResult};
use crate::models::{Movie, MovieWithScreenings, PendingMovie, Screening, Stats};

/// Fixed dimension of stored embedding vectors.
pub const EMBEDDING_DIM: usize = 1024;

/// Days around "now" within which a listing title is assumed to be the same
/// movie record, skipping the detail fetch.
const IDENTITY_WINDOW_DAYS: i64 = 5;

const INIT_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS movies (
        id INTEGER PRIMARY KEY,
        title TEXT NOT NULL,
        duration INTEGER,
        director TEXT,
        genre TEXT,
        production TEXT,
        description TEXT,
        href TEXT NOT NULL,
        UNIQUE(title, director)
    );

    CREATE TABLE IF NOT EXISTS screenings (
        id INTEGER PRIMARY KEY,
        movie_id INTEGER NOT NULL,
        screening_date TEXT NOT NULL,
        FOREIGN KEY(movie_id) REFERENCES movies(id),
        UNIQUE(movie_id, screening_date)
    );

    CREATE TABLE IF NOT EXISTS scraped_dates (
        id INTEGER PRIMARY KEY,
        date TEXT UNIQUE
    );

    CREATE VIRTUAL TABLE IF NOT EXISTS embeddings USING vec0(
        movie_id INTEGER PRIMARY KEY,
        embedding FLOAT[1024]
    );
";

/// Fixed column order shared by every movie+screenings projection:
/// title, duration, director, genre, production, description, href,
/// aggregated screening dates.
const MOVIE_COLUMNS: &str =
    "m.title, m.duration, m.director, m.genre, m.production, m.description, m.href";

type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

/// Register sqlite-vec for every connection opened by this process.
fn register_vec_extension() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(
            std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut std::os::raw::c_char,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> std::os::raw::c_int,
            >(sqlite_vec::sqlite3_vec_init as *const ()),
        ));
    });
}

impl Store {
    /// Open (creating if necessary) the database at `path` and run schema
    /// setup. Each pooled connection enables foreign keys and registers the
    /// `levenshtein` scalar function.
    pub fn open(path: &str) -> AppResult<Self> {
        register_vec_extension();

        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Internal(format!("cannot create db directory: {}", e)))?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.create_scalar_function(
                "levenshtein",
                2,
                FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
                |ctx| {
                    let a: Option<String> = ctx.get(0)?;
                    let b: Option<String> = ctx.get(1)?;
                    // NULL columns never fuzzy-match anything
                    Ok(match (a, b) {
                        (Some(a), Some(b)) => levenshtein(&a, &b),
                        _ => i64::MAX,
                    })
                },
            )
        });

        let pool = Pool::builder().max_size(4).build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(INIT_SCHEMA)?;
        drop(conn);

        Ok(Self { pool })
    }

    fn conn(&self) -> AppResult<PooledConnection> {
        Ok(self.pool.get()?)
    }

    /// Run a blocking store operation on the worker pool, so async
    /// orchestration code never blocks the runtime on SQLite I/O.
    pub async fn call<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&Store) -> AppResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| AppError::Internal(format!("store task join error: {}", e)))?
    }

    /// Insert a movie, or refresh every non-identity field when
    /// (title, director) already exists. Returns the row id either way.
    pub fn upsert_movie(&self, movie: &Movie) -> AppResult<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO movies (title, duration, director, genre, production, description, href)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(title, director) DO UPDATE SET
                 duration=excluded.duration,
                 genre=excluded.genre,
                 production=excluded.production,
                 description=excluded.description,
                 href=excluded.href
             RETURNING id",
            params![
                movie.title,
                movie.duration,
                movie.director,
                movie.genre,
                movie.production,
                movie.description,
                movie.href,
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Resolve a listing title to an existing movie seen recently: same
    /// title with a screening within `IDENTITY_WINDOW_DAYS` of now. Lets a
    /// rerun reuse the record without a fresh detail fetch.
    pub fn find_recent_movie(&self, title: &str) -> AppResult<Option<i64>> {
        let conn = self.conn()?;
        let id = conn
            .query_row(
                "SELECT m.id
                 FROM movies m
                 JOIN screenings s ON m.id = s.movie_id
                 WHERE m.title = ?1
                   AND ABS(CAST(JULIANDAY('now') AS INTEGER)
                         - CAST(JULIANDAY(s.screening_date) AS INTEGER)) < ?2
                 ORDER BY ABS(CAST(JULIANDAY('now') AS INTEGER)
                            - CAST(JULIANDAY(s.screening_date) AS INTEGER))
                 LIMIT 1",
                params![title, IDENTITY_WINDOW_DAYS],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Append screenings, silently ignoring ones already present.
    pub fn add_screenings(&self, screenings: &[Screening]) -> AppResult<()> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "INSERT INTO screenings (movie_id, screening_date) VALUES (?1, ?2)
             ON CONFLICT(movie_id, screening_date) DO NOTHING",
        )?;
        for screening in screenings {
            stmt.execute(params![screening.movie_id, screening.date])?;
        }
        Ok(())
    }

    pub fn is_date_scraped(&self, date: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM scraped_dates WHERE date = ?1",
                params![date],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn mark_date_scraped(&self, date: &str) -> AppResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO scraped_dates (date) VALUES (?1) ON CONFLICT(date) DO NOTHING",
            params![date],
        )?;
        Ok(())
    }

    /// Forced-refresh reset: drop the date's screenings and its scraped
    /// marker in one transaction, returning the date to UNSCRAPED.
    pub fn clear_date(&self, date: &str) -> AppResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM screenings WHERE DATE(screening_date) = DATE(?1)",
            params![date],
        )?;
        tx.execute("DELETE FROM scraped_dates WHERE date = ?1", params![date])?;
        tx.commit()?;
        Ok(())
    }

    /// Movies with a description but no embedding row yet. Re-evaluated from
    /// scratch on every pipeline run, which is what makes failed items
    /// naturally retryable.
    pub fn movies_without_embedding(&self) -> AppResult<Vec<PendingMovie>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, description FROM movies
             WHERE description IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM embeddings e WHERE e.movie_id = movies.id)",
        )?;
        let pending = stmt
            .query_map([], |row| {
                Ok(PendingMovie {
                    id: row.get(0)?,
                    description: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pending)
    }

    /// Store one vector for a movie. The dimension is checked here so a
    /// misconfigured embedding model surfaces before any write.
    pub fn add_embedding(&self, movie_id: i64, embedding: &[f32]) -> AppResult<()> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(AppError::InvalidInput(format!(
                "embedding has dimension {}, expected {}",
                embedding.len(),
                EMBEDDING_DIM
            )));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO embeddings (movie_id, embedding) VALUES (?1, ?2)",
            params![movie_id, embedding.as_bytes()],
        )?;
        Ok(())
    }

    /// k-NN over stored embeddings, joined back to movies with aggregated
    /// screenings, ordered by ascending distance. Returns fewer than `k`
    /// rows when the corpus is smaller.
    pub fn find_similar(&self, embedding: &[f32], k: usize) -> AppResult<Vec<MovieWithScreenings>> {
        if embedding.len() != EMBEDDING_DIM {
            return Err(AppError::InvalidInput(format!(
                "query embedding has dimension {}, expected {}",
                embedding.len(),
                EMBEDDING_DIM
            )));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOVIE_COLUMNS}, GROUP_CONCAT(s.screening_date, char(10))
             FROM (
                 SELECT movie_id, distance FROM embeddings
                 WHERE embedding MATCH ?1 AND k = ?2
             ) e
             JOIN movies m ON m.id = e.movie_id
             LEFT JOIN screenings s ON s.movie_id = m.id
             GROUP BY m.id
             ORDER BY MIN(e.distance)"
        ))?;
        let movies = stmt
            .query_map(
                params![embedding.as_bytes(), k as i64],
                movie_with_screenings_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(movies)
    }

    /// Ad-hoc filter query; see [`MovieFilter::to_sql`] for the predicate
    /// grammar. Only movies with at least one matching screening are
    /// returned.
    pub fn filter_movies(&self, filter: &MovieFilter) -> AppResult<Vec<MovieWithScreenings>> {
        filter.validate()?;
        let (clause, filter_params) = filter.to_sql();
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOVIE_COLUMNS}, GROUP_CONCAT(s.screening_date, char(10))
             FROM movies m
             JOIN screenings s ON m.id = s.movie_id
             WHERE {clause}
             GROUP BY m.id
             ORDER BY MIN(s.screening_date)"
        ))?;
        let movies = stmt
            .query_map(
                rusqlite::params_from_iter(filter_params),
                movie_with_screenings_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(movies)
    }

    /// Movies with at most `n` upcoming screenings — the "catch it before it
    /// leaves the programme" report.
    pub fn movies_with_few_screenings(&self, n: i64) -> AppResult<Vec<MovieWithScreenings>> {
        if n < 1 {
            return Err(AppError::InvalidInput(
                "screening limit must be at least 1".to_string(),
            ));
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MOVIE_COLUMNS}, t.screening_dates
             FROM movies m
             JOIN (
                 SELECT movie_id,
                        GROUP_CONCAT(screening_date, char(10)) AS screening_dates
                 FROM screenings
                 WHERE screening_date >= DATE('now')
                 GROUP BY movie_id
                 HAVING COUNT(*) <= ?1
             ) t ON m.id = t.movie_id
             ORDER BY m.title"
        ))?;
        let movies = stmt
            .query_map(params![n], movie_with_screenings_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(movies)
    }

    /// Aggregate report over the whole store.
    pub fn stats(&self) -> AppResult<Stats> {
        let conn = self.conn()?;
        let (total_movies, future_movies, future_screenings) = conn.query_row(
            "SELECT COUNT(DISTINCT m.id),
                    COUNT(DISTINCT CASE WHEN s.screening_date >= DATE('now') THEN m.id END),
                    COUNT(CASE WHEN s.screening_date >= DATE('now') THEN 1 END)
             FROM movies m
             LEFT JOIN screenings s ON m.id = s.movie_id",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let last_scraped: Option<String> =
            conn.query_row("SELECT MAX(date) FROM scraped_dates", [], |row| row.get(0))?;
        let popular: Option<(String, i64)> = conn
            .query_row(
                "SELECT m.title, COUNT(*) AS c
                 FROM movies m
                 JOIN screenings s ON m.id = s.movie_id
                 WHERE s.screening_date >= DATE('now')
                 GROUP BY m.id
                 ORDER BY c DESC
                 LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (most_screened, most_screened_count) = match popular {
            Some((title, count)) => (Some(title), count),
            None => (None, 0),
        };
        Ok(Stats {
            total_movies,
            future_movies,
            future_screenings,
            last_scraped,
            most_screened,
            most_screened_count,
        })
    }
}

/// Map one projection row in the fixed column order documented on
/// [`MOVIE_COLUMNS`]; column 7 is the aggregated screening dates.
fn movie_with_screenings_from_row(row: &Row<'_>) -> rusqlite::Result<MovieWithScreenings> {
    Ok(MovieWithScreenings {
        title: row.get(0)?,
        duration: row.get(1)?,
        director: row.get(2)?,
        genre: row.get(3)?,
        production: row.get(4)?,
        description: row.get(5)?,
        href: row.get(6)?,
        screenings: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
    })
}
