//! Incremental ingestion orchestrator.
//!
//! Crawls the programme one calendar date at a time, strictly sequentially
//! over dates and movies — one shared page session, no parallel fetching.
//! Every write is idempotent, so a run interrupted anywhere resumes safely:
//! a date without its scraped marker is simply processed again.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Store;
use crate::error::{AppError, AppResult};
use crate::models::{ListingEntry, Screening};
use crate::services::parsing::{parse_detail, parse_listing, DETAIL_MARKER, LISTING_MARKER};
use crate::services::providers::PageSession;

pub struct Scraper<S: PageSession> {
    session: S,
    store: Store,
    base_url: String,
    programme_url: String,
    nav_timeout: Duration,
}

impl<S: PageSession> Scraper<S> {
    pub fn new(session: S, store: Store, config: &Config) -> Self {
        Self {
            session,
            store,
            base_url: config.base_url.clone(),
            programme_url: config.programme_url.clone(),
            nav_timeout: Duration::from_secs(config.nav_timeout_secs),
        }
    }

    /// Process each date in a forward-looking window starting tomorrow.
    ///
    /// Per-date failures are soft: the date keeps no scraped marker and is
    /// retried by the next invocation. A hard session failure recycles the
    /// session and moves on to the next date. Only store failures abort the
    /// run.
    pub async fn scrape(&mut self, days_ahead: i64, force: bool) -> AppResult<()> {
        if days_ahead < 1 {
            return Err(AppError::InvalidInput(
                "days_ahead must be at least 1".to_string(),
            ));
        }

        for offset in 1..=days_ahead {
            let date = (chrono::Local::now() + chrono::Duration::days(offset))
                .format("%Y-%m-%d")
                .to_string();

            match self.process_date(&date, force).await {
                Ok(()) => {}
                Err(e) if e.is_soft() => {
                    warn!(date = %date, error = %e, "date processing failed, retryable next run");
                    if matches!(e, AppError::HttpClient(_)) {
                        // the session itself may be unusable, start a fresh one
                        if let Err(recycle_err) = self.session.recycle().await {
                            warn!(error = %recycle_err, "session recycle failed");
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn process_date(&mut self, date: &str, force: bool) -> AppResult<()> {
        if force {
            let d = date.to_string();
            self.store.call(move |s| s.clear_date(&d)).await?;
        }

        let d = date.to_string();
        if self.store.call(move |s| s.is_date_scraped(&d)).await? {
            info!(date = %date, "already scraped, skipping");
            return Ok(());
        }

        let listing_url = format!("{}{}", self.programme_url, listing_date(date));
        self.session.navigate(&listing_url).await?;
        // The marker is the page chrome, not a movie block: a rendered day
        // with no screenings still carries it and gets its scraped marker
        // below, while a half-loaded page times out here and leaves the date
        // eligible for retry.
        self.session
            .wait_for_selector(LISTING_MARKER, self.nav_timeout)
            .await?;
        let html = self.session.content().await?;
        let entries = parse_listing(&html, &self.base_url)?;
        info!(date = %date, entries = entries.len(), "listing parsed");

        for entry in entries {
            match self.process_entry(&entry, date, force).await {
                Ok(()) => {}
                Err(e) if e.is_soft() => {
                    error!(title = %entry.title, date = %date, error = %e,
                        "skipping movie for this date");
                }
                Err(e) => return Err(e),
            }
        }

        let d = date.to_string();
        self.store.call(move |s| s.mark_date_scraped(&d)).await?;
        Ok(())
    }

    /// Resolve the entry to a movie id, reusing a recently seen record when
    /// possible and fetching the detail page otherwise, then append its
    /// screenings. A forced refresh always refetches the detail page so
    /// corrected metadata reaches the upsert.
    async fn process_entry(&mut self, entry: &ListingEntry, date: &str, force: bool) -> AppResult<()> {
        let resolved = if force {
            None
        } else {
            let title = entry.title.clone();
            self.store.call(move |s| s.find_recent_movie(&title)).await?
        };

        let movie_id = match resolved {
            Some(id) => id,
            None => {
                self.session.navigate(&entry.href).await?;
                self.session
                    .wait_for_selector(DETAIL_MARKER, self.nav_timeout)
                    .await?;
                let html = self.session.content().await?;
                let movie = parse_detail(&html, &entry.title, &entry.href)?;
                self.store.call(move |s| s.upsert_movie(&movie)).await?
            }
        };

        let screenings: Vec<Screening> = entry
            .showtimes
            .iter()
            .map(|showtime| Screening {
                movie_id,
                date: format!("{} {}", date, showtime),
            })
            .collect();
        self.store
            .call(move |s| s.add_screenings(&screenings))
            .await?;
        Ok(())
    }
}

/// The site addresses listing pages as DD-MM-YYYY.
fn listing_date(date: &str) -> String {
    date.split('-').rev().collect::<Vec<_>>().join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_date_is_reversed() {
        assert_eq!(listing_date("2026-08-24"), "24-08-2026");
    }
}
