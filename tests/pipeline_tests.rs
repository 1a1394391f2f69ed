//! End-to-end pipeline tests: ingestion against a scripted page session,
//! embeddings and recommendations against a mocked model service, with a
//! real SQLite store on disk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use scraper::{Html, Selector};

use kinoplan::config::Config;
use kinoplan::db::{MovieFilter, Store, EMBEDDING_DIM};
use kinoplan::error::{AppError, AppResult};
use kinoplan::models::Screening;
use kinoplan::services::embeddings::EmbeddingPipeline;
use kinoplan::services::providers::{LanguageModel, PageSession};
use kinoplan::services::recommendations;
use kinoplan::services::scraper::Scraper;

const BASE_URL: &str = "https://example.com/";
const PROGRAMME_URL: &str = "https://example.com/#repertuar@";

mock! {
    Model {}

    #[async_trait::async_trait]
    impl LanguageModel for Model {
        async fn chat(&self, system_prompt: &str, user_text: &str) -> AppResult<String>;
        async fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
    }
}

/// Scripted page session: a URL-to-HTML map. Unknown URLs behave like pages
/// that never load (navigation timeout); selector waits really inspect the
/// served HTML.
struct FakeSession {
    pages: HashMap<String, String>,
    current: Option<String>,
}

impl FakeSession {
    fn new(pages: HashMap<String, String>) -> Self {
        Self {
            pages,
            current: None,
        }
    }
}

#[async_trait::async_trait]
impl PageSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> AppResult<()> {
        if self.pages.contains_key(url) {
            self.current = Some(url.to_string());
            Ok(())
        } else {
            Err(AppError::Timeout {
                url: url.to_string(),
                selector: "<navigation>".to_string(),
            })
        }
    }

    async fn wait_for_selector(&mut self, selector: &str, _timeout: Duration) -> AppResult<()> {
        let url = self.current.clone().expect("navigate first");
        let html = &self.pages[&url];
        let found = {
            let sel = Selector::parse(selector).unwrap();
            Html::parse_document(html).select(&sel).next().is_some()
        };
        if found {
            Ok(())
        } else {
            Err(AppError::Timeout {
                url,
                selector: selector.to_string(),
            })
        }
    }

    async fn content(&self) -> AppResult<String> {
        let url = self.current.as_ref().expect("navigate first");
        Ok(self.pages[url].clone())
    }

    async fn recycle(&mut self) -> AppResult<()> {
        self.current = None;
        Ok(())
    }
}

fn test_config() -> Config {
    Config {
        base_url: BASE_URL.to_string(),
        programme_url: PROGRAMME_URL.to_string(),
        db_path: String::new(),
        model_url: "http://localhost:11434".to_string(),
        chat_model: "llama3.2".to_string(),
        embed_model: "mxbai-embed-large".to_string(),
        nav_timeout_secs: 1,
        max_concurrent_embeddings: 2,
    }
}

fn test_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pipeline.db");
    let store = Store::open(path.to_str().unwrap()).unwrap();
    (dir, store)
}

fn date_offset(days: i64) -> String {
    (chrono::Local::now() + chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

fn listing_url(date: &str) -> String {
    let reversed: String = date.split('-').rev().collect::<Vec<_>>().join("-");
    format!("{}{}", PROGRAMME_URL, reversed)
}

fn listing_html(entries: &[(&str, &str, &[&str])]) -> String {
    let mut blocks = String::new();
    for (title, href, showtimes) in entries {
        let mut links = String::new();
        for showtime in showtimes.iter() {
            links.push_str(&format!("<a class=\"xseans\">{}</a>", showtime));
        }
        blocks.push_str(&format!(
            "<div class=\"boks ilustracja-left mala-ilustr wyzszy\">\
             <a class=\"tyt\" href=\"{}\">{}</a>{}</div>",
            href, title, links
        ));
    }
    format!(
        "<html><body><div id=\"repertuar\">{}</div></body></html>",
        blocks
    )
}

fn detail_html(director: &str, genre: &str, duration: u32, description: &str) -> String {
    format!(
        "<html><body>\
         <h4>reż. {}</h4>\
         <h4>gatunek: {}</h4>\
         <div class=\"crrow\">czas: {} min.</div>\
         <div class=\"opisf\"><p>{}</p></div>\
         </body></html>",
        director, genre, duration, description
    )
}

fn unit_vec(hot: usize, scale: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIM];
    v[hot] = scale;
    v
}

fn all_movies(store: &Store) -> Vec<kinoplan::models::MovieWithScreenings> {
    store.filter_movies(&MovieFilter::default()).unwrap()
}

#[tokio::test]
async fn test_ingest_twice_is_idempotent() {
    let (_dir, store) = test_store();
    let tomorrow = date_offset(1);

    let mut pages = HashMap::new();
    pages.insert(
        listing_url(&tomorrow),
        listing_html(&[
            (
                "Perfect Days",
                "https://example.com/film1",
                &["12:30", "18:00"][..],
            ),
            ("Ida", "https://example.com/film2", &["20:15"][..]),
        ]),
    );
    pages.insert(
        "https://example.com/film1".to_string(),
        detail_html("Wim Wenders", "dramat", 124, "Toalety w Tokio."),
    );
    pages.insert(
        "https://example.com/film2".to_string(),
        detail_html("Paweł Pawlikowski", "dramat", 82, "Zakonnica w drodze."),
    );

    let mut scraper = Scraper::new(FakeSession::new(pages.clone()), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    let after_first = all_movies(&store);
    assert_eq!(after_first.len(), 2);
    assert!(store.is_date_scraped(&tomorrow).unwrap());

    let mut scraper = Scraper::new(FakeSession::new(pages), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    let after_second = all_movies(&store);
    assert_eq!(after_first, after_second);
    let perfect_days = &after_second[0];
    assert_eq!(perfect_days.screening_dates().count(), 2);
}

#[tokio::test]
async fn test_partial_date_failure_still_marks_date() {
    let (_dir, store) = test_store();
    let tomorrow = date_offset(1);

    let mut pages = HashMap::new();
    pages.insert(
        listing_url(&tomorrow),
        listing_html(&[
            ("Good One", "https://example.com/film1", &["12:00"][..]),
            ("Broken One", "https://example.com/film2", &["14:00"][..]),
            ("Good Two", "https://example.com/film3", &["16:00"][..]),
        ]),
    );
    pages.insert(
        "https://example.com/film1".to_string(),
        detail_html("A", "dramat", 100, "Pierwszy."),
    );
    // film2 has no detail page at all: navigation times out, the movie is
    // soft-skipped for this date
    pages.insert(
        "https://example.com/film3".to_string(),
        detail_html("B", "komedia", 90, "Trzeci."),
    );

    let mut scraper = Scraper::new(FakeSession::new(pages), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    assert!(store.is_date_scraped(&tomorrow).unwrap());
    let movies = all_movies(&store);
    let titles: Vec<_> = movies.iter().map(|m| m.title.as_str()).collect();
    assert_eq!(titles, vec!["Good One", "Good Two"]);
    assert_eq!(movies[0].screening_dates().count(), 1);
}

#[tokio::test]
async fn test_forced_reset_replaces_stale_screenings_and_refreshes_fields() {
    let (_dir, store) = test_store();
    let tomorrow = date_offset(1);

    let mut first_pages = HashMap::new();
    first_pages.insert(
        listing_url(&tomorrow),
        listing_html(&[("Ida", "https://example.com/film2", &["18:00"][..])]),
    );
    first_pages.insert(
        "https://example.com/film2".to_string(),
        detail_html("Paweł Pawlikowski", "dramat", 80, "Opis."),
    );

    let mut scraper = Scraper::new(FakeSession::new(first_pages), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    // a screening from an earlier crawl on a different date must survive the
    // forced reset of `tomorrow`
    let movie_id = store.find_recent_movie("Ida").unwrap().unwrap();
    let other_date = format!("{} 10:00", date_offset(2));
    store
        .add_screenings(&[Screening {
            movie_id,
            date: other_date.clone(),
        }])
        .unwrap();

    // the site now shows a different showtime and corrected metadata
    let mut second_pages = HashMap::new();
    second_pages.insert(
        listing_url(&tomorrow),
        listing_html(&[("Ida", "https://example.com/film2", &["16:00"][..])]),
    );
    second_pages.insert(
        "https://example.com/film2".to_string(),
        detail_html("Paweł Pawlikowski", "dramat psychologiczny", 82, "Opis."),
    );

    let mut scraper = Scraper::new(FakeSession::new(second_pages), store.clone(), &test_config());
    scraper.scrape(1, true).await.unwrap();

    let movies = all_movies(&store);
    assert_eq!(movies.len(), 1);
    let dates: Vec<_> = movies[0].screening_dates().collect();
    assert!(dates.contains(&format!("{} 16:00", tomorrow).as_str()));
    assert!(dates.contains(&other_date.as_str()));
    assert!(!dates.contains(&format!("{} 18:00", tomorrow).as_str()));
    assert_eq!(movies[0].genre.as_deref(), Some("dramat psychologiczny"));
    assert_eq!(movies[0].duration, Some(82));
}

#[tokio::test]
async fn test_empty_listing_still_marks_date() {
    let (_dir, store) = test_store();
    let tomorrow = date_offset(1);

    // a fully rendered page whose programme container holds no movie blocks
    let mut pages = HashMap::new();
    pages.insert(listing_url(&tomorrow), listing_html(&[]));

    let mut scraper = Scraper::new(FakeSession::new(pages), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    assert!(store.is_date_scraped(&tomorrow).unwrap());
    assert!(all_movies(&store).is_empty());
}

#[tokio::test]
async fn test_half_loaded_listing_leaves_date_unmarked() {
    let (_dir, store) = test_store();
    let tomorrow = date_offset(1);

    // navigation succeeds but the programme container never renders: the
    // wait times out and no scraped marker may be written
    let mut pages = HashMap::new();
    pages.insert(
        listing_url(&tomorrow),
        "<html><body>loading...</body></html>".to_string(),
    );

    let mut scraper = Scraper::new(FakeSession::new(pages), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    assert!(!store.is_date_scraped(&tomorrow).unwrap());
    assert!(all_movies(&store).is_empty());

    // the next invocation retries the date and ingests the now-loaded page
    let mut pages = HashMap::new();
    pages.insert(
        listing_url(&tomorrow),
        listing_html(&[("Ida", "https://example.com/film2", &["18:00"][..])]),
    );
    pages.insert(
        "https://example.com/film2".to_string(),
        detail_html("Paweł Pawlikowski", "dramat", 82, "Opis."),
    );

    let mut scraper = Scraper::new(FakeSession::new(pages), store.clone(), &test_config());
    scraper.scrape(1, false).await.unwrap();

    assert!(store.is_date_scraped(&tomorrow).unwrap());
    assert_eq!(all_movies(&store).len(), 1);
}

#[tokio::test]
async fn test_failing_date_does_not_abort_the_run() {
    let (_dir, store) = test_store();
    let tomorrow = date_offset(1);
    let day_after = date_offset(2);

    // no page for tomorrow at all: navigation fails, date stays unscraped
    let mut pages = HashMap::new();
    pages.insert(
        listing_url(&day_after),
        listing_html(&[("Body", "https://example.com/film3", &["19:00"][..])]),
    );
    pages.insert(
        "https://example.com/film3".to_string(),
        detail_html("Małgorzata Szumowska", "dramat", 90, "Opis."),
    );

    let mut scraper = Scraper::new(FakeSession::new(pages), store.clone(), &test_config());
    scraper.scrape(2, false).await.unwrap();

    assert!(!store.is_date_scraped(&tomorrow).unwrap());
    assert!(store.is_date_scraped(&day_after).unwrap());
    assert_eq!(all_movies(&store).len(), 1);
}

#[tokio::test]
async fn test_pending_embeddings_converge_around_failures() {
    let (_dir, store) = test_store();
    for (title, description) in [
        ("One", "pierwszy opis"),
        ("Two", "zepsuty opis"),
        ("Three", "trzeci opis"),
    ] {
        let movie = kinoplan::models::Movie {
            title: title.to_string(),
            duration: Some(90),
            director: Some(format!("dir {}", title)),
            genre: None,
            production: None,
            description: Some(description.to_string()),
            href: format!("https://example.com/{}", title),
        };
        store.upsert_movie(&movie).unwrap();
    }

    let mut model = MockModel::new();
    model
        .expect_chat()
        .returning(|_, text| Ok(format!("translated {}", text)));
    model.expect_embed().returning(|text| {
        if text.contains("zepsuty") {
            Err(AppError::ExternalModel("model overloaded".to_string()))
        } else {
            Ok(unit_vec(0, 1.0))
        }
    });

    let pipeline = EmbeddingPipeline::new(Arc::new(model), store.clone(), 2);
    let stored = pipeline.process_pending().await.unwrap();
    assert_eq!(stored, 2);

    let pending = store.movies_without_embedding().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].description, "zepsuty opis");

    // next invocation re-evaluates the pending set; with the model healthy
    // again the stragglers converge
    let mut model = MockModel::new();
    model
        .expect_chat()
        .returning(|_, text| Ok(format!("translated {}", text)));
    model.expect_embed().returning(|_| Ok(unit_vec(1, 1.0)));
    let pipeline = EmbeddingPipeline::new(Arc::new(model), store.clone(), 2);
    assert_eq!(pipeline.process_pending().await.unwrap(), 1);
    assert!(store.movies_without_embedding().unwrap().is_empty());
}

#[tokio::test]
async fn test_stored_vectors_are_normalized_before_ranking() {
    let (_dir, store) = test_store();
    for (title, description) in [("Aligned", "aligned text"), ("Orthogonal", "other text")] {
        let movie = kinoplan::models::Movie {
            title: title.to_string(),
            duration: None,
            director: Some(title.to_string()),
            genre: None,
            production: None,
            description: Some(description.to_string()),
            href: format!("https://example.com/{}", title),
        };
        store.upsert_movie(&movie).unwrap();
    }

    // "Aligned" comes back from the model with a huge magnitude along axis 0;
    // without normalization its distance to the axis-0 query would be ~9 and
    // "Orthogonal" (~1.41) would win
    let mut model = MockModel::new();
    model
        .expect_chat()
        .returning(|_, text| Ok(text.to_string()));
    model.expect_embed().returning(|text| {
        if text.contains("aligned") {
            Ok(unit_vec(0, 10.0))
        } else if text.contains("other") {
            Ok(unit_vec(1, 1.0))
        } else {
            // the recommendation query
            Ok(unit_vec(0, 1.0))
        }
    });
    let model = Arc::new(model);

    let pipeline = EmbeddingPipeline::new(model.clone(), store.clone(), 2);
    assert_eq!(pipeline.process_pending().await.unwrap(), 2);

    let results = recommendations::find_similar(model, &store, "something aligned-ish", 2)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "Aligned");
    assert_eq!(results[1].title, "Orthogonal");
}

#[tokio::test]
async fn test_recommend_bounds_and_empty_corpus() {
    let (_dir, store) = test_store();

    let mut model = MockModel::new();
    model.expect_embed().returning(|_| Ok(unit_vec(0, 1.0)));
    let model = Arc::new(model);

    let results = recommendations::find_similar(model.clone(), &store, "anything", 3)
        .await
        .unwrap();
    assert!(results.is_empty());

    let err = recommendations::find_similar(model.clone(), &store, "   ", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));

    let err = recommendations::find_similar(model, &store, "anything", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}
