use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kinoplan::config::Config;
use kinoplan::db::{MovieFilter, Store};
use kinoplan::models::MovieWithScreenings;
use kinoplan::services::embeddings::EmbeddingPipeline;
use kinoplan::services::providers::{HttpSession, OllamaClient};
use kinoplan::services::recommendations;
use kinoplan::services::scraper::Scraper;

/// Local programme planner for the cinema: crawl, filter, recommend.
#[derive(Parser)]
#[command(name = "kinoplan", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl upcoming listing pages into the local store
    Refresh {
        /// How many days ahead of today to crawl
        #[arg(default_value_t = 7)]
        days_ahead: i64,
        /// Re-crawl dates that were already scraped
        #[arg(short, long)]
        force: bool,
    },
    /// Compute embeddings for movies that don't have one yet
    Embed,
    /// Recommend movies similar to a free-text description
    Recommend {
        description: String,
        /// Maximum number of results
        #[arg(short = 'k', long, default_value_t = 5)]
        count: usize,
    },
    /// Filter stored movies by title, director, duration and date
    Filter {
        #[arg(short, long)]
        title: Vec<String>,
        #[arg(short, long)]
        director: Vec<String>,
        #[arg(long)]
        min_duration: Option<i64>,
        #[arg(long)]
        max_duration: Option<i64>,
        /// Start of the screening window (YYYY-MM-DD [HH:MM]); defaults to now
        #[arg(short, long)]
        start_date: Option<String>,
        /// End of the screening window (YYYY-MM-DD [HH:MM])
        #[arg(short, long)]
        end_date: Option<String>,
        /// Use edit-distance matching for titles and directors
        #[arg(long)]
        fuzzy: bool,
    },
    /// Movies with only a few screenings left
    Limited {
        #[arg(default_value_t = 5)]
        max_screenings: i64,
    },
    /// Database statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    let store = Store::open(&config.db_path)?;

    match Cli::parse().command {
        Command::Refresh { days_ahead, force } => {
            let session = HttpSession::new()?;
            let mut scraper = Scraper::new(session, store, &config);
            scraper.scrape(days_ahead, force).await?;
        }
        Command::Embed => {
            let model = Arc::new(OllamaClient::new(
                config.model_url.clone(),
                config.chat_model.clone(),
                config.embed_model.clone(),
            ));
            let pipeline = EmbeddingPipeline::new(model, store, config.max_concurrent_embeddings);
            let stored = pipeline.process_pending().await?;
            println!("Stored {} new embeddings", stored);
        }
        Command::Recommend { description, count } => {
            let model = Arc::new(OllamaClient::new(
                config.model_url.clone(),
                config.chat_model.clone(),
                config.embed_model.clone(),
            ));
            let movies = recommendations::find_similar(model, &store, &description, count).await?;
            print_movies(&movies);
        }
        Command::Filter {
            title,
            director,
            min_duration,
            max_duration,
            start_date,
            end_date,
            fuzzy,
        } => {
            let filter = MovieFilter {
                titles: title,
                directors: director,
                min_duration,
                max_duration,
                start_date: start_date
                    .or_else(|| Some(chrono::Local::now().format("%Y-%m-%d %H:%M").to_string())),
                end_date,
                fuzzy,
            };
            let movies = store.call(move |s| s.filter_movies(&filter)).await?;
            print_movies(&movies);
        }
        Command::Limited { max_screenings } => {
            let movies = store
                .call(move |s| s.movies_with_few_screenings(max_screenings))
                .await?;
            print_movies(&movies);
        }
        Command::Stats => {
            let stats = store.call(|s| s.stats()).await?;
            println!("Movies:             {}", stats.total_movies);
            println!("Upcoming movies:    {}", stats.future_movies);
            println!("Upcoming screenings: {}", stats.future_screenings);
            println!(
                "Last scraped date:  {}",
                stats.last_scraped.as_deref().unwrap_or("-")
            );
            if let Some(title) = stats.most_screened {
                println!(
                    "Most screened:      {} ({} screenings)",
                    title, stats.most_screened_count
                );
            }
        }
    }

    Ok(())
}

fn print_movies(movies: &[MovieWithScreenings]) {
    if movies.is_empty() {
        println!("No movies found");
        return;
    }
    for movie in movies {
        println!("{}", movie.title);
        if let Some(duration) = movie.duration {
            println!("  duration: {} min", duration);
        }
        if let Some(ref director) = movie.director {
            println!("  director: {}", director);
        }
        if let Some(ref genre) = movie.genre {
            println!("  genre:    {}", genre);
        }
        if let Some(ref production) = movie.production {
            println!("  production: {}", production);
        }
        println!("  {}", movie.href);
        for date in movie.screening_dates() {
            println!("    {}", date);
        }
        if let Some(ref description) = movie.description {
            println!("  {}", description);
        }
        println!();
    }
}
