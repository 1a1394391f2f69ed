pub mod embeddings;
pub mod parsing;
pub mod providers;
pub mod recommendations;
pub mod scraper;
