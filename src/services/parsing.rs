//! Pure HTML-to-record parsers for the listing and detail pages.
//!
//! Both parsers are side-effect free: raw page text in, structured records
//! out. Missing optional structure degrades to `None` instead of failing;
//! listing blocks without a title link or without showtimes are dropped with
//! a warning.

use scraper::{ElementRef, Html, Selector};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::models::{ListingEntry, Movie};

/// Navigation wait marker for the programme page: the container the
/// `#repertuar@DD-MM-YYYY` URL fragment addresses. Present on any fully
/// rendered listing page, including days with no screenings; its absence
/// after the timeout means the page never finished loading.
pub const LISTING_MARKER: &str = "#repertuar";
/// Selector the detail page is expected to render.
pub const DETAIL_MARKER: &str = "div.opisf";

const LISTING_BLOCK: &str = "div.boks.ilustracja-left.mala-ilustr.wyzszy";
const TITLE_LINK: &str = "a.tyt";
const SHOWTIME_LINK: &str = "a.xseans";
const DETAIL_ROW: &str = "div.crrow";

fn selector(s: &str) -> AppResult<Selector> {
    Selector::parse(s).map_err(|e| AppError::Parse(format!("bad selector '{}': {}", s, e)))
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").trim().to_string()
}

/// Extract one `ListingEntry` per movie block of a date's listing page.
/// Relative detail hrefs are joined onto `base_url`.
pub fn parse_listing(html: &str, base_url: &str) -> AppResult<Vec<ListingEntry>> {
    let document = Html::parse_document(html);
    let block_sel = selector(LISTING_BLOCK)?;
    let title_sel = selector(TITLE_LINK)?;
    let showtime_sel = selector(SHOWTIME_LINK)?;

    let mut entries = Vec::new();
    for block in document.select(&block_sel) {
        let Some(link) = block.select(&title_sel).next() else {
            warn!("listing block without a title link, dropping");
            continue;
        };
        let title = element_text(link);

        let showtimes: Vec<String> = block
            .select(&showtime_sel)
            .map(|a| element_text(a))
            .filter(|s| !s.is_empty())
            .collect();
        if showtimes.is_empty() {
            warn!(title = %title, "listing entry without showtimes, dropping");
            continue;
        }

        let href = link.value().attr("href").unwrap_or("");
        let href = if href.starts_with("http") {
            href.to_string()
        } else {
            format!("{}{}", base_url, href)
        };

        entries.push(ListingEntry {
            title,
            href,
            showtimes,
        });
    }
    Ok(entries)
}

/// Extract structured metadata from a movie detail page. The title and href
/// come from the listing; every parsed field is optional.
pub fn parse_detail(html: &str, title: &str, href: &str) -> AppResult<Movie> {
    let document = Html::parse_document(html);
    let row_sel = selector(DETAIL_ROW)?;
    let h4_sel = selector("h4")?;

    let rows: Vec<String> = document.select(&row_sel).map(element_text).collect();
    let headings: Vec<String> = document.select(&h4_sel).map(element_text).collect();

    let duration = labeled_value(&rows, "czas:").and_then(|text| {
        let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
        digits.parse::<i64>().ok()
    });

    let director = labeled_value(&headings, "reż.");

    let genre = labeled_value(&headings, "gatunek:")
        .map(|g| {
            // the age-rating note shares the genre heading
            g.split("kategoria wiekowa")
                .next()
                .unwrap_or("")
                .trim()
                .to_string()
        })
        .filter(|g| !g.is_empty());

    let production = labeled_value(&rows, "produkcja:");

    let paragraph_sel = selector("div.opisf p")?;
    let paragraphs: Vec<String> = document
        .select(&paragraph_sel)
        .map(element_text)
        .filter(|p| !p.is_empty())
        .collect();
    let description = if paragraphs.is_empty() {
        None
    } else {
        Some(paragraphs.join(" "))
    };

    Ok(Movie {
        title: title.to_string(),
        duration,
        director,
        genre,
        production,
        description,
        href: href.to_string(),
    })
}

/// First element containing `label`, with the label stripped and the rest
/// trimmed. None when no element carries the label.
fn labeled_value(texts: &[String], label: &str) -> Option<String> {
    texts
        .iter()
        .find(|text| text.contains(label))
        .map(|text| text.replace(label, "").trim().to_string())
        .filter(|v| !v.is_empty())
}
