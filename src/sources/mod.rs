use anyhow::{Result, anyhow};
use async_trait::async_trait;
use scraper::{ElementRef, Selector};
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

use crate::model::{Listing, ListingError, RawListing};
use crate::semantic::normalize_whitespace;

pub mod fetch;
pub mod pisos;
pub mod solvia;

pub use fetch::{HttpFetcher, PageFetcher};
pub use pisos::PisosSource;
pub use solvia::SolviaSource;

#[async_trait]
pub trait ListingSource: Send + Sync {
    fn name(&self) -> &'static str;

    // Returns whatever was collected by `deadline`; pages still pending at
    // that point are abandoned rather than awaited.
    async fn scrape(&self, seed_url: &str, deadline: Instant) -> Vec<Listing>;
}

pub(crate) type ParsedItem = Result<RawListing, ListingError>;

pub(crate) fn compile_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("failed to compile selector '{css}': {err}"))
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<&str>>().join(" "))
}

pub(crate) fn resolve_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .ok()
}

pub(crate) fn collect_listings(source: &str, page_url: &str, items: Vec<ParsedItem>) -> Vec<Listing> {
    let total = items.len();
    let mut listings = Vec::with_capacity(total);

    for (index, item) in items.into_iter().enumerate() {
        let position = index + 1;
        match item.and_then(Listing::from_raw) {
            Ok(listing) => {
                debug!(source, position, total, name = %listing.name, "parsed listing");
                listings.push(listing);
            }
            Err(err) => {
                warn!(source, page = %page_url, position, error = %err, "skipping listing");
            }
        }
    }

    listings
}
