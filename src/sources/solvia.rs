use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::fetch::{PageFetcher, fetch_with_timeout, page_budget};
use super::{ListingSource, ParsedItem, collect_listings, compile_selector, element_text, resolve_link};
use crate::extract::FieldExtractor;
use crate::model::{Listing, ListingError, RawListing};

#[derive(Debug)]
struct SolviaLayout {
    card: Selector,
    link: Selector,
    name: Selector,
    address_part: Selector,
    tag: Selector,
    price: Selector,
}

impl SolviaLayout {
    fn new() -> Result<Self> {
        Ok(Self {
            card: compile_selector("div.house-info")?,
            link: compile_selector("a[href]")?,
            name: compile_selector("h3.build-name")?,
            address_part: compile_selector("div.build-address span")?,
            tag: compile_selector("ul.build-tags li")?,
            price: compile_selector("span.final-price.mb-1")?,
        })
    }
}

pub struct SolviaSource {
    fetcher: Arc<dyn PageFetcher>,
    extractor: FieldExtractor,
    layout: SolviaLayout,
    page_timeout: Duration,
}

impl SolviaSource {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: FieldExtractor,
        page_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            fetcher,
            extractor,
            layout: SolviaLayout::new()?,
            page_timeout,
        })
    }

    pub(crate) fn parse_page(&self, html: &str, page_url: &str) -> Vec<ParsedItem> {
        let document = Html::parse_document(html);
        document
            .select(&self.layout.card)
            .map(|card| self.parse_card(card, page_url))
            .collect()
    }

    fn parse_card(&self, card: ElementRef<'_>, page_url: &str) -> ParsedItem {
        let href = card
            .select(&self.layout.link)
            .next()
            .and_then(|link| link.value().attr("href"))
            .ok_or(ListingError::MissingElement("a[href]"))?;
        let url = resolve_link(page_url, href).ok_or(ListingError::MissingField("url"))?;

        let name = card
            .select(&self.layout.name)
            .next()
            .map(element_text)
            .ok_or(ListingError::MissingElement("h3.build-name"))?;

        let address = card
            .select(&self.layout.address_part)
            .map(element_text)
            .filter(|part| !part.is_empty())
            .collect::<Vec<String>>()
            .join(" ");

        let tags = card
            .select(&self.layout.tag)
            .map(element_text)
            .collect::<Vec<String>>();

        let price_text = card
            .select(&self.layout.price)
            .next()
            .map(element_text)
            .ok_or(ListingError::MissingElement("span.final-price"))?;

        Ok(RawListing {
            url: Some(url),
            name: Some(name),
            address: Some(address),
            m2: tags
                .first()
                .and_then(|text| self.extractor.extract_square_meters(text)),
            bedrooms: tags.get(1).and_then(|text| self.extractor.extract_int(text)),
            bathrooms: tags.get(2).and_then(|text| self.extractor.extract_int(text)),
            price: self.extractor.extract_price(&price_text),
        })
    }
}

#[async_trait]
impl ListingSource for SolviaSource {
    fn name(&self) -> &'static str {
        "solvia"
    }

    async fn scrape(&self, seed_url: &str, deadline: Instant) -> Vec<Listing> {
        let Some(budget) = page_budget(self.page_timeout, deadline) else {
            warn!(seed = seed_url, "seed deadline already passed");
            return Vec::new();
        };

        let html = match fetch_with_timeout(self.fetcher.as_ref(), seed_url, budget).await {
            Ok(html) => html,
            Err(err) => {
                error!(seed = seed_url, error = %err, "failed to fetch listing page");
                return Vec::new();
            }
        };

        let items = self.parse_page(&html, seed_url);
        info!(seed = seed_url, cards = items.len(), "found property cards");

        let listings = collect_listings(self.name(), seed_url, items);
        info!(seed = seed_url, total = listings.len(), "finished scraping valid listings");
        listings
    }
}
