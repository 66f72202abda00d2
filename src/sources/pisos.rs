use std::collections::HashSet;
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

const RESULTS_PER_PAGE: u64 = 30;

#[derive(Debug)]
struct PisosLayout {
    item: Selector,
    title: Selector,
    subtitle: Selector,
    price: Selector,
    characteristic: Selector,
    next_page: Selector,
    counter: Selector,
}

impl PisosLayout {
    fn new() -> Result<Self> {
        Ok(Self {
            item: compile_selector("div.grid__wrapper div[data-lnk-href]")?,
            title: compile_selector(".ad-preview__title")?,
            subtitle: compile_selector(".ad-preview__subtitle")?,
            price: compile_selector(".ad-preview__price")?,
            characteristic: compile_selector(".ad-preview__char")?,
            next_page: compile_selector("div.pagination__next a[href]")?,
            counter: compile_selector(".pagination__counter")?,
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct PisosPage {
    pub(crate) items: Vec<ParsedItem>,
    pub(crate) next_url: Option<String>,
    pub(crate) total_results: Option<u64>,
}

pub struct PisosSource {
    fetcher: Arc<dyn PageFetcher>,
    extractor: FieldExtractor,
    layout: PisosLayout,
    page_timeout: Duration,
    max_pages: usize,
}

impl PisosSource {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: FieldExtractor,
        page_timeout: Duration,
        max_pages: usize,
    ) -> Result<Self> {
        Ok(Self {
            fetcher,
            extractor,
            layout: PisosLayout::new()?,
            page_timeout,
            max_pages: max_pages.max(1),
        })
    }

    pub(crate) fn parse_page(&self, html: &str, page_url: &str) -> PisosPage {
        let document = Html::parse_document(html);

        let items = document
            .select(&self.layout.item)
            .map(|element| self.parse_item(element, page_url))
            .collect::<Vec<ParsedItem>>();

        let next_url = document
            .select(&self.layout.next_page)
            .next()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| resolve_link(page_url, href));

        let total_results = document
            .select(&self.layout.counter)
            .map(element_text)
            .find(|text| text.contains("resultados"))
            .and_then(|text| self.extractor.extract_total_results(&text));

        PisosPage {
            items,
            next_url,
            total_results,
        }
    }

    fn parse_item(&self, element: ElementRef<'_>, page_url: &str) -> ParsedItem {
        let href = element
            .value()
            .attr("data-lnk-href")
            .ok_or(ListingError::MissingElement("data-lnk-href"))?;
        let url = resolve_link(page_url, href).ok_or(ListingError::MissingField("url"))?;

        let name = self.required_text(element, &self.layout.title, ".ad-preview__title")?;
        let address = self.required_text(element, &self.layout.subtitle, ".ad-preview__subtitle")?;
        let price_text = self.required_text(element, &self.layout.price, ".ad-preview__price")?;

        let characteristics = element
            .select(&self.layout.characteristic)
            .map(element_text)
            .collect::<Vec<String>>();

        Ok(RawListing {
            url: Some(url),
            name: Some(name),
            address: Some(address),
            m2: characteristics
                .get(2)
                .and_then(|text| self.extractor.extract_square_meters(text)),
            bedrooms: characteristics
                .first()
                .and_then(|text| self.extractor.extract_int(text)),
            bathrooms: characteristics
                .get(1)
                .and_then(|text| self.extractor.extract_int(text)),
            price: self.extractor.extract_price(&price_text),
        })
    }

    fn required_text(
        &self,
        element: ElementRef<'_>,
        selector: &Selector,
        label: &'static str,
    ) -> Result<String, ListingError> {
        element
            .select(selector)
            .next()
            .map(element_text)
            .ok_or(ListingError::MissingElement(label))
    }
}

#[async_trait]
impl ListingSource for PisosSource {
    fn name(&self) -> &'static str {
        "pisos"
    }

    async fn scrape(&self, seed_url: &str, deadline: Instant) -> Vec<Listing> {
        let mut listings = Vec::<Listing>::new();
        let mut visited = HashSet::<String>::new();
        let mut next_url = Some(seed_url.to_string());
        let mut page_number = 0usize;

        while let Some(page_url) = next_url.take() {
            if page_number >= self.max_pages {
                info!(seed = seed_url, max_pages = self.max_pages, "page limit reached");
                break;
            }
            if !visited.insert(page_url.clone()) {
                warn!(page = %page_url, "pagination returned an already visited page");
                break;
            }
            let Some(budget) = page_budget(self.page_timeout, deadline) else {
                warn!(
                    seed = seed_url,
                    pages = page_number,
                    collected = listings.len(),
                    "seed deadline reached, keeping partial results"
                );
                break;
            };
            page_number += 1;

            let html = match fetch_with_timeout(self.fetcher.as_ref(), &page_url, budget).await {
                Ok(html) => html,
                Err(err) if page_number == 1 => {
                    error!(seed = seed_url, error = %err, "failed to load seed page");
                    break;
                }
                Err(err) => {
                    error!(page = %page_url, page_number, error = %err, "failed to load page, keeping partial results");
                    break;
                }
            };

            let page = self.parse_page(&html, &page_url);
            if page_number == 1 {
                match page.total_results {
                    Some(total) => info!(
                        seed = seed_url,
                        total_results = total,
                        expected_pages = total.div_ceil(RESULTS_PER_PAGE),
                        "pagination counter found"
                    ),
                    None => warn!(seed = seed_url, "pagination counter not found"),
                }
            }

            let found = page.items.len();
            let parsed = collect_listings(self.name(), &page_url, page.items);
            info!(page_number, found, parsed = parsed.len(), "scraped page");
            listings.extend(parsed);

            if page.next_url.is_none() {
                info!(seed = seed_url, "no more pages to scrape");
            }
            next_url = page.next_url;
        }

        info!(seed = seed_url, total = listings.len(), "scraping finished");
        listings
    }
}
