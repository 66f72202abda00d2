pub mod load;
pub mod run;
pub mod scrape;
pub mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::cli::SourceArgs;
use crate::extract::FieldExtractor;
use crate::pipeline::{SeedJob, seed_jobs};
use crate::sources::{HttpFetcher, ListingSource, PageFetcher, PisosSource, SolviaSource};

pub(crate) fn build_seed_jobs(args: &SourceArgs) -> Result<Vec<SeedJob>> {
    let page_timeout = Duration::from_secs(args.page_timeout_secs);
    let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(page_timeout)?);

    let pisos: Arc<dyn ListingSource> = Arc::new(PisosSource::new(
        Arc::clone(&fetcher),
        FieldExtractor::new()?,
        page_timeout,
        args.max_pages,
    )?);
    let solvia: Arc<dyn ListingSource> = Arc::new(SolviaSource::new(
        fetcher,
        FieldExtractor::new()?,
        page_timeout,
    )?);

    let mut jobs = seed_jobs(&pisos, &args.pisos_seeds());
    jobs.extend(seed_jobs(&solvia, &args.solvia_seeds()));
    Ok(jobs)
}
