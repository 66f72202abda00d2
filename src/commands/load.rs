use std::fs;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::LoadArgs;
use crate::model::RawListing;
use crate::semantic::{DEFAULT_EMBEDDING_DIM, enrich_raw_listings, load_backend, resolve_model_config};
use crate::store::reconcile;

pub fn run(args: LoadArgs) -> Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be greater than zero");
    }

    let raw = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let raw_listings: Vec<RawListing> = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    let received = raw_listings.len();

    let model = resolve_model_config(&args.model_id, DEFAULT_EMBEDDING_DIM);
    let enriched = enrich_raw_listings(raw_listings, || load_backend(&model), args.batch_size);
    if enriched.is_empty() && received > 0 {
        bail!("no listings from {} could be embedded", args.input.display());
    }

    let counts = reconcile(&args.db_path, enriched)?;
    info!(
        input = %args.input.display(),
        received,
        inserted = counts.inserted,
        updated = counts.updated,
        "loaded listings"
    );
    Ok(())
}
