use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use super::build_seed_jobs;
use crate::cli::ScrapeArgs;
use crate::pipeline::{GatherOutcome, gather_listings, new_flow_run_id};
use crate::util::write_json_pretty;

pub async fn run(args: ScrapeArgs) -> Result<()> {
    let jobs = build_seed_jobs(&args.sources)?;
    let seed_timeout = Duration::from_secs(args.sources.seed_timeout_secs);
    let gathered = gather_listings(jobs, seed_timeout, &new_flow_run_id()).await;

    emit_listings(&gathered, args.output, args.dry_run)?;
    Ok(())
}

fn emit_listings(
    gathered: &GatherOutcome,
    output: Option<PathBuf>,
    dry_run: bool,
) -> Result<Option<PathBuf>> {
    match output {
        Some(output) if !dry_run => {
            write_json_pretty(&output, &gathered.listings)?;
            info!(
                path = %output.display(),
                listings = gathered.listings.len(),
                failed_seeds = gathered.failed_seeds,
                "wrote scraped listings"
            );
            Ok(Some(output))
        }
        _ => {
            info!(
                listings = gathered.listings.len(),
                failed_seeds = gathered.failed_seeds,
                "scrape dry-run complete"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Listing;

    fn gathered() -> GatherOutcome {
        GatherOutcome {
            listings: vec![Listing {
                url: "https://a.es/1".to_string(),
                name: "Uno".to_string(),
                address: String::new(),
                area_m2: None,
                bedrooms: Some(2),
                bathrooms: None,
                price: Some(1.0),
            }],
            ..GatherOutcome::default()
        }
    }

    #[test]
    fn emit_listings_writes_json_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out").join("listings.json");

        let written = emit_listings(&gathered(), Some(output.clone()), false).unwrap();
        assert_eq!(written.as_deref(), Some(output.as_path()));

        let parsed: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(parsed[0]["name"], "Uno");
        assert_eq!(parsed[0]["m2"], serde_json::Value::Null);
    }

    #[test]
    fn emit_listings_skips_write_on_dry_run_or_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("listings.json");

        assert_eq!(emit_listings(&gathered(), Some(output.clone()), true).unwrap(), None);
        assert_eq!(emit_listings(&gathered(), None, false).unwrap(), None);
        assert!(!output.exists());
    }
}
