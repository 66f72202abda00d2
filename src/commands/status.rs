use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::archive::RunArchive;
use crate::cli::StatusArgs;
use crate::store::{count_apartments, count_embedded, load_apartment, open_store_read_only};

pub fn run(args: StatusArgs) -> Result<()> {
    info!(db_path = %args.db_path.display(), "status requested");

    if args.db_path.exists() {
        let connection = open_store_read_only(&args.db_path)?;
        let apartments = count_apartments(&connection).context("failed to count apartments")?;
        let embedded = count_embedded(&connection).context("failed to count embeddings")?;

        info!(
            path = %args.db_path.display(),
            apartments,
            embedded,
            "listing store status"
        );

        if let Some(url) = &args.url {
            match load_apartment(&connection, url)
                .with_context(|| format!("failed to load apartment {url}"))?
            {
                Some(stored) => info!(
                    url = %stored.listing.url,
                    name = %stored.listing.name,
                    address = %stored.listing.address,
                    price = ?stored.listing.price,
                    embedding_dim = stored.embedding.len(),
                    "stored apartment"
                ),
                None => warn!(url = %url, "apartment not found"),
            }
        }
    } else {
        warn!(path = %args.db_path.display(), "listing store missing");
    }

    let archive = RunArchive::new(&args.archive_root, &args.bucket);
    match archive.latest_key()? {
        Some(key) => info!(bucket = %args.bucket, key = %key, "latest run metadata"),
        None => warn!(bucket = %args.bucket, "no archived run metadata"),
    }

    Ok(())
}
