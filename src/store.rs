use std::collections::HashMap;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, Transaction, params};
use thiserror::Error;
use tracing::{info, warn};

use crate::extract::normalize_url;
use crate::model::{EnrichedListing, Listing, ReconcileCounts};
use crate::semantic::{decode_embedding_blob, encode_embedding_blob};
use crate::util::{ensure_parent_directory, now_utc_string};

const DB_SCHEMA_VERSION: &str = "0.1.0";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("failed to connect to listing store {path}: {reason}")]
    Connection { path: String, reason: String },
    #[error("reconciliation rolled back: {0}")]
    Write(#[from] rusqlite::Error),
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write(_))
    }
}

pub fn open_store(db_path: &Path) -> Result<Connection, ReconcileError> {
    let connection_error = |reason: String| ReconcileError::Connection {
        path: db_path.display().to_string(),
        reason,
    };

    ensure_parent_directory(db_path).map_err(|err| connection_error(format!("{err:#}")))?;
    let connection = Connection::open(db_path).map_err(|err| connection_error(err.to_string()))?;
    configure_connection(&connection).map_err(|err| connection_error(err.to_string()))?;
    ensure_schema(&connection).map_err(|err| connection_error(err.to_string()))?;

    Ok(connection)
}

pub fn open_store_read_only(db_path: &Path) -> Result<Connection, ReconcileError> {
    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|err| ReconcileError::Connection {
        path: db_path.display().to_string(),
        reason: err.to_string(),
    })
}

pub fn configure_connection(connection: &Connection) -> rusqlite::Result<()> {
    connection.pragma_update(None, "journal_mode", "WAL")?;
    connection.pragma_update(None, "synchronous", "NORMAL")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS apartment (
          url TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          address TEXT NOT NULL,
          m2 REAL,
          bedrooms INTEGER,
          bathrooms INTEGER,
          price REAL,
          embedding BLOB
        );
        ",
    )?;

    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;

    Ok(())
}

pub fn reconcile(
    db_path: &Path,
    batch: Vec<EnrichedListing>,
) -> Result<ReconcileCounts, ReconcileError> {
    let mut connection = open_store(db_path)?;
    reconcile_batch(&mut connection, batch)
}

pub fn reconcile_batch(
    connection: &mut Connection,
    batch: Vec<EnrichedListing>,
) -> Result<ReconcileCounts, ReconcileError> {
    let received = batch.len();
    let mut by_url = HashMap::<String, EnrichedListing>::with_capacity(received);
    let mut order = Vec::<String>::with_capacity(received);
    for record in batch {
        let key = record.listing.normalized_url();
        if by_url.insert(key.clone(), record).is_none() {
            order.push(key);
        }
    }

    if by_url.len() < received {
        info!(
            received,
            unique = by_url.len(),
            "collapsed duplicate urls within batch"
        );
    }

    let tx = connection.transaction()?;
    let counts = match apply_batch(&tx, &order, &by_url) {
        Ok(counts) => counts,
        Err(err) => {
            warn!(error = %err, "reconciliation failed, rolling back");
            if let Err(rollback_err) = tx.rollback() {
                warn!(error = %rollback_err, "rollback failed");
            }
            return Err(err.into());
        }
    };
    tx.commit()?;

    if counts.updated > 0 {
        info!(updated = counts.updated, "existing apartments were updated");
    }
    if counts.inserted > 0 {
        info!(inserted = counts.inserted, "new apartments were inserted");
    }

    Ok(counts)
}

fn apply_batch(
    tx: &Transaction<'_>,
    order: &[String],
    by_url: &HashMap<String, EnrichedListing>,
) -> rusqlite::Result<ReconcileCounts> {
    let mut existing = Vec::<&str>::new();
    let mut fresh = Vec::<&str>::new();
    {
        let mut lookup = tx.prepare("SELECT 1 FROM apartment WHERE url = ?1")?;
        for url in order {
            if lookup.exists([url])? {
                existing.push(url);
            } else {
                fresh.push(url);
            }
        }
    }

    let mut counts = ReconcileCounts::default();

    {
        let mut update = tx.prepare(
            "
            UPDATE apartment SET
              name=?2,
              address=?3,
              m2=?4,
              bedrooms=?5,
              bathrooms=?6,
              price=?7,
              embedding=?8
            WHERE url=?1
            ",
        )?;

        for url in existing {
            let Some(record) = by_url.get(url) else {
                continue;
            };
            let listing = &record.listing;
            update.execute(params![
                url,
                listing.name,
                listing.address,
                listing.area_m2,
                listing.bedrooms,
                listing.bathrooms,
                listing.price,
                encode_embedding_blob(&record.embedding),
            ])?;
            counts.updated += 1;
        }
    }

    {
        let mut insert = tx.prepare(
            "
            INSERT INTO apartment(url, name, address, m2, bedrooms, bathrooms, price, embedding)
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )?;

        for url in fresh {
            let Some(record) = by_url.get(url) else {
                continue;
            };
            let listing = &record.listing;
            insert.execute(params![
                url,
                listing.name,
                listing.address,
                listing.area_m2,
                listing.bedrooms,
                listing.bathrooms,
                listing.price,
                encode_embedding_blob(&record.embedding),
            ])?;
            counts.inserted += 1;
        }
    }

    tx.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now_utc_string()],
    )?;

    Ok(counts)
}

pub fn load_apartment(
    connection: &Connection,
    url: &str,
) -> rusqlite::Result<Option<EnrichedListing>> {
    connection
        .query_row(
            "
            SELECT url, name, address, m2, bedrooms, bathrooms, price, embedding
            FROM apartment
            WHERE url = ?1
            ",
            [normalize_url(url)],
            |row| {
                let blob: Option<Vec<u8>> = row.get(7)?;
                Ok(EnrichedListing {
                    listing: Listing {
                        url: row.get(0)?,
                        name: row.get(1)?,
                        address: row.get(2)?,
                        area_m2: row.get(3)?,
                        bedrooms: row.get(4)?,
                        bathrooms: row.get(5)?,
                        price: row.get(6)?,
                    },
                    embedding: blob
                        .as_deref()
                        .and_then(decode_embedding_blob)
                        .unwrap_or_default(),
                })
            },
        )
        .optional()
}

pub fn count_apartments(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row("SELECT COUNT(*) FROM apartment", [], |row| row.get(0))
}

pub fn count_embedded(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        "SELECT COUNT(*) FROM apartment WHERE embedding IS NOT NULL AND length(embedding) > 0",
        [],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        ensure_schema(&connection).unwrap();
        connection
    }

    fn record(url: &str, name: &str, price: Option<f64>, embedding: Vec<f32>) -> EnrichedListing {
        EnrichedListing {
            listing: Listing {
                url: url.to_string(),
                name: name.to_string(),
                address: "Calle Mayor 1".to_string(),
                area_m2: Some(70.0),
                bedrooms: Some(2),
                bathrooms: Some(1),
                price,
            },
            embedding,
        }
    }

    fn snapshot(connection: &Connection) -> Vec<(String, String, Option<f64>, Option<Vec<u8>>)> {
        let mut statement = connection
            .prepare("SELECT url, name, price, embedding FROM apartment ORDER BY url")
            .unwrap();
        statement
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn reconcile_inserts_into_empty_store() {
        let mut connection = memory_store();
        let counts = reconcile_batch(
            &mut connection,
            vec![
                record("https://a.es/1", "Uno", Some(1.0), vec![0.1, 0.2]),
                record("https://a.es/2", "Dos", None, vec![0.3, 0.4]),
            ],
        )
        .unwrap();

        assert_eq!(counts, ReconcileCounts { inserted: 2, updated: 0 });
        assert_eq!(count_apartments(&connection).unwrap(), 2);
        assert_eq!(count_embedded(&connection).unwrap(), 2);
    }

    #[test]
    fn reconcile_same_batch_twice_is_idempotent() {
        let mut connection = memory_store();
        let batch = vec![
            record("https://a.es/1", "Uno", Some(1.0), vec![0.1]),
            record("https://a.es/2", "Dos", Some(2.0), vec![0.2]),
            record("https://a.es/3", "Tres", None, vec![0.3]),
        ];

        let first = reconcile_batch(&mut connection, batch.clone()).unwrap();
        assert_eq!(first, ReconcileCounts { inserted: 3, updated: 0 });
        let after_first = snapshot(&connection);

        let second = reconcile_batch(&mut connection, batch).unwrap();
        assert_eq!(second, ReconcileCounts { inserted: 0, updated: 3 });
        assert_eq!(snapshot(&connection), after_first);
    }

    #[test]
    fn reconcile_updates_case_and_whitespace_variant_with_full_overwrite() {
        let mut connection = memory_store();
        reconcile_batch(
            &mut connection,
            vec![record("https://a.es/Piso-1", "Viejo", Some(100.0), vec![1.0, 1.0])],
        )
        .unwrap();

        let mut latest = record("  HTTPS://A.ES/piso-1 ", "Nuevo", None, vec![0.5]);
        latest.listing.bedrooms = None;
        latest.listing.address = String::new();
        let counts = reconcile_batch(&mut connection, vec![latest]).unwrap();
        assert_eq!(counts, ReconcileCounts { inserted: 0, updated: 1 });
        assert_eq!(count_apartments(&connection).unwrap(), 1);

        let stored = load_apartment(&connection, "https://a.es/piso-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.listing.url, "https://a.es/piso-1");
        assert_eq!(stored.listing.name, "Nuevo");
        assert_eq!(stored.listing.address, "");
        assert_eq!(stored.listing.price, None);
        assert_eq!(stored.listing.bedrooms, None);
        assert_eq!(stored.embedding, vec![0.5]);
    }

    #[test]
    fn reconcile_collapses_in_batch_duplicates_last_wins() {
        let mut connection = memory_store();
        let counts = reconcile_batch(
            &mut connection,
            vec![
                record("https://a.es/1", "Primero", None, vec![0.1]),
                record("https://A.es/1 ", "Segundo", None, vec![0.2]),
            ],
        )
        .unwrap();

        assert_eq!(counts, ReconcileCounts { inserted: 1, updated: 0 });
        let stored = load_apartment(&connection, "https://a.es/1").unwrap().unwrap();
        assert_eq!(stored.listing.name, "Segundo");
    }

    #[test]
    fn reconcile_rolls_back_whole_batch_on_write_failure() {
        let mut connection = memory_store();
        reconcile_batch(
            &mut connection,
            vec![record("https://a.es/1", "Original", Some(1.0), vec![0.1])],
        )
        .unwrap();
        let before = snapshot(&connection);

        connection
            .execute_batch(
                "
                CREATE TRIGGER reject_broken BEFORE INSERT ON apartment
                WHEN NEW.url = 'https://a.es/broken'
                BEGIN
                  SELECT RAISE(ABORT, 'rejected');
                END;
                ",
            )
            .unwrap();

        let result = reconcile_batch(
            &mut connection,
            vec![
                record("https://a.es/1", "Cambiado", Some(9.0), vec![0.9]),
                record("https://a.es/2", "Nuevo", None, vec![0.2]),
                record("https://a.es/broken", "Roto", None, vec![0.3]),
            ],
        );

        let err = result.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("rejected"));
        assert_eq!(snapshot(&connection), before);
    }

    #[test]
    fn read_only_store_reads_without_touching_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("listings.sqlite");
        let mut writer = open_store(&db_path).unwrap();
        writer
            .execute(
                "UPDATE metadata SET value = 'legacy' WHERE key = 'db_schema_version'",
                [],
            )
            .unwrap();
        reconcile_batch(&mut writer, vec![record("https://a.es/1", "Uno", None, vec![0.1])])
            .unwrap();

        let reader = open_store_read_only(&db_path).unwrap();
        assert_eq!(count_apartments(&reader).unwrap(), 1);
        assert!(load_apartment(&reader, "https://a.es/1").unwrap().is_some());
        let version: String = reader
            .query_row(
                "SELECT value FROM metadata WHERE key = 'db_schema_version'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, "legacy");
        assert!(reader.execute("DELETE FROM apartment", []).is_err());
    }

    #[test]
    fn read_only_store_does_not_create_missing_database() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("missing.sqlite");

        let err = open_store_read_only(&db_path).unwrap_err();
        assert!(!err.is_retryable());
        assert!(!db_path.exists());
    }

    #[test]
    fn reconcile_through_path_opens_and_releases_store() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("listings.sqlite");

        let counts = reconcile(&db_path, vec![record("https://a.es/1", "Uno", None, vec![0.1])])
            .unwrap();
        assert_eq!(counts.inserted, 1);

        let counts = reconcile(&db_path, vec![record("https://a.es/1", "Uno", None, vec![0.1])])
            .unwrap();
        assert_eq!(counts.updated, 1);
    }

    #[test]
    fn open_store_failure_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let err = open_store(&blocker.join("listings.sqlite")).unwrap_err();
        assert!(matches!(err, ReconcileError::Connection { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut connection = memory_store();
        let counts = reconcile_batch(&mut connection, Vec::new()).unwrap();
        assert_eq!(counts, ReconcileCounts::default());
    }
}
