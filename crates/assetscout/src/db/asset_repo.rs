//! Asset repository: append and lookup on the `assets` table.

use rusqlite::{params, Row};

use super::job_repo::format_timestamp;
use super::{Database, DatabaseError};
use crate::model::{normalize_name, timestamp_now, Asset};

fn asset_from_row(row: &Row<'_>) -> Result<Asset, rusqlite::Error> {
    Ok(Asset {
        company_name: row.get("company_name")?,
        isin: row.get("isin")?,
        facility_name: row.get("facility_name")?,
        asset_type: row.get("asset_type")?,
        city: row.get("city")?,
        country: row.get("country")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
    })
}

/// Inserts all assets in one transaction.
pub fn insert_many(db: &Database, assets: &[Asset]) -> Result<usize, DatabaseError> {
    if assets.is_empty() {
        return Ok(0);
    }
    let now = format_timestamp(timestamp_now());
    db.with_conn(|conn| {
        conn.execute_batch("BEGIN")?;
        let result = (|| {
            let mut stmt = conn.prepare(
                "INSERT INTO assets (company_name, company_key, isin, facility_name, asset_type,
                 city, country, latitude, longitude, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for asset in assets {
                stmt.execute(params![
                    asset.company_name,
                    normalize_name(&asset.company_name),
                    asset.isin.as_deref().map(|i| i.trim().to_uppercase()),
                    asset.facility_name,
                    asset.asset_type,
                    asset.city,
                    asset.country,
                    asset.latitude,
                    asset.longitude,
                    now,
                ])?;
            }
            Ok::<_, rusqlite::Error>(assets.len())
        })();
        match result {
            Ok(count) => {
                conn.execute_batch("COMMIT")?;
                Ok(count)
            }
            Err(e) => {
                if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                    log::error!("Failed to roll back asset insert: {}", rollback);
                }
                Err(DatabaseError::Sqlite(e))
            }
        }
    })
}

/// Returns the assets recorded for a company, matched by ISIN when given,
/// else by normalized name.
pub fn find_for_company(
    db: &Database,
    company_name: &str,
    isin: Option<&str>,
) -> Result<Vec<Asset>, DatabaseError> {
    let isin = isin
        .map(|i| i.trim().to_uppercase())
        .filter(|i| !i.is_empty());
    db.with_conn(|conn| {
        let rows = match isin {
            Some(isin) => {
                let mut stmt =
                    conn.prepare("SELECT * FROM assets WHERE isin = ?1 ORDER BY id ASC")?;
                let rows = stmt
                    .query_map(params![isin], asset_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt =
                    conn.prepare("SELECT * FROM assets WHERE company_key = ?1 ORDER BY id ASC")?;
                let rows = stmt
                    .query_map(params![normalize_name(company_name)], asset_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    })
}
