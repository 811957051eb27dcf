//! Price quote persistence.
//!
//! Quotes are appended per scrape. `redirect_type` may be missing on rows
//! written before it existed and is backfilled later.

use crate::error::{DatabaseError, Result};
use crate::scrape_jobs::parse_timestamp;
use serde::{Deserialize, Serialize};
use specforge_core::Timestamp;
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Pool, Row, Sqlite, SqliteConnection};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// How an offer link reaches the merchant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectType {
    /// Links straight to the merchant
    Direct,
    /// Goes through an affiliate redirector
    Affiliate,
    /// Could not be determined
    Unknown,
}

impl RedirectType {
    /// Database representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Affiliate => "affiliate",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RedirectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RedirectType {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "affiliate" => Ok(Self::Affiliate),
            "unknown" => Ok(Self::Unknown),
            other => Err(DatabaseError::Decode(format!(
                "unknown redirect type '{other}'"
            ))),
        }
    }
}

/// One observed offer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceQuote {
    /// Unique identifier
    pub id: String,
    /// Device the offer is for
    pub device_id: String,
    /// Source the offer was seen on
    pub source: String,
    /// Source-specific offer key
    pub offer_id: String,
    /// Price, when listed
    pub price: Option<f64>,
    /// ISO currency code or symbol
    pub currency: Option<String>,
    /// Link kind; `None` until backfilled
    pub redirect_type: Option<RedirectType>,
    /// When it was observed
    pub observed_at: Timestamp,
}

/// Offer fields supplied by the scraper.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPriceQuote {
    /// Source-specific offer key
    pub offer_id: String,
    /// Price, when listed
    pub price: Option<f64>,
    /// Currency
    pub currency: Option<String>,
    /// Link kind, when already known
    pub redirect_type: Option<RedirectType>,
}

/// Append a batch of quotes observed together.
pub async fn insert_quotes(
    conn: &mut SqliteConnection,
    device_id: &str,
    source: &str,
    quotes: &[NewPriceQuote],
    now: Timestamp,
) -> Result<usize> {
    for quote in quotes {
        sqlx::query(
            "INSERT INTO price_quotes (id, device_id, source, offer_id, price, currency, redirect_type, observed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(device_id)
        .bind(source)
        .bind(&quote.offer_id)
        .bind(quote.price)
        .bind(quote.currency.as_deref())
        .bind(quote.redirect_type.map(|r| r.as_str()))
        .bind(now.to_rfc3339())
        .execute(&mut *conn)
        .await?;
    }

    Ok(quotes.len())
}

/// Quotes for a device, newest first.
pub async fn list_for_device(pool: &Pool<Sqlite>, device_id: &str) -> Result<Vec<PriceQuote>> {
    let rows = sqlx::query(
        "SELECT id, device_id, source, offer_id, price, currency, redirect_type, observed_at
         FROM price_quotes WHERE device_id = ?
         ORDER BY observed_at DESC, offer_id",
    )
    .bind(device_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_quote).collect()
}

/// Quotes still waiting for a redirect type.
pub async fn list_missing_redirect_type(pool: &Pool<Sqlite>) -> Result<Vec<PriceQuote>> {
    let rows = sqlx::query(
        "SELECT id, device_id, source, offer_id, price, currency, redirect_type, observed_at
         FROM price_quotes WHERE redirect_type IS NULL
         ORDER BY device_id, observed_at, id",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_quote).collect()
}

/// Fill in a missing redirect type. Never overwrites an existing value.
pub async fn set_redirect_type<'e, E>(
    executor: E,
    id: &str,
    redirect_type: RedirectType,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE price_quotes SET redirect_type = ? WHERE id = ? AND redirect_type IS NULL",
    )
    .bind(redirect_type.as_str())
    .bind(id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn parse_quote(row: &SqliteRow) -> Result<PriceQuote> {
    let redirect_type: Option<String> = row.try_get("redirect_type")?;
    Ok(PriceQuote {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        source: row.try_get("source")?,
        offer_id: row.try_get("offer_id")?,
        price: row.try_get("price")?,
        currency: row.try_get("currency")?,
        redirect_type: redirect_type.map(|s| s.parse()).transpose()?,
        observed_at: parse_timestamp(row, "observed_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_backfill_never_overwrites() {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");

        let quotes = vec![
            NewPriceQuote {
                offer_id: "amazon-us".to_string(),
                price: Some(799.0),
                currency: Some("USD".to_string()),
                redirect_type: None,
            },
            NewPriceQuote {
                offer_id: "bestbuy".to_string(),
                price: Some(829.99),
                currency: Some("USD".to_string()),
                redirect_type: Some(RedirectType::Direct),
            },
        ];
        let mut conn = db.pool().acquire().await.expect("acquire connection");
        insert_quotes(&mut conn, "dev-1", "gsmarena", &quotes, Timestamp::now())
            .await
            .expect("insert quotes");
        drop(conn);

        let missing = list_missing_redirect_type(db.pool()).await.expect("list missing");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].offer_id, "amazon-us");

        assert!(set_redirect_type(db.pool(), &missing[0].id, RedirectType::Affiliate)
            .await
            .expect("backfill"));
        assert!(!set_redirect_type(db.pool(), &missing[0].id, RedirectType::Direct)
            .await
            .expect("second backfill"));

        let all = list_for_device(db.pool(), "dev-1").await.expect("list");
        let amazon = all.iter().find(|q| q.offer_id == "amazon-us").expect("amazon");
        assert_eq!(amazon.redirect_type, Some(RedirectType::Affiliate));
    }
}
