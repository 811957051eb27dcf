//! Store facade used by workers and the preview flow.

use crate::derive::{classify_redirect, derive_device};
use crate::error::Result;
use crate::{PRICES_KIND, SPECS_KIND};
use serde::Serialize;
use serde_json::Value;
use specforge_core::Timestamp;
use specforge_db::derived_entities::{self, DerivedEntity};
use specforge_db::price_quotes::{self, NewPriceQuote};
use specforge_db::raw_entities::{self, RawEntity};
use specforge_db::Database;
use specforge_scraper::DevicePage;

/// Ids written by one [`CacheStore::store_device_page`] call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredScrape {
    /// Device the payloads belong to
    pub device_id: String,
    /// New current `specs` row
    pub raw_specs_id: String,
    /// New current `prices` row
    pub raw_prices_id: String,
    /// Quotes appended
    pub quotes: usize,
    /// Freshly derived record
    pub derived: Value,
}

/// Raw/derived cache for one source.
#[derive(Debug, Clone)]
pub struct CacheStore {
    db: Database,
    source: String,
}

impl CacheStore {
    /// Create a store writing rows for `source`.
    #[must_use]
    pub fn new(db: Database, source: impl Into<String>) -> Self {
        Self {
            db,
            source: source.into(),
        }
    }

    /// Source name written on every row.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Persist one scrape: raw specs and prices, quotes and the derived
    /// record, in a single transaction.
    pub async fn store_device_page(
        &self,
        device_id: &str,
        target_id: &str,
        source_url: &str,
        page: &DevicePage,
    ) -> Result<StoredScrape> {
        let now = Timestamp::now();
        let specs = page.specs_payload(target_id, source_url);
        let prices = page.prices_payload();
        let quotes: Vec<NewPriceQuote> = page
            .offers
            .iter()
            .map(|offer| NewPriceQuote {
                offer_id: offer.offer_id.clone(),
                price: offer.price,
                currency: offer.currency.clone(),
                redirect_type: Some(classify_redirect(&offer.url)),
            })
            .collect();
        let derived = derive_device(&specs, Some(&prices));

        let mut tx = self.db.pool().begin().await?;
        let raw_specs =
            raw_entities::insert_raw(&mut tx, device_id, &self.source, SPECS_KIND, &specs, now)
                .await?;
        let raw_prices =
            raw_entities::insert_raw(&mut tx, device_id, &self.source, PRICES_KIND, &prices, now)
                .await?;
        let quote_count =
            price_quotes::insert_quotes(&mut tx, device_id, &self.source, &quotes, now).await?;
        derived_entities::upsert(&mut *tx, device_id, &self.source, &derived, now).await?;
        tx.commit().await?;

        tracing::info!(
            "Cached device {} from {} ({} offers)",
            device_id,
            self.source,
            quote_count
        );

        Ok(StoredScrape {
            device_id: device_id.to_string(),
            raw_specs_id: raw_specs.id,
            raw_prices_id: raw_prices.id,
            quotes: quote_count,
            derived,
        })
    }

    /// Current raw payload of a kind.
    pub async fn current(&self, device_id: &str, data_kind: &str) -> Result<Option<RawEntity>> {
        Ok(raw_entities::get_current(self.db.pool(), device_id, &self.source, data_kind).await?)
    }

    /// Derived record, if one was built.
    pub async fn derived(&self, device_id: &str) -> Result<Option<DerivedEntity>> {
        Ok(derived_entities::get(self.db.pool(), device_id, &self.source).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use specforge_scraper::PriceOffer;
    use std::collections::BTreeMap;

    async fn setup_test_db() -> Database {
        let db = Database::in_memory().await.expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    fn page(name: &str) -> DevicePage {
        DevicePage {
            name: name.to_string(),
            brand: Some("Apple".to_string()),
            specs: BTreeMap::from([(
                "Battery".to_string(),
                BTreeMap::from([("Type".to_string(), "Li-Ion 3349 mAh".to_string())]),
            )]),
            colors: vec!["Black".to_string(), "Pink".to_string()],
            models: vec!["A3090".to_string()],
            network_bands: vec![],
            image_urls: vec![],
            offers: vec![PriceOffer {
                offer_id: "amazon-0".to_string(),
                store: "Amazon".to_string(),
                price: Some(799.0),
                currency: Some("USD".to_string()),
                url: "https://www.amazon.com/dp/B0CHX?tag=x-20".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_store_device_page() {
        let db = setup_test_db().await;
        let store = CacheStore::new(db.clone(), "gsmarena");

        let stored = store
            .store_device_page("dev1", "apple_iphone_15-12559", "https://x/15.php", &page("Apple iPhone 15"))
            .await
            .expect("store");
        assert_eq!(stored.quotes, 1);
        assert_eq!(stored.derived["batteryMah"], 3349.0);

        let specs = store.current("dev1", SPECS_KIND).await.unwrap().unwrap();
        assert_eq!(specs.id, stored.raw_specs_id);
        assert_eq!(specs.data["targetId"], "apple_iphone_15-12559");

        let quotes = price_quotes::list_for_device(db.pool(), "dev1").await.unwrap();
        assert_eq!(
            quotes[0].redirect_type,
            Some(price_quotes::RedirectType::Affiliate)
        );

        let derived = store.derived("dev1").await.unwrap().unwrap();
        assert_eq!(derived.data, stored.derived);
    }

    #[tokio::test]
    async fn test_rescrape_supersedes_previous_capture() {
        let db = setup_test_db().await;
        let store = CacheStore::new(db.clone(), "gsmarena");

        let first = store
            .store_device_page("dev1", "t", "https://x/t.php", &page("Apple iPhone 15"))
            .await
            .unwrap();
        let second = store
            .store_device_page("dev1", "t", "https://x/t.php", &page("Apple iPhone 15 (2023)"))
            .await
            .unwrap();

        let history = raw_entities::history(db.pool(), "dev1", "gsmarena", SPECS_KIND)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        let current: Vec<_> = history.iter().filter(|r| r.superseded_at.is_none()).collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, second.raw_specs_id);
        assert_ne!(first.raw_specs_id, second.raw_specs_id);

        let derived = store.derived("dev1").await.unwrap().unwrap();
        assert_eq!(derived.data["name"], "Apple iPhone 15 (2023)");
    }
}
