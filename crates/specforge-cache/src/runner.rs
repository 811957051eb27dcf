//! Runs normalization passes against the store and records the ledger.

use crate::derive::{classify_redirect, derive_device};
use crate::error::Result;
use crate::normalize::{decode_double_encoded, normalize_pipe_arrays, NormalizationPass};
use crate::{PRICES_KIND, SPECS_KIND};
use serde::Serialize;
use serde_json::Value;
use specforge_core::Timestamp;
use specforge_db::price_quotes::{self, RedirectType};
use specforge_db::normalization_runs::{self, ChangedTable};
use specforge_db::{derived_entities, raw_entities, Database};
use std::collections::HashMap;
use std::path::PathBuf;

/// Outcome of one pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    /// Ledger entry id
    pub run_id: String,
    /// Pass name
    pub pass: String,
    /// Rows examined
    pub rows_scanned: u32,
    /// Rows rewritten
    pub rows_changed: u32,
    /// Snapshot taken before the first write, if any write happened
    pub snapshot_path: Option<PathBuf>,
}

enum Change {
    RawData { id: String, data: Value },
    Redirect { id: String, redirect_type: RedirectType },
    Derived { device_id: String, source: String, data: Value },
}

/// Executes passes against one database.
pub struct Normalizer {
    db: Database,
    snapshot_dir: PathBuf,
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl Normalizer {
    /// Create a runner that writes snapshots under `snapshot_dir`.
    pub fn new(db: Database, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            snapshot_dir: snapshot_dir.into(),
        }
    }

    /// Run every pass in order.
    pub async fn run_all(&self) -> Result<Vec<PassReport>> {
        let mut reports = Vec::with_capacity(NormalizationPass::ALL.len());
        for pass in NormalizationPass::ALL {
            reports.push(self.run(pass).await?);
        }
        Ok(reports)
    }

    /// Run one pass.
    ///
    /// Changes are planned first. If there are any, the database is
    /// snapshotted and the changes applied in one transaction, together with
    /// one `normalization_changes` row per rewritten row. A run that
    /// fails leaves its ledger entry unfinished.
    pub async fn run(&self, pass: NormalizationPass) -> Result<PassReport> {
        let pool = self.db.pool();
        let run_id = normalization_runs::start_run(pool, pass.as_str(), Timestamp::now()).await?;
        tracing::info!("Normalization pass {} started (run {})", pass, run_id);

        let (scanned, changes) = match pass {
            NormalizationPass::PipeDelimitedArrays => self.plan_raw(normalize_pipe_arrays).await?,
            NormalizationPass::DoubleEncodedJson => self.plan_raw(decode_double_encoded).await?,
            NormalizationPass::PriceRedirectType => self.plan_redirects().await?,
            NormalizationPass::RebuildDerived => self.plan_derived().await?,
        };

        let snapshot_path = if changes.is_empty() {
            None
        } else {
            Some(self.snapshot(pass, &run_id).await?)
        };

        let mut changed = 0usize;
        if !changes.is_empty() {
            let now = Timestamp::now();
            let mut tx = pool.begin().await?;
            for change in &changes {
                let (applied, table, row_key) = match change {
                    Change::RawData { id, data } => (
                        raw_entities::replace_data(&mut *tx, id, data).await?,
                        ChangedTable::RawEntities,
                        id.clone(),
                    ),
                    Change::Redirect { id, redirect_type } => (
                        price_quotes::set_redirect_type(&mut *tx, id, *redirect_type).await?,
                        ChangedTable::PriceQuotes,
                        id.clone(),
                    ),
                    Change::Derived {
                        device_id,
                        source,
                        data,
                    } => {
                        derived_entities::upsert(&mut *tx, device_id, source, data, now).await?;
                        (true, ChangedTable::DerivedEntities, format!("{device_id}:{source}"))
                    }
                };
                if applied {
                    normalization_runs::record_change(&mut *tx, &run_id, table, &row_key, now)
                        .await?;
                    changed += 1;
                }
            }
            tx.commit().await?;
        }

        let snapshot_str = snapshot_path.as_ref().and_then(|p| p.to_str());
        normalization_runs::finish_run(
            pool,
            &run_id,
            count(scanned),
            count(changed),
            snapshot_str,
            Timestamp::now(),
        )
        .await?;

        tracing::info!(
            "Normalization pass {} finished: {} scanned, {} changed",
            pass,
            scanned,
            changed
        );

        Ok(PassReport {
            run_id,
            pass: pass.as_str().to_string(),
            rows_scanned: count(scanned),
            rows_changed: count(changed),
            snapshot_path,
        })
    }

    async fn snapshot(&self, pass: NormalizationPass, run_id: &str) -> Result<PathBuf> {
        let stamp: String = Timestamp::now()
            .to_rfc3339()
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        let short_id: String = run_id.chars().take(8).collect();
        let path = self
            .snapshot_dir
            .join(format!("{pass}-{stamp}-{short_id}.sqlite3"));
        self.db.snapshot_into(&path).await?;
        Ok(path)
    }

    async fn plan_raw(&self, rewrite: fn(&mut Value) -> bool) -> Result<(usize, Vec<Change>)> {
        let rows = raw_entities::list_all(self.db.pool()).await?;
        let scanned = rows.len();
        let changes = rows
            .into_iter()
            .filter_map(|row| {
                let mut data = row.data;
                rewrite(&mut data).then_some(Change::RawData { id: row.id, data })
            })
            .collect();
        Ok((scanned, changes))
    }

    async fn plan_redirects(&self) -> Result<(usize, Vec<Change>)> {
        let pool = self.db.pool();
        let quotes = price_quotes::list_missing_redirect_type(pool).await?;
        let mut payloads: HashMap<(String, String), Option<Value>> = HashMap::new();
        let mut changes = Vec::with_capacity(quotes.len());

        for quote in &quotes {
            let key = (quote.device_id.clone(), quote.source.clone());
            if !payloads.contains_key(&key) {
                let current =
                    raw_entities::get_current(pool, &key.0, &key.1, PRICES_KIND).await?;
                payloads.insert(key.clone(), current.map(|r| r.data));
            }

            let offer_url = payloads
                .get(&key)
                .and_then(Option::as_ref)
                .and_then(|p| p.get("offers"))
                .and_then(Value::as_array)
                .and_then(|offers| {
                    offers
                        .iter()
                        .find(|o| o.get("offerId").and_then(Value::as_str) == Some(quote.offer_id.as_str()))
                })
                .and_then(|o| o.get("url"))
                .and_then(Value::as_str);

            changes.push(Change::Redirect {
                id: quote.id.clone(),
                redirect_type: offer_url.map_or(RedirectType::Unknown, classify_redirect),
            });
        }

        Ok((quotes.len(), changes))
    }

    async fn plan_derived(&self) -> Result<(usize, Vec<Change>)> {
        let pool = self.db.pool();
        let current_specs: Vec<_> = raw_entities::list_all(pool)
            .await?
            .into_iter()
            .filter(|r| r.superseded_at.is_none() && r.data_kind == SPECS_KIND)
            .collect();

        let mut changes = Vec::new();
        for specs in &current_specs {
            let prices =
                raw_entities::get_current(pool, &specs.device_id, &specs.source, PRICES_KIND)
                    .await?;
            let data = derive_device(&specs.data, prices.as_ref().map(|p| &p.data));
            let existing = derived_entities::get(pool, &specs.device_id, &specs.source).await?;
            if existing.map(|e| e.data) != Some(data.clone()) {
                changes.push(Change::Derived {
                    device_id: specs.device_id.clone(),
                    source: specs.source.clone(),
                    data,
                });
            }
        }

        Ok((current_specs.len(), changes))
    }
}
