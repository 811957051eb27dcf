//! Structured field extraction from an accepted device page.

use crate::error::{Result, ScrapeError};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Payload fields whose canonical encoding is a JSON array of strings.
pub const ARRAY_FIELDS: &[&str] = &["colors", "models", "image_urls", "network_bands"];

const NETWORK_SPECS: &[&str] = &["net2g", "net3g", "net4g", "net5g"];

/// Everything extracted from one device page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePage {
    /// Device display name
    pub name: String,
    /// Brand, taken from the first word of the name
    pub brand: Option<String>,
    /// Category -> label -> value
    pub specs: BTreeMap<String, BTreeMap<String, String>>,
    /// Color options
    pub colors: Vec<String>,
    /// Model numbers
    pub models: Vec<String>,
    /// One entry per network generation row
    #[serde(rename = "network_bands")]
    pub network_bands: Vec<String>,
    /// Absolute media URLs
    #[serde(rename = "image_urls")]
    pub image_urls: Vec<String>,
    /// Store offers
    #[serde(default)]
    pub offers: Vec<PriceOffer>,
}

/// One store offer from the pricing table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceOffer {
    /// Stable id for the offer on this device page
    pub offer_id: String,
    /// Store name
    pub store: String,
    /// Parsed amount
    pub price: Option<f64>,
    /// ISO currency code
    pub currency: Option<String>,
    /// Outbound offer link
    pub url: String,
}

impl DevicePage {
    /// Raw `specs` payload: the page without its offers.
    #[must_use]
    pub fn specs_payload(&self, target_id: &str, source_url: &str) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "brand": self.brand,
            "targetId": target_id,
            "sourceUrl": source_url,
            "specs": self.specs,
            "colors": self.colors,
            "models": self.models,
            "network_bands": self.network_bands,
            "image_urls": self.image_urls,
        })
    }

    /// Raw `prices` payload.
    #[must_use]
    pub fn prices_payload(&self) -> serde_json::Value {
        serde_json::json!({ "offers": self.offers })
    }
}

fn selector(raw: &str) -> Result<Selector> {
    Selector::parse(raw).map_err(|e| ScrapeError::Extraction(format!("selector '{raw}': {e}")))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn slugify(value: &str) -> String {
    let slug: String = value
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    slug.split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Parse a price label such as `"$ 699.00"` or `"€ 1.299,99"`.
#[must_use]
pub fn parse_price(label: &str) -> (Option<f64>, Option<String>) {
    let currency = if label.contains('$') {
        Some("USD")
    } else if label.contains('€') {
        Some("EUR")
    } else if label.contains('£') {
        Some("GBP")
    } else if label.contains('₹') {
        Some("INR")
    } else {
        None
    };

    let digits: String = label
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    let normalized = match (digits.rfind(','), digits.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => digits.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => digits.replace(',', ""),
        (Some(comma), None) if digits.len() - comma - 1 == 2 => digits.replace(',', "."),
        (Some(_), None) => digits.replace(',', ""),
        _ => digits,
    };

    (normalized.parse().ok(), currency.map(str::to_string))
}

/// Extract a [`DevicePage`] from HTML the validator accepted.
///
/// Relative media and offer links are resolved against `page_url`.
///
/// # Errors
/// Returns `ScrapeError::Extraction` when the device name is missing.
pub fn extract_device(html: &str, page_url: &str) -> Result<DevicePage> {
    let document = Html::parse_document(html);
    let base = url::Url::parse(page_url).ok();
    let resolve = |href: &str| -> String {
        base.as_ref()
            .and_then(|b| b.join(href).ok())
            .map_or_else(|| href.to_string(), |u| u.to_string())
    };

    let name = ["h1.specs-phone-name-title", "h1[data-spec=\"modelname\"]", "h1"]
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|sel| document.select(&sel).next().map(text_of))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ScrapeError::Extraction("device name not found".to_string()))?;
    let brand = name.split_whitespace().next().map(str::to_string);

    let mut specs: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    let mut colors = Vec::new();
    let mut models = Vec::new();
    let mut network_bands = Vec::new();

    let table_sel = selector("#specs-list table")?;
    let row_sel = selector("tr")?;
    let th_sel = selector("th")?;
    let ttl_sel = selector("td.ttl")?;
    let nfo_sel = selector("td.nfo")?;

    for table in document.select(&table_sel) {
        let Some(category) = table.select(&th_sel).next().map(text_of) else {
            continue;
        };
        let section = specs.entry(category).or_default();
        let mut last_label = String::new();

        for row in table.select(&row_sel) {
            let Some(value_cell) = row.select(&nfo_sel).next() else {
                continue;
            };
            let value = text_of(value_cell);
            let label = row.select(&ttl_sel).next().map(text_of).unwrap_or_default();

            // Rows with a blank label continue the previous one.
            if label.is_empty() && !last_label.is_empty() {
                if let Some(existing) = section.get_mut(&last_label) {
                    existing.push('\n');
                    existing.push_str(&value);
                }
            } else {
                let label = if label.is_empty() { "Other".to_string() } else { label };
                section.insert(label.clone(), value.clone());
                last_label = label;
            }

            match value_cell.value().attr("data-spec") {
                Some("colors") => colors.extend(split_list(&value)),
                Some("models") => models.extend(split_list(&value)),
                Some(spec) if NETWORK_SPECS.contains(&spec) && !value.is_empty() => {
                    network_bands.push(value);
                }
                _ => {}
            }
        }
    }

    let mut image_urls: Vec<String> = Vec::new();
    let img_sel = selector(".specs-photo-main img[src], #pictures-list img[src]")?;
    for img in document.select(&img_sel) {
        if let Some(src) = img.value().attr("src") {
            let url = resolve(src);
            if !image_urls.contains(&url) {
                image_urls.push(url);
            }
        }
    }

    let offers = extract_offers(&document, &resolve)?;

    tracing::debug!(
        "Extracted '{}': {} spec sections, {} images, {} offers",
        name,
        specs.len(),
        image_urls.len(),
        offers.len()
    );

    Ok(DevicePage {
        name,
        brand,
        specs,
        colors,
        models,
        network_bands,
        image_urls,
        offers,
    })
}

fn extract_offers(document: &Html, resolve: &dyn Fn(&str) -> String) -> Result<Vec<PriceOffer>> {
    let row_sel = selector("table.pricing tr")?;
    let link_sel = selector("a[href]")?;
    let img_sel = selector("img[alt]")?;
    let td_sel = selector("td")?;

    let mut offers: Vec<PriceOffer> = Vec::new();
    for (index, row) in document.select(&row_sel).enumerate() {
        let Some(link) = row.select(&link_sel).last() else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };

        let store = row
            .select(&img_sel)
            .next()
            .and_then(|img| img.value().attr("alt"))
            .map(str::to_string)
            .or_else(|| row.select(&td_sel).next().map(text_of))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_string());

        let (price, currency) = parse_price(&text_of(link));
        let offer_id = row
            .value()
            .attr("data-offer-id")
            .map_or_else(|| format!("{}-{index}", slugify(&store)), str::to_string);

        offers.push(PriceOffer {
            offer_id,
            store,
            price,
            currency,
            url: resolve(href),
        });
    }
    Ok(offers)
}
