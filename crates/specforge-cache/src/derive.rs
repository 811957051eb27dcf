//! Derived device records and offer classification.

use crate::normalize::string_list;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use specforge_db::price_quotes::RedirectType;

static INCHES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*inch").expect("inches regex is hardcoded and valid"));

static MAH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{3,6})\s*mAh").expect("mAh regex is hardcoded and valid"));

static GRAMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*g\b").expect("grams regex is hardcoded and valid"));

/// Hosts that only ever serve tracked redirects.
const AFFILIATE_HOSTS: &[&str] = &[
    "amzn.to",
    "awin1.com",
    "click.linksynergy.com",
    "go.skimresources.com",
    "redirect.viglink.com",
    "prf.hn",
    "shareasale.com",
    "tkqlhce.com",
    "anrdoezrs.net",
];

/// Query parameters that mark a tracked link.
const AFFILIATE_PARAMS: &[&str] = &[
    "tag",
    "affid",
    "aff_id",
    "affiliate",
    "irclickid",
    "clickref",
    "ascsubtag",
];

/// Classify an outbound offer link.
#[must_use]
pub fn classify_redirect(offer_url: &str) -> RedirectType {
    let Ok(url) = url::Url::parse(offer_url) else {
        return RedirectType::Unknown;
    };
    let Some(host) = url.host_str() else {
        return RedirectType::Unknown;
    };
    let host = host.trim_start_matches("www.");

    let affiliate_host = AFFILIATE_HOSTS
        .iter()
        .any(|h| host == *h || host.ends_with(&format!(".{h}")));
    let affiliate_param = url
        .query_pairs()
        .any(|(k, _)| AFFILIATE_PARAMS.contains(&k.to_lowercase().as_str()));
    let redirect_path = url.path().starts_with("/go/") || url.path().starts_with("/redirect");

    if affiliate_host || affiliate_param || redirect_path {
        RedirectType::Affiliate
    } else {
        RedirectType::Direct
    }
}

fn spec<'a>(specs: &'a Value, category: &str, label: &str) -> Option<&'a str> {
    specs.get(category)?.get(label)?.as_str()
}

fn capture_f64(re: &Regex, text: Option<&str>) -> Option<f64> {
    re.captures(text?)?.get(1)?.as_str().parse().ok()
}

/// Build the derived record for one device from its raw payloads.
///
/// Pure and deterministic: the same raw payloads always produce the same
/// record, which is what lets `rebuild-derived` run repeatedly.
#[must_use]
pub fn derive_device(specs_payload: &Value, prices_payload: Option<&Value>) -> Value {
    let specs = specs_payload.get("specs").cloned().unwrap_or(Value::Null);

    let mut record = Map::new();
    for key in ["name", "brand", "targetId", "sourceUrl"] {
        record.insert(
            key.to_string(),
            specs_payload.get(key).cloned().unwrap_or(Value::Null),
        );
    }

    record.insert(
        "displaySizeInches".to_string(),
        json!(capture_f64(&INCHES, spec(&specs, "Display", "Size"))),
    );
    record.insert(
        "batteryMah".to_string(),
        json!(capture_f64(&MAH, spec(&specs, "Battery", "Type"))),
    );
    record.insert(
        "weightGrams".to_string(),
        json!(capture_f64(&GRAMS, spec(&specs, "Body", "Weight"))),
    );
    record.insert(
        "chipset".to_string(),
        json!(spec(&specs, "Platform", "Chipset")),
    );
    record.insert(
        "announced".to_string(),
        json!(spec(&specs, "Launch", "Announced")),
    );

    record.insert("colors".to_string(), json!(string_list(specs_payload.get("colors"))));
    record.insert("models".to_string(), json!(string_list(specs_payload.get("models"))));
    record.insert(
        "networkBands".to_string(),
        json!(string_list(specs_payload.get("network_bands"))),
    );
    record.insert(
        "imageUrls".to_string(),
        json!(string_list(specs_payload.get("image_urls"))),
    );

    let offers: Vec<&Value> = prices_payload
        .and_then(|p| p.get("offers"))
        .and_then(Value::as_array)
        .map(|o| o.iter().collect())
        .unwrap_or_default();

    let lowest = offers
        .iter()
        .filter_map(|o| Some((o.get("price")?.as_f64()?, *o)))
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(amount, offer)| {
            json!({
                "amount": amount,
                "currency": offer.get("currency"),
                "store": offer.get("store"),
            })
        });

    record.insert("offerCount".to_string(), json!(offers.len()));
    record.insert("lowestPrice".to_string(), lowest.unwrap_or(Value::Null));

    Value::Object(record)
}
