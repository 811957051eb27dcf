//! Candidate mapping and name matching.

use crate::client::SourceHit;
use specforge_core::{Candidate, SourceConfig};
use std::collections::HashSet;

/// Lowercased name tokens; `+` is kept so "S24+" differs from "S24".
#[must_use]
pub fn tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '+'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// The text sent to the search source: the query, prefixed by the brand
/// hint unless the query already names it.
#[must_use]
pub fn search_text(query: &str, brand: Option<&str>) -> String {
    match brand {
        Some(brand) if !brand.trim().is_empty() => {
            let query_tokens = tokens(query);
            if tokens(brand).iter().all(|t| query_tokens.contains(t)) {
                query.trim().to_string()
            } else {
                format!("{} {}", brand.trim(), query.trim())
            }
        }
        _ => query.trim().to_string(),
    }
}

/// Whether every token of `query` appears in `name`.
#[must_use]
pub fn name_matches(name: &str, query: &str) -> bool {
    let name_tokens: HashSet<String> = tokens(name).into_iter().collect();
    let query_tokens = tokens(query);
    !query_tokens.is_empty() && query_tokens.iter().all(|t| name_tokens.contains(t))
}

/// Keep enumeration hits whose name contains every query token.
#[must_use]
pub fn filter_by_name(hits: Vec<SourceHit>, query: &str) -> Vec<SourceHit> {
    hits.into_iter()
        .filter(|hit| name_matches(&hit.name, query))
        .collect()
}

/// Map hits to candidates, keeping the first hit for each canonical id.
#[must_use]
pub fn to_candidates(hits: Vec<SourceHit>, source: &SourceConfig) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter_map(|hit| {
            let target_id = hit.slug.trim().to_string();
            if target_id.is_empty() || !seen.insert(target_id.clone()) {
                return None;
            }
            let source_url = hit
                .url
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| source.device_url(&target_id));
            Some(Candidate {
                name: hit.name.trim().to_string(),
                target_id,
                source_url,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str, slug: &str) -> SourceHit {
        SourceHit {
            name: name.to_string(),
            slug: slug.to_string(),
            url: None,
        }
    }

    #[test]
    fn test_tokens() {
        assert_eq!(tokens("Samsung Galaxy S24+"), vec!["samsung", "galaxy", "s24+"]);
        assert_eq!(tokens("  Pixel-8 Pro "), vec!["pixel", "8", "pro"]);
    }

    #[test]
    fn test_search_text_prefixes_brand_once() {
        assert_eq!(search_text("Galaxy S24", Some("Samsung")), "Samsung Galaxy S24");
        assert_eq!(search_text("samsung galaxy s24", Some("Samsung")), "samsung galaxy s24");
        assert_eq!(search_text("Galaxy S24", None), "Galaxy S24");
        assert_eq!(search_text("Galaxy S24", Some("  ")), "Galaxy S24");
    }

    #[test]
    fn test_filter_by_name() {
        let hits = vec![
            hit("Samsung Galaxy S24", "a"),
            hit("Samsung Galaxy S24+", "b"),
            hit("Samsung Galaxy A54", "c"),
        ];
        let kept = filter_by_name(hits, "galaxy s24");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].slug, "a");
    }

    #[test]
    fn test_to_candidates_dedupes_by_target() {
        let hits = vec![
            hit("Google Pixel 8", "google_pixel_8-12546"),
            hit("Pixel 8 (duplicate listing)", "google_pixel_8-12546"),
            hit("Google Pixel 8 Pro", "google_pixel_8_pro-12545"),
            hit("blank slug", " "),
        ];
        let candidates = to_candidates(hits, &SourceConfig::default());
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "Google Pixel 8");
        assert_eq!(
            candidates[0].source_url,
            "https://www.gsmarena.com/google_pixel_8-12546.php"
        );
    }
}
