//! Matching oracles that pick one candidate out of an ambiguous result set.

use crate::error::{Result, SearchError};
use crate::matcher::tokens;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use specforge_core::{Candidate, OracleConfig, OracleKind, SecretString};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Decides which candidate, if any, the query refers to.
#[async_trait]
pub trait MatchOracle: Send + Sync {
    /// Return the `target_id` of the best candidate, or `None` when no pick
    /// is confident enough.
    async fn pick(&self, query: &str, candidates: &[Candidate]) -> Result<Option<String>>;

    /// Identifier used in logs
    fn name(&self) -> &'static str;
}

/// Build the configured oracle, or `None` when disabled.
///
/// # Errors
/// Returns `SearchError::Config` when the LLM oracle has no credential or
/// its HTTP client cannot be built.
pub fn build_oracle(config: &OracleConfig) -> Result<Option<Arc<dyn MatchOracle>>> {
    match config.kind {
        OracleKind::None => Ok(None),
        OracleKind::Heuristic => Ok(Some(Arc::new(HeuristicOracle))),
        OracleKind::Llm => {
            let key = config
                .api_key
                .clone()
                .ok_or_else(|| SearchError::Config("oracle.api_key is required".to_string()))?;
            let oracle = LlmOracle::new(&config.api_url, &config.model, key)?;
            Ok(Some(Arc::new(oracle)))
        }
    }
}

/// Name-based matching without any network access.
///
/// An exact normalized name match wins. Otherwise a candidate is picked
/// only if it is the single one whose name contains every query token.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicOracle;

#[async_trait]
impl MatchOracle for HeuristicOracle {
    async fn pick(&self, query: &str, candidates: &[Candidate]) -> Result<Option<String>> {
        let query_tokens = tokens(query);
        if query_tokens.is_empty() {
            return Ok(None);
        }

        // The brand is often left out of the query: "Pixel 8" is an exact
        // match for "Google Pixel 8".
        if let Some(exact) = candidates.iter().find(|c| {
            let name = tokens(&c.name);
            name == query_tokens || name.get(1..) == Some(query_tokens.as_slice())
        }) {
            return Ok(Some(exact.target_id.clone()));
        }

        let supersets: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| {
                let name: HashSet<String> = tokens(&c.name).into_iter().collect();
                query_tokens.iter().all(|t| name.contains(t))
            })
            .collect();

        match supersets.as_slice() {
            [only] => Ok(Some(only.target_id.clone())),
            _ => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

const SYSTEM_PROMPT: &str = "You match a user's device query to one entry of a candidate list. \
Reply with exactly one candidate id from the list, or the word none if no candidate clearly \
matches. Do not add any other text.";

/// Oracle backed by an OpenAI-compatible chat completions endpoint.
pub struct LlmOracle {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl LlmOracle {
    /// Create an oracle for the given endpoint and model.
    ///
    /// # Errors
    /// Returns `SearchError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: &str, model: &str, api_key: SecretString) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| SearchError::Config(format!("oracle http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
        })
    }

    fn to_api_request(&self, query: &str, candidates: &[Candidate]) -> ChatRequest {
        let listing = candidates
            .iter()
            .map(|c| format!("- {} ({})", c.target_id, c.name))
            .collect::<Vec<_>>()
            .join("\n");

        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: format!("Query: {query}\nCandidates:\n{listing}"),
                },
            ],
            temperature: 0.0,
            max_tokens: 64,
        }
    }
}

/// Map a free-text answer onto a candidate id.
fn interpret_answer(answer: &str, candidates: &[Candidate]) -> Option<String> {
    let answer = answer
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '.');
    if answer.eq_ignore_ascii_case("none") {
        return None;
    }
    candidates
        .iter()
        .find(|c| c.target_id == answer)
        .map(|c| c.target_id.clone())
}

#[async_trait]
impl MatchOracle for LlmOracle {
    async fn pick(&self, query: &str, candidates: &[Candidate]) -> Result<Option<String>> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key.expose()))
            .header("Content-Type", "application/json")
            .json(&self.to_api_request(query, candidates))
            .send()
            .await
            .map_err(|e| SearchError::Oracle(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Oracle(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Oracle(format!("Failed to parse response: {e}")))?;

        let answer = api_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SearchError::Oracle("no choices in response".to_string()))?;

        let picked = interpret_answer(&answer, candidates);
        if picked.is_none() {
            tracing::debug!("Oracle declined to pick for query '{}': {}", query, answer);
        }
        Ok(picked)
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, target_id: &str) -> Candidate {
        Candidate {
            name: name.to_string(),
            target_id: target_id.to_string(),
            source_url: format!("https://example.test/{target_id}.php"),
        }
    }

    fn pixels() -> Vec<Candidate> {
        vec![
            candidate("Google Pixel 8", "google_pixel_8-12546"),
            candidate("Google Pixel 8 Pro", "google_pixel_8_pro-12545"),
            candidate("Google Pixel 8a", "google_pixel_8a-12937"),
        ]
    }

    #[tokio::test]
    async fn test_heuristic_exact_match() {
        let picked = HeuristicOracle.pick("pixel 8", &pixels()).await.unwrap();
        assert_eq!(picked.as_deref(), Some("google_pixel_8-12546"));

        let picked = HeuristicOracle
            .pick("Google Pixel 8 Pro", &pixels())
            .await
            .unwrap();
        assert_eq!(picked.as_deref(), Some("google_pixel_8_pro-12545"));
    }

    #[tokio::test]
    async fn test_heuristic_unique_superset() {
        let picked = HeuristicOracle.pick("8a", &pixels()).await.unwrap();
        assert_eq!(picked.as_deref(), Some("google_pixel_8a-12937"));
    }

    #[tokio::test]
    async fn test_heuristic_declines_when_ambiguous() {
        let candidates = vec![
            candidate("Samsung Galaxy S24 Ultra", "a"),
            candidate("Samsung Galaxy S24 FE", "b"),
        ];
        assert_eq!(HeuristicOracle.pick("galaxy s24", &candidates).await.unwrap(), None);
        assert_eq!(HeuristicOracle.pick("", &candidates).await.unwrap(), None);
    }

    #[test]
    fn test_interpret_answer() {
        let candidates = pixels();
        assert_eq!(
            interpret_answer(" `google_pixel_8a-12937`.\n", &candidates).as_deref(),
            Some("google_pixel_8a-12937")
        );
        assert_eq!(interpret_answer("NONE", &candidates), None);
        assert_eq!(interpret_answer("iphone_15", &candidates), None);
    }

    #[test]
    fn test_build_oracle() {
        let none = OracleConfig {
            kind: OracleKind::None,
            ..OracleConfig::default()
        };
        assert!(build_oracle(&none).unwrap().is_none());

        let heuristic = build_oracle(&OracleConfig::default()).unwrap().unwrap();
        assert_eq!(heuristic.name(), "heuristic");

        let llm_without_key = OracleConfig {
            kind: OracleKind::Llm,
            ..OracleConfig::default()
        };
        assert!(matches!(
            build_oracle(&llm_without_key),
            Err(SearchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_llm_oracle_picks_listed_candidate() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .with_status(200)
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"google_pixel_8_pro-12545"}}]}"#,
            )
            .create_async()
            .await;

        let oracle =
            LlmOracle::new(&server.url(), "test-model", SecretString::new("sk-test")).unwrap();
        let picked = oracle.pick("pixel 8 pro", &pixels()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(picked.as_deref(), Some("google_pixel_8_pro-12545"));
    }

    #[tokio::test]
    async fn test_llm_oracle_http_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_body("invalid key")
            .create_async()
            .await;

        let oracle =
            LlmOracle::new(&server.url(), "test-model", SecretString::new("bad")).unwrap();
        let err = oracle.pick("pixel", &pixels()).await.unwrap_err();
        assert!(matches!(err, SearchError::Oracle(_)));
    }
}
