//! Failover dispatcher - the sequential key-cycling loop
//!
//! Given an ordered candidate list and a validated payload, tries each
//! candidate in turn against the upstream generateContent endpoint. The
//! first 2xx response wins and no further candidates are contacted. A
//! non-2xx status and a transport failure are treated identically: log it
//! and move on. When the list runs out, the caller gets a single
//! exhaustion error carrying the attempt count.

use std::time::Instant;

use axum::http::StatusCode;
use serde_json::Value;

use crate::config::key_fingerprint;

use super::error::DispatchError;

/// One (credential, model) attempt unit in the failover sequence
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Raw API key - never logged, only its fingerprint
    pub key: String,
    /// Target model identifier for this candidate
    pub model: String,
}

/// Classified outcome of a single upstream attempt
#[derive(Debug)]
enum AttemptOutcome {
    /// 2xx with a parseable JSON body - terminal, stops the loop
    Success { status: StatusCode, body: Value },
    /// Non-2xx HTTP status - advance to the next candidate
    Rejected { status: StatusCode, error_body: String },
    /// The attempt could not complete at all - advance to the next candidate
    Transport { error: String },
}

/// A successful upstream response, passed through to the caller unmodified
#[derive(Debug)]
pub struct DispatchSuccess {
    pub status: StatusCode,
    pub body: Value,
}

/// Run the failover loop: strictly sequential, first-to-succeed by list
/// order, mandatory early termination on success.
pub async fn dispatch(
    client: &reqwest::Client,
    api_url: &str,
    candidates: &[Candidate],
    payload: &Value,
) -> Result<DispatchSuccess, DispatchError> {
    if candidates.is_empty() {
        return Err(DispatchError::NoKeys);
    }

    for (index, candidate) in candidates.iter().enumerate() {
        let fingerprint = key_fingerprint(&candidate.key);
        let start = Instant::now();

        tracing::debug!(
            "Attempt {}/{}: key {} model {}",
            index + 1,
            candidates.len(),
            fingerprint,
            candidate.model
        );

        match attempt(client, api_url, candidate, payload).await {
            AttemptOutcome::Success { status, body } => {
                tracing::info!(
                    "SUCCESS: key {} answered {} in {:?} (attempt {}/{})",
                    fingerprint,
                    status,
                    start.elapsed(),
                    index + 1,
                    candidates.len()
                );
                return Ok(DispatchSuccess { status, body });
            }
            AttemptOutcome::Rejected { status, error_body } => {
                tracing::warn!(
                    "FAILOVER: key {} rejected with status {} in {:?}: {}",
                    fingerprint,
                    status,
                    start.elapsed(),
                    error_body
                );
            }
            AttemptOutcome::Transport { error } => {
                tracing::warn!(
                    "FAILOVER: key {} transport failure after {:?}: {}",
                    fingerprint,
                    start.elapsed(),
                    error
                );
            }
        }
    }

    Err(DispatchError::Exhausted {
        attempts: candidates.len(),
    })
}

/// Perform one upstream attempt and classify the result. Exactly one
/// request is in flight at a time; the loop suspends here.
async fn attempt(
    client: &reqwest::Client,
    api_url: &str,
    candidate: &Candidate,
    payload: &Value,
) -> AttemptOutcome {
    let url = format!(
        "{}/v1beta/models/{}:generateContent?key={}",
        api_url.trim_end_matches('/'),
        candidate.model,
        candidate.key
    );

    let response = match client.post(&url).json(payload).send().await {
        Ok(response) => response,
        Err(e) => {
            return AttemptOutcome::Transport {
                error: e.to_string(),
            }
        }
    };

    let status = response.status();

    if status.is_success() {
        // A 2xx with an unparseable body still counts as a failed attempt
        match response.json::<Value>().await {
            Ok(body) => AttemptOutcome::Success { status, body },
            Err(e) => AttemptOutcome::Transport {
                error: format!("invalid JSON in upstream response: {}", e),
            },
        }
    } else {
        // Error body is read for diagnostics only; the status code is never
        // inspected to change behavior (429 == 403 == anything non-2xx)
        let error_body = response.text().await.unwrap_or_default();
        AttemptOutcome::Rejected { status, error_body }
    }
}
