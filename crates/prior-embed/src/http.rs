//! The HTTP client behind every outbound call prior makes.
//!
//! Embedding providers, the GitHub issue source and the Pinecone adapter all
//! start from [`default_client`], so they share one user agent and one set of
//! timeouts. Tests swap it out through each type's `with_client`.

use std::time::Duration;

/// Sent on every request; GitHub rejects anonymous user agents.
pub const USER_AGENT: &str = concat!("prior/", env!("CARGO_PKG_VERSION"));

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Covers a full embedding batch, the slowest request in a sync.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 10;

#[must_use]
pub fn default_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("custom HTTP client unavailable, using reqwest defaults: {e}");
            reqwest::Client::new()
        })
}
