//! Consul KV client.
//!
//! Listings use `GET /v1/kv/<prefix>?recurse=true`; blocking listings add
//! `index` and `wait`.  The `X-Consul-Index` header carries the index that
//! the next blocking call waits on.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{ConfigStore, KvPair, Listing};
use crate::error::{AgentError, Result};

const INDEX_HEADER: &str = "X-Consul-Index";

/// Slack on top of the wait bound; Consul adds up to `wait / 16` of jitter.
const REQUEST_SLACK: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulEntry {
    key: String,
    value: Option<String>,
}

pub struct ConsulStore {
    client: reqwest::Client,
    base_url: String,
    wait: Duration,
    timeout: Duration,
}

impl ConsulStore {
    /// `wait` bounds blocking listings; `timeout` bounds point reads.
    pub fn new(base_url: impl Into<String>, wait: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            wait,
            timeout,
        })
    }

    async fn fetch(
        &self,
        prefix: &str,
        query: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Listing> {
        let url = format!("{}/v1/kv/{}", self.base_url, prefix);
        let request = self
            .client
            .get(&url)
            .query(&[("recurse", "true")])
            .query(query)
            .timeout(timeout);

        let response = request.send().await?;
        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            // An index of 0 makes the next blocking read return at once.
            .map_or(1, |index| index.max(1));

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("No keys under {} (index {})", prefix, index);
                Ok(Listing {
                    pairs: Vec::new(),
                    index,
                })
            }
            status if status.is_success() => {
                let entries: Vec<ConsulEntry> = response.json().await?;
                let pairs = entries
                    .into_iter()
                    .map(decode_entry)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Listing { pairs, index })
            }
            status => Err(AgentError::StoreResponse {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn decode_entry(entry: ConsulEntry) -> Result<KvPair> {
    match entry.value {
        Some(encoded) => match STANDARD.decode(encoded) {
            Ok(bytes) => Ok(KvPair::new(entry.key, bytes)),
            Err(source) => Err(AgentError::InvalidValue {
                key: entry.key,
                source,
            }),
        },
        None => Ok(KvPair::folder(entry.key)),
    }
}

#[async_trait]
impl ConfigStore for ConsulStore {
    async fn list_since(&self, prefix: &str, index: u64) -> Result<Listing> {
        let query = [
            ("index", index.to_string()),
            ("wait", format!("{}s", self.wait.as_secs())),
        ];
        let timeout = self.wait + self.wait / 16 + REQUEST_SLACK;
        self.fetch(prefix, &query, timeout).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>> {
        Ok(self.fetch(prefix, &[], self.timeout).await?.pairs)
    }
}
