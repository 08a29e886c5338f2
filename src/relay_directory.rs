//! Relay directory client module (spec §4.2)
//!
//! Fetches the exit-relay list from the directory service and parses it into
//! `RelayRecord`s. Network/parse failures are recoverable: callers proceed
//! with an empty relay list rather than aborting startup.

use serde::Deserialize;
use std::time::Duration;

use crate::constants::DIRECTORY_FETCH_TIMEOUT_SECS;
use crate::error::ProxyError;

#[derive(Debug, Clone, PartialEq)]
pub struct RelayRecord {
    pub id: String,
    pub address: String,
    pub country: Option<String>,
    pub exit_probability: Option<f64>,
}

#[derive(Debug, Default, Clone)]
pub struct RelayFilter {
    pub countries: Option<std::collections::HashSet<String>>,
    pub max_count: usize,
}

impl RelayFilter {
    pub fn new(countries: Option<std::collections::HashSet<String>>, max_count: usize) -> Self {
        Self {
            countries,
            max_count,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DirectoryResponse {
    relays: Vec<DirectoryRelay>,
}

#[derive(Debug, Deserialize)]
struct DirectoryRelay {
    fingerprint: String,
    #[serde(default)]
    or_addresses: Vec<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    exit_probability: Option<f64>,
}

pub struct RelayDirectoryClient {
    client: reqwest::Client,
    directory_url: String,
}

impl RelayDirectoryClient {
    pub fn new(directory_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            directory_url,
        }
    }

    /// Fetch and parse the relay list, applying `filter`.
    ///
    /// Returns `DirectoryUnavailable` on network error, `DirectoryMalformed`
    /// on parse error. Records without a usable address are discarded
    /// silently (not an error - just excluded from the result).
    pub async fn fetch(&self, filter: &RelayFilter) -> Result<Vec<RelayRecord>, ProxyError> {
        let response = self
            .client
            .get(&self.directory_url)
            .timeout(Duration::from_secs(DIRECTORY_FETCH_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| ProxyError::DirectoryUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProxyError::DirectoryUnavailable(format!(
                "directory service returned status {}",
                response.status()
            )));
        }

        let body: DirectoryResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::DirectoryMalformed(e.to_string()))?;

        let mut records: Vec<RelayRecord> = body
            .relays
            .into_iter()
            .filter_map(|relay| {
                let address = first_usable_address(&relay.or_addresses)?;
                Some(RelayRecord {
                    id: relay.fingerprint,
                    address,
                    country: relay.country,
                    exit_probability: relay.exit_probability,
                })
            })
            .filter(|record| match (&filter.countries, &record.country) {
                (None, _) => true,
                (Some(allowed), Some(country)) => allowed.contains(country),
                (Some(_), None) => false,
            })
            .collect();

        if records.len() > filter.max_count {
            records.truncate(filter.max_count);
        }

        Ok(records)
    }
}

/// Extract the host part of the first `or_addresses` entry that parses as a
/// `host:port` pair. `or_addresses` entries are of the form `"1.2.3.4:9001"`
/// or `"[::1]:9001"`; we keep the address as-is (minus bracket wrapping for
/// IPv6) since it is only used for diagnostics, not for dialing.
fn first_usable_address(or_addresses: &[String]) -> Option<String> {
    or_addresses.iter().find_map(|addr| {
        let rest = addr.rsplit_once(':')?.0;
        if rest.is_empty() {
            None
        } else {
            Some(rest.trim_start_matches('[').trim_end_matches(']').to_string())
        }
    })
}
