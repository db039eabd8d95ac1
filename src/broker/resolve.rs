//! Broker alias resolution.
//!
//! The configured broker name is a DNS alias that may point at several
//! hosts; the set changes when operators fail brokers in or out. The
//! resolver returns the current host list so the pool can converge on it.

use async_trait::async_trait;

use super::{BrokerError, Result};

/// Resolves a broker alias to the hosts currently behind it.
#[async_trait]
pub trait AliasResolver: Send + Sync {
    /// Returns the hosts behind `alias`, sorted and deduplicated.
    async fn resolve(&self, alias: &str) -> Result<Vec<String>>;
}

/// System DNS resolution via the runtime's `lookup_host`.
pub struct DnsResolver;

#[async_trait]
impl AliasResolver for DnsResolver {
    async fn resolve(&self, alias: &str) -> Result<Vec<String>> {
        // Port 0 here is only to satisfy the lookup API; endpoints carry the
        // configured port separately.
        let addrs = tokio::net::lookup_host((alias, 0))
            .await
            .map_err(|source| BrokerError::Resolve {
                alias: alias.to_string(),
                source,
            })?;

        let mut hosts: Vec<String> = addrs.map(|addr| addr.ip().to_string()).collect();
        // A records for several brokers can repeat across address families;
        // duplicates would skew the round-robin.
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }
}
