//! Capability ports for external lookups
//!
//! Validators and the enricher depend on these traits only, so every network
//! capability can be replaced by a mock in tests. Every call goes through
//! [`with_timeout`]; a timeout is reported like any other lookup failure and
//! callers treat it as a missing signal.

#[cfg(feature = "dns")]
pub mod dns;
pub mod geocoding;

pub use geocoding::{
    CachePolicy, GeocodeCache, GeocodeHit, GeocodePrecision, Geocoder, GeocodingService,
    HttpGeocoder,
};

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// DNS MX record presence check
#[async_trait]
pub trait MxLookup: Send + Sync {
    /// `Ok(false)` when the domain resolves but has no MX record
    async fn has_mx(&self, domain: &str) -> SyncResult<bool>;
}

/// Disposable (throwaway) email domain list
pub trait DisposableDomains: Send + Sync {
    fn is_disposable(&self, domain: &str) -> bool;
}

/// Built-in disposable domain list
///
/// Subdomains of a listed domain are disposable too.
#[derive(Debug, Clone)]
pub struct StaticDisposableDomains {
    domains: Vec<String>,
}

const BUILTIN_DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "dispostable.com",
    "emailondeck.com",
    "fakeinbox.com",
    "getnada.com",
    "guerrillamail.com",
    "mailinator.com",
    "maildrop.cc",
    "mintemail.com",
    "sharklasers.com",
    "temp-mail.org",
    "tempmail.com",
    "tempmail.org",
    "throwawaymail.com",
    "trashmail.com",
    "yopmail.com",
];

impl StaticDisposableDomains {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.into().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_DISPOSABLE_DOMAINS.iter().copied())
    }
}

impl Default for StaticDisposableDomains {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DisposableDomains for StaticDisposableDomains {
    fn is_disposable(&self, domain: &str) -> bool {
        let domain = domain.trim().to_ascii_lowercase();
        self.domains.iter().any(|listed| {
            domain == *listed
                || (domain.ends_with(listed.as_str())
                    && domain[..domain.len() - listed.len()].ends_with('.'))
        })
    }
}

/// Run one external lookup under a deadline
pub async fn with_timeout<T, F>(capability: &'static str, timeout: Duration, lookup: F) -> SyncResult<T>
where
    F: Future<Output = SyncResult<T>>,
{
    match tokio::time::timeout(timeout, lookup).await {
        Ok(result) => result,
        Err(_) => Err(SyncError::Timeout {
            capability,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposable_matches_domain_and_subdomains() {
        let list = StaticDisposableDomains::builtin();
        assert!(list.is_disposable("mailinator.com"));
        assert!(list.is_disposable("Eu.Mailinator.com"));
        assert!(!list.is_disposable("notmailinator.com"));
        assert!(!list.is_disposable("gmail.com"));
    }

    #[tokio::test]
    async fn test_with_timeout_reports_timeout() {
        let result: SyncResult<bool> = with_timeout("dns", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(true)
        })
        .await;

        assert!(matches!(result, Err(SyncError::Timeout { capability: "dns", .. })));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_result_through() {
        let result = with_timeout("dns", Duration::from_secs(1), async { Ok(false) }).await;
        assert!(!result.unwrap());
    }
}
