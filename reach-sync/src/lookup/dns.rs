//! MX lookups through the system resolver (`dns` feature)

use super::MxLookup;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;

/// [`MxLookup`] backed by hickory-resolver with the host's resolver config
pub struct SystemMxLookup {
    resolver: TokioAsyncResolver,
}

impl SystemMxLookup {
    pub fn from_system_conf() -> SyncResult<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().map_err(|e| SyncError::Lookup {
            capability: "dns",
            reason: e.to_string(),
        })?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl MxLookup for SystemMxLookup {
    async fn has_mx(&self, domain: &str) -> SyncResult<bool> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => Ok(lookup.iter().next().is_some()),
            Err(e) if matches!(e.kind(), ResolveErrorKind::NoRecordsFound { .. }) => Ok(false),
            Err(e) => Err(SyncError::Lookup {
                capability: "dns",
                reason: e.to_string(),
            }),
        }
    }
}
