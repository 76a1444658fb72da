//! Coarse IP geolocation collaborator.
//!
//! Unavailability is a normal condition: `locate` answers `None` for
//! "unknown" and never errors into the caller's control flow.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::IpAddr;

/// Resolves a client IP to a coarse region such as a country code.
#[async_trait]
pub trait Geolocator: Send + Sync {
    /// `None` means the region is unknown; callers must tolerate it.
    async fn locate(&self, ip: IpAddr) -> Option<String>;
}

/// Geolocator that knows nothing; every lookup is unknown.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopGeolocator;

#[async_trait]
impl Geolocator for NoopGeolocator {
    async fn locate(&self, _ip: IpAddr) -> Option<String> {
        None
    }
}

/// Fixed IP-to-region table; useful in tests and closed deployments.
#[derive(Clone, Debug, Default)]
pub struct StaticGeolocator {
    regions: HashMap<IpAddr, String>,
}

impl StaticGeolocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_region(mut self, ip: IpAddr, region: impl Into<String>) -> Self {
        self.regions.insert(ip, region.into());
        self
    }
}

#[async_trait]
impl Geolocator for StaticGeolocator {
    async fn locate(&self, ip: IpAddr) -> Option<String> {
        self.regions.get(&ip).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_geolocator_is_always_unknown() {
        let geo = NoopGeolocator;
        assert_eq!(geo.locate("1.2.3.4".parse().unwrap()).await, None);
    }

    #[tokio::test]
    async fn static_geolocator_resolves_known_ips() {
        let geo = StaticGeolocator::new()
            .with_region("1.2.3.4".parse().unwrap(), "ES")
            .with_region("2001:db8::1".parse().unwrap(), "DE");

        assert_eq!(
            geo.locate("1.2.3.4".parse().unwrap()).await.as_deref(),
            Some("ES")
        );
        assert_eq!(
            geo.locate("2001:db8::1".parse().unwrap()).await.as_deref(),
            Some("DE")
        );
        assert_eq!(geo.locate("9.9.9.9".parse().unwrap()).await, None);
    }
}
