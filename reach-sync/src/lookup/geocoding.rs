//! Geocoding port, HTTP client and result cache
//!
//! The cache is an explicit object shared by the location validator and the
//! location enrichment routine. It only saves lookups; dropping it never
//! changes a score.

use super::with_timeout;
use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
const USER_AGENT: &str = concat!("reach-sync/", env!("CARGO_PKG_VERSION"));

/// How precisely a geocoding hit pins down the address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodePrecision {
    /// Rooftop-level match
    Exact,
    /// Interpolated between two precise points
    Interpolated,
    /// Geometric center of a street, region or polygon
    AreaCenter,
    Approximate,
}

impl GeocodePrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodePrecision::Exact => "exact",
            GeocodePrecision::Interpolated => "interpolated",
            GeocodePrecision::AreaCenter => "area_center",
            GeocodePrecision::Approximate => "approximate",
        }
    }

    /// Map a Google-style `location_type`
    pub fn from_location_type(location_type: &str) -> Self {
        match location_type {
            "ROOFTOP" => GeocodePrecision::Exact,
            "RANGE_INTERPOLATED" => GeocodePrecision::Interpolated,
            "GEOMETRIC_CENTER" => GeocodePrecision::AreaCenter,
            _ => GeocodePrecision::Approximate,
        }
    }
}

/// One resolved address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeHit {
    pub formatted_address: String,
    pub lat: f64,
    pub lng: f64,
    pub precision: GeocodePrecision,
}

/// Address → coordinates capability
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` when the provider has no result for the address
    async fn geocode(&self, address: &str) -> SyncResult<Option<GeocodeHit>>;
}

// ============================================================================
// Cache
// ============================================================================

/// Bounds for [`GeocodeCache`]
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    pub max_entries: usize,
    /// Entries older than this are ignored and replaced; `None` keeps them forever
    pub ttl: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            max_entries: 1024,
            ttl: Some(Duration::from_secs(86_400)),
        }
    }
}

struct CacheEntry {
    hit: Option<GeocodeHit>,
    stored_at: Instant,
}

/// Least-recently-used geocoding result cache keyed by normalized address
///
/// `max_entries == 0` disables caching.
pub struct GeocodeCache {
    ttl: Option<Duration>,
    entries: Option<Mutex<LruCache<String, CacheEntry>>>,
}

impl GeocodeCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            ttl: policy.ttl,
            entries: NonZeroUsize::new(policy.max_entries).map(|cap| Mutex::new(LruCache::new(cap))),
        }
    }

    /// Trim, lowercase and collapse internal whitespace
    pub fn normalize_key(address: &str) -> String {
        address
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// `Some(result)` on a fresh hit (the result itself may be "no match")
    pub fn get(&self, address: &str) -> Option<Option<GeocodeHit>> {
        let key = Self::normalize_key(address);
        let mut entries = self.entries.as_ref()?.lock().ok()?;

        let expired = match entries.get(&key) {
            Some(entry) => self.ttl.is_some_and(|ttl| entry.stored_at.elapsed() > ttl),
            None => return None,
        };
        if expired {
            entries.pop(&key);
            return None;
        }
        entries.get(&key).map(|entry| entry.hit.clone())
    }

    /// Store a result; a full cache evicts its least recently used entry
    pub fn insert(&self, address: &str, hit: Option<GeocodeHit>) {
        let Some(entries) = &self.entries else {
            return;
        };
        let Ok(mut entries) = entries.lock() else {
            return;
        };
        entries.put(
            Self::normalize_key(address),
            CacheEntry {
                hit,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok().map(|e| e.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Some(Ok(mut entries)) = self.entries.as_ref().map(|e| e.lock()) {
            entries.clear();
        }
    }
}

// ============================================================================
// Service (geocoder + cache + deadline)
// ============================================================================

/// Geocoder wrapped with the shared cache and the lookup deadline
pub struct GeocodingService {
    geocoder: Arc<dyn Geocoder>,
    cache: Arc<GeocodeCache>,
    timeout: Duration,
}

impl GeocodingService {
    pub fn new(geocoder: Arc<dyn Geocoder>, cache: Arc<GeocodeCache>, timeout: Duration) -> Self {
        Self {
            geocoder,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &GeocodeCache {
        &self.cache
    }

    /// Cached lookup; errors and timeouts are returned uncached
    pub async fn lookup(&self, address: &str) -> SyncResult<Option<GeocodeHit>> {
        if let Some(cached) = self.cache.get(address) {
            tracing::debug!(address = %address, "Geocode cache hit");
            return Ok(cached);
        }

        let hit = with_timeout("geocoding", self.timeout, self.geocoder.geocode(address)).await?;
        self.cache.insert(address, hit.clone());
        Ok(hit)
    }
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    formatted_address: String,
    geometry: GoogleGeometry,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLatLng,
    location_type: String,
}

#[derive(Debug, Deserialize)]
struct GoogleLatLng {
    lat: f64,
    lng: f64,
}

/// Geocoder backed by a Google-compatible geocoding HTTP API
pub struct HttpGeocoder {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpGeocoder {
    pub fn new(api_key: impl Into<String>, endpoint: Option<String>) -> SyncResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| SyncError::Lookup {
                capability: "geocoding",
                reason: e.to_string(),
            })?;

        Ok(Self {
            http_client,
            endpoint: endpoint.unwrap_or_else(|| GOOGLE_GEOCODE_URL.to_string()),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn geocode(&self, address: &str) -> SyncResult<Option<GeocodeHit>> {
        let lookup_err = |reason: String| SyncError::Lookup {
            capability: "geocoding",
            reason,
        };

        tracing::debug!(address = %address, "Querying geocoding API");

        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("address", address), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| lookup_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(lookup_err(format!("HTTP {}", status.as_u16())));
        }

        let body: GoogleResponse = response
            .json()
            .await
            .map_err(|e| lookup_err(format!("parse error: {}", e)))?;

        match body.status.as_str() {
            "OK" => Ok(body.results.into_iter().next().map(|r| GeocodeHit {
                formatted_address: r.formatted_address,
                lat: r.geometry.location.lat,
                lng: r.geometry.location.lng,
                precision: GeocodePrecision::from_location_type(&r.geometry.location_type),
            })),
            "ZERO_RESULTS" => Ok(None),
            other => Err(lookup_err(format!(
                "{}{}",
                other,
                body.error_message
                    .map(|m| format!(": {}", m))
                    .unwrap_or_default()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn hit(name: &str) -> GeocodeHit {
        GeocodeHit {
            formatted_address: name.to_string(),
            lat: 1.0,
            lng: 2.0,
            precision: GeocodePrecision::Exact,
        }
    }

    struct CountingGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for CountingGeocoder {
        async fn geocode(&self, address: &str) -> SyncResult<Option<GeocodeHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(hit(address)))
        }
    }

    #[test]
    fn test_cache_key_normalization() {
        assert_eq!(
            GeocodeCache::normalize_key("  Berlin,   Germany "),
            "berlin, germany"
        );
    }

    #[test]
    fn test_cache_evicts_oldest_when_full() {
        let cache = GeocodeCache::new(CachePolicy {
            max_entries: 2,
            ttl: None,
        });
        cache.insert("a", Some(hit("a")));
        cache.insert("b", None);
        cache.insert("c", Some(hit("c")));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(None));
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_cache_keeps_recently_read_entries() {
        let cache = GeocodeCache::new(CachePolicy {
            max_entries: 2,
            ttl: None,
        });
        cache.insert("a", Some(hit("a")));
        cache.insert("b", Some(hit("b")));
        assert!(cache.get("a").is_some());
        cache.insert("c", Some(hit("c")));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = GeocodeCache::new(CachePolicy {
            max_entries: 0,
            ttl: None,
        });
        cache.insert("a", Some(hit("a")));
        assert!(cache.is_empty());
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn test_cache_expired_entries_are_misses() {
        let cache = GeocodeCache::new(CachePolicy {
            max_entries: 4,
            ttl: Some(Duration::ZERO),
        });
        cache.insert("paris", Some(hit("paris")));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("paris").is_none());
        // Expired entries are dropped on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_location_type_mapping() {
        assert_eq!(GeocodePrecision::from_location_type("ROOFTOP"), GeocodePrecision::Exact);
        assert_eq!(
            GeocodePrecision::from_location_type("GEOMETRIC_CENTER"),
            GeocodePrecision::AreaCenter
        );
        assert_eq!(
            GeocodePrecision::from_location_type("SOMETHING_NEW"),
            GeocodePrecision::Approximate
        );
    }

    #[tokio::test]
    async fn test_service_serves_repeat_lookups_from_cache() {
        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
        });
        let service = GeocodingService::new(
            geocoder.clone(),
            Arc::new(GeocodeCache::new(CachePolicy::default())),
            Duration::from_secs(1),
        );

        service.lookup("Lisbon, Portugal").await.unwrap();
        service.lookup("lisbon,  portugal").await.unwrap();

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }
}
