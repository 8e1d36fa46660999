//! Location validator
//!
//! Textual signals come first. Only when those already put the score at 0.6 or
//! above is the (cached) geocoder consulted, and its precision tier adds a
//! final bonus.

use super::{is_title_case_word, FieldValidator, ValidationDetails, ValidationResult};
use crate::lookup::{GeocodeHit, GeocodePrecision, GeocodingService};
use crate::types::FieldName;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const BASE_SCORE: f64 = 0.3;
const GEOCODE_GATE: f64 = 0.6;

pub const PLACE_KEYWORDS: &[&str] = &[
    "street", "st.", "avenue", "ave", "road", "city", "county", "state", "province", "region",
    "district", "village", "town", "borough", "metro", "area",
];

pub const KNOWN_PLACES: &[&str] = &[
    "amsterdam", "austin", "bangalore", "beijing", "berlin", "boston", "chicago", "dubai",
    "hong kong", "istanbul", "lisbon", "london", "los angeles", "madrid", "mexico city",
    "moscow", "mumbai", "new york", "paris", "rome", "san francisco", "sao paulo", "seattle",
    "seoul", "shanghai", "singapore", "stockholm", "sydney", "tokyo", "toronto", "vienna",
    "australia", "brazil", "canada", "china", "france", "germany", "india", "italy", "japan",
    "mexico", "netherlands", "portugal", "spain", "sweden", "united kingdom", "uk", "usa",
    "united states",
];

pub fn geocode_bonus(precision: GeocodePrecision) -> f64 {
    match precision {
        GeocodePrecision::Exact => 0.3,
        GeocodePrecision::Interpolated => 0.2,
        GeocodePrecision::AreaCenter => 0.15,
        GeocodePrecision::Approximate => 0.1,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationDetails {
    pub has_comma: bool,
    pub title_case: bool,
    pub has_digits: bool,
    pub place_keyword: bool,
    pub known_place: bool,
    /// Score before any geocoding bonus
    pub text_score: f64,
    pub geocode_attempted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocode: Option<GeocodeHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geocode_error: Option<String>,
}

/// Words (split on whitespace and commas) that are all Title-Case
fn is_title_case_location(location: &str) -> bool {
    let mut words = location
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .peekable();
    words.peek().is_some() && words.all(is_title_case_word)
}

fn contains_term(lowered: &str, term: &str) -> bool {
    lowered
        .split(|c: char| !c.is_alphanumeric() && c != '.')
        .any(|w| w == term)
        || (term.contains(' ') && lowered.contains(term))
}

pub struct LocationValidator {
    geocoding: Option<Arc<GeocodingService>>,
}

impl LocationValidator {
    pub fn new(geocoding: Option<Arc<GeocodingService>>) -> Self {
        Self { geocoding }
    }
}

#[async_trait]
impl FieldValidator for LocationValidator {
    fn field(&self) -> FieldName {
        FieldName::Location
    }

    fn method(&self) -> &'static str {
        "location_validation"
    }

    async fn validate(&self, raw: &str) -> ValidationResult {
        let location = raw.trim();
        if location.chars().count() < 3 {
            return ValidationResult::rejected(None);
        }

        let lowered = location.to_lowercase();
        let mut score = BASE_SCORE;

        let has_comma = location.contains(',');
        if has_comma {
            score += 0.1;
        }

        let title_case = is_title_case_location(location);
        if title_case {
            score += 0.1;
        }

        let has_digits = location.chars().any(|c| c.is_ascii_digit());
        if !has_digits {
            score += 0.05;
        }

        let place_keyword = PLACE_KEYWORDS.iter().any(|k| contains_term(&lowered, k));
        if place_keyword {
            score += 0.05;
        }

        let known_place = KNOWN_PLACES.iter().any(|p| contains_term(&lowered, p));
        if known_place {
            score += 0.1;
        }

        let text_score = score;
        let mut details = LocationDetails {
            has_comma,
            title_case,
            has_digits,
            place_keyword,
            known_place,
            text_score,
            geocode_attempted: false,
            geocode: None,
            geocode_error: None,
        };

        if let Some(geocoding) = self.geocoding.as_ref().filter(|_| score >= GEOCODE_GATE) {
            details.geocode_attempted = true;
            match geocoding.lookup(location).await {
                Ok(Some(hit)) => {
                    score += geocode_bonus(hit.precision);
                    details.geocode = Some(hit);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(location = %location, error = %e, "Geocoding failed, skipping signal");
                    details.geocode_error = Some(e.to_string());
                }
            }
        }

        ValidationResult::scored(score, Some(ValidationDetails::Location(details)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{SyncError, SyncResult};
    use crate::lookup::{CachePolicy, GeocodeCache, Geocoder};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedGeocoder {
        precision: Option<GeocodePrecision>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, address: &str) -> SyncResult<Option<GeocodeHit>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.precision {
                Some(precision) => Ok(Some(GeocodeHit {
                    formatted_address: address.to_string(),
                    lat: 37.77,
                    lng: -122.42,
                    precision,
                })),
                None => Err(SyncError::Lookup {
                    capability: "geocoding",
                    reason: "OVER_QUERY_LIMIT".to_string(),
                }),
            }
        }
    }

    fn service(geocoder: Arc<FixedGeocoder>) -> Arc<GeocodingService> {
        Arc::new(GeocodingService::new(
            geocoder,
            Arc::new(GeocodeCache::new(CachePolicy::default())),
            Duration::from_secs(1),
        ))
    }

    fn geocoder(precision: Option<GeocodePrecision>) -> Arc<FixedGeocoder> {
        Arc::new(FixedGeocoder {
            precision,
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_text_signals_without_geocoder() {
        let result = LocationValidator::new(None).validate("San Francisco, CA").await;
        // 0.3 + comma + title case + no digits + known city
        assert!((result.score - 0.65).abs() < 1e-9);
        assert!(result.is_valid);
    }

    #[tokio::test]
    async fn test_too_short_is_rejected() {
        assert_eq!(LocationValidator::new(None).validate("NY").await.score, 0.0);
    }

    #[tokio::test]
    async fn test_geocode_bonus_by_precision() {
        let exact = LocationValidator::new(Some(service(geocoder(Some(GeocodePrecision::Exact)))))
            .validate("San Francisco, CA")
            .await;
        assert!((exact.score - 0.95).abs() < 1e-9);

        let approx = LocationValidator::new(Some(service(geocoder(Some(
            GeocodePrecision::Approximate,
        )))))
        .validate("San Francisco, CA")
        .await;
        assert!((approx.score - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_low_text_score_skips_geocoder() {
        let g = geocoder(Some(GeocodePrecision::Exact));
        let result = LocationValidator::new(Some(service(g.clone())))
            .validate("somewhere 42")
            .await;
        assert_eq!(g.calls.load(Ordering::SeqCst), 0);
        assert!(result.score < GEOCODE_GATE);
    }

    #[tokio::test]
    async fn test_geocode_failure_is_not_penalized() {
        let result = LocationValidator::new(Some(service(geocoder(None))))
            .validate("San Francisco, CA")
            .await;
        assert!((result.score - 0.65).abs() < 1e-9);
        match result.details {
            Some(ValidationDetails::Location(d)) => {
                assert!(d.geocode_attempted);
                assert!(d.geocode_error.is_some());
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_repeat_lookups_hit_cache() {
        let g = geocoder(Some(GeocodePrecision::AreaCenter));
        let validator = LocationValidator::new(Some(service(g.clone())));
        validator.validate("Berlin, Germany").await;
        validator.validate("  Berlin,   Germany ").await;
        assert_eq!(g.calls.load(Ordering::SeqCst), 1);
    }
}
