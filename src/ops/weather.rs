// mdsaad Ops — Weather
// Parse the location input, pick the capability (auto-detected locations
// need a geocoding-capable provider), and serve from the weather cache
// namespace when a fresh report exists. TTL: 30 minutes for current
// conditions, 60 for forecasts.

use crate::atoms::constants::{
    NS_WEATHER, WEATHER_CURRENT_TTL_MS, WEATHER_FORECAST_TTL_MS,
};
use crate::atoms::error::{CallError, FabricError, FabricResult};
use crate::atoms::types::{
    CallPayload, Capability, HistoryEntry, LocationQuery, NormalizedReply, OperationKind, Units,
    WeatherQuery, WeatherReport,
};
use crate::engine::transport::CancelToken;
use crate::engine::Core;
use log::debug;

#[derive(Debug, Clone)]
pub struct WeatherRequest {
    /// Empty means "detect my location".
    pub location: String,
    pub forecast: bool,
    pub days: u8,
    pub units: Units,
    pub alerts: bool,
    pub language: String,
}

impl Default for WeatherRequest {
    fn default() -> Self {
        WeatherRequest {
            location: String::new(),
            forecast: false,
            days: 3,
            units: Units::Metric,
            alerts: false,
            language: "en".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherOutcome {
    pub report: WeatherReport,
    pub from_cache: bool,
    pub provider_id: Option<String>,
}

/// `lat,lon` decimal pair, otherwise a place name.
pub fn parse_location(input: &str) -> Option<LocationQuery> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Some((lat_s, lon_s)) = trimmed.split_once(',') {
        if let (Ok(lat), Ok(lon)) = (lat_s.trim().parse::<f64>(), lon_s.trim().parse::<f64>()) {
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
                return Some(LocationQuery::Coords { lat, lon });
            }
        }
    }
    Some(LocationQuery::Name(trimmed.to_string()))
}

pub async fn run(
    core: &Core,
    request: WeatherRequest,
    cancel: &CancelToken,
) -> FabricResult<WeatherOutcome> {
    let (location, capability) = match parse_location(&request.location) {
        Some(location) => {
            let capability = if request.forecast {
                Capability::WeatherForecast
            } else {
                Capability::WeatherCurrent
            };
            (location, capability)
        }
        // Upstream resolves the caller's own location; that takes the
        // geocoding-capable provider.
        None => (LocationQuery::Name("auto:ip".into()), Capability::Geocoding),
    };

    let days = if request.forecast { request.days.clamp(1, 10) } else { 0 };
    let query = WeatherQuery {
        location,
        units: request.units,
        language: request.language.clone(),
        forecast_days: days,
        include_air_quality: true,
        include_alerts: request.alerts,
    };

    // The cache key is scoped to the provider family that would serve the
    // call, so two families never shadow each other's shapes.
    let family = core
        .registry
        .list_by_capability(capability)
        .into_iter()
        .find(|p| p.enabled && p.is_configured())
        .map(|p| p.id)
        .unwrap_or_else(|| "any".into());
    let location_key = query.location.normalized();
    let days_key = if days > 0 { days.to_string() } else { "current".into() };
    let parts = [
        family.as_str(),
        location_key.as_str(),
        request.units.as_str(),
        request.language.as_str(),
        days_key.as_str(),
    ];
    let ttl = if request.forecast { WEATHER_FORECAST_TTL_MS } else { WEATHER_CURRENT_TTL_MS };

    if let Some(hit) = core.cache.get(NS_WEATHER, &parts) {
        if let Ok(report) = serde_json::from_value::<WeatherReport>((*hit.payload).clone()) {
            debug!("[weather] cache hit, age {}ms", hit.age_ms);
            return Ok(WeatherOutcome { report, from_cache: true, provider_id: None });
        }
    }

    let options = super::options_with_cancel(cancel);
    let reply =
        super::proxy_then_direct(core, capability, CallPayload::Weather(query), &options).await?;

    let NormalizedReply::Weather(report) = reply.body else {
        return Err(FabricError::Call(CallError::UpstreamUnavailable {
            reasons: vec![crate::atoms::error::AttemptFailure {
                provider_id: reply.provider_id,
                reason: "reply was not a weather report".into(),
            }],
        }));
    };

    if let Ok(json) = serde_json::to_value(&report) {
        if let Err(e) = core.cache.set(NS_WEATHER, &parts, json, ttl) {
            debug!("[weather] cache store failed: {}", e);
        }
    }

    core.history.append(HistoryEntry {
        timestamp: core.clock.wall_now(),
        operation_kind: OperationKind::Weather,
        prompt_or_query: if request.location.is_empty() {
            "(auto)".into()
        } else {
            request.location.clone()
        },
        reply_or_result: format!(
            "{} {:.1} {}",
            report.location.name, report.current.temperature, report.current.condition
        ),
        provider_id: reply.provider_id.clone(),
        model_id: None,
        truncated_summary: String::new(),
    });

    Ok(WeatherOutcome { report, from_cache: false, provider_id: Some(reply.provider_id) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_parse_with_bounds_check() {
        match parse_location("51.5,-0.12") {
            Some(LocationQuery::Coords { lat, lon }) => {
                assert_eq!(lat, 51.5);
                assert_eq!(lon, -0.12);
            }
            other => panic!("unexpected {:?}", other),
        }
        // Out-of-range coordinates fall back to a name lookup.
        assert!(matches!(parse_location("123.0,456.0"), Some(LocationQuery::Name(_))));
    }

    #[test]
    fn names_and_regions_stay_names() {
        assert!(matches!(parse_location("London"), Some(LocationQuery::Name(_))));
        match parse_location("Springfield, IL") {
            Some(LocationQuery::Name(name)) => assert_eq!(name, "Springfield, IL"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_input_requests_auto_detection() {
        assert!(parse_location("").is_none());
        assert!(parse_location("   ").is_none());
    }
}
