// mdsaad Engine — Provider Adapters
// An adapter is a pair of pure functions selected by the provider's
// `adapter_id` tag: format a request for, and parse a response from, one
// upstream family. No adapter holds state and none performs I/O, so each
// is unit-testable without constructing a provider registry.

pub mod exchange;
pub mod google;
pub mod openai;
pub mod weather;

use crate::atoms::error::{FabricError, FabricResult};
use crate::atoms::types::{AdapterId, CallPayload, NormalizedReply, Provider};
use crate::engine::transport::HttpRequest;

/// The endpoint path a call will hit, used as the rate limiter key so two
/// operations against different endpoints of one provider do not share a
/// window.
pub fn endpoint_path(provider: &Provider, payload: &CallPayload) -> &'static str {
    match (provider.adapter_id, payload) {
        (AdapterId::OpenAiChat, _) => "/chat/completions",
        (AdapterId::GoogleChat, _) => "/models:generateContent",
        (AdapterId::WeatherApi, _) => "/forecast.json",
        (AdapterId::OpenWeatherMap, CallPayload::Weather(q)) if q.forecast_days > 0 => "/forecast",
        (AdapterId::OpenWeatherMap, _) => "/weather",
        (AdapterId::ExchangeRate, CallPayload::Exchange(q)) if q.date.is_some() => "/history",
        (AdapterId::ExchangeRate, _) => "/latest",
    }
}

/// Build the outbound request for `payload` against `provider`.
pub fn format_request(provider: &Provider, payload: &CallPayload) -> FabricResult<HttpRequest> {
    match (provider.adapter_id, payload) {
        (AdapterId::OpenAiChat, CallPayload::Chat(chat)) => openai::format_request(provider, chat),
        (AdapterId::GoogleChat, CallPayload::Chat(chat)) => google::format_request(provider, chat),
        (AdapterId::WeatherApi, CallPayload::Weather(query)) => {
            weather::weatherapi::format_request(provider, query)
        }
        (AdapterId::OpenWeatherMap, CallPayload::Weather(query)) => {
            weather::openweathermap::format_request(provider, query)
        }
        (AdapterId::ExchangeRate, CallPayload::Exchange(query)) => {
            exchange::format_request(provider, query)
        }
        (adapter, payload) => Err(FabricError::Other(format!(
            "adapter {:?} cannot serve a {} payload",
            adapter,
            payload_kind(payload)
        ))),
    }
}

fn payload_kind(payload: &CallPayload) -> &'static str {
    match payload {
        CallPayload::Chat(_) => "chat",
        CallPayload::Weather(_) => "weather",
        CallPayload::Exchange(_) => "exchange",
    }
}

/// Parse a 2xx response body into the provider-agnostic reply shape.
pub fn parse_response(
    provider: &Provider,
    payload: &CallPayload,
    body: &str,
) -> FabricResult<NormalizedReply> {
    match (provider.adapter_id, payload) {
        (AdapterId::OpenAiChat, CallPayload::Chat(chat)) => {
            openai::parse_response(provider, chat, body)
        }
        (AdapterId::GoogleChat, CallPayload::Chat(_)) => google::parse_response(provider, body),
        (AdapterId::WeatherApi, CallPayload::Weather(query)) => {
            weather::weatherapi::parse_response(provider, query, body)
        }
        (AdapterId::OpenWeatherMap, CallPayload::Weather(query)) => {
            weather::openweathermap::parse_response(provider, query, body)
        }
        (AdapterId::ExchangeRate, CallPayload::Exchange(query)) => {
            exchange::parse_response(provider, query, body)
        }
        (adapter, _) => Err(FabricError::Other(format!(
            "adapter {:?} cannot parse this payload kind",
            adapter
        ))),
    }
}

/// Shared guard: chat prompts must carry non-whitespace content before any
/// bytes go on the wire.
pub(crate) fn require_prompt(content: &str) -> FabricResult<()> {
    if content.trim().is_empty() {
        return Err(FabricError::Call(crate::atoms::error::CallError::InvalidInput(
            "prompt is empty".into(),
        )));
    }
    Ok(())
}

/// Parse a JSON body, scrubbing it before adapters look inside.
pub(crate) fn parse_json_body(provider: &Provider, body: &str) -> FabricResult<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        FabricError::provider(&provider.id, format!("unparseable response body: {}", e))
    })?;
    Ok(crate::engine::sanitize::sanitize_json(value))
}
