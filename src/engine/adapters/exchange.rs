// mdsaad Engine — Exchange-rate adapter
// Keyless public rates API. Latest rates at /latest/<BASE>, historical at
// /history/<BASE>/<YYYY>/<MM>/<DD>, both returning the same shape.

use crate::atoms::error::{FabricError, FabricResult};
use crate::atoms::types::{ExchangeQuery, ExchangeRates, NormalizedReply, Provider};
use crate::engine::transport::{HttpRequest, Method};
use std::collections::BTreeMap;

use super::parse_json_body;

pub fn format_request(provider: &Provider, query: &ExchangeQuery) -> FabricResult<HttpRequest> {
    let base = query.base.trim().to_uppercase();
    if base.len() != 3 || !base.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(FabricError::Call(crate::atoms::error::CallError::InvalidInput(format!(
            "'{}' is not an ISO 4217 currency code",
            query.base
        ))));
    }

    let root = provider.base_url.trim_end_matches('/');
    let url = match &query.date {
        Some(date) => {
            let parsed = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
                FabricError::Call(crate::atoms::error::CallError::InvalidInput(format!(
                    "'{}' is not a YYYY-MM-DD date",
                    date
                )))
            })?;
            format!("{}/history/{}/{}", root, base, parsed.format("%Y/%m/%d"))
        }
        None => format!("{}/latest/{}", root, base),
    };

    Ok(HttpRequest {
        method: Method::Get,
        url,
        headers: Vec::new(),
        body: None,
        timeout_ms: provider.timeout_ms,
    })
}

pub fn parse_response(
    provider: &Provider,
    query: &ExchangeQuery,
    body: &str,
) -> FabricResult<NormalizedReply> {
    let v = parse_json_body(provider, body)?;
    if v["result"].as_str() == Some("error") {
        let kind = v["error-type"].as_str().unwrap_or("unknown");
        return Err(FabricError::provider(&provider.id, format!("rates error: {}", kind)));
    }

    let rates_obj = v["rates"]
        .as_object()
        .or_else(|| v["conversion_rates"].as_object())
        .ok_or_else(|| FabricError::provider(&provider.id, "response has no rates table"))?;

    let mut rates = BTreeMap::new();
    for (code, value) in rates_obj {
        if let Some(rate) = value.as_f64() {
            rates.insert(code.to_uppercase(), rate);
        }
    }
    if rates.is_empty() {
        return Err(FabricError::provider(&provider.id, "rates table is empty"));
    }

    let base = v["base_code"]
        .as_str()
        .unwrap_or(&query.base)
        .to_uppercase();
    let date = query
        .date
        .clone()
        .or_else(|| {
            v["time_last_update_utc"]
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "latest".to_string());

    Ok(NormalizedReply::Exchange(ExchangeRates { base, date, rates }))
}
