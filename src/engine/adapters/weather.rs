// mdsaad Engine — Weather adapters
// Two upstream families normalize into one report shape. All unit handling
// happens here at the adapter edge: consumers never convert.
//
// Normalized units by system:
//   metric    temp °C, wind km/h, visibility km, pressure hPa
//   imperial  temp °F, wind mph,  visibility miles, pressure inHg

use crate::atoms::types::Units;

/// OpenWeatherMap reports wind in m/s under metric settings.
pub(crate) fn ms_to_kmh(ms: f64) -> f64 {
    ms * 3.6
}

pub(crate) fn hpa_to_inhg(hpa: f64) -> f64 {
    hpa * 0.029_53
}

pub(crate) fn meters_to_km(m: f64) -> f64 {
    m / 1000.0
}

pub(crate) fn meters_to_miles(m: f64) -> f64 {
    m / 1609.344
}

/// Round to one decimal, the precision both upstreams quote.
pub(crate) fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

// ── WeatherAPI.com ─────────────────────────────────────────────────────────

pub mod weatherapi {
    use super::*;
    use crate::atoms::error::{FabricError, FabricResult};
    use crate::atoms::types::{
        AirQuality, CurrentConditions, ForecastDay, NormalizedReply, Provider, TemperatureRange,
        WeatherAlert, WeatherLocation, WeatherQuery, WeatherReport, Wind,
    };
    use crate::engine::adapters::parse_json_body;
    use crate::engine::transport::{HttpRequest, Method};
    use serde_json::Value;

    /// Always the forecast endpoint: one call carries current conditions,
    /// astro times, alerts, and any requested forecast days.
    pub fn format_request(provider: &Provider, query: &WeatherQuery) -> FabricResult<HttpRequest> {
        let key = provider.credential.as_deref().unwrap_or_default();
        let days = query.forecast_days.max(1);
        let mut url = format!(
            "{}/forecast.json?key={}&q={}&days={}&aqi={}&alerts={}",
            provider.base_url.trim_end_matches('/'),
            urlencoding::encode(key),
            urlencoding::encode(&query.location.normalized()),
            days,
            if query.include_air_quality { "yes" } else { "no" },
            if query.include_alerts { "yes" } else { "no" },
        );
        if !query.language.is_empty() && query.language != "en" {
            url.push_str(&format!("&lang={}", urlencoding::encode(&query.language)));
        }
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
        query: &WeatherQuery,
        body: &str,
    ) -> FabricResult<NormalizedReply> {
        let v = parse_json_body(provider, body)?;
        let location = &v["location"];
        if location.is_null() {
            return Err(FabricError::provider(&provider.id, "response has no location block"));
        }
        let current = &v["current"];
        let metric = query.units == Units::Metric;

        let day0 = &v["forecast"]["forecastday"][0];
        let astro = &day0["astro"];

        let report = WeatherReport {
            location: WeatherLocation {
                name: location["name"].as_str().unwrap_or_default().to_string(),
                region: location["region"].as_str().unwrap_or_default().to_string(),
                country: location["country"].as_str().unwrap_or_default().to_string(),
                lat: location["lat"].as_f64().unwrap_or(0.0),
                lon: location["lon"].as_f64().unwrap_or(0.0),
            },
            current: CurrentConditions {
                temperature: pick(current, "temp_c", "temp_f", metric),
                feels_like: pick(current, "feelslike_c", "feelslike_f", metric),
                humidity_pct: current["humidity"].as_u64().unwrap_or(0) as u8,
                pressure: pick(current, "pressure_mb", "pressure_in", metric),
                wind: Wind {
                    speed: pick(current, "wind_kph", "wind_mph", metric),
                    direction_deg: current["wind_degree"].as_u64().unwrap_or(0) as u16,
                    gust: optional_pick(current, "gust_kph", "gust_mph", metric),
                },
                condition: current["condition"]["text"].as_str().unwrap_or_default().to_string(),
                condition_code: current["condition"]["code"].as_i64().unwrap_or(0),
                icon: current["condition"]["icon"].as_str().unwrap_or_default().to_string(),
                visibility: pick(current, "vis_km", "vis_miles", metric),
                uv_index: current["uv"].as_f64(),
                clouds_pct: current["cloud"].as_u64().unwrap_or(0) as u8,
                rain_mm: current["precip_mm"].as_f64().unwrap_or(0.0),
                snow_mm: 0.0,
                air_quality: parse_air_quality(&current["air_quality"]),
                sunrise: astro["sunrise"].as_str().unwrap_or_default().to_string(),
                sunset: astro["sunset"].as_str().unwrap_or_default().to_string(),
            },
            forecast: if query.forecast_days > 0 {
                Some(parse_forecast(&v["forecast"]["forecastday"], metric))
            } else {
                None
            },
            alerts: parse_alerts(&v["alerts"]["alert"]),
            units: query.units,
        };
        Ok(NormalizedReply::Weather(report))
    }

    fn pick(v: &Value, metric_key: &str, imperial_key: &str, metric: bool) -> f64 {
        v[if metric { metric_key } else { imperial_key }]
            .as_f64()
            .unwrap_or(0.0)
    }

    fn optional_pick(v: &Value, metric_key: &str, imperial_key: &str, metric: bool) -> Option<f64> {
        v[if metric { metric_key } else { imperial_key }].as_f64()
    }

    fn parse_air_quality(v: &Value) -> Option<AirQuality> {
        if v.is_null() {
            return None;
        }
        Some(AirQuality {
            epa_index: v["us-epa-index"].as_u64().unwrap_or(0) as u8,
            pm2_5: round1(v["pm2_5"].as_f64().unwrap_or(0.0)),
            pm10: round1(v["pm10"].as_f64().unwrap_or(0.0)),
        })
    }

    fn parse_forecast(days: &Value, metric: bool) -> Vec<ForecastDay> {
        let Some(items) = days.as_array() else { return Vec::new() };
        items
            .iter()
            .map(|item| {
                let day = &item["day"];
                // Chance-of-rain arrives as a string in some plans.
                let pop = day["daily_chance_of_rain"]
                    .as_u64()
                    .or_else(|| day["daily_chance_of_rain"].as_str()?.parse().ok())
                    .unwrap_or(0) as u8;
                ForecastDay {
                    date: item["date"].as_str().unwrap_or_default().to_string(),
                    temperature: TemperatureRange {
                        min: pick(day, "mintemp_c", "mintemp_f", metric),
                        max: pick(day, "maxtemp_c", "maxtemp_f", metric),
                    },
                    condition: day["condition"]["text"].as_str().unwrap_or_default().to_string(),
                    condition_code: day["condition"]["code"].as_i64().unwrap_or(0),
                    icon: day["condition"]["icon"].as_str().unwrap_or_default().to_string(),
                    pop_pct: pop,
                    wind: Wind {
                        speed: pick(day, "maxwind_kph", "maxwind_mph", metric),
                        direction_deg: 0,
                        gust: None,
                    },
                }
            })
            .collect()
    }

    fn parse_alerts(v: &Value) -> Vec<WeatherAlert> {
        let Some(items) = v.as_array() else { return Vec::new() };
        items
            .iter()
            .map(|a| WeatherAlert {
                event: a["event"].as_str().unwrap_or_default().to_string(),
                severity: a["severity"].as_str().unwrap_or_default().to_string(),
                expires: a["expires"].as_str().unwrap_or_default().to_string(),
            })
            .collect()
    }
}

// ── OpenWeatherMap ─────────────────────────────────────────────────────────

pub mod openweathermap {
    use super::*;
    use crate::atoms::error::{FabricError, FabricResult};
    use crate::atoms::types::{
        CurrentConditions, ForecastDay, NormalizedReply, Provider, TemperatureRange,
        WeatherLocation, WeatherQuery, WeatherReport, Wind,
    };
    use crate::engine::adapters::parse_json_body;
    use crate::engine::transport::{HttpRequest, Method};
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub fn format_request(provider: &Provider, query: &WeatherQuery) -> FabricResult<HttpRequest> {
        let key = provider.credential.as_deref().unwrap_or_default();
        let endpoint = if query.forecast_days > 0 { "forecast" } else { "weather" };
        let mut url = format!(
            "{}/{}?q={}&units={}&appid={}",
            provider.base_url.trim_end_matches('/'),
            endpoint,
            urlencoding::encode(&query.location.normalized()),
            query.units.as_str(),
            urlencoding::encode(key),
        );
        if !query.language.is_empty() && query.language != "en" {
            url.push_str(&format!("&lang={}", urlencoding::encode(&query.language)));
        }
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
        query: &WeatherQuery,
        body: &str,
    ) -> FabricResult<NormalizedReply> {
        let v = parse_json_body(provider, body)?;
        if query.forecast_days > 0 {
            parse_forecast_reply(provider, query, &v)
        } else {
            parse_current_reply(provider, query, &v)
        }
    }

    fn parse_current_reply(
        provider: &Provider,
        query: &WeatherQuery,
        v: &Value,
    ) -> FabricResult<NormalizedReply> {
        if v["main"].is_null() {
            return Err(FabricError::provider(&provider.id, "response has no main block"));
        }
        let metric = query.units == Units::Metric;
        let tz_offset = v["timezone"].as_i64().unwrap_or(0);

        let weather0 = &v["weather"][0];
        let report = WeatherReport {
            location: WeatherLocation {
                name: v["name"].as_str().unwrap_or_default().to_string(),
                region: String::new(),
                country: v["sys"]["country"].as_str().unwrap_or_default().to_string(),
                lat: v["coord"]["lat"].as_f64().unwrap_or(0.0),
                lon: v["coord"]["lon"].as_f64().unwrap_or(0.0),
            },
            current: CurrentConditions {
                temperature: round1(v["main"]["temp"].as_f64().unwrap_or(0.0)),
                feels_like: round1(v["main"]["feels_like"].as_f64().unwrap_or(0.0)),
                humidity_pct: v["main"]["humidity"].as_u64().unwrap_or(0) as u8,
                pressure: pressure(v["main"]["pressure"].as_f64().unwrap_or(0.0), metric),
                wind: Wind {
                    speed: wind_speed(v["wind"]["speed"].as_f64().unwrap_or(0.0), metric),
                    direction_deg: v["wind"]["deg"].as_u64().unwrap_or(0) as u16,
                    gust: v["wind"]["gust"].as_f64().map(|g| wind_speed(g, metric)),
                },
                condition: weather0["description"].as_str().unwrap_or_default().to_string(),
                condition_code: weather0["id"].as_i64().unwrap_or(0),
                icon: weather0["icon"].as_str().unwrap_or_default().to_string(),
                visibility: visibility(v["visibility"].as_f64().unwrap_or(0.0), metric),
                uv_index: None,
                clouds_pct: v["clouds"]["all"].as_u64().unwrap_or(0) as u8,
                rain_mm: v["rain"]["1h"].as_f64().unwrap_or(0.0),
                snow_mm: v["snow"]["1h"].as_f64().unwrap_or(0.0),
                air_quality: None,
                sunrise: local_hhmm(v["sys"]["sunrise"].as_i64(), tz_offset),
                sunset: local_hhmm(v["sys"]["sunset"].as_i64(), tz_offset),
            },
            forecast: None,
            alerts: Vec::new(),
            units: query.units,
        };
        Ok(NormalizedReply::Weather(report))
    }

    /// The free tier forecasts in 3-hour steps; fold them into days.
    fn parse_forecast_reply(
        provider: &Provider,
        query: &WeatherQuery,
        v: &Value,
    ) -> FabricResult<NormalizedReply> {
        let list = v["list"]
            .as_array()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| FabricError::provider(&provider.id, "forecast has no list"))?;
        let metric = query.units == Units::Metric;
        let city = &v["city"];
        let tz_offset = city["timezone"].as_i64().unwrap_or(0);

        #[derive(Default)]
        struct DayAccumulator {
            min: f64,
            max: f64,
            pop: f64,
            wind: f64,
            wind_deg: u16,
            condition: String,
            condition_code: i64,
            icon: String,
            seen: bool,
        }

        let mut days: BTreeMap<String, DayAccumulator> = BTreeMap::new();
        for slot in list {
            let Some(date) = slot["dt_txt"].as_str().and_then(|t| t.split(' ').next()) else {
                continue;
            };
            let entry = days.entry(date.to_string()).or_default();
            let tmin = slot["main"]["temp_min"].as_f64().unwrap_or(0.0);
            let tmax = slot["main"]["temp_max"].as_f64().unwrap_or(0.0);
            if !entry.seen {
                entry.min = tmin;
                entry.max = tmax;
                entry.seen = true;
            } else {
                entry.min = entry.min.min(tmin);
                entry.max = entry.max.max(tmax);
            }
            entry.pop = entry.pop.max(slot["pop"].as_f64().unwrap_or(0.0));
            let speed = slot["wind"]["speed"].as_f64().unwrap_or(0.0);
            if speed > entry.wind {
                entry.wind = speed;
                entry.wind_deg = slot["wind"]["deg"].as_u64().unwrap_or(0) as u16;
            }
            // Prefer the midday slot for the headline condition.
            let hour = slot["dt_txt"].as_str().and_then(|t| t.get(11..13)).unwrap_or("");
            if hour == "12" || entry.condition.is_empty() {
                let weather0 = &slot["weather"][0];
                entry.condition = weather0["description"].as_str().unwrap_or_default().to_string();
                entry.condition_code = weather0["id"].as_i64().unwrap_or(0);
                entry.icon = weather0["icon"].as_str().unwrap_or_default().to_string();
            }
        }

        let forecast: Vec<ForecastDay> = days
            .into_iter()
            .take(query.forecast_days as usize)
            .map(|(date, acc)| ForecastDay {
                date,
                temperature: TemperatureRange { min: round1(acc.min), max: round1(acc.max) },
                condition: acc.condition,
                condition_code: acc.condition_code,
                icon: acc.icon,
                pop_pct: (acc.pop * 100.0).round() as u8,
                wind: Wind {
                    speed: wind_speed(acc.wind, metric),
                    direction_deg: acc.wind_deg,
                    gust: None,
                },
            })
            .collect();

        // The 3-hour list has no standalone "now"; the first slot stands in.
        let first = &list[0];
        let weather0 = &first["weather"][0];
        let report = WeatherReport {
            location: WeatherLocation {
                name: city["name"].as_str().unwrap_or_default().to_string(),
                region: String::new(),
                country: city["country"].as_str().unwrap_or_default().to_string(),
                lat: city["coord"]["lat"].as_f64().unwrap_or(0.0),
                lon: city["coord"]["lon"].as_f64().unwrap_or(0.0),
            },
            current: CurrentConditions {
                temperature: round1(first["main"]["temp"].as_f64().unwrap_or(0.0)),
                feels_like: round1(first["main"]["feels_like"].as_f64().unwrap_or(0.0)),
                humidity_pct: first["main"]["humidity"].as_u64().unwrap_or(0) as u8,
                pressure: pressure(first["main"]["pressure"].as_f64().unwrap_or(0.0), metric),
                wind: Wind {
                    speed: wind_speed(first["wind"]["speed"].as_f64().unwrap_or(0.0), metric),
                    direction_deg: first["wind"]["deg"].as_u64().unwrap_or(0) as u16,
                    gust: first["wind"]["gust"].as_f64().map(|g| wind_speed(g, metric)),
                },
                condition: weather0["description"].as_str().unwrap_or_default().to_string(),
                condition_code: weather0["id"].as_i64().unwrap_or(0),
                icon: weather0["icon"].as_str().unwrap_or_default().to_string(),
                visibility: visibility(first["visibility"].as_f64().unwrap_or(0.0), metric),
                uv_index: None,
                clouds_pct: first["clouds"]["all"].as_u64().unwrap_or(0) as u8,
                rain_mm: first["rain"]["3h"].as_f64().unwrap_or(0.0),
                snow_mm: first["snow"]["3h"].as_f64().unwrap_or(0.0),
                air_quality: None,
                sunrise: local_hhmm(city["sunrise"].as_i64(), tz_offset),
                sunset: local_hhmm(city["sunset"].as_i64(), tz_offset),
            },
            forecast: Some(forecast),
            alerts: Vec::new(),
            units: query.units,
        };
        Ok(NormalizedReply::Weather(report))
    }

    fn wind_speed(upstream: f64, metric: bool) -> f64 {
        // metric responses quote m/s, imperial already mph
        if metric {
            round1(ms_to_kmh(upstream))
        } else {
            round1(upstream)
        }
    }

    fn pressure(hpa: f64, metric: bool) -> f64 {
        if metric {
            hpa
        } else {
            round1(hpa_to_inhg(hpa) * 100.0) / 100.0
        }
    }

    fn visibility(meters: f64, metric: bool) -> f64 {
        if metric {
            round1(meters_to_km(meters))
        } else {
            round1(meters_to_miles(meters))
        }
    }

    fn local_hhmm(unix: Option<i64>, tz_offset: i64) -> String {
        let Some(unix) = unix else { return String::new() };
        chrono::DateTime::from_timestamp(unix + tz_offset, 0)
            .map(|dt| dt.format("%H:%M").to_string())
            .unwrap_or_default()
    }
}
