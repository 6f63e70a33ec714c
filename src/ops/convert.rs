// mdsaad Ops — Convert
// Three kinds of conversion behind one command:
//   units        pure in-process factor tables through a canonical base
//   temperature  closed-form formulas per scale pair
//   currency     live rates via the dispatcher, cached 30 minutes
// Inputs are classified by table lookup; a currency-to-unit mix is a
// caller error, not a dispatch.

use crate::atoms::constants::{CURRENCY_TTL_MS, NS_CURRENCY};
use crate::atoms::error::{CallError, FabricError, FabricResult};
use crate::atoms::types::{CallPayload, Capability, ExchangeQuery, ExchangeRates, NormalizedReply};
use crate::engine::transport::CancelToken;
use crate::engine::Core;

// ── Classification tables ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitFamily {
    Length,
    Mass,
    Volume,
    Area,
    Speed,
    Time,
    Digital,
}

impl UnitFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitFamily::Length => "length",
            UnitFamily::Mass => "mass",
            UnitFamily::Volume => "volume",
            UnitFamily::Area => "area",
            UnitFamily::Speed => "speed",
            UnitFamily::Time => "time",
            UnitFamily::Digital => "digital",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempScale {
    Celsius,
    Fahrenheit,
    Kelvin,
    Rankine,
}

/// Factor to the family's canonical base unit (meter, kilogram, liter,
/// square meter, meter/second, second, byte).
fn unit_factor(token: &str) -> Option<(UnitFamily, f64)> {
    use UnitFamily::*;
    let factor = match token {
        // length, base meter
        "mm" | "millimeter" | "millimeters" => (Length, 0.001),
        "cm" | "centimeter" | "centimeters" => (Length, 0.01),
        "m" | "meter" | "meters" | "metre" | "metres" => (Length, 1.0),
        "km" | "kilometer" | "kilometers" => (Length, 1000.0),
        "in" | "inch" | "inches" => (Length, 0.0254),
        "ft" | "foot" | "feet" => (Length, 0.3048),
        "yd" | "yard" | "yards" => (Length, 0.9144),
        "mi" | "mile" | "miles" => (Length, 1609.344),
        "nmi" => (Length, 1852.0),
        // mass, base kilogram
        "mg" => (Mass, 1e-6),
        "g" | "gram" | "grams" => (Mass, 1e-3),
        "kg" | "kilogram" | "kilograms" => (Mass, 1.0),
        "t" | "tonne" | "tonnes" => (Mass, 1000.0),
        "oz" | "ounce" | "ounces" => (Mass, 0.028_349_523_125),
        "lb" | "lbs" | "pound" | "pounds" => (Mass, 0.453_592_37),
        "st" | "stone" => (Mass, 6.350_293_18),
        // volume, base liter
        "ml" | "milliliter" | "milliliters" => (Volume, 0.001),
        "l" | "liter" | "liters" | "litre" | "litres" => (Volume, 1.0),
        "m3" => (Volume, 1000.0),
        "tsp" => (Volume, 0.004_928_921_593_75),
        "tbsp" => (Volume, 0.014_786_764_781_25),
        "floz" => (Volume, 0.029_573_529_562_5),
        "cup" | "cups" => (Volume, 0.236_588_236_5),
        "pt" | "pint" | "pints" => (Volume, 0.473_176_473),
        "qt" | "quart" | "quarts" => (Volume, 0.946_352_946),
        "gal" | "gallon" | "gallons" => (Volume, 3.785_411_784),
        // area, base square meter
        "cm2" => (Area, 0.0001),
        "m2" => (Area, 1.0),
        "ha" | "hectare" | "hectares" => (Area, 10_000.0),
        "km2" => (Area, 1e6),
        "ft2" => (Area, 0.092_903_04),
        "ac" | "acre" | "acres" => (Area, 4_046.856_422_4),
        "mi2" => (Area, 2_589_988.110_336),
        // speed, base meter/second
        "mps" => (Speed, 1.0),
        "kmh" | "kph" => (Speed, 1.0 / 3.6),
        "mph" => (Speed, 0.447_04),
        "kn" | "knot" | "knots" => (Speed, 0.514_444_444_444_444_4),
        "fps" => (Speed, 0.3048),
        // time, base second
        "ms" => (Time, 0.001),
        "s" | "sec" | "second" | "seconds" => (Time, 1.0),
        "min" | "minute" | "minutes" => (Time, 60.0),
        "h" | "hr" | "hour" | "hours" => (Time, 3600.0),
        "d" | "day" | "days" => (Time, 86_400.0),
        "wk" | "week" | "weeks" => (Time, 604_800.0),
        // digital storage, base byte
        "bit" | "bits" => (Digital, 0.125),
        "b" | "byte" | "bytes" => (Digital, 1.0),
        "kb" => (Digital, 1024.0),
        "mb" => (Digital, 1_048_576.0),
        "gb" => (Digital, 1_073_741_824.0),
        "tb" => (Digital, 1_099_511_627_776.0),
        _ => return None,
    };
    Some(factor)
}

fn temp_scale(token: &str) -> Option<TempScale> {
    match token {
        "c" | "celsius" | "°c" => Some(TempScale::Celsius),
        "f" | "fahrenheit" | "°f" => Some(TempScale::Fahrenheit),
        "k" | "kelvin" => Some(TempScale::Kelvin),
        "r" | "rankine" => Some(TempScale::Rankine),
        _ => None,
    }
}

const CURRENCY_CODES: [&str; 42] = [
    "USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD", "NZD", "CNY", "HKD", "SGD", "INR", "PKR",
    "BDT", "LKR", "NPR", "AED", "SAR", "QAR", "KWD", "BHD", "OMR", "TRY", "RUB", "UAH", "PLN",
    "CZK", "HUF", "SEK", "NOK", "DKK", "ZAR", "NGN", "EGP", "KES", "BRL", "MXN", "ARS", "CLP",
    "KRW", "THB", "IDR",
];

fn is_currency(token: &str) -> bool {
    let upper = token.to_uppercase();
    CURRENCY_CODES.contains(&upper.as_str())
}

// ── Request / outcome ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub amount: f64,
    pub from: String,
    pub to: String,
    /// "YYYY-MM-DD" for historical currency rates.
    pub historical: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversionDetail {
    Unit { family: UnitFamily },
    Temperature,
    Currency { rate: f64, date: String, from_cache: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionOutcome {
    pub amount: f64,
    pub from: String,
    pub to: String,
    pub result: f64,
    pub detail: ConversionDetail,
}

// ── Temperature ────────────────────────────────────────────────────────────

/// Closed-form per scale pair so round trips are exact on representable
/// values.
pub fn convert_temperature(value: f64, from: TempScale, to: TempScale) -> f64 {
    use TempScale::*;
    match (from, to) {
        (a, b) if a == b => value,
        (Celsius, Fahrenheit) => value * 9.0 / 5.0 + 32.0,
        (Fahrenheit, Celsius) => (value - 32.0) * 5.0 / 9.0,
        (Celsius, Kelvin) => value + 273.15,
        (Kelvin, Celsius) => value - 273.15,
        (Celsius, Rankine) => (value + 273.15) * 9.0 / 5.0,
        (Rankine, Celsius) => value * 5.0 / 9.0 - 273.15,
        (Fahrenheit, Kelvin) => (value + 459.67) * 5.0 / 9.0,
        (Kelvin, Fahrenheit) => value * 9.0 / 5.0 - 459.67,
        (Fahrenheit, Rankine) => value + 459.67,
        (Rankine, Fahrenheit) => value - 459.67,
        (Kelvin, Rankine) => value * 9.0 / 5.0,
        (Rankine, Kelvin) => value * 5.0 / 9.0,
        _ => unreachable!("all scale pairs are enumerated"),
    }
}

// ── Entry point ────────────────────────────────────────────────────────────

pub async fn run(
    core: &Core,
    request: ConversionRequest,
    cancel: &CancelToken,
) -> FabricResult<ConversionOutcome> {
    if !request.amount.is_finite() {
        return Err(CallError::InvalidInput("amount is not a finite number".into()).into());
    }
    let from_token = request.from.trim().to_lowercase();
    let to_token = request.to.trim().to_lowercase();

    if let (Some(from_scale), Some(to_scale)) = (temp_scale(&from_token), temp_scale(&to_token)) {
        let result = convert_temperature(request.amount, from_scale, to_scale);
        return Ok(ConversionOutcome {
            amount: request.amount,
            from: request.from,
            to: request.to,
            result,
            detail: ConversionDetail::Temperature,
        });
    }

    if let (Some((from_family, from_factor)), Some((to_family, to_factor))) =
        (unit_factor(&from_token), unit_factor(&to_token))
    {
        if from_family != to_family {
            return Err(CallError::InvalidInput(format!(
                "cannot convert {} ({}) to {} ({})",
                request.from,
                from_family.as_str(),
                request.to,
                to_family.as_str()
            ))
            .into());
        }
        let result = request.amount * from_factor / to_factor;
        return Ok(ConversionOutcome {
            amount: request.amount,
            from: request.from,
            to: request.to,
            result,
            detail: ConversionDetail::Unit { family: from_family },
        });
    }

    if is_currency(&from_token) && is_currency(&to_token) {
        return convert_currency(core, request, cancel).await;
    }

    Err(CallError::InvalidInput(format!(
        "unrecognized units '{}' and '{}'",
        request.from, request.to
    ))
    .into())
}

async fn convert_currency(
    core: &Core,
    request: ConversionRequest,
    cancel: &CancelToken,
) -> FabricResult<ConversionOutcome> {
    let base = request.from.to_uppercase();
    let target = request.to.to_uppercase();
    let (rates, from_cache) =
        fetch_rates(core, &base, Some(&target), request.historical.as_deref(), cancel).await?;

    let rate = *rates.rates.get(&target).ok_or_else(|| {
        FabricError::Call(CallError::InvalidInput(format!(
            "no rate published for {}",
            target
        )))
    })?;

    Ok(ConversionOutcome {
        amount: request.amount,
        from: base,
        to: target,
        result: request.amount * rate,
        detail: ConversionDetail::Currency { rate, date: rates.date.clone(), from_cache },
    })
}

/// Rates for `base`, read through the currency cache namespace. The target
/// participates in the key so a pair lookup and a full-table dump never
/// alias.
pub async fn fetch_rates(
    core: &Core,
    base: &str,
    target: Option<&str>,
    historical: Option<&str>,
    cancel: &CancelToken,
) -> FabricResult<(ExchangeRates, bool)> {
    let date_key = historical.unwrap_or("latest").to_string();
    let target_key = target.unwrap_or("*").to_string();
    let parts = [base, target_key.as_str(), date_key.as_str()];

    let options = super::options_with_cancel(cancel);
    let query = ExchangeQuery {
        base: base.to_string(),
        target: target.unwrap_or_default().to_string(),
        date: historical.map(String::from),
    };

    let (payload, from_cache) = core
        .cache
        .through(NS_CURRENCY, &parts, CURRENCY_TTL_MS, || async {
            let reply = super::proxy_then_direct(
                core,
                Capability::ExchangeRate,
                CallPayload::Exchange(query),
                &options,
            )
            .await?;
            let NormalizedReply::Exchange(rates) = reply.body else {
                return Err(FabricError::provider(
                    reply.provider_id,
                    "reply was not a rates table",
                ));
            };
            Ok(serde_json::to_value(&rates)?)
        })
        .await?;

    let rates: ExchangeRates = serde_json::from_value((*payload).clone())?;
    Ok((rates, from_cache))
}
