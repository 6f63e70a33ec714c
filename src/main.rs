// mdsaad — CLI entry point
// Argument routing only: each subcommand builds a request, hands it to the
// matching op, and renders the outcome. Exit codes follow the fabric's
// error taxonomy (0 ok, 1 operation error, 2 bad arguments, 3 no/failed
// providers, 4 rate limited, 130 cancelled).

use clap::{Parser, Subcommand};
use log::debug;
use mdsaad::atoms::constants::{ENV_DEBUG, ENV_NO_COLOR, ENV_SKIP_NETWORK_CHECK};
use mdsaad::atoms::error::{CallError, FabricError};
use mdsaad::atoms::types::{NormalizedReply, Units, WeatherReport};
use mdsaad::engine::transport::{CancelToken, ReqwestTransport};
use mdsaad::engine::Core;
use mdsaad::ops::chat::{ChatRequest, ContextMode};
use mdsaad::ops::convert::{ConversionDetail, ConversionRequest};
use mdsaad::ops::weather::WeatherRequest;
use mdsaad::{config, ops};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mdsaad", version, about = "AI chat, weather, and conversions from one terminal")]
struct Cli {
    /// Print per-provider detail on failures.
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask an AI model a question.
    Chat {
        /// The prompt (all trailing words).
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        temperature: Option<f64>,
        #[arg(long = "max-tokens")]
        max_tokens: Option<u32>,
        /// Print the reply chunk by chunk as it arrived.
        #[arg(long)]
        stream: bool,
        /// System prompt prepended to the conversation.
        #[arg(long)]
        system: Option<String>,
        /// How much history to send: none, recent, or all.
        #[arg(long, default_value = "recent")]
        context: String,
    },
    /// Current conditions or a forecast.
    Weather {
        /// City, "city, region", or "lat,lon". Empty auto-detects.
        location: Vec<String>,
        #[arg(long)]
        forecast: bool,
        #[arg(long, default_value_t = 3)]
        days: u8,
        /// metric or imperial.
        #[arg(long, default_value = "metric")]
        units: String,
        #[arg(long)]
        alerts: bool,
        #[arg(long, default_value = "en")]
        lang: String,
    },
    /// Convert units, temperatures, or currency.
    Convert {
        amount: Option<f64>,
        from: Option<String>,
        to: Option<String>,
        /// Historical rate date, YYYY-MM-DD.
        #[arg(long)]
        historical: Option<String>,
        /// Dump the full rates table for the base currency.
        #[arg(long)]
        rates: bool,
        /// File with one "<amount> <from> <to>" per line.
        #[arg(long)]
        batch: Option<PathBuf>,
    },
    /// List providers and their health.
    Providers,
    /// List chat model aliases per provider.
    Models,
    /// Show this session's history.
    History,
    /// Clear the session history.
    Clear,
    /// Show rate-limit occupancy and cache usage.
    Quota,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let core = Core::new(config::settings_from_environment(), Arc::new(ReqwestTransport::new()));
    let _sweeper = core.start_background_tasks();
    spawn_update_probe();

    match dispatch(&core, cli.command, &cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e, cli.verbose);
            ExitCode::from(e.exit_code().clamp(0, 255) as u8)
        }
    }
}

fn init_logging() {
    let default_level =
        if std::env::var(ENV_DEBUG).is_ok() { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp(None)
        .init();
}

/// Best-effort new-release probe; silent on every failure.
fn spawn_update_probe() {
    if std::env::var(ENV_SKIP_NETWORK_CHECK).is_ok() {
        return;
    }
    tokio::spawn(async {
        let client = match reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(2))
            .build()
        {
            Ok(client) => client,
            Err(_) => return,
        };
        let url = "https://api.github.com/repos/mdsaad31/mdsaad-cli/releases/latest";
        if let Ok(resp) = client.head(url).send().await {
            debug!("[update] probe status {}", resp.status());
        }
    });
}

async fn dispatch(core: &Core, command: Command, cancel: &CancelToken) -> Result<(), FabricError> {
    match command {
        Command::Chat {
            prompt,
            model,
            provider,
            temperature,
            max_tokens,
            stream,
            system,
            context,
        } => {
            let context: ContextMode = context
                .parse()
                .map_err(|e: String| FabricError::Call(CallError::InvalidInput(e)))?;
            let request = ChatRequest {
                prompt: prompt.join(" "),
                model,
                provider,
                temperature,
                max_tokens,
                top_p: None,
                stream,
                system,
                context,
            };
            let reply = ops::chat::run(core, request, cancel).await?;
            render_chat(&reply.body, stream);
            Ok(())
        }
        Command::Weather { location, forecast, days, units, alerts, lang } => {
            let units: Units = units
                .parse()
                .map_err(|e: String| FabricError::Call(CallError::InvalidInput(e)))?;
            let request = WeatherRequest {
                location: location.join(" "),
                forecast,
                days,
                units,
                alerts,
                language: lang,
            };
            let outcome = ops::weather::run(core, request, cancel).await?;
            render_weather(&outcome.report, outcome.from_cache);
            Ok(())
        }
        Command::Convert { amount, from, to, historical, rates, batch } => {
            if let Some(path) = batch {
                return run_batch(core, &path, historical.as_deref(), cancel).await;
            }
            if rates {
                let base = from.unwrap_or_else(|| "USD".into());
                let (table, from_cache) = ops::convert::fetch_rates(
                    core,
                    &base.to_uppercase(),
                    None,
                    historical.as_deref(),
                    cancel,
                )
                .await?;
                render_rates(&table, from_cache);
                return Ok(());
            }
            let (Some(amount), Some(from), Some(to)) = (amount, from, to) else {
                return Err(CallError::InvalidInput(
                    "convert needs <amount> <from> <to>".into(),
                )
                .into());
            };
            let request = ConversionRequest { amount, from, to, historical };
            let outcome = ops::convert::run(core, request, cancel).await?;
            render_conversion(&outcome);
            if let ConversionDetail::Currency { .. } = &outcome.detail {
                remember_favorite(&outcome.from, &outcome.to);
            }
            Ok(())
        }
        Command::Providers => {
            for (provider, circuit) in core.provider_overview() {
                let status = if !provider.is_configured() {
                    "unconfigured".to_string()
                } else if !provider.enabled {
                    "disabled".to_string()
                } else {
                    circuit.state.as_str().to_string()
                };
                println!(
                    "{:<16} priority={} {:<12} [{}]",
                    provider.id,
                    provider.priority,
                    status,
                    provider
                        .supports
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
            Ok(())
        }
        Command::Models => {
            for provider in core.registry.list_all() {
                if provider.model_aliases.is_empty() {
                    continue;
                }
                println!("{}:", provider.id);
                for (alias, wire) in &provider.model_aliases {
                    let marker = if provider.default_alias.as_deref() == Some(alias) {
                        " (default)"
                    } else {
                        ""
                    };
                    println!("  {:<12} -> {}{}", alias, wire, marker);
                }
            }
            Ok(())
        }
        Command::History => {
            let entries = core.history.all();
            if entries.is_empty() {
                println!("history is empty");
                return Ok(());
            }
            for entry in entries {
                println!(
                    "[{}] {} {} -> {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.operation_kind,
                    entry.prompt_or_query,
                    entry.truncated_summary,
                );
            }
            Ok(())
        }
        Command::Clear => {
            core.history.clear();
            println!("history cleared");
            Ok(())
        }
        Command::Quota => {
            for window in core.rate_limiter.snapshot() {
                println!(
                    "{:<16} {:<20} window={} last_second={} blocked_for={}ms",
                    window.provider_id,
                    window.endpoint,
                    window.window_count,
                    window.last_second_count,
                    window.blocked_for_ms,
                );
            }
            let stats = core.cache.stats();
            println!("cache: {} entries, {} bytes", stats.total_entries, stats.total_bytes);
            for ns in stats.per_namespace {
                println!("  {:<24} {} entries, {} bytes", ns.namespace, ns.entries, ns.bytes);
            }
            Ok(())
        }
    }
}

async fn run_batch(
    core: &Core,
    path: &PathBuf,
    historical: Option<&str>,
    cancel: &CancelToken,
) -> Result<(), FabricError> {
    let body = std::fs::read_to_string(path)?;
    for (number, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [amount, from, to] = fields.as_slice() else {
            return Err(CallError::InvalidInput(format!(
                "line {}: expected '<amount> <from> <to>'",
                number + 1
            ))
            .into());
        };
        let amount: f64 = amount.parse().map_err(|_| {
            FabricError::Call(CallError::InvalidInput(format!(
                "line {}: '{}' is not a number",
                number + 1,
                amount
            )))
        })?;
        let request = ConversionRequest {
            amount,
            from: from.to_string(),
            to: to.to_string(),
            historical: historical.map(String::from),
        };
        let outcome = ops::convert::run(core, request, cancel).await?;
        render_conversion(&outcome);
    }
    Ok(())
}

fn remember_favorite(base: &str, target: &str) {
    let mut user_config = config::load_user_config();
    if config::record_favorite(&mut user_config, base, target) {
        if let Err(e) = config::save_user_config(&user_config) {
            debug!("[config] could not persist favorites: {}", e);
        }
    }
}

// ── Rendering ──────────────────────────────────────────────────────────────

fn color_enabled() -> bool {
    std::env::var(ENV_NO_COLOR).is_err()
}

fn red(text: &str) -> String {
    if color_enabled() {
        format!("\x1b[31m{}\x1b[0m", text)
    } else {
        text.to_string()
    }
}

fn report_error(error: &FabricError, verbose: bool) {
    eprintln!("{}", red(&format!("error: {}", error)));
    if let FabricError::Call(call_error) = error {
        eprintln!("  {}", call_error.hint());
        if verbose {
            if let CallError::UpstreamUnavailable { reasons } = call_error {
                eprintln!("  providers tried:");
                for failure in reasons {
                    eprintln!("    {:<16} {}", failure.provider_id, failure.reason);
                }
            }
        }
    }
}

fn render_chat(body: &NormalizedReply, stream: bool) {
    let NormalizedReply::Chat { content, model, usage, chunks, .. } = body else {
        return;
    };
    if stream {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        for chunk in chunks {
            let _ = write!(stdout, "{}", chunk);
            let _ = stdout.flush();
        }
        println!();
    } else {
        println!("{}", content);
    }
    debug!("[chat] model={} tokens={}", model, usage.total_tokens);
}

fn render_weather(report: &WeatherReport, from_cache: bool) {
    let (temp_unit, speed_unit) = match report.units {
        Units::Metric => ("°C", "km/h"),
        Units::Imperial => ("°F", "mph"),
    };
    let place = if report.location.region.is_empty() {
        format!("{}, {}", report.location.name, report.location.country)
    } else {
        format!(
            "{}, {}, {}",
            report.location.name, report.location.region, report.location.country
        )
    };
    println!("{}{}", place, if from_cache { " (cached)" } else { "" });
    println!(
        "  {}{} (feels like {}{}), {}",
        report.current.temperature,
        temp_unit,
        report.current.feels_like,
        temp_unit,
        report.current.condition,
    );
    println!(
        "  humidity {}%  wind {} {} @ {}°  clouds {}%",
        report.current.humidity_pct,
        report.current.wind.speed,
        speed_unit,
        report.current.wind.direction_deg,
        report.current.clouds_pct,
    );
    if !report.current.sunrise.is_empty() {
        println!("  sunrise {}  sunset {}", report.current.sunrise, report.current.sunset);
    }
    if let Some(aq) = &report.current.air_quality {
        println!("  air quality: EPA index {} (pm2.5 {})", aq.epa_index, aq.pm2_5);
    }
    if let Some(forecast) = &report.forecast {
        for day in forecast {
            println!(
                "  {}  {}{} / {}{}  {}  rain {}%",
                day.date,
                day.temperature.min,
                temp_unit,
                day.temperature.max,
                temp_unit,
                day.condition,
                day.pop_pct,
            );
        }
    }
    for alert in &report.alerts {
        println!("  {} [{}] until {}", red(&alert.event), alert.severity, alert.expires);
    }
}

fn render_conversion(outcome: &mdsaad::ops::convert::ConversionOutcome) {
    match &outcome.detail {
        ConversionDetail::Currency { rate, date, from_cache } => {
            println!(
                "{} {} = {:.4} {}  (rate {:.6}, {}{})",
                outcome.amount,
                outcome.from,
                outcome.result,
                outcome.to,
                rate,
                date,
                if *from_cache { ", cached" } else { "" },
            );
        }
        ConversionDetail::Temperature => {
            println!(
                "{} {} = {:.2} {}",
                outcome.amount, outcome.from, outcome.result, outcome.to
            );
        }
        ConversionDetail::Unit { family } => {
            println!(
                "{} {} = {:.6} {}  ({})",
                outcome.amount,
                outcome.from,
                outcome.result,
                outcome.to,
                family.as_str(),
            );
        }
    }
}

fn render_rates(table: &mdsaad::atoms::types::ExchangeRates, from_cache: bool) {
    println!(
        "rates for {} on {}{}",
        table.base,
        table.date,
        if from_cache { " (cached)" } else { "" }
    );
    for (code, rate) in &table.rates {
        println!("  {:<4} {:.6}", code, rate);
    }
}
