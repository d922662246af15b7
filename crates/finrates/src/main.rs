use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use finrates::models::cache_schema::CacheType;
use finrates::rates::{Conversion, RefreshDaemon};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "finrates",
    about = "Currency conversion and derived-data cache tools for a personal finance backend"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/finrates.toml")]
    config: String,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert an amount between two currencies
    Convert {
        amount: Decimal,
        from: String,
        to: String,
        /// Rate date (YYYY-MM-DD), today when omitted
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Look up the rate for a currency pair
    Rate {
        from: String,
        to: String,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Store a rate by hand
    SetRate {
        from: String,
        to: String,
        rate: Decimal,
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Re-fetch every supported pair from the provider
    Refresh {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Refresh rates periodically until interrupted
    Daemon,
    /// List supported currencies
    Currencies,
    /// Drop one user's cached derived data
    Invalidate {
        /// User whose entries are dropped
        #[arg(long)]
        user: i64,
        /// Only drop this type
        #[arg(long, value_parser = parse_cache_type)]
        r#type: Option<CacheType>,
    },
    /// Clear the whole cache store
    FlushCache,
}

fn parse_cache_type(s: &str) -> Result<CacheType, String> {
    CacheType::parse(s).ok_or_else(|| {
        let known: Vec<&str> = CacheType::ALL.iter().map(|t| t.as_str()).collect();
        format!("unknown cache type '{s}', expected one of: {}", known.join(", "))
    })
}

#[derive(Serialize)]
struct ConvertOutput<'a> {
    #[serde(flatten)]
    conversion: &'a Conversion,
    formatted: String,
}

#[derive(Serialize)]
struct InvalidateOutput {
    user: i64,
    removed: usize,
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (respects RUST_LOG env var)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = finrates::load_config(&cli.config)?;
    let stores = finrates::build_cache_store(&config.cache)?;

    match cli.command {
        Command::Convert {
            amount,
            from,
            to,
            date,
        } => {
            let service = finrates::build_currency_service(&config, &stores)?;
            let conversion = service
                .convert_detailed(amount, &from, &to, date)
                .await
                .context("Conversion failed")?;
            if let Some(reason) = fallback_reason(&conversion) {
                tracing::warn!(%reason, "Converted at fallback rate 1:1");
            }
            let formatted = service.format(conversion.converted, &conversion.to)?;
            print_json(
                &ConvertOutput {
                    conversion: &conversion,
                    formatted,
                },
                cli.pretty,
            )?;
        }
        Command::Rate { from, to, date } => {
            let service = finrates::build_currency_service(&config, &stores)?;
            let outcome = service
                .get_rate(&from, &to, date)
                .await
                .context("Rate lookup failed")?;
            print_json(&outcome, cli.pretty)?;
        }
        Command::SetRate {
            from,
            to,
            rate,
            date,
        } => {
            let service = finrates::build_currency_service(&config, &stores)?;
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            service
                .set_rate(&from, &to, date, rate)
                .await
                .context("Failed to store rate")?;
            print_json(&service.get_rate(&from, &to, Some(date)).await?, cli.pretty)?;
        }
        Command::Refresh { date } => {
            let service = finrates::build_currency_service(&config, &stores)?;
            let report = service.update_all_rates(date).await;
            print_json(&report, cli.pretty)?;
        }
        Command::Daemon => {
            let service = Arc::new(finrates::build_currency_service(&config, &stores)?);
            let mut daemon = RefreshDaemon::new(service, config.refresh.clone());
            if let Some(sqlite) = &stores.sqlite {
                daemon = daemon.with_cleanup(sqlite.clone());
            }
            let cancel = daemon.cancel_token();

            // Handle shutdown signals
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Received shutdown signal");
                cancel.cancel();
            });

            daemon
                .run()
                .await
                .map_err(|e| anyhow::anyhow!("Daemon error: {e}"))?;
        }
        Command::Currencies => {
            let service = finrates::build_currency_service(&config, &stores)?;
            print_json(&service.currencies(), cli.pretty)?;
        }
        Command::Invalidate { user, r#type } => {
            let cache = finrates::build_derived_cache(&config, &stores)?;
            let removed = match r#type {
                Some(cache_type) => cache.forget_user_type(cache_type, user).await?,
                None => cache.forget_user(user).await?,
            };
            print_json(&InvalidateOutput { user, removed }, cli.pretty)?;
        }
        Command::FlushCache => {
            let cache = finrates::build_derived_cache(&config, &stores)?;
            cache.flush().await.context("Failed to flush cache")?;
            eprintln!("Flushed {} cache", stores.store.name());
        }
    }

    Ok(())
}

fn fallback_reason(conversion: &Conversion) -> Option<&str> {
    match &conversion.outcome {
        finrates::models::RateOutcome::Fallback { reason, .. } => Some(reason),
        finrates::models::RateOutcome::Resolved { .. } => None,
    }
}
