use bodyverse_pricing::config::AppConfig;
use bodyverse_pricing::logging::{init_logging, LogFormat};
use bodyverse_pricing::pricing::{
    catalog::is_supported, normalize_code, supported_currencies, PricingResolver, BASE_CURRENCY,
};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::time::Duration;

/// BodyVerse pricing: localized subscription prices and currency conversion
///
/// Examples:
///   bodyverse quote --currency NGN
///   bodyverse quote                  (uses IP geolocation when IPSTACK_API_KEY is set)
///   bodyverse convert 12.99 USD GBP
///   bodyverse locate
///   bodyverse serve --port 8080
#[derive(Parser)]
#[command(name = "bodyverse", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Outbound HTTP timeout in seconds (overrides PRICING_HTTP_TIMEOUT_SECS).
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Log format: pretty, json or compact (overrides LOG_FORMAT).
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Command {
    /// Show premium plan prices for a currency (or the visitor's own).
    Quote {
        /// ISO 4217 code, e.g. NGN. Defaults to the geolocated currency.
        #[arg(long, short = 'c')]
        currency: Option<String>,
    },
    /// Convert an amount between two currencies at the current rate.
    Convert {
        #[arg(allow_hyphen_values = true, value_parser = parse_amount)]
        amount: f64,
        from: String,
        to: String,
    },
    /// Resolve the visitor's country and currency via IP geolocation.
    Locate,
    /// List supported currencies and their symbols.
    Currencies,
    /// Print the current USD-based exchange rate table.
    Rates {
        /// Drop any cached table and fetch a new one.
        #[arg(long)]
        refresh: bool,
    },
    /// Run the JSON HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },
}

fn main() {
    let cli = Cli::parse();

    // ── Configuration & logging ─────────────────────────────────

    let mut config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    });
    if let Some(secs) = cli.timeout {
        if secs == 0 {
            eprintln!("Error: --timeout must be at least 1 second");
            std::process::exit(1);
        }
        config.http_timeout = Duration::from_secs(secs);
    }
    if let Some(format) = cli.log_format {
        config.log.format = format;
    }
    if let Err(e) = init_logging(&config.log) {
        eprintln!("Error: cannot initialise logging: {}", e);
        std::process::exit(1);
    }

    let resolver = PricingResolver::new(config.ipstack_api_key.clone(), config.http_timeout);

    // ── Dispatch ────────────────────────────────────────────────

    let output = match cli.command {
        Command::Quote { currency } => {
            let requested = currency.as_deref().map(normalize_code).filter(|c| !c.is_empty());
            let (location, quote) = match requested {
                Some(code) => (None, resolver.quote(&code)),
                None => {
                    let (loc, quote) = resolver.quote_for_visitor();
                    (Some(loc), quote)
                }
            };
            if let Some(ref loc) = location {
                eprintln!("  \u{1F4CD} {} \u{2014} {}", loc.country_code, loc.currency_code);
            }
            if !is_supported(&quote.currency) {
                eprintln!(
                    "  Note: {} is not a billing currency; amounts follow the {} rule",
                    quote.currency, quote.rule
                );
            }
            eprintln!("{}", quote.display_lines());
            json!({ "location": location, "quote": quote })
        }
        Command::Convert { amount, from, to } => {
            let (from, to) = (normalize_code(&from), normalize_code(&to));
            let converted = resolver.convert(amount, &from, &to);
            if !converted.is_finite() {
                eprintln!("Error: {} {} is out of range for {}", amount, from, to);
                std::process::exit(1);
            }
            eprintln!(
                "  {} = {}",
                resolver.format_price(amount, &from),
                resolver.format_price(converted, &to)
            );
            json!({
                "amount": amount,
                "from": from,
                "to": to,
                "converted": converted,
                "formatted": resolver.format_price(converted, &to),
            })
        }
        Command::Locate => json!(resolver.resolve_location()),
        Command::Currencies => json!(supported_currencies()),
        Command::Rates { refresh } => {
            if refresh {
                resolver.clear_cache();
            }
            let rates = resolver.get_rates();
            if rates.is_empty() {
                eprintln!("  Warning: exchange rates unavailable");
            }
            json!({ "base": BASE_CURRENCY, "count": rates.len(), "rates": rates.as_map() })
        }
        Command::Serve { host, port } => {
            let host = host.unwrap_or(config.server.host);
            let port = port.unwrap_or(config.server.port);
            run_server(&host, port, resolver);
            return;
        }
    };

    // JSON to stdout
    match serde_json::to_string_pretty(&output) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Parse a finite amount; `inf` and `NaN` are rejected.
fn parse_amount(raw: &str) -> Result<f64, String> {
    match raw.trim().parse::<f64>() {
        Ok(amount) if amount.is_finite() => Ok(amount),
        Ok(_) => Err(format!("'{}' is not a finite amount", raw)),
        Err(e) => Err(format!("'{}' is not a number: {}", raw, e)),
    }
}

fn run_server(host: &str, port: u16, resolver: PricingResolver) {
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Error: cannot start runtime: {}", e);
        std::process::exit(1);
    });
    if let Err(e) = runtime.block_on(bodyverse_pricing::server::start(host, port, resolver)) {
        eprintln!("Error: server on {}:{} failed: {}", host, port, e);
        std::process::exit(1);
    }
}
