//! Options Autotrader - Main Entry Point
//!
//! Operator commands for the execution and compliance layer.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use options_autotrader::broker::{BrokerGateway, TradierClient};
use options_autotrader::clock::{Clock, SystemClock};
use options_autotrader::config::{Config, GatewayConfig};
use options_autotrader::execution::{
    CoordinatorSettings, ExecutionCoordinator, ExecutionOutcome, ExecutionRequest, Signal,
    TradingSignal,
};
use options_autotrader::instrument::{InstrumentId, OccCodec, OptionType, SymbolCodec};
use options_autotrader::journal::TradeJournal;
use options_autotrader::ledger::{LedgerConfig, PositionLedger};
use options_autotrader::market_hours::RegularSessionHours;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Options Autotrader CLI
#[derive(Parser)]
#[command(name = "options-autotrader")]
#[command(version, about = "Options order execution with pattern-day-trader compliance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show day-trade allowance and open positions
    Status {
        /// Show entry times and cost basis
        #[arg(short, long)]
        verbose: bool,
    },

    /// Clear every recorded day trade
    ResetDayTrades,

    /// Build an option symbol
    Encode {
        /// Underlying ticker
        underlying: String,

        /// Expiration date (YYYY-MM-DD)
        expiration: NaiveDate,

        /// call or put
        option_type: OptionType,

        /// Strike price
        strike: Decimal,
    },

    /// Split an option symbol into its parts
    Decode {
        symbol: String,
    },

    /// Run one signal through the coordinator
    Trade {
        /// BUY_CALL, BUY_PUT, SELL or HOLD
        signal: Signal,

        /// Underlying ticker
        underlying: String,

        /// Signal confidence between 0 and 1
        #[arg(short, long, default_value = "0.75")]
        confidence: Decimal,

        /// Option symbol to trade (required for buys)
        #[arg(long)]
        contract: Option<String>,

        /// Contracts to trade; sized automatically when omitted
        #[arg(short, long)]
        quantity: Option<u32>,

        /// Limit price; market order when omitted
        #[arg(short, long)]
        limit: Option<Decimal>,

        /// Ignore the market-hours gate
        #[arg(long)]
        pre_market: bool,
    },

    /// Show journaled executions
    History {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Show one trading day instead (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Encode {
            underlying,
            expiration,
            option_type,
            strike,
        } => {
            let id = InstrumentId::new(underlying, expiration, option_type, strike)?;
            println!("{}", OccCodec.encode(&id)?);
            Ok(())
        }
        Commands::Decode { symbol } => {
            let id = OccCodec.decode(&symbol)?;
            println!("Underlying:  {}", id.underlying);
            println!("Expiration:  {}", id.expiration);
            println!("Type:        {}", id.option_type);
            println!("Strike:      {}", id.strike);
            Ok(())
        }
        Commands::Status { verbose } => {
            let config = load_config()?;
            show_status(&config, verbose)
        }
        Commands::ResetDayTrades => {
            let config = load_config()?;
            let ledger = open_ledger(&config, Arc::new(SystemClock))?;
            let status = ledger.reset_day_trades();
            println!(
                "Day trades reset: {}/{} used, {} remaining",
                status.day_trade_count, status.max_day_trades, status.remaining
            );
            Ok(())
        }
        Commands::Trade {
            signal,
            underlying,
            confidence,
            contract,
            quantity,
            limit,
            pre_market,
        } => {
            let config = load_config()?;
            let mut request =
                ExecutionRequest::new(TradingSignal::new(signal, underlying, confidence), contract);
            request.quantity = quantity;
            request.limit_price = limit;
            request.pre_market_eligible = pre_market;
            run_trade(&config, request).await
        }
        Commands::History { limit, date } => {
            let config = load_config()?;
            show_history(&config, limit, date)
        }
    }
}

/// Initialize logging to stdout and an hourly rolling file.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "options-autotrader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the whole process
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("options_autotrader=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn load_config() -> Result<Config> {
    let config = Config::load()?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn open_ledger(config: &Config, clock: Arc<dyn Clock>) -> Result<Arc<PositionLedger>> {
    let ledger_config = LedgerConfig {
        max_day_trades: config.compliance.max_day_trades,
        window_days: config.compliance.window_days,
        trading_tz: config.trading_tz()?,
    };
    Ok(Arc::new(PositionLedger::open(
        &config.compliance.ledger_path,
        ledger_config,
        Arc::new(OccCodec),
        clock,
    )))
}

/// Log configuration on startup.
fn log_config(config: &Config, gateway: &GatewayConfig) {
    info!("Configuration:");
    info!("   Endpoint:          {} ({})", gateway.endpoint(), gateway.base_url());
    info!("   Sandbox Fallback:  {}", gateway.allows_simulation());
    info!(
        "   Retries:           {} attempts, base delay {:?}, deadline {:?}",
        gateway.max_retries(),
        gateway.base_delay(),
        gateway.overall_deadline()
    );
    info!(
        "   Day Trades:        {} per {} days below ${}",
        config.compliance.max_day_trades,
        config.compliance.window_days,
        config.compliance.pdt_equity_threshold
    );
    info!("   Min Confidence:    {}", config.execution.min_confidence);
}

async fn run_trade(config: &Config, request: ExecutionRequest) -> Result<()> {
    let gateway_config =
        GatewayConfig::from_config(config).context("Invalid gateway configuration")?;
    log_config(config, &gateway_config);

    if gateway_config.endpoint().is_production() {
        warn!("LIVE TRADING - orders go to the production endpoint");
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec: Arc<dyn SymbolCodec> = Arc::new(OccCodec);

    let client = TradierClient::new(&gateway_config)?;
    let gateway = BrokerGateway::new(
        Arc::new(client),
        gateway_config,
        codec.clone(),
        clock.clone(),
    );

    // Ctrl-C aborts any retry sequence in flight
    let cancel = gateway.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        warn!("Shutdown signal received, cancelling broker calls");
        cancel.cancel();
    });

    let ledger = open_ledger(config, clock.clone())?;
    let journal = Arc::new(
        TradeJournal::open(&config.execution.journal_path).context("Failed to open trade journal")?,
    );

    let coordinator = ExecutionCoordinator::new(
        ledger,
        Arc::new(gateway),
        Arc::new(RegularSessionHours::new(config.trading_tz()?)),
        codec,
        clock,
        CoordinatorSettings::from_config(config),
    )
    .with_journal(journal);

    match coordinator.execute(&request).await {
        ExecutionOutcome::Executed(report) => {
            println!("Executed {} {}", report.order.symbol, report.order.status.as_str());
            println!("   ├─ Order ID:       {}", report.order.order_id);
            println!("   ├─ Quantity:       {}", report.order.filled_quantity);
            if let Some(price) = report.order.fill_price {
                println!("   ├─ Fill Price:     ${:.2}", price);
            }
            println!("   ├─ Time in Force:  {}", report.time_in_force.as_str());
            if report.order.simulated {
                println!("   ├─ SIMULATED sandbox fill");
            }
            if let Some(sub) = &report.substitution {
                println!("   ├─ Substituted:    {} for {}", sub.substituted, sub.requested);
            }
            println!("   ├─ Day Trade:      {}", report.day_trade);
            println!(
                "   └─ Day Trades:     {}/{} used",
                report.pdt.day_trade_count, report.pdt.max_day_trades
            );
        }
        ExecutionOutcome::Rejected { reason } => println!("Rejected: {reason}"),
        ExecutionOutcome::Skipped { reason } => println!("Skipped: {reason}"),
    }

    Ok(())
}

fn show_status(config: &Config, verbose: bool) -> Result<()> {
    let ledger = open_ledger(config, Arc::new(SystemClock))?;
    let status = ledger.status();

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              OPTIONS AUTOTRADER STATUS                     ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    println!("\nPattern Day Trader");
    println!(
        "   ├─ Day Trades:     {}/{} in {} days",
        status.day_trade_count, status.max_day_trades, status.window_days
    );
    println!("   ├─ Remaining:      {}", status.remaining);
    println!(
        "   └─ Can Day Trade:  {}",
        if status.can_day_trade { "yes" } else { "no" }
    );

    for trade in &status.recent {
        println!(
            "      • {} closed {} (clears in {} days)",
            trade.symbol, trade.exit_date, trade.days_to_clear
        );
    }

    let positions = ledger.open_positions();
    println!("\nOpen Positions: {}", positions.len());
    for position in &positions {
        println!("   ┌─ {} x{}", position.symbol, position.contracts);
        if verbose {
            println!(
                "   ├─ Entered:     {}",
                position.entry_time.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("   ├─ Cost Basis:  ${:.2}", position.cost_basis);
        }
        match &position.instrument {
            Some(id) => println!(
                "   └─ {} {} {} @ {}",
                id.underlying, id.expiration, id.option_type, id.strike
            ),
            None => println!("   └─ (unparsed symbol)"),
        }
    }

    Ok(())
}

fn show_history(config: &Config, limit: usize, date: Option<NaiveDate>) -> Result<()> {
    let journal = TradeJournal::open(&config.execution.journal_path)
        .context("Failed to open trade journal")?;
    let entries = match date {
        Some(day) => journal.entries_on(day, config.trading_tz()?)?,
        None => journal.recent(limit)?,
    };

    if entries.is_empty() {
        println!("No journaled executions.");
        return Ok(());
    }

    for entry in entries {
        let price = entry
            .fill_price
            .map(|p| format!(" @ ${p:.2}"))
            .unwrap_or_default();
        println!(
            "{}  {:<8} {:<5} {:<8} {} x{}{}{}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.signal,
            entry.underlying,
            entry.outcome,
            entry.contract.as_deref().unwrap_or("-"),
            entry.quantity,
            price,
            if entry.simulated { " [simulated]" } else { "" },
            entry
                .reason
                .map(|r| format!(" ({r})"))
                .unwrap_or_default(),
        );
    }

    Ok(())
}
