//! Command-line interface for the Skyhook fleet gateway.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use skyhook_core::{env_vars, topics, GatewayConfig, GatewayEvent, SessionState};
use skyhook_gateway::Gateway;
use skyhook_storage::TelemetryStore;

/// Skyhook - MQTT gateway for drone fleet telemetry and commands.
#[derive(Parser, Debug)]
#[command(name = "skyhook")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Path to a JSON config file. Falls back to SKYHOOK_* environment
    /// variables when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory for telemetry storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Connect to the broker and stream telemetry until interrupted.
    Serve {
        /// Topic pattern to subscribe for telemetry.
        #[arg(long, default_value_t = topics::osd_wildcard())]
        telemetry_pattern: String,
        /// Gateway serial to address commands to.
        #[arg(long)]
        gateway_sn: Option<String>,
        /// Aircraft serial.
        #[arg(long)]
        aircraft_sn: Option<String>,
    },
    /// Send one command to the bridge and print the reply.
    Send {
        /// Command method name.
        method: String,
        /// JSON payload for the command.
        #[arg(short, long)]
        data: Option<String>,
        /// Gateway serial to address the command to.
        #[arg(long)]
        gateway_sn: Option<String>,
        /// Aircraft serial.
        #[arg(long)]
        aircraft_sn: Option<String>,
    },
    /// Query stored telemetry for one device.
    Query {
        /// Device serial.
        serial: String,
        /// Start of the time range (ms since epoch).
        #[arg(long, default_value_t = 0)]
        from: i64,
        /// End of the time range (ms since epoch).
        #[arg(long, default_value_t = i64::MAX)]
        to: i64,
        /// Print only the most recent sample.
        #[arg(long)]
        latest: bool,
    },
    /// List device serials with stored telemetry.
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\n=== PANIC ===");
        if let Some(location) = panic_info.location() {
            eprintln!(
                "Location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!("Message: {}", panic_info);
        eprintln!("=============\n");
    }));

    let args = Args::parse();
    init_logging(args.verbose);

    let data_dir = resolve_data_dir(args.data_dir);

    match args.command {
        Command::Serve {
            telemetry_pattern,
            gateway_sn,
            aircraft_sn,
        } => {
            let config = apply_identity(load_config(args.config)?, gateway_sn, aircraft_sn);
            run_serve(config, data_dir, telemetry_pattern).await
        }
        Command::Send {
            method,
            data,
            gateway_sn,
            aircraft_sn,
        } => {
            let config = apply_identity(load_config(args.config)?, gateway_sn, aircraft_sn);
            run_send(config, &method, data).await
        }
        Command::Query {
            serial,
            from,
            to,
            latest,
        } => run_query(data_dir, &serial, from, to, latest).await,
        Command::Devices => run_devices(data_dir).await,
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_directive = if verbose { "skyhook=debug" } else { "skyhook=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Config file when given, environment variables otherwise.
fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig> {
    let config = match path {
        Some(path) => GatewayConfig::from_file(&path)?,
        None => GatewayConfig::from_env()?,
    };
    Ok(config)
}

/// Fold command-line serials into the configured identity.
fn apply_identity(
    mut config: GatewayConfig,
    gateway_sn: Option<String>,
    aircraft_sn: Option<String>,
) -> GatewayConfig {
    if gateway_sn.is_none() && aircraft_sn.is_none() {
        return config;
    }
    let mut identity = config.identity.take().unwrap_or_default();
    if let Some(sn) = gateway_sn {
        identity.gateway_serial = Some(sn);
    }
    if let Some(sn) = aircraft_sn {
        identity.aircraft_serial = Some(sn);
    }
    config.identity = Some(identity);
    config
}

fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    flag.or_else(|| std::env::var(env_vars::DATA_DIR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("skyhook-data"))
}

fn open_store(data_dir: &PathBuf) -> Result<std::sync::Arc<TelemetryStore>> {
    std::fs::create_dir_all(data_dir)?;
    let store = TelemetryStore::open(data_dir.join("telemetry.redb"))?;
    Ok(store)
}

/// Run the gateway until Ctrl-C, printing events as they arrive.
async fn run_serve(
    config: GatewayConfig,
    data_dir: PathBuf,
    telemetry_pattern: String,
) -> Result<()> {
    let store = open_store(&data_dir)?;
    let gateway = Gateway::new(config, store);

    let mut status = gateway.status_stream();
    let mut events = gateway.events();
    gateway.start_session().await?;
    println!("Connecting to {} ...", gateway.config().broker.broker_addr());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            state = status.recv() => match state {
                Some(SessionState::Connected) => {
                    // Idempotent, so repeating after a reconnect is fine.
                    if let Err(e) = gateway.subscribe_telemetry(&telemetry_pattern).await {
                        eprintln!("telemetry subscription failed: {}", e);
                    }
                }
                Some(SessionState::Failed) => {
                    gateway.stop_session().await;
                    anyhow::bail!("broker connection failed permanently");
                }
                Some(_) => {}
                None => break,
            },
            event = events.recv() => match event {
                Some((event, _meta)) => print_event(&event),
                None => break,
            },
        }
    }

    gateway.stop_session().await;
    let stats = gateway.stats().await;
    println!(
        "Session closed: {} frames received, {} published, {} reconnects",
        stats.frames_received, stats.frames_published, stats.reconnect_count
    );
    Ok(())
}

fn print_event(event: &GatewayEvent) {
    match event {
        GatewayEvent::SessionStatus { state, .. } => {
            println!("session: {}", state);
        }
        GatewayEvent::Telemetry { serial, sample, .. } => {
            if sample.has_position() {
                println!(
                    "[{}] pos=({:.6}, {:.6}) alt={:.1}m ts={}",
                    serial,
                    sample.latitude.unwrap_or_default(),
                    sample.longitude.unwrap_or_default(),
                    sample.altitude.unwrap_or_default(),
                    sample.timestamp
                );
            } else {
                println!("[{}] telemetry ts={}", serial, sample.timestamp);
            }
        }
        GatewayEvent::PropertyReport { serial, values, .. } => {
            println!("[{}] properties: {}", serial, values);
        }
        GatewayEvent::TopologyChanged {
            gateway_serial,
            device_serials,
            ..
        } => {
            println!(
                "topology: gateway={} devices={:?}",
                gateway_serial.as_deref().unwrap_or("?"),
                device_serials
            );
        }
        GatewayEvent::StorageFailure { serial, error, .. } => {
            eprintln!("[{}] telemetry persist failed: {}", serial, error);
        }
    }
}

/// Connect, send one command, print the reply and tear down.
async fn run_send(config: GatewayConfig, method: &str, data: Option<String>) -> Result<()> {
    let data = match data {
        Some(raw) => serde_json::from_str(&raw)?,
        None => serde_json::json!({}),
    };

    // One-shot runs keep no telemetry.
    let store = TelemetryStore::memory()?;
    let gateway = Gateway::new(config, store);

    let mut status = gateway.status_stream();
    gateway.start_session().await?;
    if status.wait_for(SessionState::Connected).await.is_none() {
        gateway.stop_session().await;
        anyhow::bail!("could not connect to the broker");
    }

    let result = gateway.send_command(method, data).await;
    gateway.stop_session().await;

    let reply = result?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

async fn run_query(
    data_dir: PathBuf,
    serial: &str,
    from: i64,
    to: i64,
    latest: bool,
) -> Result<()> {
    let store = open_store(&data_dir)?;

    if latest {
        match store.latest(serial).await? {
            Some(sample) => println!("{}", serde_json::to_string_pretty(&sample)?),
            None => println!("no telemetry recorded for {}", serial),
        }
        return Ok(());
    }

    let samples = store.range(serial, from, to).await?;
    if samples.is_empty() {
        println!("no telemetry recorded for {}", serial);
        return Ok(());
    }
    for sample in &samples {
        println!("{}", serde_json::to_string(sample)?);
    }
    eprintln!("{} samples", samples.len());
    Ok(())
}

async fn run_devices(data_dir: PathBuf) -> Result<()> {
    let store = open_store(&data_dir)?;
    let serials = store.device_serials().await?;
    if serials.is_empty() {
        println!("no devices recorded");
        return Ok(());
    }
    for serial in serials {
        println!("{}", serial);
    }
    Ok(())
}
