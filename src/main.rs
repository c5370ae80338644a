use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use amqp_exchange::config::{
    create_default_config_file, load_config, ConnectionConfig, DestinationSettings,
    ExchangeConfig, CONFIG_FILE_NAME,
};
use amqp_exchange::env::{parse_flag, EnvOverrides};
use amqp_exchange::exchange::session::DEFAULT_DRAIN_DELAY_MS;
use amqp_exchange::exchange::{ExchangeSession, Fe2o3Transport, Role};
use amqp_exchange::message::{DestinationKind, DestinationRef, DurabilityMode, Message};

const DEFAULT_QUEUE_MESSAGE: &str = "Hello world Queues!";
const DEFAULT_TOPIC_MESSAGE: &str = "Message with String Data";

/// Send or receive a single message over AMQP 1.0
#[derive(Parser, Debug)]
#[command(name = "amqp-exchange")]
#[command(about = "Send or receive a single message over AMQP 1.0")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Enable debug logging
    #[arg(long, global = true, num_args = 0..=1, require_equals = true)]
    #[arg(default_missing_value = "true", value_parser = parse_bool)]
    debug: Option<bool>,

    /// Configuration file (defaults to ./amqp-exchange.json or ~/.amqp-exchange.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Hostname or IP address of the broker
    #[arg(long, global = true)]
    host: Option<String>,

    /// AMQP port
    #[arg(long, global = true, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Username for authentication
    #[arg(long, global = true)]
    username: Option<String>,

    /// Password for authentication
    #[arg(long, global = true)]
    password: Option<String>,

    /// Message VPN (virtual host) name
    #[arg(long, global = true)]
    vpn: Option<String>,

    /// Connect over TLS
    #[arg(long, global = true, num_args = 0..=1, require_equals = true)]
    #[arg(default_missing_value = "true", value_parser = parse_bool)]
    ssl: Option<bool>,

    /// Number of connection attempts before giving up
    #[arg(long = "connectionAttempts", global = true, value_name = "COUNT")]
    #[arg(value_parser = clap::value_parser!(u32).range(1..))]
    connection_attempts: Option<u32>,

    /// Connection timeout in milliseconds
    #[arg(long = "connectionTimeout", global = true, value_name = "MS")]
    connection_timeout: Option<u64>,
}

impl ConnectionArgs {
    fn apply(&self, config: &mut ConnectionConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(username) = &self.username {
            config.username = username.clone();
        }
        if let Some(password) = &self.password {
            config.password = password.clone();
        }
        if let Some(vpn) = &self.vpn {
            config.vpn = vpn.clone();
        }
        if let Some(ssl) = self.ssl {
            config.use_tls = ssl;
        }
        if let Some(attempts) = self.connection_attempts {
            config.max_connection_attempts = attempts;
        }
        if let Some(timeout) = self.connection_timeout {
            config.connection_timeout_ms = timeout;
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message to a queue or topic
    Send(SendArgs),
    /// Wait for one message on a queue or topic
    Receive(ReceiveArgs),
    /// Write a default configuration file
    InitConfig {
        #[arg(value_name = "PATH", default_value = CONFIG_FILE_NAME)]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct DestinationArgs {
    /// Queue to send to or receive from
    #[arg(long = "queueName", value_name = "NAME", conflicts_with = "topic_name")]
    queue_name: Option<String>,

    /// Topic to publish to or subscribe on
    #[arg(long = "topicName", value_name = "NAME")]
    topic_name: Option<String>,

    /// Use the configured topic (AMQP_TOPIC_NAME or the config file) instead of the queue
    #[arg(long, conflicts_with = "queue_name")]
    topic: bool,
}

impl DestinationArgs {
    fn resolve(&self, defaults: &DestinationSettings) -> Result<DestinationRef> {
        let destination = match (&self.queue_name, &self.topic_name) {
            (_, Some(topic)) => DestinationRef::topic(topic.as_str())?,
            (Some(queue), None) => DestinationRef::queue(queue.as_str())?,
            (None, None) if self.topic => DestinationRef::topic(defaults.topic_name.as_str())?,
            (None, None) => DestinationRef::queue(defaults.queue_name.as_str())?,
        };
        Ok(destination)
    }
}

#[derive(Args, Debug)]
struct SendArgs {
    #[command(flatten)]
    destination: DestinationArgs,

    /// Message content to send
    #[arg(long)]
    message: Option<String>,

    /// Message priority
    #[arg(long, default_value_t = 1)]
    priority: u8,

    /// Durability requested for the message (none, configuration, unsettled-state)
    #[arg(long, default_value = "unsettled-state")]
    durability: DurabilityMode,

    /// Delay before closing after the broker accepts, in milliseconds
    #[arg(long = "drainDelay", value_name = "MS", default_value_t = DEFAULT_DRAIN_DELAY_MS)]
    drain_delay: u64,
}

#[derive(Args, Debug)]
struct ReceiveArgs {
    #[command(flatten)]
    destination: DestinationArgs,

    /// Give up if nothing arrives within this many milliseconds (waits forever if unset)
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Delay before closing after the message is accepted, in milliseconds
    #[arg(long = "drainDelay", value_name = "MS", default_value_t = DEFAULT_DRAIN_DELAY_MS)]
    drain_delay: u64,
}

fn parse_bool(value: &str) -> std::result::Result<bool, String> {
    parse_flag(value).map_err(|e| e.to_string())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Defaults < config file < environment < command line.
fn resolve_settings(cli_config: Option<&PathBuf>, args: &ConnectionArgs) -> Result<ExchangeConfig> {
    let mut settings = load_config(cli_config.map(|p| p.as_path()))?;
    EnvOverrides::load()
        .context("Failed to read connection settings from the environment")?
        .apply(&mut settings);
    args.apply(&mut settings.connection);
    settings.connection.validate()?;
    Ok(settings)
}

fn log_parameters(config: &ConnectionConfig, destination: &DestinationRef, debug: bool) {
    info!("Using connection parameters:");
    info!("  Host: {}", config.host);
    info!("  Port: {}", config.port);
    info!("  Username: {}", config.username);
    info!("  Destination: {}", destination);
    info!("  VPN: {}", config.vpn);
    info!("  SSL: {}", config.use_tls);
    info!("  Connection attempts: {}", config.max_connection_attempts);
    let debug_mode = debug;
    info!("  Debug mode: {}", debug_mode);
}

fn cancel_on_ctrl_c() -> oneshot::Receiver<()> {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, closing connection...");
            let _ = cancel_tx.send(());
        }
    });
    cancel_rx
}

fn default_body(kind: DestinationKind) -> &'static str {
    match kind {
        DestinationKind::Queue => DEFAULT_QUEUE_MESSAGE,
        DestinationKind::Topic => DEFAULT_TOPIC_MESSAGE,
    }
}

async fn run_send(settings: ExchangeConfig, args: SendArgs, debug: bool) -> Result<()> {
    let destination = args.destination.resolve(&settings.destinations)?;
    let body = args
        .message
        .unwrap_or_else(|| default_body(destination.kind()).to_string());
    let message = Message::new(body)
        .with_durability(args.durability)
        .with_priority(args.priority);

    log_parameters(&settings.connection, &destination, debug);
    info!("  Message: {}", message);
    info!(
        "  Durability: {:?} ({}), priority {}",
        args.durability,
        args.durability.code(),
        args.priority
    );

    let mut session = ExchangeSession::new(
        settings.connection,
        destination,
        Role::Sender,
        Fe2o3Transport::new(),
    )?
    .with_drain_delay(Duration::from_millis(args.drain_delay))
    .with_cancellation(cancel_on_ctrl_c());

    let ack = session.send(message).await?;
    info!(
        destination = %ack.destination,
        accepted_at = %ack.timestamp,
        attempts = ack.attempts,
        "Message sent successfully."
    );
    if debug {
        debug!("Acknowledgment: {}", serde_json::to_string(&ack)?);
    }
    Ok(())
}

async fn run_receive(settings: ExchangeConfig, args: ReceiveArgs, debug: bool) -> Result<()> {
    let destination = args.destination.resolve(&settings.destinations)?;
    log_parameters(&settings.connection, &destination, debug);

    let mut session = ExchangeSession::new(
        settings.connection,
        destination,
        Role::Receiver,
        Fe2o3Transport::new(),
    )?
    .with_drain_delay(Duration::from_millis(args.drain_delay))
    .with_receive_timeout(args.timeout.map(Duration::from_millis))
    .with_cancellation(cancel_on_ctrl_c());

    let message = session.receive().await?;
    println!("{}", message);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let debug = cli.debug.unwrap_or(false);
    match cli.command {
        Command::InitConfig { path } => {
            create_default_config_file(&path)?;
            println!("Configuration file created at: {}", path.display());
            Ok(())
        }
        Command::Send(args) => {
            let settings = resolve_settings(cli.config.as_ref(), &cli.connection)?;
            run_send(settings, args, debug).await
        }
        Command::Receive(args) => {
            let settings = resolve_settings(cli.config.as_ref(), &cli.connection)?;
            run_receive(settings, args, debug).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug.unwrap_or(false));

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
