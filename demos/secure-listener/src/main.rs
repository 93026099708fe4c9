//! Subscribes to the notification namespace of a device-management bus and
//! prints the decrypted values pushed by devices.
//!
//! The process exits with the return code of the transport, so a clean
//! disconnection or an interruption exits with zero.

use std::num::NonZeroUsize;
use std::process::ExitCode;

use clap::Parser;

use dmbus::cipher::CipherContext;

use dmbus_subscriber::config::{BrokerConfig, DEFAULT_KEEP_ALIVE_SECS, DEFAULT_PORT};
use dmbus_subscriber::error::{Error, ErrorKind, Result};
use dmbus_subscriber::subscriber::{Subscriber, SubscriberEvent, SubscriberExit};
use dmbus_subscriber::transport::{MqttTransport, PROTOCOL_ERROR};

use tracing::{Level, error, info};

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Broker host.
    #[arg(long, env = "DMBUS_HOST")]
    host: String,

    /// Broker port.
    #[arg(long, env = "DMBUS_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Keep-alive interval, in seconds.
    #[arg(long, env = "DMBUS_KEEP_ALIVE", default_value_t = DEFAULT_KEEP_ALIVE_SECS)]
    keep_alive: u16,

    /// Client identifier presented to the broker.
    #[arg(long, env = "DMBUS_CLIENT_ID")]
    client_id: Option<String>,

    /// Symmetric key, as a hexadecimal string of 16, 24, or 32 bytes.
    #[arg(long, env = "DMBUS_KEY", hide_env_values = true)]
    key: String,

    /// Initialization vector, as a hexadecimal string of 16 bytes.
    #[arg(long, env = "DMBUS_IV", hide_env_values = true)]
    iv: String,

    /// Maximum number of decoded events waiting to be printed.
    #[arg(long, default_value = "16")]
    buffer: NonZeroUsize,

    /// Prints debug information.
    #[arg(short, long)]
    verbose: bool,
}

fn decode_hex(name: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim()).map_err(|e| {
        Error::new(
            ErrorKind::Config,
            format!("The {name} is not a valid hexadecimal string: {e}"),
        )
    })
}

fn setup(cli: &Cli) -> Result<(BrokerConfig, CipherContext)> {
    let mut config = BrokerConfig::new(cli.host.as_str())?
        .with_port(cli.port)
        .with_keep_alive_secs(cli.keep_alive);
    if let Some(client_id) = &cli.client_id {
        config = config.with_client_id(client_id.as_str())?;
    }

    let key = decode_hex("key", &cli.key)?;
    let iv = decode_hex("initialization vector", &cli.iv)?;
    let context = CipherContext::new(&key, &iv)?;

    Ok((config, context))
}

fn print_event(event: SubscriberEvent) {
    match event {
        SubscriberEvent::Notification(event) => println!("{event}"),
        SubscriberEvent::ControlResponse { topic, body } => {
            println!("{topic}: {}", String::from_utf8_lossy(&body));
        }
    }
}

async fn listen(
    config: BrokerConfig,
    context: CipherContext,
    buffer: NonZeroUsize,
) -> SubscriberExit {
    info!(
        "Listening on {}:{} with {}",
        config.host(),
        config.port(),
        context.algorithm()
    );

    let subscriber = Subscriber::new(MqttTransport::new(config), context);
    let cancellation_token = subscriber.cancellation_token();
    let (handle, mut receiver) = subscriber.spawn(buffer);

    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing the session");
            cancellation_token.cancel();
        }
    });

    while let Some(event) = receiver.recv().await {
        print_event(event);
    }
    signal.abort();

    match handle.await {
        Ok(exit) => exit,
        Err(e) => {
            error!("The subscriber task failed: {e}");
            SubscriberExit::Faulted {
                code: PROTOCOL_ERROR,
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .init();

    let (config, context) = match setup(&cli) {
        Ok(setup) => setup,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let exit = listen(config, context, cli.buffer).await;
    info!("Session ended with code {}", exit.code());

    // The transport code is the final status of the process.
    u8::try_from(exit.code()).map_or(ExitCode::FAILURE, ExitCode::from)
}
