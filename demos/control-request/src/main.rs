//! Publishes a single control request on a device-management bus and
//! disconnects.
//!
//! Responses are published by the bus on the notification namespace, where
//! `secure-listener` prints them.

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use dmbus::request::ControlRequest;
use dmbus::topic::ResourceAddress;

use dmbus_subscriber::config::{BrokerConfig, DEFAULT_KEEP_ALIVE_SECS, DEFAULT_PORT};
use dmbus_subscriber::error::Result;
use dmbus_subscriber::publisher::publish_request_to;

use tracing::{Level, error};

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

    /// Prints debug information.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Discovers the endpoints registered on the bus.
    Discover {
        /// Endpoint type.
        #[arg(long = "type", default_value = "mbed-eth-device")]
        endpoint_type: String,

        /// Includes stale endpoints.
        #[arg(long)]
        stale: bool,
    },
    /// Reads the current value of a resource.
    Read(Resource),
    /// Subscribes to the notifications of a resource.
    Subscribe(Resource),
    /// Removes the subscription to a resource.
    Unsubscribe(Resource),
}

#[derive(Args)]
struct Resource {
    /// Endpoint name, for example `mbed-eth-endpoint`.
    endpoint: String,

    /// Resource path, for example `/3303/0/5700` or `/dev/mfg`.
    path: String,
}

impl Resource {
    fn address(&self) -> Result<ResourceAddress> {
        ResourceAddress::path(&self.endpoint, &self.path).map_err(Into::into)
    }
}

impl Command {
    fn request(&self) -> Result<ControlRequest> {
        Ok(match self {
            Self::Discover {
                endpoint_type,
                stale,
            } => ControlRequest::discover(endpoint_type.as_str(), *stale),
            Self::Read(resource) => ControlRequest::read(&resource.address()?),
            Self::Subscribe(resource) => ControlRequest::subscribe(&resource.address()?),
            Self::Unsubscribe(resource) => ControlRequest::unsubscribe(&resource.address()?),
        })
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = BrokerConfig::new(cli.host)?
        .with_port(cli.port)
        .with_keep_alive_secs(cli.keep_alive);
    if let Some(client_id) = cli.client_id {
        config = config.with_client_id(client_id)?;
    }

    let request = cli.command.request()?;
    publish_request_to(config, &request).await
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

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
