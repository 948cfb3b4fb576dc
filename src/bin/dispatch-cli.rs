use std::net::SocketAddr;
use std::path::PathBuf;

use broker_dispatch::config::load_config;
use broker_dispatch::observability::{init_logging, metrics};
use broker_dispatch::{CircuitSettings, Config, Enqueuer, SendOptions, TracingLogger};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "dispatch-cli")]
#[command(about = "Send messages to a STOMP broker through broker-dispatch", long_about = None)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Broker address, overrides the config file
    #[arg(short, long)]
    addr: Option<String>,

    /// Serve Prometheus metrics on this address
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Queue,
    Topic,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one or more messages and wait for them to finish
    Send {
        #[arg(value_enum)]
        kind: Kind,
        name: String,
        body: String,
        /// Number of copies to send
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        #[arg(long, default_value = "text/plain")]
        content_type: String,
        /// Route through a circuit breaker with default settings
        #[arg(long)]
        circuit: Option<String>,
    },
    /// Check a destination with a short-lived, non-persistent marker
    Check {
        #[arg(value_enum)]
        kind: Kind,
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging("broker_dispatch=info");
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }
    config.logger = Some(std::sync::Arc::new(TracingLogger));

    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)?;
    }

    let engine = Enqueuer::connect(config).await?;

    match cli.command {
        Commands::Send {
            kind,
            name,
            body,
            count,
            content_type,
            circuit,
        } => {
            let mut options = SendOptions::new()
                .with_content_type(content_type)
                .after(|ctx, err| match err {
                    Some(e) => eprintln!("{} {} failed: {}", ctx.identifier, ctx.destination.path(), e),
                    None => println!("{} {} ok", ctx.identifier, ctx.destination.path()),
                });
            if let Some(circuit) = circuit {
                engine.configure_circuit_breaker(&circuit, CircuitSettings::default());
                options = options.with_circuit(circuit);
            }

            for _ in 0..count {
                match kind {
                    Kind::Queue => engine.send_queue(&name, body.as_bytes(), options.clone())?,
                    Kind::Topic => engine.send_topic(&name, body.as_bytes(), options.clone())?,
                }
            }
            engine.wait_idle().await;
        }
        Commands::Check { kind, name } => {
            match kind {
                Kind::Queue => engine.check_queue(&name).await?,
                Kind::Topic => engine.check_topic(&name).await?,
            }
            println!("{} reachable", name);
        }
    }

    engine.disconnect().await?;
    Ok(())
}
