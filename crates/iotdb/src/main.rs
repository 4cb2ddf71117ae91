//! IOTDB Runner
//!
//! Lists, sets and watches the things described by an `iotdb.toml`.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use thing_runtime::{ArrayEvent, ArrayEventKind, ThingEvent};
use thing_types::Value;

use iotdb::{ConfigError, IotdbConfig, Runner, Selector};

/// IOTDB thing runner
#[derive(Parser, Debug)]
#[command(name = "iotdb")]
#[command(about = "Run and inspect IOTDB things", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "iotdb.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the state of every matching thing as JSON
    List {
        #[command(flatten)]
        select: Select,
    },
    /// Set an attribute on every matching thing
    Set {
        /// Attribute code or purpose
        key: String,
        /// JSON value; anything that is not JSON is sent as a string
        value: String,
        #[command(flatten)]
        select: Select,
    },
    /// Print the loaded models
    Models,
    /// Log attribute changes until interrupted
    Watch,
}

#[derive(clap::Args, Debug)]
struct Select {
    /// Only things in this zone
    #[arg(long)]
    zone: Option<String>,
    /// Only things whose name matches this glob
    #[arg(long)]
    name: Option<String>,
    /// Only things of this model
    #[arg(long)]
    model: Option<String>,
}

impl From<Select> for Selector {
    fn from(select: Select) -> Self {
        Selector {
            zone: select.zone,
            name: select.name,
            model: select.model,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, missing) = match IotdbConfig::load(&args.config) {
        Ok(config) => (config, false),
        Err(ConfigError::NotFound(_)) => (IotdbConfig::default(), true),
        Err(e) => return Err(e.into()),
    };

    // Initialize tracing
    let default_filter = config
        .log
        .clone()
        .unwrap_or_else(|| "iotdb=info,thing_runtime=info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting IOTDB runner v{}", env!("CARGO_PKG_VERSION"));
    if missing {
        warn!("Config file {} not found, using defaults", args.config.display());
    }

    let runner = Runner::start(&config).await?;

    match args.command {
        Command::List { select } => {
            let states = runner.list(&select.into());
            println!("{}", serde_json::to_string_pretty(&states)?);
        }
        Command::Set { key, value, select } => {
            let value = parse_value(&value);
            let count = runner.set(&select.into(), &key, value)?;
            println!("{} things updated", count);
        }
        Command::Models => {
            println!("{}", serde_json::to_string_pretty(&runner.models_json())?);
        }
        Command::Watch => watch(&runner).await?,
    }

    runner.shutdown();
    Ok(())
}

fn parse_value(raw: &str) -> Value {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from(json),
        Err(_) => Value::from(raw),
    }
}

async fn watch(runner: &Runner) -> Result<()> {
    runner.things().things().on_event(ArrayEventKind::Thing, |event| {
        if let ArrayEvent::Thing(thing) = event {
            thing.on_event(|thing, event| {
                if let ThingEvent::Attribute { band, code, value } = event {
                    info!(
                        thing = %thing.name(),
                        band = %band,
                        "{} = {}",
                        code,
                        value.as_ref().map(|v| v.to_json()).unwrap_or_default()
                    );
                }
            });
        }
    });

    let dispatcher = runner.things().dispatcher().clone();
    tokio::select! {
        _ = dispatcher.run() => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Interrupted, shutting down");
        }
    }
    Ok(())
}
