use clap::Parser;
use silo_thermo::levels::LevelEngine;
use silo_thermo::settings::{Settings, StoreBackend};
use silo_thermo::web::query::{parse_level_query, SelectorParam};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Run one level query against the configured store and print the records as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a settings file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read from a JSON fixture instead of the configured store
    #[arg(long)]
    fixture: Option<PathBuf>,

    /// Silo ids, comma separated
    #[arg(long, conflicts_with_all = ["silo_number", "group"])]
    silo_id: Option<String>,

    /// Silo display numbers, comma separated
    #[arg(long, conflicts_with = "group")]
    silo_number: Option<String>,

    /// Silo group id
    #[arg(long)]
    group: Option<String>,

    /// Inclusive lower bound (YYYY-MM-DD or ISO-8601 date-time)
    #[arg(long)]
    start: Option<String>,

    /// Inclusive upper bound (YYYY-MM-DD or ISO-8601 date-time)
    #[arg(long)]
    end: Option<String>,

    /// Print per-sensor readings instead of level averages
    #[arg(long, default_value_t = false)]
    sensors: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let mut settings = Settings::new(args.config.clone())?;
    if let Some(fixture) = args.fixture {
        settings.store.backend = StoreBackend::Fixture;
        settings.store.fixture_path = fixture;
    }

    let (selector, value) = match (args.silo_id, args.silo_number, args.group) {
        (Some(v), _, _) => (SelectorParam::SiloId, v),
        (_, Some(v), _) => (SelectorParam::SiloNumber, v),
        (_, _, Some(v)) => (SelectorParam::SiloGroupId, v),
        _ => return Err("one of --silo-id, --silo-number or --group is required".into()),
    };
    let mut params = vec![(selector.name().to_string(), value)];
    if let Some(start) = args.start {
        params.push(("start".to_string(), start));
    }
    if let Some(end) = args.end {
        params.push(("end".to_string(), end));
    }
    let query = parse_level_query(&params, selector)?;

    let engine = LevelEngine::from_settings(&settings)?;
    let json = if args.sensors {
        serde_json::to_string_pretty(&engine.latest_sensor_readings(&query).await?)?
    } else {
        serde_json::to_string_pretty(&engine.level_averages(&query).await?)?
    };
    println!("{}", json);
    Ok(())
}
