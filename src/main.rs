use std::error::Error;
use std::fs;

use ande::{EngineConfig, InMemoryCatalog, Phase, Tortoise};

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(catalog_path) = args.next() else {
        eprintln!("usage: ande <catalog.json> [config.yaml]");
        std::process::exit(2);
    };

    let catalog: InMemoryCatalog = serde_json::from_str(&fs::read_to_string(&catalog_path)?)?;
    let config = match args.next() {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };

    let tortoise = Tortoise::new(&catalog, config)?;
    let outcomes = tortoise.run(Phase::Full)?;
    println!("{}", serde_json::to_string_pretty(&outcomes)?);
    Ok(())
}
