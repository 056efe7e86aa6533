//! `aegis stations`: manage the responder registry.

use std::path::{Path, PathBuf};

use aegis_protocol::{Category, Coordinates, Station};
use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Deserialize;
use tracing::info;

use super::config::{load_config, open_db, GlobalOptions};
use super::output::{format_point, print_json, table};

#[derive(Subcommand, Debug, Clone)]
pub enum StationsAction {
    /// Import or update stations from a TOML file of [[stations]] records
    Import { file: PathBuf },
    /// List registered stations
    List {
        /// Include inactive stations
        #[arg(long)]
        all: bool,
        #[arg(long)]
        json: bool,
    },
    /// Mark a station available for dispatch
    Enable { name: String },
    /// Take a station out of dispatch without deleting it
    Disable { name: String },
}

#[derive(Debug, Deserialize)]
struct StationFile {
    #[serde(default)]
    stations: Vec<StationRecord>,
}

#[derive(Debug, Deserialize)]
struct StationRecord {
    name: String,
    #[serde(alias = "type")]
    category: String,
    lat: f64,
    lon: f64,
    #[serde(default = "default_active")]
    active: bool,
    #[serde(default)]
    external_id: Option<String>,
}

fn default_active() -> bool {
    true
}

impl StationRecord {
    fn into_station(self) -> Result<Station> {
        let category = Category::parse(&self.category).with_context(|| {
            format!("Station '{}' has unknown type '{}'", self.name, self.category)
        })?;
        let coordinates = Coordinates::new(self.lat, self.lon);
        coordinates
            .validate()
            .map_err(|e| anyhow::anyhow!("Station '{}': {}", self.name, e))?;
        Ok(Station {
            name: self.name,
            category,
            coordinates,
            active: self.active,
            external_id: self.external_id,
        })
    }
}

/// Parse a station file; every record is validated before anything is written.
fn parse_station_file(path: &Path) -> Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file: StationFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    file.stations
        .into_iter()
        .map(StationRecord::into_station)
        .collect()
}

pub async fn run(action: StationsAction, options: &GlobalOptions) -> Result<()> {
    let config = load_config(options)?;
    let db = open_db(&config).await?;

    match action {
        StationsAction::Import { file } => {
            let stations = parse_station_file(&file)?;
            for station in &stations {
                db.upsert_station(station).await?;
            }
            info!(count = stations.len(), file = %file.display(), "Stations imported");
            println!("Imported {} station(s) from {}", stations.len(), file.display());
        }
        StationsAction::List { all, json } => {
            let stations = if all {
                db.list_stations().await?
            } else {
                db.list_active_stations().await?
            };
            if json {
                print_json(&stations)?;
            } else if stations.is_empty() {
                println!("No stations registered. Import some with `aegis stations import`.");
            } else {
                let mut t = table(&["Name", "Type", "Location", "Active"]);
                for s in &stations {
                    t.add_row(vec![
                        s.name.clone(),
                        s.category.to_string(),
                        format_point(s.coordinates.lat, s.coordinates.lon),
                        if s.active { "yes" } else { "no" }.to_string(),
                    ]);
                }
                println!("{t}");
            }
        }
        StationsAction::Enable { name } => {
            db.set_station_active(&name, true).await?;
            println!("Station '{}' enabled", name);
        }
        StationsAction::Disable { name } => {
            db.set_station_active(&name, false).await?;
            println!("Station '{}' disabled", name);
        }
    }

    db.close().await;
    Ok(())
}
