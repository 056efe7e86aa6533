//! `aegis reroute`: operator override of an incident's dispatch.

use aegis_protocol::{Category, IncidentId, ManualOverride};
use anyhow::Result;
use clap::Args;

use super::config::{load_config, open_db, GlobalOptions};

#[derive(Args, Debug, Clone)]
pub struct RerouteArgs {
    /// Incident to re-dispatch
    pub id: String,

    /// Responder type to send instead (police, hospital, fire, rescue)
    #[arg(long)]
    pub category: Category,

    /// Send a specific unit instead of the nearest registered station
    #[arg(long, requires_all = ["lat", "lon"])]
    pub station_name: Option<String>,

    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,
}

impl RerouteArgs {
    pub fn to_override(&self) -> ManualOverride {
        ManualOverride {
            category: Some(self.category.as_str().to_string()),
            name: self.station_name.clone(),
            lat: self.lat,
            lon: self.lon,
        }
    }
}

pub async fn run(args: RerouteArgs, options: &GlobalOptions) -> Result<()> {
    let id = IncidentId::parse(&args.id).map_err(|e| anyhow::anyhow!("{}", e))?;
    let config = load_config(options)?;
    let db = open_db(&config).await?;

    db.request_reroute(&id, &args.to_override()).await?;
    println!(
        "Incident {} queued for re-dispatch to {}; the coordinator picks it up next cycle",
        id, args.category
    );

    db.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RerouteArgs,
    }

    #[test]
    fn test_lat_requires_lon() {
        let parsed = TestCli::try_parse_from([
            "reroute",
            "7f0c2a52-3bd4-4c4e-9a37-0d6f2f1b8e11",
            "--category",
            "fire",
            "--lat",
            "18.5",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_override_payload() {
        let cli = TestCli::try_parse_from([
            "reroute",
            "7f0c2a52-3bd4-4c4e-9a37-0d6f2f1b8e11",
            "--category",
            "Hospital",
            "--station-name",
            "Ruby Hall Clinic",
            "--lat",
            "18.5335",
            "--lon",
            "73.8770",
        ])
        .unwrap();
        let payload = cli.args.to_override();
        assert_eq!(payload.category().unwrap(), Some(Category::Hospital));
        assert_eq!(payload.name.as_deref(), Some("Ruby Hall Clinic"));
        assert!(payload.coordinates().is_some());
    }

    #[test]
    fn test_unknown_category_rejected_by_parser() {
        let parsed = TestCli::try_parse_from([
            "reroute",
            "7f0c2a52-3bd4-4c4e-9a37-0d6f2f1b8e11",
            "--category",
            "coastguard",
        ]);
        assert!(parsed.is_err());
    }
}
