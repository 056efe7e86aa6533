//! `aegis incident`: intake helper and incident inspection.

use aegis_protocol::{Coordinates, Incident, IncidentId, IncidentKind};
use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use super::config::{load_config, open_db, GlobalOptions};
use super::output::{format_distance, format_point, print_json, table};

#[derive(Subcommand, Debug, Clone)]
pub enum IncidentAction {
    /// Record an analysed report or a verified need
    Add(AddArgs),
    /// Show an incident with its assignment and missions
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    #[default]
    Report,
    Need,
}

impl From<KindArg> for IncidentKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Report => IncidentKind::Report,
            KindArg::Need => IncidentKind::Need,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct AddArgs {
    #[arg(long, allow_hyphen_values = true, requires = "lon")]
    pub lat: Option<f64>,

    #[arg(long, allow_hyphen_values = true, requires = "lat")]
    pub lon: Option<f64>,

    /// Report text or raw need message
    #[arg(long)]
    pub text: String,

    #[arg(long, value_enum, default_value_t = KindArg::Report)]
    pub kind: KindArg,

    /// Hazard tag from the upstream analyser (e.g. "fire")
    #[arg(long)]
    pub tag: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    pub tag_confidence: f64,

    /// Detected need (repeatable)
    #[arg(long = "need")]
    pub needs: Vec<String>,

    /// Need category for verified needs (medical, rescue, water, ...)
    #[arg(long)]
    pub need_type: Option<String>,

    #[arg(long)]
    pub details: Option<String>,

    #[arg(long)]
    pub severity: Option<i64>,
}

impl AddArgs {
    pub fn to_incident(&self) -> Result<Incident> {
        let coordinates = match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => {
                let c = Coordinates::new(lat, lon);
                c.validate().map_err(anyhow::Error::msg)?;
                Some(c)
            }
            _ => None,
        };

        let mut incident = match IncidentKind::from(self.kind) {
            IncidentKind::Report => Incident::new_report(coordinates, &self.text),
            IncidentKind::Need => {
                Incident::new_need(coordinates, &self.text, self.need_type.clone())
            }
        };
        if let Some(tag) = &self.tag {
            incident = incident.with_tag(tag, self.tag_confidence);
        }
        incident.needs = self.needs.clone();
        incident.details = self.details.clone();
        incident.severity = self.severity;
        Ok(incident)
    }
}

pub async fn run(action: IncidentAction, options: &GlobalOptions) -> Result<()> {
    let config = load_config(options)?;
    let db = open_db(&config).await?;

    match action {
        IncidentAction::Add(args) => {
            let incident = args.to_incident()?;
            match incident.kind {
                IncidentKind::Report => db.insert_incident(&incident).await?,
                IncidentKind::Need => db.insert_need(&incident).await?,
            }
            println!("{}", incident.id);
        }
        IncidentAction::Show { id, json } => {
            let id = IncidentId::parse(&id).map_err(|e| anyhow::anyhow!("{}", e))?;
            let incident = db
                .get_incident(&id)
                .await?
                .with_context(|| format!("Incident {} not found", id))?;
            let assignment = db.assignment(&id).await?;
            let missions = db.missions_for_incident(&id).await?;

            if json {
                print_json(&serde_json::json!({
                    "incident": incident,
                    "assignment": assignment,
                    "missions": missions,
                }))?;
            } else {
                let mut t = table(&["Field", "Value"]);
                t.add_row(vec!["Id".to_string(), incident.id.to_string()]);
                t.add_row(vec!["Kind".to_string(), incident.kind.to_string()]);
                t.add_row(vec![
                    "Location".to_string(),
                    incident
                        .coordinates
                        .map(|c| format_point(c.lat, c.lon))
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                t.add_row(vec!["Text".to_string(), incident.text.clone()]);
                t.add_row(vec!["Status".to_string(), incident.status.as_str().to_string()]);
                t.add_row(vec![
                    "Dispatch".to_string(),
                    incident
                        .dispatch_status
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
                t.add_row(vec!["Round".to_string(), incident.dispatch_round.to_string()]);
                if let Some(a) = &assignment {
                    t.add_row(vec![
                        "Station".to_string(),
                        format!("{} ({})", a.station.name, a.station.category),
                    ]);
                    t.add_row(vec!["Mission".to_string(), a.mission_id.to_string()]);
                }
                println!("{t}");

                for mission in &missions {
                    if let Some(route) = mission.routes.first() {
                        println!(
                            "  {}  {}  {}  {}",
                            mission.created_at.format("%Y-%m-%d %H:%M:%S"),
                            mission.station.name,
                            format_distance(route.distance_m),
                            if route.road_snapped { "road" } else { "straight line" }
                        );
                    }
                }
            }
        }
    }

    db.close().await;
    Ok(())
}
