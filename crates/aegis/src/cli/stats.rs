//! `aegis stats` and `aegis missions`: read-only views of dispatch state.

use aegis_db::DispatchStats;
use anyhow::Result;
use comfy_table::Table;

use super::config::{load_config, open_db, GlobalOptions};
use super::output::{format_distance, print_json, table};

pub async fn run(json: bool, options: &GlobalOptions) -> Result<()> {
    let config = load_config(options)?;
    let db = open_db(&config).await?;
    let stats = db.stats().await?;
    db.close().await;

    if json {
        print_json(&stats)?;
    } else {
        println!("{}", stats_table(&stats));
    }
    Ok(())
}

fn stats_table(stats: &DispatchStats) -> Table {
    let mut t = table(&["Dispatch status", "Count"]);
    for (label, count) in [
        ("Unassigned", stats.unassigned),
        ("Pending", stats.pending),
        ("Processing", stats.processing),
        ("Assigned", stats.assigned),
        ("Error", stats.errored),
        ("Incidents (total)", stats.incidents),
        ("Missions", stats.missions),
    ] {
        t.add_row(vec![label.to_string(), count.to_string()]);
    }
    t
}

pub async fn missions(limit: u32, json: bool, options: &GlobalOptions) -> Result<()> {
    let config = load_config(options)?;
    let db = open_db(&config).await?;
    let missions = db.list_missions(limit).await?;
    db.close().await;

    if json {
        return print_json(&missions);
    }
    if missions.is_empty() {
        println!("No missions yet");
        return Ok(());
    }

    let mut t = table(&["Created", "Station", "Type", "Sources", "Distance", "Route"]);
    for m in &missions {
        let (distance, route) = match m.routes.first() {
            Some(r) => (
                format_distance(r.distance_m),
                if r.road_snapped { "road" } else { "straight line" },
            ),
            None => ("-".to_string(), "-"),
        };
        t.add_row(vec![
            m.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            m.station.name.clone(),
            m.station.category.to_string(),
            m.source_ids.len().to_string(),
            distance,
            route.to_string(),
        ]);
    }
    println!("{t}");
    Ok(())
}
