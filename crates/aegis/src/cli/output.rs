//! Table and JSON output helpers.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use serde::Serialize;

/// Table with the house style and the given header row.
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(*h)));
    table
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `18.45490, 73.85630`
pub fn format_point(lat: f64, lon: f64) -> String {
    format!("{:.5}, {:.5}", lat, lon)
}

/// Meters below 1 km, kilometers above.
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_distance() {
        assert_eq!(format_distance(850.4), "850 m");
        assert_eq!(format_distance(7_530.0), "7.5 km");
    }

    #[test]
    fn test_table_renders_headers() {
        let mut t = table(&["Name", "Type"]);
        t.add_row(vec!["Fire Station - Swargate", "fire"]);
        let rendered = t.to_string();
        assert!(rendered.contains("Name"));
        assert!(rendered.contains("Swargate"));
    }
}
