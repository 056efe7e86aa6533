//! Multi-stop tour planning for a shared fleet.
//!
//! Standalone helper; the coordinator dispatches one unit per incident and
//! does not depend on it. Construction is path-cheapest-arc over a
//! great-circle distance matrix: the vehicle with the shortest tour so far
//! is extended with its cheapest arc to an unvisited stop, which keeps tour
//! lengths balanced across the fleet. Every tour closes back at the depot.

use aegis_protocol::Coordinates;
use serde::Serialize;

use crate::geo::haversine_m;
use crate::routing::RouteError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tour {
    pub vehicle: usize,
    /// Indices into the `stops` slice, in visiting order.
    pub stops: Vec<usize>,
    /// Depot, each stop, depot.
    pub geometry: Vec<Coordinates>,
    /// Includes the return leg.
    pub distance_m: f64,
}

/// Plan closed tours from `depot` covering every stop exactly once.
///
/// Returns one tour per vehicle; vehicles left without work get an empty
/// tour at the depot.
pub fn plan_tours(depot: Coordinates, stops: &[Coordinates], vehicles: usize) -> Result<Vec<Tour>, RouteError> {
    if vehicles == 0 {
        return Err(RouteError::InvalidInput("at least one vehicle is required".to_string()));
    }
    for (index, stop) in stops.iter().enumerate() {
        stop.validate()
            .map_err(|e| RouteError::InvalidInput(format!("stop {}: {}", index, e)))?;
    }

    // Node 0 is the depot, node i + 1 is stops[i].
    let nodes: Vec<Coordinates> = std::iter::once(depot).chain(stops.iter().copied()).collect();
    let matrix: Vec<Vec<f64>> = nodes
        .iter()
        .map(|&a| nodes.iter().map(|&b| haversine_m(a, b)).collect())
        .collect();

    let mut visited = vec![false; nodes.len()];
    visited[0] = true;
    let mut paths: Vec<Vec<usize>> = vec![Vec::new(); vehicles];
    let mut lengths = vec![0.0_f64; vehicles];

    for _ in 0..stops.len() {
        let vehicle = (0..vehicles)
            .min_by(|&a, &b| lengths[a].total_cmp(&lengths[b]))
            .unwrap_or(0);
        let at = paths[vehicle].last().copied().unwrap_or(0);

        let next = (1..nodes.len())
            .filter(|&node| !visited[node])
            .min_by(|&a, &b| matrix[at][a].total_cmp(&matrix[at][b]));
        let Some(next) = next else {
            break;
        };

        visited[next] = true;
        lengths[vehicle] += matrix[at][next];
        paths[vehicle].push(next);
    }

    let tours = paths
        .into_iter()
        .enumerate()
        .map(|(vehicle, path)| {
            let last = path.last().copied().unwrap_or(0);
            let geometry = std::iter::once(depot)
                .chain(path.iter().map(|&node| nodes[node]))
                .chain(std::iter::once(depot))
                .collect();
            Tour {
                vehicle,
                distance_m: lengths[vehicle] + matrix[last][0],
                stops: path.into_iter().map(|node| node - 1).collect(),
                geometry,
            }
        })
        .collect();

    Ok(tours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depot() -> Coordinates {
        Coordinates::new(18.521, 73.854)
    }

    #[test]
    fn test_every_stop_visited_once() {
        let stops = vec![
            Coordinates::new(18.6073, 73.7654),
            Coordinates::new(18.4549, 73.8563),
            Coordinates::new(18.5135, 73.7604),
            Coordinates::new(18.4852, 73.9047),
            Coordinates::new(18.5870, 73.7785),
        ];
        let tours = plan_tours(depot(), &stops, 2).unwrap();
        assert_eq!(tours.len(), 2);

        let mut seen: Vec<usize> = tours.iter().flat_map(|t| t.stops.clone()).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);

        for tour in &tours {
            assert_eq!(tour.geometry.first(), Some(&depot()));
            assert_eq!(tour.geometry.last(), Some(&depot()));
            assert_eq!(tour.geometry.len(), tour.stops.len() + 2);
        }
        // Balanced construction gives both vehicles work.
        assert!(tours.iter().all(|t| !t.stops.is_empty()));
    }

    #[test]
    fn test_single_vehicle_takes_cheapest_arc_first() {
        let near = Coordinates::new(18.525, 73.855);
        let far = Coordinates::new(18.70, 73.90);
        let tours = plan_tours(depot(), &[far, near], 1).unwrap();
        assert_eq!(tours[0].stops, vec![1, 0]);

        let expected = haversine_m(depot(), near) + haversine_m(near, far) + haversine_m(far, depot());
        assert!((tours[0].distance_m - expected).abs() < 1e-6);
    }

    #[test]
    fn test_idle_vehicles_and_no_stops() {
        let tours = plan_tours(depot(), &[], 3).unwrap();
        assert_eq!(tours.len(), 3);
        assert!(tours.iter().all(|t| t.stops.is_empty() && t.distance_m == 0.0));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(plan_tours(depot(), &[], 0), Err(RouteError::InvalidInput(_))));
        let bad = [Coordinates::new(95.0, 0.0)];
        assert!(matches!(plan_tours(depot(), &bad, 1), Err(RouteError::InvalidInput(_))));
    }
}
