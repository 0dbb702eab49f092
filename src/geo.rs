//! Pure distance / sort / filter / dedup primitives over coordinate pairs.

use std::collections::HashMap;

use crate::types::{Location, Venue};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle (haversine) distance in meters, rounded to the nearest meter.
pub fn distance(a: Location, b: Location) -> f64 {
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    (EARTH_RADIUS_M * c).round()
}

/// Fill in `distance_m` from coordinates when absent.
fn known_distance(venue: &Venue, origin: Location) -> Option<f64> {
    venue
        .distance_m
        .or_else(|| venue.location.map(|loc| distance(origin, loc)))
}

/// Keep venues whose distance from `origin` is within `radius_m`. The
/// precomputed distance is trusted when present; otherwise it is computed
/// from coordinates (and stored). Venues with neither are dropped.
pub fn filter_within_radius(venues: Vec<Venue>, origin: Location, radius_m: f64) -> Vec<Venue> {
    venues
        .into_iter()
        .filter_map(|mut v| {
            let d = known_distance(&v, origin)?;
            if d <= radius_m {
                v.distance_m = Some(d);
                Some(v)
            } else {
                None
            }
        })
        .collect()
}

/// Ascending by distance. A venue whose distance stays unknown after trying
/// its coordinates sorts as 0, i.e. co-located with the origin. Callers
/// depend on this exact tie-break; see the explicit-sort path in `ranking`
/// for the deliberately different missing-distance rule.
pub fn sort_by_distance(mut venues: Vec<Venue>, origin: Location) -> Vec<Venue> {
    for v in venues.iter_mut() {
        if v.distance_m.is_none() {
            v.distance_m = v.location.map(|loc| distance(origin, loc));
        }
    }
    venues.sort_by(|a, b| {
        let da = a.distance_m.unwrap_or(0.0);
        let db = b.distance_m.unwrap_or(0.0);
        da.total_cmp(&db)
    });
    venues
}

/// Collapse venues sharing a provider id. For a duplicate id group the entry
/// with the smaller known distance survives; the first occurrence wins on
/// ties or when neither distance is known. Venues without an id pass through
/// untouched. Order of first occurrences is preserved.
pub fn dedupe_by_id(venues: Vec<Venue>) -> Vec<Venue> {
    let mut out: Vec<Venue> = Vec::with_capacity(venues.len());
    let mut seen: HashMap<String, usize> = HashMap::new();

    for venue in venues {
        let Some(id) = venue.provider_id.clone() else {
            out.push(venue);
            continue;
        };
        match seen.get(&id) {
            None => {
                seen.insert(id, out.len());
                out.push(venue);
            }
            Some(&idx) => {
                let keep_new = match (out[idx].distance_m, venue.distance_m) {
                    (Some(old), Some(new)) => new < old,
                    (None, Some(_)) => true,
                    _ => false,
                };
                if keep_new {
                    out[idx] = venue;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lon: f64) -> Location {
        Location::new(lat, lon)
    }

    fn venue(id: Option<&str>, dist: Option<f64>) -> Venue {
        let mut v = Venue::named("v");
        v.provider_id = id.map(str::to_string);
        v.distance_m = dist;
        v
    }

    #[test]
    fn distance_to_self_is_zero() {
        let p = at(55.7558, 37.6176);
        assert_eq!(distance(p, p), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = at(55.7558, 37.6176);
        let b = at(59.9311, 30.3609);
        assert_eq!(distance(a, b), distance(b, a));
    }

    #[test]
    fn distance_moscow_to_petersburg_plausible() {
        let moscow = at(55.7558, 37.6176);
        let spb = at(59.9311, 30.3609);
        let d = distance(moscow, spb);
        assert!((600_000.0..700_000.0).contains(&d), "got {}", d);
    }

    #[test]
    fn radius_filter_drops_unlocatable_venues() {
        let origin = at(55.75, 37.61);
        let mut near = venue(None, None);
        near.location = Some(at(55.751, 37.611));
        let far = venue(None, Some(50_000.0));
        let unknown = venue(None, None);

        let kept = filter_within_radius(vec![near, far, unknown], origin, 1000.0);
        assert_eq!(kept.len(), 1);
        assert!(kept[0].distance_m.unwrap() <= 1000.0);
    }

    #[test]
    fn sort_treats_missing_distance_as_colocated() {
        let origin = at(55.75, 37.61);
        let sorted = sort_by_distance(
            vec![venue(None, Some(300.0)), venue(None, None), venue(None, Some(100.0))],
            origin,
        );
        let dists: Vec<Option<f64>> = sorted.iter().map(|v| v.distance_m).collect();
        assert_eq!(dists, vec![None, Some(100.0), Some(300.0)]);
    }

    #[test]
    fn dedupe_keeps_smaller_known_distance() {
        let out = dedupe_by_id(vec![
            venue(Some("ChIJabcdefghijklmnop01"), Some(300.0)),
            venue(Some("ChIJabcdefghijklmnop01"), Some(150.0)),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].distance_m, Some(150.0));
    }

    #[test]
    fn dedupe_first_occurrence_wins_without_distances() {
        let mut first = venue(Some("ChIJabcdefghijklmnop01"), None);
        first.name = "first".into();
        let mut second = venue(Some("ChIJabcdefghijklmnop01"), None);
        second.name = "second".into();

        let out = dedupe_by_id(vec![first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "first");
    }

    #[test]
    fn dedupe_is_idempotent() {
        let input = vec![
            venue(Some("ChIJabcdefghijklmnop01"), Some(300.0)),
            venue(Some("ChIJabcdefghijklmnop01"), Some(150.0)),
            venue(Some("ChIJqrstuvwxyz0123456789"), None),
            venue(None, Some(10.0)),
        ];
        let once = dedupe_by_id(input);
        let twice = dedupe_by_id(once.clone());
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.provider_id, b.provider_id);
            assert_eq!(a.distance_m, b.distance_m);
        }
    }
}
