//! Filter + ordering of candidate venues.
//!
//! Hard filters are independent AND predicates. Missing attributes pass the
//! price and open-now filters; the rating filter only excludes a venue whose
//! rating is present and below the floor.

use crate::geo;
use crate::types::{Location, SearchFilters, SortBy, Venue};

// Defaults used by the composite score so unknown attributes neither win
// nor lose outright.
const DEFAULT_RATING: f64 = 0.0;
const DEFAULT_PRICE: f64 = 2.0;
const DEFAULT_DISTANCE_M: f64 = 5000.0;

fn passes(venue: &Venue, filters: &SearchFilters) -> bool {
    if let Some(min) = filters.min_rating {
        if let Some(r) = venue.rating {
            if r < min {
                return false;
            }
        }
    }
    if let Some(max) = filters.max_price_level {
        if let Some(p) = venue.price_level {
            if p > max {
                return false;
            }
        }
    }
    if filters.open_now && venue.open_now == Some(false) {
        return false;
    }
    true
}

/// Ascending sort key for the default composite ordering: rating dominates,
/// then inverse price, then distance.
fn composite_key(venue: &Venue) -> f64 {
    let rating = venue.rating.unwrap_or(DEFAULT_RATING);
    let price = venue.price_level.map(f64::from).unwrap_or(DEFAULT_PRICE);
    let dist = venue.distance_m.unwrap_or(DEFAULT_DISTANCE_M);
    -10.0 * rating + 5.0 * price + dist / 100.0
}

/// Apply `filters`, compute missing distances from `origin` where coordinates
/// allow, and order the survivors.
///
/// The explicit distance sort treats a missing distance as +inf (sorts last).
/// This is deliberately different from `geo::sort_by_distance`'s missing = 0
/// tie-break; the two behaviors are pinned separately by tests.
pub fn rank_and_filter(
    venues: Vec<Venue>,
    filters: &SearchFilters,
    origin: Location,
) -> Vec<Venue> {
    let mut kept: Vec<Venue> = venues
        .into_iter()
        .filter(|v| passes(v, filters))
        .map(|mut v| {
            if v.distance_m.is_none() {
                v.distance_m = v.location.map(|loc| geo::distance(origin, loc));
            }
            v
        })
        .collect();

    match filters.sort_by {
        Some(SortBy::Rating) => {
            kept.sort_by(|a, b| {
                let ra = a.rating.unwrap_or(0.0);
                let rb = b.rating.unwrap_or(0.0);
                rb.total_cmp(&ra)
            });
        }
        Some(SortBy::Price) => {
            kept.sort_by(|a, b| {
                let pa = a.price_level.map(f64::from).unwrap_or(0.0);
                let pb = b.price_level.map(f64::from).unwrap_or(0.0);
                pa.total_cmp(&pb)
            });
        }
        Some(SortBy::Distance) => {
            kept.sort_by(|a, b| {
                let da = a.distance_m.unwrap_or(f64::INFINITY);
                let db = b.distance_m.unwrap_or(f64::INFINITY);
                da.total_cmp(&db)
            });
        }
        None => {
            kept.sort_by(|a, b| composite_key(a).total_cmp(&composite_key(b)));
        }
    }
    kept
}
