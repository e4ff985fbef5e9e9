use chrono::TimeDelta;

use crate::models::session::SessionMetadata;

/// No session may move further than this between two uses, ever.
pub const MAX_TRAVEL_KM: f64 = 1000.0;
/// Movement within this radius is always accepted.
pub const FREE_TRAVEL_KM: f64 = 30.0;
/// Accepted travel speed beyond the free radius.
pub const TRAVEL_KM_PER_DAY: f64 = 333.3;

const SECONDS_PER_DAY: f64 = 86400.0;

/// Great-circle distance between two points in kilometres.
///
/// Spherical law of cosines, converted via nautical and statute miles.
pub fn distance_km(from: &SessionMetadata, to: &SessionMetadata) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let theta = (from.lng - to.lng).to_radians();

    let cos = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * theta.cos();
    let degrees = cos.clamp(-1.0, 1.0).acos().to_degrees();

    degrees * 60.0 * 1.1515 * 1.609344
}

/// Decides whether a session may continue from `current` after being used
/// at `previous`, `elapsed` ago.
pub fn is_plausible(
    previous: &SessionMetadata,
    current: &SessionMetadata,
    elapsed: TimeDelta,
) -> bool {
    let travelled = distance_km(previous, current);

    if travelled.is_nan() || travelled > MAX_TRAVEL_KM {
        return false;
    }

    if travelled <= FREE_TRAVEL_KM {
        return true;
    }

    let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
    travelled <= TRAVEL_KM_PER_DAY * (elapsed_secs / SECONDS_PER_DAY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(lat: f64, lng: f64) -> SessionMetadata {
        SessionMetadata { lat, lng }
    }

    // One degree of latitude is ~111.2 km with these conversion factors.
    const DEG_20_KM: f64 = 0.18;
    const DEG_500_KM: f64 = 4.5;
    const DEG_1500_KM: f64 = 13.5;

    #[test]
    fn distance_is_zero_for_the_same_point() {
        let p = at(48.137, 11.575);
        assert!(distance_km(&p, &p) < 1e-6);
    }

    #[test]
    fn distance_matches_reference_figures() {
        let d = distance_km(&at(0.0, 0.0), &at(1.0, 0.0));
        assert!((d - 111.19).abs() < 0.1, "got {}", d);

        let d = distance_km(&at(0.0, 0.0), &at(0.0, 180.0));
        assert!((d - 20015.0).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn twenty_km_in_one_second_is_plausible() {
        let prev = at(50.0, 8.0);
        let cur = at(50.0 + DEG_20_KM, 8.0);
        assert!(is_plausible(&prev, &cur, TimeDelta::seconds(1)));
    }

    #[test]
    fn five_hundred_km_in_one_hour_is_implausible() {
        let prev = at(40.0, 8.0);
        let cur = at(40.0 + DEG_500_KM, 8.0);
        assert!(!is_plausible(&prev, &cur, TimeDelta::hours(1)));
    }

    #[test]
    fn five_hundred_km_in_two_days_is_plausible() {
        let prev = at(40.0, 8.0);
        let cur = at(40.0 + DEG_500_KM, 8.0);
        assert!(is_plausible(&prev, &cur, TimeDelta::days(2)));
    }

    #[test]
    fn more_than_a_thousand_km_is_never_plausible() {
        let prev = at(30.0, 8.0);
        let cur = at(30.0 + DEG_1500_KM, 8.0);
        assert!(!is_plausible(&prev, &cur, TimeDelta::days(30)));
        assert!(!is_plausible(&prev, &cur, TimeDelta::days(3650)));
    }

    #[test]
    fn negative_elapsed_time_only_allows_free_radius() {
        let prev = at(40.0, 8.0);
        assert!(is_plausible(&prev, &at(40.1, 8.0), TimeDelta::seconds(-10)));
        assert!(!is_plausible(&prev, &at(41.0, 8.0), TimeDelta::seconds(-10)));
    }

    #[test]
    fn invalid_coordinates_are_rejected() {
        assert!(!is_plausible(&at(f64::NAN, 0.0), &at(0.0, 0.0), TimeDelta::days(1)));
    }
}
