use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::model::Office;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude/longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Result<Self, EngineError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(EngineError::validation("lat", "The lat must be between -90 and 90."));
        }
        if !lng.is_finite() || !(-180.0..=180.0).contains(&lng) {
            return Err(EngineError::validation("lng", "The lng must be between -180 and 180."));
        }
        Ok(Self { lat, lng })
    }

    /// Parse decimal-degree strings such as `"38.720661384644046"`.
    pub fn parse(lat: &str, lng: &str) -> Result<Self, EngineError> {
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| EngineError::validation("lat", "The lat must be a number."))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| EngineError::validation("lng", "The lng must be a number."))?;
        Self::new(lat, lng)
    }

    /// Great-circle distance in kilometres.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let d_lat = lat2 - lat1;
        let d_lng = (other.lng - self.lng).to_radians();
        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
    }
}

/// Order offices nearest-first from `query`. Without a query point the order
/// is ascending office id and no distance is reported.
pub fn rank_by_distance(query: Option<&GeoPoint>, offices: Vec<Office>) -> Vec<(Office, Option<f64>)> {
    match query {
        Some(point) => {
            let mut ranked: Vec<(Office, Option<f64>)> = offices
                .into_iter()
                .map(|o| {
                    let km = point.distance_km(&o.location);
                    (o, Some(km))
                })
                .collect();
            ranked.sort_by(|(a, da), (b, db)| {
                let da = da.unwrap_or(f64::INFINITY);
                let db = db.unwrap_or(f64::INFINITY);
                da.total_cmp(&db).then(a.id.cmp(&b.id))
            });
            ranked
        }
        None => {
            let mut ordered: Vec<(Office, Option<f64>)> =
                offices.into_iter().map(|o| (o, None)).collect();
            ordered.sort_by_key(|(o, _)| o.id);
            ordered
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApprovalStatus;
    use ulid::Ulid;

    fn office(id: Ulid, title: &str, lat: &str, lng: &str) -> Office {
        Office {
            id,
            owner_id: Ulid::new(),
            title: title.into(),
            location: GeoPoint::parse(lat, lng).unwrap(),
            daily_rate: 1000,
            monthly_discount: None,
            approval: ApprovalStatus::Approved,
            hidden: false,
            images: Vec::new(),
        }
    }

    #[test]
    fn distance_lisbon_to_porto() {
        let lisbon = GeoPoint::new(38.7223, -9.1393).unwrap();
        let porto = GeoPoint::new(41.1579, -8.6291).unwrap();
        let km = lisbon.distance_km(&porto);
        assert!((270.0..285.0).contains(&km), "got {km}");
        assert_eq!(lisbon.distance_km(&lisbon), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeoPoint::new(51.5, -0.12).unwrap();
        let b = GeoPoint::new(-33.86, 151.2).unwrap();
        assert!((a.distance_km(&b) - b.distance_km(&a)).abs() < 1e-9);
    }

    #[test]
    fn nearest_office_first() {
        // Ids are minted so Leiria sorts first by id.
        let leiria_id = Ulid::from_parts(1, 0);
        let torres_id = Ulid::from_parts(2, 0);
        let offices = vec![
            office(leiria_id, "Leiria", "39.739647233937944", "-8.80469301783934"),
            office(torres_id, "Torres Vedras", "39.088216161034566", "-9.252385883312964"),
        ];
        let query = GeoPoint::parse("38.720661384644046", "-9.16044783453807").unwrap();

        let ranked = rank_by_distance(Some(&query), offices.clone());
        assert_eq!(ranked[0].0.title, "Torres Vedras");
        assert_eq!(ranked[1].0.title, "Leiria");
        assert!(ranked[0].1.unwrap() < ranked[1].1.unwrap());

        let fallback = rank_by_distance(None, offices);
        assert_eq!(fallback[0].0.title, "Leiria");
        assert_eq!(fallback[1].0.title, "Torres Vedras");
        assert!(fallback.iter().all(|(_, km)| km.is_none()));
    }

    #[test]
    fn parse_rejects_garbage_and_out_of_range() {
        assert!(matches!(
            GeoPoint::parse("north", "0"),
            Err(EngineError::Validation { field: "lat", .. })
        ));
        assert!(matches!(
            GeoPoint::parse("10", "181"),
            Err(EngineError::Validation { field: "lng", .. })
        ));
        assert!(GeoPoint::new(f64::NAN, 0.0).is_err());
    }

    #[test]
    fn rank_empty() {
        let query = GeoPoint::new(0.0, 0.0).unwrap();
        assert!(rank_by_distance(Some(&query), Vec::new()).is_empty());
    }
}
