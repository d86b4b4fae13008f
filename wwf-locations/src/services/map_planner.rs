//! Map Render Planner
//!
//! Decides how each geocoded location is drawn:
//! - exact marker (venue/address level), listed in the location list
//! - approximate circle for region-level places
//! - filled polygon for country-level places
//! - nothing, when the location has no coordinates
//!
//! Only exact markers appear in the list; entries with a real scene
//! description come first, otherwise input order is kept.

use serde::Serialize;
use serde_json::Value;

use crate::services::boundary_cache::BoundaryDataset;
use crate::types::GeocodedLocation;

/// Place types drawn as an approximate circle
pub const REGION_PLACE_TYPES: &[&str] = &[
    "state",
    "county",
    "city",
    "district",
    "locality",
    "administrative",
    "region",
    "province",
    "municipality",
    "town",
];

const COUNTRY_PLACE_TYPE: &str = "country";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderClass {
    Point,
    Region,
    Country,
    Unplottable,
}

/// Classify one location
pub fn classify(location: &GeocodedLocation) -> RenderClass {
    if !location.is_plottable() {
        return RenderClass::Unplottable;
    }
    let Some(place_type) = location.place_type.as_deref().map(str::trim) else {
        return RenderClass::Point;
    };

    if place_type.eq_ignore_ascii_case(COUNTRY_PLACE_TYPE) {
        RenderClass::Country
    } else if REGION_PLACE_TYPES
        .iter()
        .any(|t| place_type.eq_ignore_ascii_case(t))
    {
        RenderClass::Region
    } else {
        RenderClass::Point
    }
}

/// Approximate area drawn for a region-level place
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionArea {
    pub label: String,
    pub desc: String,
    pub lon: f64,
    pub lat: f64,
    pub radius_km: f64,
    /// Matched admin-1 feature, when the region dataset had one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boundary: Option<Value>,
}

/// Country polygon; nothing is drawn when no feature matched
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryArea {
    pub label: String,
    pub lon: f64,
    pub lat: f64,
    pub boundary: Option<Value>,
}

/// Everything needed to draw a finished run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPlan {
    /// Exact markers, in list order
    pub points: Vec<GeocodedLocation>,
    pub regions: Vec<RegionArea>,
    pub countries: Vec<CountryArea>,
    /// Locations without coordinates
    pub unplottable: usize,
}

impl MapPlan {
    pub fn plottable_count(&self) -> usize {
        self.points.len() + self.regions.len() + self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plottable_count() == 0
    }
}

/// Boundary datasets available when planning
#[derive(Default, Clone, Copy)]
pub struct Boundaries<'a> {
    pub countries: Option<&'a BoundaryDataset>,
    pub regions: Option<&'a BoundaryDataset>,
}

#[derive(Debug, Clone)]
pub struct MapPlanner {
    region_radius_km: f64,
}

impl MapPlanner {
    pub fn new(region_radius_km: f64) -> Self {
        Self { region_radius_km }
    }

    pub fn plan(&self, locations: &[GeocodedLocation], boundaries: Boundaries<'_>) -> MapPlan {
        let mut plan = MapPlan::default();

        for location in locations {
            let (Some(lon), Some(lat)) = (location.lon, location.lat) else {
                plan.unplottable += 1;
                continue;
            };

            match classify(location) {
                RenderClass::Point => plan.points.push(location.clone()),
                RenderClass::Region => plan.regions.push(RegionArea {
                    label: location.label().to_string(),
                    desc: location.desc.clone(),
                    lon,
                    lat,
                    radius_km: self.region_radius_km,
                    boundary: boundaries
                        .regions
                        .and_then(|d| find_for(d, location))
                        .cloned(),
                }),
                RenderClass::Country => plan.countries.push(CountryArea {
                    label: location.label().to_string(),
                    lon,
                    lat,
                    boundary: boundaries
                        .countries
                        .and_then(|d| find_for(d, location))
                        .cloned(),
                }),
                RenderClass::Unplottable => plan.unplottable += 1,
            }
        }

        plan.points.sort_by_key(|l| !l.has_scene_description());
        plan
    }
}

fn find_for<'d>(dataset: &'d BoundaryDataset, location: &GeocodedLocation) -> Option<&'d Value> {
    dataset.find(location.label())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::boundary_cache::BoundaryKind;
    use crate::types::PlaceRecord;
    use serde_json::json;

    fn located(place: &str, desc: Option<&str>, place_type: Option<&str>) -> GeocodedLocation {
        let mut loc = GeocodedLocation::pending(&PlaceRecord::new(place, desc.map(str::to_string)));
        loc.lon = Some(1.0);
        loc.lat = Some(2.0);
        loc.place_type = place_type.map(str::to_string);
        loc
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&located("France", None, Some("country"))), RenderClass::Country);
        assert_eq!(classify(&located("Paris", None, Some("City"))), RenderClass::Region);
        assert_eq!(classify(&located("Louvre", None, Some("amenity"))), RenderClass::Point);
        assert_eq!(classify(&located("Somewhere", None, None)), RenderClass::Point);

        let pending = GeocodedLocation::pending(&PlaceRecord::new("Nowhere", None));
        assert_eq!(classify(&pending), RenderClass::Unplottable);
    }

    #[test]
    fn test_only_points_are_listed() {
        let planner = MapPlanner::new(35.0);
        let plan = planner.plan(
            &[
                located("France", None, Some("country")),
                located("Paris", None, Some("city")),
                located("Louvre", None, Some("amenity")),
                GeocodedLocation::pending(&PlaceRecord::new("Nowhere", None)),
            ],
            Boundaries::default(),
        );

        assert_eq!(plan.points.len(), 1);
        assert_eq!(plan.points[0].place, "Louvre");
        assert_eq!(plan.regions.len(), 1);
        assert_eq!(plan.regions[0].radius_km, 35.0);
        assert_eq!(plan.countries.len(), 1);
        assert!(plan.countries[0].boundary.is_none());
        assert_eq!(plan.unplottable, 1);
        assert_eq!(plan.plottable_count(), 3);
    }

    #[test]
    fn test_described_points_first_stable() {
        let planner = MapPlanner::new(35.0);
        let plan = planner.plan(
            &[
                located("a", None, None),
                located("b", Some("Opening scene"), None),
                located("c", None, None),
                located("d", Some("Finale"), None),
            ],
            Boundaries::default(),
        );

        let order: Vec<&str> = plan.points.iter().map(|l| l.place.as_str()).collect();
        assert_eq!(order, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_country_boundary_lookup() {
        let countries = BoundaryDataset::from_geojson(
            BoundaryKind::Country,
            json!({ "features": [ { "properties": { "NAME": "United States of America" } } ] }),
        )
        .unwrap();

        let planner = MapPlanner::new(35.0);
        let plan = planner.plan(
            &[
                located("USA", None, Some("country")),
                located("Atlantis", None, Some("country")),
            ],
            Boundaries {
                countries: Some(&countries),
                regions: None,
            },
        );

        assert!(plan.countries[0].boundary.is_some());
        assert!(plan.countries[1].boundary.is_none());
    }
}
