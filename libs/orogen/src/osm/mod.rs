//! Vector map features.
//!
//! Queries an Overpass-compatible endpoint for a fixed whitelist of tag
//! categories, reconstructs topology from the raw node/way/relation element
//! list, classifies ways into feature kinds, and clips everything to the
//! requested window.

pub mod clip;

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::Result;
use crate::geo::{GeoBounds, LatLng};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureKind {
    Road,
    Building,
    Barrier,
    Vegetation,
    Water,
}

impl FeatureKind {
    /// Line kinds are clipped with the splitting polyline sweep; everything
    /// else polygon-clips.
    pub fn is_line(self) -> bool {
        matches!(self, FeatureKind::Road | FeatureKind::Barrier)
    }
}

#[derive(Debug, Clone)]
pub struct OsmFeature {
    pub id: String,
    pub kind: FeatureKind,
    pub geometry: Vec<LatLng>,
    pub holes: Vec<Vec<LatLng>>,
    pub tags: HashMap<String, String>,
}

#[derive(Deserialize)]
pub(crate) struct OverpassResponse {
    pub elements: Vec<OverpassElement>,
}

#[derive(Deserialize)]
pub(crate) struct OverpassElement {
    #[serde(rename = "type")]
    pub element_type: String,
    pub id: i64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub nodes: Option<Vec<i64>>,
    pub members: Option<Vec<OverpassMember>>,
    pub tags: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
pub(crate) struct OverpassMember {
    #[serde(rename = "type")]
    pub member_type: String,
    #[serde(rename = "ref")]
    pub way_ref: i64,
    pub role: String,
}

fn build_query(bounds: &GeoBounds) -> String {
    // Overpass expects (south, west, north, east).
    let bbox = format!(
        "{},{},{},{}",
        bounds.south, bounds.west, bounds.north, bounds.east
    );
    format!(
        "[out:json][timeout:60];\
        (\
            way[\"natural\"=\"tree\"]({bbox});\
            way[\"natural\"=\"water\"]({bbox});\
            way[\"waterway\"]({bbox});\
            way[\"highway\"]({bbox});\
            way[\"building\"]({bbox});\
            way[\"natural\"~\"wood|scrub|tree_row|grass|meadow|heath|moor|wetland|sand|beach|bare_rock|scree|dirt\"]({bbox});\
            way[\"landuse\"~\"forest|grass|meadow|park|orchard|vineyard|farmland|quarry|reservoir|basin\"]({bbox});\
            way[\"historic\"]({bbox});\
            way[\"barrier\"]({bbox});\
            way[\"man_made\"=\"bridge\"]({bbox});\
            relation[\"building\"]({bbox});\
            relation[\"historic\"]({bbox});\
            relation[\"natural\"=\"water\"]({bbox});\
            relation[\"waterway\"]({bbox});\
        );\
        out body;\
        >;\
        out skel qt;"
    )
}

/// Fetch and clip vector features for `bounds`. One retry after a one-second
/// delay; an empty list after that — the rest of the pipeline tolerates zero
/// features.
pub async fn fetch_features(
    client: &reqwest::Client,
    endpoint: &str,
    bounds: &GeoBounds,
) -> Vec<OsmFeature> {
    for attempt in 0..2 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            info!("retrying overpass fetch");
        }
        match request_features(client, endpoint, bounds).await {
            Ok(features) => return features,
            Err(err) => warn!("overpass fetch failed: {err}"),
        }
    }
    Vec::new()
}

async fn request_features(
    client: &reqwest::Client,
    endpoint: &str,
    bounds: &GeoBounds,
) -> Result<Vec<OsmFeature>> {
    let query = build_query(bounds);
    let response = client
        .post(endpoint)
        .form(&[("data", query.as_str())])
        .send()
        .await?
        .error_for_status()?;
    let parsed: OverpassResponse = response.json().await?;
    info!("received {} overpass elements", parsed.elements.len());
    let features = parse_response(parsed, bounds);
    info!("parsed {} features", features.len());
    Ok(features)
}

struct Way {
    geometry: Vec<LatLng>,
    tags: HashMap<String, String>,
}

pub(crate) fn parse_response(response: OverpassResponse, bounds: &GeoBounds) -> Vec<OsmFeature> {
    let mut nodes: HashMap<i64, LatLng> = HashMap::new();
    let mut ways: HashMap<i64, Way> = HashMap::new();
    let mut relations = Vec::new();
    let mut raw: Vec<OsmFeature> = Vec::new();
    let mut consumed: HashSet<i64> = HashSet::new();

    // Index nodes; standalone tree nodes become point vegetation features.
    for element in &response.elements {
        if element.element_type == "node"
            && let (Some(lat), Some(lon)) = (element.lat, element.lon)
        {
            let p = LatLng::new(lat, lon);
            nodes.insert(element.id, p);
            if element
                .tags
                .as_ref()
                .is_some_and(|tags| tags.get("natural").is_some_and(|v| v == "tree"))
                && bounds.contains(p)
            {
                raw.push(OsmFeature {
                    id: element.id.to_string(),
                    kind: FeatureKind::Vegetation,
                    geometry: vec![p],
                    holes: Vec::new(),
                    tags: element.tags.clone().unwrap_or_default(),
                });
            }
        }
    }

    // Index ways by dereferencing node ids; drop ways with fewer than two
    // resolvable vertices.
    for element in response.elements {
        match element.element_type.as_str() {
            "way" => {
                let Some(node_ids) = element.nodes else {
                    continue;
                };
                let geometry: Vec<LatLng> = node_ids
                    .iter()
                    .filter_map(|id| nodes.get(id).copied())
                    .collect();
                if geometry.len() > 1 {
                    ways.insert(
                        element.id,
                        Way {
                            geometry,
                            tags: element.tags.unwrap_or_default(),
                        },
                    );
                }
            }
            "relation" => relations.push(element),
            _ => {}
        }
    }

    // Multipolygon assembly for building/historic relations. Every inner
    // ring is attached as a hole to each outer ring of the relation; inner
    // rings are not matched to a specific outer by containment.
    for relation in relations {
        let tags = relation.tags.unwrap_or_default();
        if !(tags.contains_key("building") || tags.contains_key("historic")) {
            continue;
        }
        let Some(members) = relation.members else {
            continue;
        };

        let mut holes = Vec::new();
        for member in members.iter().filter(|m| m.member_type == "way") {
            if member.role == "inner"
                && let Some(way) = ways.get(&member.way_ref)
            {
                holes.push(way.geometry.clone());
                consumed.insert(member.way_ref);
            }
        }

        for member in members.iter().filter(|m| m.member_type == "way") {
            if member.role != "outer" {
                continue;
            }
            let Some(way) = ways.get(&member.way_ref) else {
                continue;
            };
            let mut merged = tags.clone();
            merged.extend(way.tags.clone());
            raw.push(OsmFeature {
                id: format!("{}_{}", relation.id, member.way_ref),
                kind: FeatureKind::Building,
                geometry: way.geometry.clone(),
                holes: holes.clone(),
                tags: merged,
            });
            consumed.insert(member.way_ref);
        }
    }

    // Standalone way classification.
    let mut way_ids: Vec<i64> = ways.keys().copied().collect();
    way_ids.sort_unstable();
    for id in way_ids {
        if consumed.contains(&id) {
            continue;
        }
        let way = &ways[&id];
        let Some(kind) = classify_way(&way.tags) else {
            continue;
        };
        raw.push(OsmFeature {
            id: id.to_string(),
            kind,
            geometry: way.geometry.clone(),
            holes: Vec::new(),
            tags: way.tags.clone(),
        });
    }

    clip_features(raw, bounds)
}

type TagPredicate = fn(&HashMap<String, String>) -> bool;

/// Ordered classification rules; the first matching predicate decides the
/// feature kind.
const CLASSIFY_RULES: &[(TagPredicate, FeatureKind)] = &[
    (is_building_way, FeatureKind::Building),
    (is_water_way, FeatureKind::Water),
    (is_landcover_way, FeatureKind::Vegetation),
    (is_road_way, FeatureKind::Road),
    (is_barrier_way, FeatureKind::Barrier),
];

fn classify_way(tags: &HashMap<String, String>) -> Option<FeatureKind> {
    CLASSIFY_RULES
        .iter()
        .find(|(matches, _)| matches(tags))
        .map(|&(_, kind)| kind)
}

fn is_building_way(tags: &HashMap<String, String>) -> bool {
    tags.contains_key("building")
        || tags.get("historic").is_some_and(|v| v != "district")
}

fn is_water_way(tags: &HashMap<String, String>) -> bool {
    tags.get("natural").is_some_and(|v| v == "water")
        || tags.contains_key("waterway")
        || tags
            .get("landuse")
            .is_some_and(|v| v == "reservoir" || v == "basin")
}

fn is_landcover_way(tags: &HashMap<String, String>) -> bool {
    tags.contains_key("natural") || tags.contains_key("landuse")
}

fn is_road_way(tags: &HashMap<String, String>) -> bool {
    tags.contains_key("highway") || tags.get("man_made").is_some_and(|v| v == "bridge")
}

fn is_barrier_way(tags: &HashMap<String, String>) -> bool {
    tags.contains_key("barrier")
}

fn clip_features(raw: Vec<OsmFeature>, bounds: &GeoBounds) -> Vec<OsmFeature> {
    let mut clipped = Vec::new();

    for feature in raw {
        // Point features were bounds-checked at parse time.
        if feature.geometry.len() == 1 {
            clipped.push(feature);
            continue;
        }

        if feature.kind.is_line() {
            let segments = clip::clip_polyline(&feature.geometry, bounds);
            for (i, segment) in segments.into_iter().enumerate() {
                if segment.len() > 1 {
                    clipped.push(OsmFeature {
                        id: format!("{}_seg_{}", feature.id, i),
                        kind: feature.kind,
                        geometry: segment,
                        holes: Vec::new(),
                        tags: feature.tags.clone(),
                    });
                }
            }
        } else {
            let outer = clip::clip_polygon(&feature.geometry, bounds);
            if outer.len() > 2 {
                let holes: Vec<Vec<LatLng>> = feature
                    .holes
                    .iter()
                    .map(|hole| clip::clip_polygon(hole, bounds))
                    .filter(|hole| hole.len() > 2)
                    .collect();
                clipped.push(OsmFeature {
                    geometry: outer,
                    holes,
                    ..feature
                });
            }
        }
    }

    clipped
}
