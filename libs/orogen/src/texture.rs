//! Ground texture synthesis.
//!
//! Rasterizes the clipped vector features into two alternative textures at a
//! supersampled resolution: a pure vector-style map, and a hybrid that
//! overlays roads/buildings/barriers on the satellite resample. Both use the
//! same local tangent-plane projection as the resampler, so the texture and
//! the geometry line up pixel-for-pixel.
//!
//! Palette mixed from standard OSM Carto landcover colors and the
//! OpenStreetBrowser landuse/building scheme.

use tiny_skia::{
    Color, FillRule, LineCap, LineJoin, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Stroke,
    Transform,
};

use crate::error::{Error, Result};
use crate::geo::LatLng;
use crate::osm::{FeatureKind, OsmFeature};
use crate::pipeline::TerrainData;
use crate::proj::LocalProjection;

/// Supersampling target edge length in pixels.
const TARGET_RESOLUTION: u32 = 8192;

// Vegetation
const FOREST: u32 = 0xadd19e;
const SCRUB: u32 = 0xc8d7ab;
const HEATH: u32 = 0xd6d99f;
const GRASS: u32 = 0xcdebb0;
const ORCHARD: u32 = 0xaedfa3;
const FARMLAND: u32 = 0xeef0d5;
// Water
const WATER: u32 = 0xaad3df;
const WETLAND: u32 = 0xd6d99f;
const GLACIER: u32 = 0xddecec;
const MUD: u32 = 0xe6dcd1;
// Bare ground
const BARE: u32 = 0xeee5dc;
const SAND: u32 = 0xf5e9c6;
// Developed landuse
const RESIDENTIAL: u32 = 0xccb18b;
const COMMERCIAL: u32 = 0xd195b6;
const INDUSTRIAL: u32 = 0xb7b8cc;
const RETAIL: u32 = 0xffe285;
const EDUCATION: u32 = 0xe39ccf;
const MILITARY: u32 = 0x93a65b;
const CEMETERY: u32 = 0x8acb94;
const SPORT: u32 = 0x8bccb3;
// Defaults
const BUILDING: u32 = 0xd9d0c9;
const BUILDING_STROKE: u32 = 0xc4b6ab;
const ROAD: u32 = 0x404040;
const PATH_COLOR: u32 = 0xcccccc;
const BARRIER: u32 = 0xc4a484;
const DEFAULT_LANDUSE: u32 = 0xf2f2f2;

fn rgb(hex: u32) -> Color {
    Color::from_rgba8((hex >> 16) as u8, (hex >> 8) as u8, hex as u8, 255)
}

fn tag_is(feature: &OsmFeature, key: &str, value: &str) -> bool {
    feature.tags.get(key).is_some_and(|v| v == value)
}

fn tag_in(feature: &OsmFeature, key: &str, values: &[&str]) -> bool {
    feature
        .tags
        .get(key)
        .is_some_and(|v| values.contains(&v.as_str()))
}

/// Cartographic fill color for a feature, evaluated as an ordered rule
/// ladder. Falls through to the neutral landuse color.
pub(crate) fn feature_color(feature: &OsmFeature) -> u32 {
    // Vegetation
    if tag_is(feature, "landuse", "forest") || tag_in(feature, "natural", &["wood", "tree_row"]) {
        return FOREST;
    }
    if tag_in(feature, "natural", &["scrub", "tundra", "fell"]) {
        return SCRUB;
    }
    if tag_is(feature, "natural", "heath") {
        return HEATH;
    }
    if tag_in(feature, "landuse", &["grass", "meadow", "village_green", "allotments"])
        || tag_is(feature, "natural", "grassland")
        || tag_in(feature, "leisure", &["park", "garden", "common"])
    {
        return GRASS;
    }
    if tag_in(feature, "landuse", &["orchard", "vineyard", "plant_nursery"]) {
        return ORCHARD;
    }
    if tag_in(feature, "landuse", &["farmland", "greenhouse_horticulture", "farm"]) {
        return FARMLAND;
    }

    // Water
    if tag_is(feature, "natural", "water")
        || feature.tags.contains_key("waterway")
        || tag_in(feature, "landuse", &["reservoir", "basin", "salt_pond"])
        || tag_is(feature, "natural", "reef")
    {
        return WATER;
    }
    if tag_in(feature, "natural", &["wetland", "marsh"]) || tag_is(feature, "landuse", "wetland") {
        return WETLAND;
    }
    if tag_is(feature, "natural", "glacier") || tag_is(feature, "landuse", "glacier") {
        return GLACIER;
    }
    if tag_is(feature, "natural", "mud") || tag_is(feature, "landuse", "mud") {
        return MUD;
    }

    // Bare ground
    if tag_in(feature, "natural", &["bare_rock", "scree", "blockfield", "shingle"]) {
        return BARE;
    }
    if tag_in(feature, "natural", &["sand", "beach", "shoal"])
        || tag_is(feature, "landuse", "desert")
    {
        return SAND;
    }

    // Developed landuse
    if tag_is(feature, "landuse", "education")
        || tag_in(feature, "amenity", &["school", "university", "college", "kindergarten"])
    {
        return EDUCATION;
    }
    if tag_in(feature, "landuse", &["industrial", "quarry", "landfill", "construction", "railway"])
        || tag_in(feature, "power", &["sub_station", "generator"])
    {
        return INDUSTRIAL;
    }
    if tag_is(feature, "landuse", "residential") {
        return RESIDENTIAL;
    }
    if tag_is(feature, "landuse", "commercial") || tag_is(feature, "amenity", "office") {
        return COMMERCIAL;
    }
    if tag_is(feature, "landuse", "retail")
        || feature.tags.contains_key("shop")
        || tag_is(feature, "amenity", "marketplace")
    {
        return RETAIL;
    }
    if tag_is(feature, "landuse", "military") || feature.tags.contains_key("military") {
        return MILITARY;
    }
    if tag_is(feature, "landuse", "cemetery") || tag_is(feature, "amenity", "grave_yard") {
        return CEMETERY;
    }
    if tag_in(
        feature,
        "leisure",
        &["golf_course", "playground", "sports_centre", "track", "pitch", "stadium"],
    ) {
        return SPORT;
    }

    DEFAULT_LANDUSE
}

/// Supersampling factor: scale the grid up toward the target resolution,
/// never below 1.
pub fn scale_factor(grid_width: usize) -> u32 {
    scale_factor_for(grid_width, TARGET_RESOLUTION)
}

fn scale_factor_for(grid_width: usize, target: u32) -> u32 {
    (f64::from(target) / grid_width as f64).ceil().max(1.0) as u32
}

struct TexturePainter {
    proj: LocalProjection,
    half_w: f64,
    half_h: f64,
    scale: f64,
    pixmap: Pixmap,
}

impl TexturePainter {
    fn new(data: &TerrainData, target: u32) -> Result<Self> {
        let scale = scale_factor_for(data.height_map.width, target);
        let width = data.height_map.width as u32 * scale;
        let height = data.height_map.height as u32 * scale;
        let pixmap = Pixmap::new(width, height).ok_or(Error::RasterAlloc { width, height })?;
        Ok(Self {
            proj: LocalProjection::new(data.bounds.center())?,
            half_w: data.height_map.width as f64 / 2.0,
            half_h: data.height_map.height as f64 / 2.0,
            scale: f64::from(scale),
            pixmap,
        })
    }

    fn to_pixel(&self, p: LatLng) -> Option<(f32, f32)> {
        let (x, y) = self.proj.forward(p).ok()?;
        Some((
            ((x + self.half_w) * self.scale) as f32,
            ((self.half_h - y) * self.scale) as f32,
        ))
    }

    fn add_ring(&self, pb: &mut PathBuilder, points: &[LatLng], close: bool) {
        if points.len() < 2 {
            return;
        }
        let Some(start) = self.to_pixel(points[0]) else {
            return;
        };
        pb.move_to(start.0, start.1);
        for p in &points[1..] {
            let Some(px) = self.to_pixel(*p) else {
                return;
            };
            pb.line_to(px.0, px.1);
        }
        if close {
            pb.close();
        }
    }

    fn polyline_path(&self, points: &[LatLng]) -> Option<Path> {
        let mut pb = PathBuilder::new();
        self.add_ring(&mut pb, points, false);
        pb.finish()
    }

    /// Outer ring plus hole rings as closed subpaths, for even-odd filling.
    fn polygon_path(&self, feature: &OsmFeature) -> Option<Path> {
        let mut pb = PathBuilder::new();
        self.add_ring(&mut pb, &feature.geometry, true);
        for hole in &feature.holes {
            self.add_ring(&mut pb, hole, true);
        }
        pb.finish()
    }

    fn fill(&mut self, path: &Path, color: u32) {
        let mut paint = Paint::default();
        paint.set_color(rgb(color));
        paint.anti_alias = true;
        self.pixmap
            .fill_path(path, &paint, FillRule::EvenOdd, Transform::identity(), None);
    }

    fn stroke(&mut self, path: &Path, color: u32, width: f32) {
        let mut paint = Paint::default();
        paint.set_color(rgb(color));
        paint.anti_alias = true;
        let stroke = Stroke {
            width,
            line_cap: LineCap::Round,
            line_join: LineJoin::Round,
            ..Stroke::default()
        };
        self.pixmap
            .stroke_path(path, &paint, &stroke, Transform::identity(), None);
    }

    fn circle(&mut self, center: LatLng, radius: f32, color: u32) {
        let Some((x, y)) = self.to_pixel(center) else {
            return;
        };
        let mut pb = PathBuilder::new();
        pb.push_circle(x, y, radius);
        if let Some(path) = pb.finish() {
            self.fill(&path, color);
        }
    }

    fn encode(self) -> Result<Vec<u8>> {
        self.pixmap
            .encode_png()
            .map_err(|e| Error::TextureEncode(e.to_string()))
    }
}

fn draw_roads(painter: &mut TexturePainter, features: &[OsmFeature]) {
    let scale = painter.scale as f32;
    for feature in features.iter().filter(|f| f.kind == FeatureKind::Road) {
        let Some(path) = painter.polyline_path(&feature.geometry) else {
            continue;
        };
        let highway = feature.tags.get("highway").map(String::as_str);
        match highway {
            Some("footway") | Some("path") | Some("pedestrian") | Some("cycleway")
            | Some("steps") | Some("track") => {
                painter.stroke(&path, PATH_COLOR, 2.0 * scale);
            }
            Some("motorway") | Some("trunk") => painter.stroke(&path, ROAD, 8.0 * scale),
            Some("primary") | Some("secondary") => painter.stroke(&path, ROAD, 6.0 * scale),
            _ => painter.stroke(&path, ROAD, 4.0 * scale),
        }
    }
}

fn draw_buildings(painter: &mut TexturePainter, features: &[OsmFeature]) {
    let scale = painter.scale as f32;
    for feature in features.iter().filter(|f| f.kind == FeatureKind::Building) {
        let Some(path) = painter.polygon_path(feature) else {
            continue;
        };
        let specific = feature_color(feature);
        let fill = if specific != DEFAULT_LANDUSE {
            specific
        } else {
            BUILDING
        };
        painter.fill(&path, fill);
        painter.stroke(&path, BUILDING_STROKE, 0.5 * scale);
    }
}

fn draw_barriers(painter: &mut TexturePainter, features: &[OsmFeature]) {
    let scale = painter.scale as f32;
    for feature in features.iter().filter(|f| f.kind == FeatureKind::Barrier) {
        if let Some(path) = painter.polyline_path(&feature.geometry) {
            painter.stroke(&path, BARRIER, 1.0 * scale);
        }
    }
}

/// Pure vector-style texture: background, landcover, water, roads,
/// buildings, barriers. The draw order matters; later categories occlude
/// earlier ones.
pub fn render_vector_texture(data: &TerrainData) -> Result<Vec<u8>> {
    render_vector(data, TARGET_RESOLUTION)
}

fn render_vector(data: &TerrainData, target: u32) -> Result<Vec<u8>> {
    let mut painter = TexturePainter::new(data, target)?;
    painter.pixmap.fill(rgb(DEFAULT_LANDUSE));

    let scale = painter.scale as f32;
    for feature in data
        .features
        .iter()
        .filter(|f| f.kind == FeatureKind::Vegetation)
    {
        let color = feature_color(feature);
        if feature.geometry.len() == 1 {
            painter.circle(feature.geometry[0], 1.5 * scale, color);
        } else if let Some(path) = painter.polygon_path(feature) {
            painter.fill(&path, color);
        }
    }

    for feature in data
        .features
        .iter()
        .filter(|f| f.kind == FeatureKind::Water)
    {
        if let Some(path) = painter.polygon_path(feature) {
            painter.fill(&path, WATER);
        }
    }

    draw_roads(&mut painter, &data.features);
    draw_buildings(&mut painter, &data.features);
    draw_barriers(&mut painter, &data.features);

    painter.encode()
}

/// Satellite/vector hybrid: the satellite resample as background (solid
/// black when unavailable), then roads, buildings and barriers. Vegetation
/// is omitted since the imagery already shows it.
pub fn render_hybrid_texture(data: &TerrainData) -> Result<Vec<u8>> {
    render_hybrid(data, TARGET_RESOLUTION)
}

fn render_hybrid(data: &TerrainData, target: u32) -> Result<Vec<u8>> {
    let mut painter = TexturePainter::new(data, target)?;

    match satellite_pixmap(data) {
        Some(satellite) => {
            let scale = painter.scale as f32;
            painter.pixmap.draw_pixmap(
                0,
                0,
                satellite.as_ref(),
                &PixmapPaint::default(),
                Transform::from_scale(scale, scale),
                None,
            );
        }
        None => painter.pixmap.fill(Color::BLACK),
    }

    draw_roads(&mut painter, &data.features);
    draw_buildings(&mut painter, &data.features);
    draw_barriers(&mut painter, &data.features);

    painter.encode()
}

fn satellite_pixmap(data: &TerrainData) -> Option<Pixmap> {
    let bytes = data.satellite_texture.as_ref()?;
    let image = image::load_from_memory(bytes).ok()?.to_rgba8();
    let size = tiny_skia::IntSize::from_wh(image.width(), image.height())?;
    Pixmap::from_vec(image.into_raw(), size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::GeoBounds;
    use crate::grid::HeightGrid;

    fn feature(kind: FeatureKind, tags: &[(&str, &str)], geometry: Vec<LatLng>) -> OsmFeature {
        OsmFeature {
            id: "f".to_string(),
            kind,
            geometry,
            holes: Vec::new(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn small_data(features: Vec<OsmFeature>) -> TerrainData {
        TerrainData {
            height_map: HeightGrid::filled(64, 64, 0.0),
            bounds: GeoBounds {
                north: 40.0003,
                south: 39.9997,
                east: -99.9996,
                west: -100.0004,
            },
            min_height: 0.0,
            max_height: 0.0,
            satellite_texture: None,
            features,
            vector_texture: None,
            hybrid_texture: None,
            usgs_fallback: false,
        }
    }

    #[test]
    fn scale_factor_floors_at_one() {
        assert_eq!(scale_factor(512), 16);
        assert_eq!(scale_factor(8192), 1);
        assert_eq!(scale_factor(10000), 1);
        assert_eq!(scale_factor(5000), 2);
    }

    #[test]
    fn color_ladder_prefers_specific_rules() {
        let forest = feature(FeatureKind::Vegetation, &[("landuse", "forest")], vec![]);
        assert_eq!(feature_color(&forest), FOREST);

        let water = feature(FeatureKind::Water, &[("natural", "water")], vec![]);
        assert_eq!(feature_color(&water), WATER);

        let plain = feature(FeatureKind::Building, &[("building", "yes")], vec![]);
        assert_eq!(feature_color(&plain), DEFAULT_LANDUSE);

        let school = feature(
            FeatureKind::Building,
            &[("building", "yes"), ("amenity", "school")],
            vec![],
        );
        assert_eq!(feature_color(&school), EDUCATION);
    }

    #[test]
    fn vector_texture_renders_to_png() {
        let square = vec![
            LatLng::new(39.9998, -100.0002),
            LatLng::new(39.9998, -99.9998),
            LatLng::new(40.0002, -99.9998),
            LatLng::new(40.0002, -100.0002),
        ];
        let data = small_data(vec![
            feature(FeatureKind::Building, &[("building", "yes")], square),
            feature(
                FeatureKind::Road,
                &[("highway", "residential")],
                vec![LatLng::new(40.0, -100.0003), LatLng::new(40.0, -99.9997)],
            ),
            feature(
                FeatureKind::Vegetation,
                &[("natural", "tree")],
                vec![LatLng::new(40.0001, -100.0001)],
            ),
        ]);
        let png = render_vector(&data, 128).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn hybrid_texture_without_satellite_is_black_backed() {
        let data = small_data(Vec::new());
        let png = render_hybrid(&data, 128).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn empty_feature_list_still_renders() {
        let data = small_data(Vec::new());
        assert!(render_vector(&data, 128).is_ok());
    }
}
