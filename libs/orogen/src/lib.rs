//! orogen turns a geographic point of interest into a textured, geometrically
//! accurate 3D terrain model enriched with vector map features.
//!
//! The pipeline fetches elevation from a chain of remote sources (GPXZ, the
//! USGS 1 m DEM catalog, global terrarium tiles) and satellite imagery,
//! resamples everything into a metric grid through a local tangent-plane
//! projection, reconstructs and clips vector map features from an Overpass
//! endpoint, then synthesizes procedural meshes and ground textures and
//! exports the lot as a binary glTF scene.
//!
//! ```no_run
//! use orogen::{LatLng, Pipeline, SourceConfig, TerrainRequest};
//!
//! # async fn run() -> orogen::Result<()> {
//! let pipeline = Pipeline::new(SourceConfig::default())?;
//! let mut request = TerrainRequest::new(LatLng::new(40.0, -100.0), 512);
//! request.include_features = true;
//! let data = pipeline.fetch_terrain(&request, |stage| eprintln!("{stage}")).await?;
//!
//! let mut rng = rand::thread_rng();
//! let scene = orogen::scene::build_scene(&data, &mut rng)?;
//! let glb = orogen::export::write_glb(&scene)?;
//! # let _ = glb;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod export;
pub mod geo;
pub mod geotiff;
pub mod grid;
pub mod osm;
pub mod pipeline;
pub mod proj;
pub mod resample;
pub mod scene;
pub mod sources;
pub mod texture;

pub use error::{Error, Result};
pub use geo::{GeoBounds, LatLng};
pub use grid::{ColorGrid, HeightGrid, NO_DATA};
pub use osm::{FeatureKind, OsmFeature};
pub use pipeline::{Pipeline, TerrainData, TerrainRequest};
pub use sources::SourceConfig;
