use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orogen::{LatLng, Pipeline, SourceConfig, TerrainRequest};

/// Generate a textured 3D terrain model (binary glTF) for a geographic
/// point of interest.
#[derive(Parser)]
#[command(name = "orogen", version, about)]
struct Args {
    /// Latitude of the tile center, in degrees
    #[arg(long, allow_hyphen_values = true)]
    lat: f64,

    /// Longitude of the tile center, in degrees
    #[arg(long, allow_hyphen_values = true)]
    lng: f64,

    /// Output grid size: cells per side and meters of extent (1 m per cell)
    #[arg(long, default_value_t = 512)]
    size: usize,

    /// Fetch vector map features and bake them into geometry and textures
    #[arg(long)]
    features: bool,

    /// Prefer USGS 1 m DEM elevation where available
    #[arg(long)]
    usgs: bool,

    /// GPXZ API key; defaults to the GPXZ_API_KEY environment variable
    #[arg(long)]
    gpxz_key: Option<String>,

    /// Output directory
    #[arg(long, default_value = ".")]
    out: PathBuf,

    /// Also write the synthesized textures next to the model
    #[arg(long)]
    textures: bool,

    /// Seed for building-height jitter, for reproducible models
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let gpxz_key = args
        .gpxz_key
        .clone()
        .or_else(|| std::env::var("GPXZ_API_KEY").ok());

    let mut request = TerrainRequest::new(LatLng::new(args.lat, args.lng), args.size);
    request.include_features = args.features;
    request.use_usgs = args.usgs;
    request.use_gpxz = gpxz_key.is_some();
    request.gpxz_api_key = gpxz_key;

    let pipeline = Pipeline::new(SourceConfig::default()).into_diagnostic()?;
    let data = pipeline
        .fetch_terrain(&request, |stage| info!("{stage}"))
        .await
        .into_diagnostic()?;

    if data.usgs_fallback {
        eprintln!("note: USGS 1 m DEM unavailable for this area, used global tiles");
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let scene = orogen::scene::build_scene(&data, &mut rng).into_diagnostic()?;
    let glb = orogen::export::write_glb(&scene).into_diagnostic()?;

    std::fs::create_dir_all(&args.out).into_diagnostic()?;
    let model_path = args.out.join(orogen::export::artifact_name_today());
    std::fs::write(&model_path, &glb).into_diagnostic()?;

    if args.textures {
        if let Some(jpeg) = &data.satellite_texture {
            std::fs::write(args.out.join("satellite.jpg"), jpeg).into_diagnostic()?;
        }
        if let Some(png) = &data.vector_texture {
            std::fs::write(args.out.join("vector.png"), png).into_diagnostic()?;
        }
        if let Some(png) = &data.hybrid_texture {
            std::fs::write(args.out.join("hybrid.png"), png).into_diagnostic()?;
        }
    }

    println!(
        "wrote {} ({} features, heights {:.1}..{:.1} m)",
        model_path.display(),
        data.features.len(),
        data.min_height,
        data.max_height,
    );
    Ok(())
}
