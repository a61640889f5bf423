use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io {0}")]
    Io(#[from] std::io::Error),
    #[error("http {0}")]
    Http(#[from] reqwest::Error),
    #[error("json {0}")]
    Json(#[from] serde_json::Error),
    #[error("geotiff {0}")]
    Tiff(#[from] tiff::TiffError),
    #[error("image {0}")]
    Image(#[from] image::ImageError),
    #[error("projection {0}")]
    Proj(#[from] proj4rs::errors::Error),
    #[error("no projection definition for EPSG:{0}")]
    ProjDefinition(u32),
    #[error("malformed GeoTIFF: {0}")]
    Geotiff(&'static str),
    #[error("raster allocation failed ({width}x{height})")]
    RasterAlloc { width: u32, height: u32 },
    #[error("texture encode {0}")]
    TextureEncode(String),
    #[error("scene exceeds binary container limits")]
    SceneTooLarge,
}

pub type Result<T> = std::result::Result<T, Error>;
