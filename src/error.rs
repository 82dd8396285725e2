//! Error type shared by the calibration, rendering and archive modules

pub type Result<T> = std::result::Result<T, MapError>;

#[derive(thiserror::Error, Debug)]
pub enum MapError {
    /// Corner quadrilateral is degenerate or the transform is not invertible
    #[error("invalid calibration: {0}")]
    InvalidCalibration(String),

    /// Coordinate cannot be projected (non-finite or pole-adjacent)
    #[error("invalid coordinate: lat={lat}, lon={lon}")]
    InvalidCoordinate { lat: f64, lon: f64 },

    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("position archive is empty")]
    EmptyArchive,

    /// Malformed corner string or filename
    #[error("invalid corners: {0}")]
    InvalidCorners(String),

    #[error("image loader error: {0}")]
    Loader(String),

    /// Raster surface could not be created or read back
    #[error("render error: {0}")]
    Render(String),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    TimeFormat(#[from] time::error::Format),
}

impl MapError {
    pub fn calibration(msg: impl Into<String>) -> Self {
        Self::InvalidCalibration(msg.into())
    }

    pub fn route(msg: impl Into<String>) -> Self {
        Self::InvalidRoute(msg.into())
    }

    pub fn corners(msg: impl Into<String>) -> Self {
        Self::InvalidCorners(msg.into())
    }

    pub fn loader(msg: impl Into<String>) -> Self {
        Self::Loader(msg.into())
    }

    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render(msg.into())
    }

    /// True for errors caused by caller input rather than I/O or encoding
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCalibration(_)
                | Self::InvalidCoordinate { .. }
                | Self::InvalidRoute(_)
                | Self::EmptyArchive
                | Self::InvalidCorners(_)
                | Self::Loader(_)
        )
    }
}
