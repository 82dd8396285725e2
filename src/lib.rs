//! mapcal - calibrate map images against geographic corners and draw GPS
//! routes onto them
//!
//! A map image is bound to the earth by the latitude/longitude of its four
//! pixel corners. Points are projected to spherical Web Mercator and mapped
//! to pixels through a four-point homography; routes are then drawn as a
//! speed-colored path with an outline and time ticks, optionally under an
//! informational banner, and the result can be exported as a KMZ overlay.

pub mod archive;
pub mod assets;
pub mod calibration;
pub mod color;
pub mod config;
pub mod error;
pub mod export;
pub mod geo;
pub mod header;
pub mod layers;
pub mod playback;
pub mod projection;
pub mod render;
pub mod server;
pub mod track;
pub mod transform;

pub use archive::{Position, PositionArchive};
pub use calibration::CalibrationTransform;
pub use error::{MapError, Result};
pub use geo::{CornerSet, GeoPoint, PlanarPoint, Route, RoutePoint};
pub use render::{draw_route, get_corners, RenderOptions, RenderedMap};
pub use transform::Homography;
