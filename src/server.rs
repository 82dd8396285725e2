//! HTTP API for rendering, footprints, KMZ export and replay frames

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::assets::ImageLoader;
use crate::calibration::CalibrationTransform;
use crate::config::Config;
use crate::error::MapError;
use crate::export::{download_name, encode_image, kmz, to_data_uri, OutputFormat};
use crate::geo::{CornerSet, Route};
use crate::header::HeaderFont;
use crate::playback::{PlaybackFrame, PlaybackSession};
use crate::render::{draw_route, get_corners};

const KMZ_MIME: &str = "application/vnd.google-earth.kmz";

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Arc<RwLock<Config>>,
    /// Path the configuration was loaded from
    config_path: PathBuf,
    /// Decoder for uploaded map images; shared by render workers, locked
    /// exclusively only for teardown
    loader: RwLock<ImageLoader>,
    /// Banner font, shared with render workers
    font: Option<Arc<HeaderFont>>,
}

impl AppState {
    pub fn new(config: Arc<RwLock<Config>>, config_path: PathBuf, font: Option<HeaderFont>) -> Self {
        let mut loader = ImageLoader::new();
        loader.init();
        Self {
            config,
            config_path,
            loader: RwLock::new(loader),
            font: font.map(Arc::new),
        }
    }

    /// Save configuration to file
    pub fn save_config(&self) -> Result<()> {
        let config = self.config.read();
        config.save(&self.config_path)
    }

    /// Release decoder resources
    pub fn shutdown(&self) {
        self.loader.write().teardown();
    }
}

/// Error body returned by every endpoint
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<MapError> for ApiError {
    fn from(e: MapError) -> Self {
        let status = if e.is_input_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::internal(format!("render task failed: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{}", self.message);
        } else {
            tracing::debug!("Rejected request: {}", self.message);
        }
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Build the router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.read().server.max_body_bytes();

    Router::new()
        .route("/api/info", get(get_info))
        .route("/api/config", get(get_config).put(update_config))
        .route("/api/render", post(render_map))
        .route("/api/corners", post(corners_footprint))
        .route("/api/kmz", post(export_kmz))
        .route("/api/replay/frame", post(replay_frame))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Server information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    max_dimension: u32,
    header_height: u32,
    header_text: bool,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    let config = state.config.read();

    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        max_dimension: config.render.max_dimension,
        header_height: config.header.height,
        header_text: state.font.is_some(),
    })
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<Config> {
    Json(state.config.read().clone())
}

/// Replace the configuration and persist it. Server settings only take
/// effect after a restart.
async fn update_config(
    State(state): State<Arc<AppState>>,
    Json(new_config): Json<Config>,
) -> ApiResult<Json<Config>> {
    *state.config.write() = new_config;
    state
        .save_config()
        .map_err(|e| ApiError::internal(format!("failed to save configuration: {:#}", e)))?;
    tracing::info!("Configuration updated via API");
    Ok(Json(state.config.read().clone()))
}

fn default_true() -> bool {
    true
}

/// Request to draw a route onto a map image
#[derive(Deserialize)]
pub struct RenderRequest {
    /// Map image as a data URI
    pub image: String,
    /// `lat,lon` x4, TL TR BR BL
    pub corners: String,
    #[serde(default)]
    pub route: Route,
    #[serde(default)]
    pub include_header: bool,
    #[serde(default = "default_true")]
    pub include_route: bool,
    #[serde(default)]
    pub name: Option<String>,
    /// Client sequence number, echoed back
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Serialize)]
pub struct RenderResponse {
    pub seq: Option<u64>,
    /// Rendered image as a data URI
    pub image: String,
    pub width: u32,
    pub height: u32,
    /// Geographic footprint of the rendered image
    pub corners: CornerSet,
    pub filename: String,
}

async fn render_map(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RenderRequest>,
) -> ApiResult<Json<RenderResponse>> {
    let corners: CornerSet = req.corners.parse()?;
    let (options, format, quality) = {
        let config = state.config.read();
        (
            config.render_options(req.include_header, req.include_route),
            config.output.format,
            config.output.jpeg_quality,
        )
    };
    tracing::info!(
        "Render request: {} byte image, {} route points, header={}",
        req.image.len(),
        req.route.len(),
        req.include_header
    );

    let font = state.font.clone();
    let route = req.route;
    let uri = req.image;
    let worker_state = state.clone();
    let (rendered, footprint) = tokio::task::spawn_blocking(move || {
        let image = worker_state.loader.read().decode_data_uri(&uri)?;
        let rendered = draw_route(&image, &corners, &route, &options, font.as_deref())?;
        let footprint = get_corners(image.dimensions(), &corners, &route, &options)?;
        Ok::<_, MapError>((rendered, footprint))
    })
    .await??;

    let bytes = encode_image(&rendered.image, format, quality)?;
    let name = req.name.as_deref().unwrap_or("map");
    Ok(Json(RenderResponse {
        seq: req.seq,
        image: to_data_uri(&bytes, format),
        width: rendered.image.width(),
        height: rendered.image.height(),
        corners: footprint,
        filename: download_name(name, &footprint, req.include_route),
    }))
}

/// Request for the footprint of a render without drawing it
#[derive(Deserialize)]
pub struct CornersRequest {
    pub width: u32,
    pub height: u32,
    pub corners: String,
    #[serde(default)]
    pub route: Route,
    #[serde(default)]
    pub include_header: bool,
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Serialize)]
pub struct CornersResponse {
    pub seq: Option<u64>,
    pub corners: CornerSet,
    /// Footprint in corner string form, rounded to 5 decimals
    pub corners_string: String,
}

async fn corners_footprint(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CornersRequest>,
) -> ApiResult<Json<CornersResponse>> {
    let corners: CornerSet = req.corners.parse()?;
    let options = state.config.read().render_options(req.include_header, true);
    let footprint = get_corners((req.width, req.height), &corners, &req.route, &options)?;
    Ok(Json(CornersResponse {
        seq: req.seq,
        corners: footprint,
        corners_string: footprint.rounded().to_string(),
    }))
}

#[derive(Deserialize)]
pub struct KmzRequest {
    pub name: String,
    /// Image to package, as a data URI
    pub image: String,
    pub corners: String,
}

async fn export_kmz(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KmzRequest>,
) -> ApiResult<Response> {
    let corners: CornerSet = req.corners.parse()?;
    let quality = state.config.read().output.jpeg_quality;

    let worker_state = state.clone();
    let (name, uri) = (req.name.clone(), req.image);
    let package = tokio::task::spawn_blocking(move || {
        let image = worker_state.loader.read().decode_data_uri(&uri)?;
        let jpeg = encode_image(&image, OutputFormat::Jpeg, quality)?;
        kmz(&name, &corners, &jpeg)
    })
    .await??;
    tracing::info!("Exported KMZ {:?} ({} bytes)", req.name, package.len());

    Ok(([(header::CONTENT_TYPE, KMZ_MIME)], package).into_response())
}

#[derive(Deserialize)]
pub struct ReplayFrameRequest {
    pub width: u32,
    pub height: u32,
    pub corners: String,
    pub route: Route,
    /// 0 to 100
    pub progress: f64,
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Serialize)]
pub struct ReplayFrameResponse {
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub frame: PlaybackFrame,
}

async fn replay_frame(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplayFrameRequest>,
) -> ApiResult<Json<ReplayFrameResponse>> {
    let corners: CornerSet = req.corners.parse()?;
    let options = state.config.read().playback.options();
    let transform = CalibrationTransform::new(req.width, req.height, &corners, 0.0)?;
    let mut session = PlaybackSession::from_route(&req.route, transform, options)?;
    session.set_progress(req.progress);
    Ok(Json(ReplayFrameResponse {
        seq: req.seq,
        frame: session.frame()?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::RoutePoint;
    use axum::body::Body;
    use axum::http::Request;
    use image::{Rgba, RgbaImage};
    use tower::ServiceExt;

    const CORNERS: &str = "45.01,6,45.01,6.01,45,6.01,45,6";

    fn state() -> Arc<AppState> {
        state_with(Config::default())
    }

    fn state_with(config: Config) -> Arc<AppState> {
        let config = Arc::new(RwLock::new(config));
        Arc::new(AppState::new(config, PathBuf::from("unused.toml"), None))
    }

    fn padded_render_body(padding: usize) -> Body {
        let body = serde_json::json!({
            "image": map_uri(),
            "corners": CORNERS,
            "padding": "x".repeat(padding),
        });
        Body::from(body.to_string())
    }

    async fn post_render(app: Router, body: Body) -> StatusCode {
        let request = Request::post("/api/render")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        app.oneshot(request).await.unwrap().status()
    }

    fn map_uri() -> String {
        let img = RgbaImage::from_pixel(60, 40, Rgba([90, 120, 90, 255]));
        let png = encode_image(&img, OutputFormat::Png, 80).unwrap();
        to_data_uri(&png, OutputFormat::Png)
    }

    fn route() -> Route {
        Route::new(vec![
            RoutePoint::timed(0, 45.002, 6.002),
            RoutePoint::timed(30_000, 45.005, 6.005),
            RoutePoint::timed(60_000, 45.008, 6.004),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_render_echoes_seq_and_footprint() {
        let req = RenderRequest {
            image: map_uri(),
            corners: CORNERS.to_string(),
            route: route(),
            include_header: true,
            include_route: true,
            name: Some("leg".to_string()),
            seq: Some(7),
        };
        let Json(resp) = render_map(State(state()), Json(req)).await.ok().unwrap();
        assert_eq!(resp.seq, Some(7));
        assert_eq!((resp.width, resp.height), (60, 110));
        assert!(resp.image.starts_with("data:image/jpeg;base64,"));
        assert!(resp.filename.starts_with("leg_45.0"));
        assert!(resp.corners.top_left.lat > 45.01);
    }

    #[tokio::test]
    async fn test_uploads_over_two_megabytes_are_accepted() {
        let status = post_render(router(state()), padded_render_body(3 * 1024 * 1024)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_limit_follows_config() {
        let mut config = Config::default();
        config.server.max_upload_mb = 1;
        let status = post_render(router(state_with(config)), padded_render_body(2 * 1024 * 1024)).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_config_update_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapcal.toml");
        let config = Arc::new(RwLock::new(Config::default()));
        let state = Arc::new(AppState::new(config, path.clone(), None));

        let mut changed = Config::default();
        changed.render.max_dimension = 1234;
        let Json(resp) = update_config(State(state.clone()), Json(changed)).await.ok().unwrap();
        assert_eq!(resp.render.max_dimension, 1234);
        assert_eq!(state.config.read().render.max_dimension, 1234);

        let saved = Config::load_or_create(&path).unwrap();
        assert_eq!(saved.render.max_dimension, 1234);
    }

    #[tokio::test]
    async fn test_bad_corners_are_client_errors() {
        let req = CornersRequest {
            width: 60,
            height: 40,
            corners: "1,2,3".to_string(),
            route: Route::empty(),
            include_header: false,
            seq: None,
        };
        let err = corners_footprint(State(state()), Json(req)).await.err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_corners_without_route_match_input() {
        let req = CornersRequest {
            width: 60,
            height: 40,
            corners: CORNERS.to_string(),
            route: Route::empty(),
            include_header: false,
            seq: Some(1),
        };
        let Json(resp) = corners_footprint(State(state()), Json(req)).await.ok().unwrap();
        assert_eq!(resp.corners_string, CORNERS);
    }

    #[tokio::test]
    async fn test_replay_frame() {
        let req = ReplayFrameRequest {
            width: 60,
            height: 40,
            corners: CORNERS.to_string(),
            route: route(),
            progress: 50.0,
            seq: Some(3),
        };
        let Json(resp) = replay_frame(State(state()), Json(req)).await.ok().unwrap();
        assert_eq!(resp.seq, Some(3));
        assert_eq!(resp.frame.time_ms, 30_000);
        assert!(resp.frame.marker.is_some());
        assert_eq!(resp.frame.tail.len(), 2);
    }

    #[tokio::test]
    async fn test_replay_of_empty_route_is_rejected() {
        let req = ReplayFrameRequest {
            width: 60,
            height: 40,
            corners: CORNERS.to_string(),
            route: Route::empty(),
            progress: 0.0,
            seq: None,
        };
        let err = replay_frame(State(state()), Json(req)).await.err().unwrap();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }
}
