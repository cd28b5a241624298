use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{future, StreamExt};
use leaf_proto::DetectionResult;
use leaf_station::{ModeState, StartOutcome, StationError, VideoService};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, info, warn};

const FEED_BOUNDARY: &str = "frame";
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub video: Arc<VideoService>,
    pub snapshot_quality: u8,
}

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/capture_detect", post(capture_detect_handler))
        .route("/api/start_video", post(start_video_handler))
        .route("/api/stop_video", post(stop_video_handler))
        .route("/api/toggle_automatic_mode", post(toggle_automatic_mode_handler))
        .route("/api/get_automatic_detections", get(get_automatic_detections_handler))
        .route("/api/video_click", post(video_click_handler))
        .route("/api/detect_leaf", post(detect_leaf_handler))
        .route("/api/status", get(status_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/regions", get(regions_handler))
        .route("/api/recent", get(recent_handler))
        .route("/api/upload_detect", post(upload_detect_handler).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)))
        .route("/video_feed", get(video_feed_handler))
        .route("/images/*name", get(image_handler))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Station(StationError),
    BadRequest(String),
}

impl From<StationError> for ApiError {
    fn from(e: StationError) -> Self {
        ApiError::Station(e)
    }
}

fn status_for(e: &StationError) -> StatusCode {
    match e {
        StationError::InvalidRegion(_)
        | StationError::NotFound(_)
        | StationError::WrongMode(_)
        | StationError::InvalidImage(_) => StatusCode::BAD_REQUEST,
        StationError::MissingImage(_) => StatusCode::NOT_FOUND,
        StationError::NotRunning => StatusCode::CONFLICT,
        StationError::Cooldown(_) => StatusCode::TOO_MANY_REQUESTS,
        StationError::Classification(_) => StatusCode::BAD_GATEWAY,
        StationError::Device(_) | StationError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, msg) = match self {
            ApiError::Station(e) => (status_for(&e), e.to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
        };
        if code.is_server_error() {
            warn!("api: {} {}", code.as_u16(), msg);
        } else {
            debug!("api: {} {}", code.as_u16(), msg);
        }
        (code, Json(json!({ "status": "error", "error": msg }))).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Empty bodies deserialize as `T::default()`, so `curl -X POST` works.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid json body: {}", e)))
}

#[derive(Serialize)]
struct DetectionBody<'a> {
    status: &'static str,
    #[serde(flatten)]
    result: &'a DetectionResult,
}

fn detection_body(result: &DetectionResult) -> Response {
    let status = if result.is_error() { "error" } else { "success" };
    Json(DetectionBody { status, result }).into_response()
}

async fn capture_detect_handler(State(state): State<ApiState>) -> ApiResult {
    let res = state.video.capture_detect().await?;
    Ok(Json(json!({
        "status": "success",
        "disease": res.disease,
        "severity": res.severity,
        "confidence": res.confidence,
        "action": res.action,
    }))
    .into_response())
}

#[derive(Debug, Default, Deserialize)]
struct StartRequest {
    camera_index: Option<u32>,
}

async fn start_video_handler(State(state): State<ApiState>, body: Bytes) -> ApiResult {
    let req: StartRequest = parse_body(&body)?;
    let message = match state.video.start_video(req.camera_index).await? {
        StartOutcome::Started => "Video started",
        StartOutcome::AlreadyRunning => "Video already running",
    };
    Ok(Json(json!({ "status": "success", "message": message })).into_response())
}

async fn stop_video_handler(State(state): State<ApiState>) -> ApiResult {
    let message = if state.video.stop_video().await { "Video stopped" } else { "Video was not running" };
    Ok(Json(json!({ "status": "success", "message": message })).into_response())
}

async fn toggle_automatic_mode_handler(State(state): State<ApiState>) -> ApiResult {
    let mode = state.video.toggle_automatic_mode().await;
    let message = match mode {
        ModeState::Automatic => "Automatic mode enabled",
        ModeState::Manual => "Automatic mode disabled",
    };
    Ok(Json(json!({ "status": "success", "automatic_mode": mode.is_automatic(), "message": message })).into_response())
}

async fn get_automatic_detections_handler(State(state): State<ApiState>) -> ApiResult {
    let batch = state.video.get_automatic_detections()?;
    Ok(Json(json!({
        "status": "success",
        "detections": batch.results,
        "count": batch.results.len(),
        "tick": batch.tick,
    }))
    .into_response())
}

#[derive(Debug, Default, Deserialize)]
struct ClickRequest {
    x: Option<f64>,
    y: Option<f64>,
}

async fn video_click_handler(State(state): State<ApiState>, body: Bytes) -> ApiResult {
    let req: ClickRequest = parse_body(&body)?;
    let (Some(x), Some(y)) = (req.x, req.y) else {
        return Err(ApiError::BadRequest("x and y are required".into()));
    };
    let (region, count) = state.video.video_click(x, y)?;
    Ok(Json(json!({ "status": "success", "region": region, "region_count": count })).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct DetectLeafRequest {
    region_index: Option<u64>,
}

async fn detect_leaf_handler(State(state): State<ApiState>, body: Bytes) -> ApiResult {
    let req: DetectLeafRequest = parse_body(&body)?;
    let idx = req.region_index.ok_or_else(|| ApiError::BadRequest("region_index is required".into()))?;
    let res = state.video.detect_leaf(idx).await?;
    Ok(detection_body(&res))
}

async fn status_handler(State(state): State<ApiState>) -> ApiResult {
    let st = state.video.status();
    Ok(Json(json!({
        "status": "success",
        "running": st.running,
        "automatic_mode": st.mode.is_automatic(),
        "region_count": st.region_count,
        "frame_size": st.frame_size,
        "last_tick": st.last_tick,
        "detector": st.detector,
        "actuator": {
            "backend": st.actuator,
            "sprays": st.sprays,
            "alerts": st.alerts,
            "suppressed_sprays": st.suppressed_sprays,
            "last_action": st.last_action,
            "last_action_age_ms": st.last_action_age_ms,
            "last_error": st.last_actuator_error,
        },
    }))
    .into_response())
}

async fn snapshot_handler(State(state): State<ApiState>) -> ApiResult {
    let jpeg = state.video.snapshot_jpeg(state.snapshot_quality)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg"), (header::CACHE_CONTROL, "no-cache")], jpeg).into_response())
}

async fn regions_handler(State(state): State<ApiState>) -> ApiResult {
    let regions = state.video.regions()?;
    Ok(Json(json!({ "status": "success", "count": regions.len(), "regions": regions })).into_response())
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_handler(State(state): State<ApiState>, Query(q): Query<RecentQuery>) -> ApiResult {
    let limit = q.limit.unwrap_or(20).clamp(1, 500);
    let entries = state.video.recent(limit).await?;
    Ok(Json(json!({ "status": "success", "entries": entries })).into_response())
}

async fn upload_detect_handler(State(state): State<ApiState>, mut multipart: Multipart) -> ApiResult {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("image") {
            continue;
        }
        if field.file_name().map_or(false, str::is_empty) {
            return Err(ApiError::BadRequest("empty filename".into()));
        }
        let data = field.bytes().await.map_err(|e| ApiError::BadRequest(format!("reading upload: {}", e)))?;
        upload = Some(data);
        break;
    }
    let data = upload.ok_or_else(|| ApiError::BadRequest("no image file provided".into()))?;

    let up = state.video.upload_detect(&data).await?;
    let res = &up.result;
    info!("upload: {} bytes -> {}", data.len(), res.disease.as_deref().unwrap_or("-"));
    Ok(Json(json!({
        "status": "success",
        "disease": res.disease,
        "severity": res.severity,
        "class": if res.has_disease() { "infected" } else { "healthy" },
        "action": res.action,
        "duration_ms": 0,
        "image_url": up.image_name.map(|n| format!("/images/{}", n)),
    }))
    .into_response())
}

/// Live MJPEG stream of the running session. Ends when the session stops.
async fn video_feed_handler(State(state): State<ApiState>) -> ApiResult {
    let session = state.video.session()?;
    let quality = state.snapshot_quality;
    let period = Duration::from_millis(1000 / state.video.camera_fps().max(1) as u64);

    let parts = IntervalStream::new(tokio::time::interval(period))
        .then(move |_| {
            let session = session.clone();
            async move { session.read_frame().await.ok() }
        })
        .take_while(|frame| future::ready(frame.is_some()))
        .filter_map(move |frame| future::ready(frame.and_then(|f| f.to_jpeg(quality).ok())))
        .map(|jpeg| Ok::<_, Infallible>(mjpeg_part(&jpeg)));

    Ok((
        [
            (header::CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={}", FEED_BOUNDARY)),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Body::from_stream(parts),
    )
        .into_response())
}

fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FEED_BOUNDARY,
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn image_handler(State(state): State<ApiState>, Path(name): Path<String>) -> ApiResult {
    let data = state.video.image(&name).await?;
    Ok(([(header::CONTENT_TYPE, content_type_for(&name))], data).into_response())
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
