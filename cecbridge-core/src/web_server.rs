//! HTTP surfaces: the captive setup portal served from the hotspot, and the
//! admin panel served next to the bridge loop.

use crate::provisioner::{self, NetworkProvisioner};
use crate::store::StateStore;
use crate::structs::{BridgeConfig, ConnectionRequest, SaveRequest};
use crate::traits::{SpeakerRegistry, SystemControl, UiAssetProvider};
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const SETUP_LOG_LINES: usize = 50;
const ADMIN_LOG_LINES: usize = 100;
const FACTORY_RESET_REBOOT_DELAY: Duration = Duration::from_secs(2);

/// Everything the setup portal handlers need.
pub struct SetupState {
    pub provisioner: Arc<NetworkProvisioner>,
    pub state: StateStore,
    pub system: Arc<dyn SystemControl>,
    pub frontend: Arc<dyn UiAssetProvider>,
    /// Where captive-portal probes are sent, e.g. `http://192.168.4.1/`.
    pub portal_url: String,
    pub reboot_delay: Duration,
}

/// Everything the admin panel handlers need.
pub struct AdminState {
    pub speakers: Arc<dyn SpeakerRegistry>,
    pub state: StateStore,
    pub system: Arc<dyn SystemControl>,
    pub frontend: Arc<dyn UiAssetProvider>,
    pub discovery_timeout: Duration,
}

/// Routes served on the hotspot while in AP mode.
pub fn setup_router(state: Arc<SetupState>) -> Router {
    Router::new()
        .route("/", get(setup_index))
        .route("/index.html", get(setup_index))
        .route("/hotspot-detect.html", get(apple_probe))
        .route("/library/test/success.html", get(apple_probe))
        .route("/generate_204", get(portal_redirect))
        .route("/gen_204", get(portal_redirect))
        .route("/ncsi.txt", get(portal_redirect))
        .route("/connecttest.txt", get(portal_redirect))
        .route("/success.txt", get(portal_redirect))
        .route("/redirect", get(portal_redirect))
        .route("/canonical.html", get(portal_redirect))
        .route("/api/networks", get(api_networks))
        .route("/api/speakers", get(api_speakers))
        .route("/api/wifi-creds", get(api_wifi_creds))
        .route("/api/logs", get(api_setup_logs))
        .route("/api/test-wifi-and-scan", post(api_test_wifi_and_scan))
        .route("/api/test-volume", post(api_test_volume))
        .route("/api/save", post(api_save))
        .route("/{*path}", get(setup_asset))
        .with_state(state)
}

/// Routes served alongside the CEC loop in bridge mode.
pub fn admin_router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/", get(admin_index))
        .route("/index.html", get(admin_index))
        .route("/setup", get(admin_setup_page))
        .route("/api/admin/status", get(api_admin_status))
        .route("/api/logs", get(api_admin_logs))
        .route("/api/admin/test-volume", post(api_admin_test_volume))
        .route("/api/admin/scan-speakers", post(api_admin_scan_speakers))
        .route("/api/admin/save-settings", post(api_admin_save_settings))
        .route("/api/admin/restart", post(api_admin_restart))
        .route("/api/admin/factory-reset", post(api_admin_factory_reset))
        .route("/{*path}", get(admin_asset))
        .with_state(state)
}

/// Serve `app` on `addr` until `shutdown` resolves.
pub async fn serve<F>(app: Router, addr: SocketAddr, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("🌐 Web server listening on {}", addr);
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| crate::Error::WebServer(e.into()))
}

/// Spawn a server that runs for the life of the process. A failure to bind
/// or serve is logged here, since nothing waits on the handle.
pub fn start_web_server(app: Router, addr: SocketAddr) -> JoinHandle<crate::Result<()>> {
    tokio::spawn(async move {
        let result = serve(app, addr, std::future::pending()).await;
        if let Err(e) = &result {
            tracing::error!("Web server on {} stopped: {}", addr, e);
        }
        result
    })
}

/// Reboot after `delay`, giving the HTTP reply time to leave the box.
fn schedule_reboot(system: Arc<dyn SystemControl>, delay: Duration) {
    tracing::info!("Rebooting in {} seconds...", delay.as_secs());
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = system.reboot().await {
            tracing::error!("Reboot failed: {}", e.detail());
        }
    });
}

// --- Shared helpers ---

async fn serve_asset(frontend: &dyn UiAssetProvider, path: &str) -> Response {
    match frontend.get_asset(path).await {
        Ok((data, mime)) => (
            [(header::CONTENT_TYPE, mime), (header::CACHE_CONTROL, "no-cache".to_string())],
            Body::from(data),
        )
            .into_response(),
        Err(_) => (StatusCode::NOT_FOUND, format!("Asset not found: {}", path)).into_response(),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

async fn log_page(state: &StateStore, lines: usize) -> Html<String> {
    Html(format!(
        "<html><head><meta name=\"viewport\" content=\"width=device-width\"><title>Logs</title></head>\
         <body style=\"background:#1a1a2e;color:#0f0;font-family:monospace;font-size:12px;padding:10px;white-space:pre-wrap;\">{}</body></html>",
        escape_html(&state.tail_log(lines).await)
    ))
}

#[derive(Debug, Default, Deserialize)]
struct VolumeTestRequest {
    #[serde(default, alias = "ip")]
    address: String,
}

fn outcome(result: crate::Result<()>) -> Json<serde_json::Value> {
    match result {
        Ok(()) => Json(json!({ "success": true })),
        Err(e) => Json(json!({ "success": false, "error": e.detail() })),
    }
}

// --- Setup portal handlers ---

type SetupCtx = State<Arc<SetupState>>;

async fn setup_index(State(state): SetupCtx) -> Response {
    serve_asset(state.frontend.as_ref(), "setup/index.html").await
}

async fn setup_asset(State(state): SetupCtx, Path(path): Path<String>) -> Response {
    serve_asset(state.frontend.as_ref(), &path).await
}

/// Apple devices open the portal sheet unless they see their "Success" page.
async fn apple_probe(State(state): SetupCtx) -> Html<String> {
    Html(format!(
        "<html><head><meta http-equiv=\"refresh\" content=\"0;url={}\"></head></html>",
        state.portal_url
    ))
}

async fn portal_redirect(State(state): SetupCtx) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, state.portal_url.clone())]).into_response()
}

async fn api_networks(State(state): SetupCtx) -> impl IntoResponse {
    Json(state.state.load_scan().await)
}

async fn api_speakers(State(state): SetupCtx) -> impl IntoResponse {
    Json(state.state.load_speakers().await)
}

async fn api_wifi_creds(State(state): SetupCtx) -> impl IntoResponse {
    Json(state.state.load_wifi_creds().await)
}

async fn api_setup_logs(State(state): SetupCtx) -> Html<String> {
    log_page(&state.state, SETUP_LOG_LINES).await
}

/// Blocks for the whole workflow; the hotspot is down for most of it.
async fn api_test_wifi_and_scan(State(state): SetupCtx, Json(request): Json<ConnectionRequest>) -> impl IntoResponse {
    Json(state.provisioner.test_and_scan(&request.ssid, &request.password).await)
}

async fn api_test_volume(State(state): SetupCtx, Json(request): Json<VolumeTestRequest>) -> impl IntoResponse {
    if request.address.is_empty() {
        return Json(json!({ "success": false, "error": "No IP provided" }));
    }
    outcome(state.provisioner.test_volume(&request.address).await)
}

async fn api_save(
    State(state): SetupCtx,
    request: std::result::Result<Json<SaveRequest>, JsonRejection>,
) -> impl IntoResponse {
    let request = match request {
        Ok(Json(request)) if !request.ssid.is_empty() && !request.speaker_address.trim().is_empty() => request,
        Ok(_) => return Json(json!({ "success": false, "error": "Missing required fields" })),
        Err(rejection) => {
            tracing::warn!("Rejected setup body: {}", rejection.body_text());
            return Json(json!({ "success": false, "error": "Missing required fields" }));
        }
    };
    match state.provisioner.commit(&request).await {
        Ok(()) => {
            schedule_reboot(state.system.clone(), state.reboot_delay);
            Json(json!({ "success": true }))
        }
        Err(e) => {
            tracing::error!("Failed to save setup: {}", e.detail());
            Json(json!({ "success": false, "error": e.detail() }))
        }
    }
}

// --- Admin panel handlers ---

type AdminCtx = State<Arc<AdminState>>;

async fn admin_index(State(state): AdminCtx) -> Response {
    serve_asset(state.frontend.as_ref(), "admin/index.html").await
}

async fn admin_setup_page(State(state): AdminCtx) -> Response {
    serve_asset(state.frontend.as_ref(), "setup/index.html").await
}

async fn admin_asset(State(state): AdminCtx, Path(path): Path<String>) -> Response {
    serve_asset(state.frontend.as_ref(), &path).await
}

async fn api_admin_status(State(state): AdminCtx) -> impl IntoResponse {
    let config = state.state.load_config().await;
    Json(json!({
        "service_status": state.system.service_status().await,
        "speaker_name": config.speaker_name,
        "speaker_address": config.speaker_address,
        "hdmi_port": config.hdmi_port,
        "mode": "bridge",
    }))
}

async fn api_admin_logs(State(state): AdminCtx) -> Html<String> {
    log_page(&state.state, ADMIN_LOG_LINES).await
}

async fn api_admin_test_volume(State(state): AdminCtx) -> impl IntoResponse {
    let config = state.state.load_config().await;
    let Some(address) = config.speaker() else {
        return Json(json!({ "success": false, "error": "No speaker configured" }));
    };
    outcome(provisioner::test_volume(state.speakers.as_ref(), address).await)
}

async fn api_admin_scan_speakers(State(state): AdminCtx) -> impl IntoResponse {
    match state.speakers.discover(state.discovery_timeout).await {
        Ok(speakers) => Json(json!({ "speakers": speakers })),
        Err(e) => Json(json!({ "speakers": [], "error": e.detail() })),
    }
}

#[derive(Debug, Deserialize)]
struct AdminSettingsRequest {
    #[serde(default, alias = "speaker_ip")]
    speaker_address: Option<String>,
    #[serde(default)]
    speaker_name: Option<String>,
    #[serde(default)]
    hdmi_port: Option<String>,
}

async fn api_admin_save_settings(
    State(state): AdminCtx,
    Json(request): Json<AdminSettingsRequest>,
) -> impl IntoResponse {
    let config = BridgeConfig {
        speaker_address: request.speaker_address,
        speaker_name: request.speaker_name,
        hdmi_port: request.hdmi_port,
        ..state.state.load_config().await
    };
    outcome(state.state.save_config(&config).await)
}

async fn api_admin_restart(State(state): AdminCtx) -> impl IntoResponse {
    tracing::info!("Restart requested from admin panel");
    outcome(state.system.restart_service().await)
}

async fn api_admin_factory_reset(State(state): AdminCtx) -> impl IntoResponse {
    tracing::warn!("Factory reset requested from admin panel");
    if let Err(e) = state.state.clear_config().await {
        tracing::error!("Could not remove configuration: {}", e);
    }
    schedule_reboot(state.system.clone(), FACTORY_RESET_REBOOT_DELAY);
    Json(json!({ "success": true }))
}
