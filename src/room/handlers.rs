use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, Method},
    response::{Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

use super::models::{human_size, FileEntry, HistoryEntry, PendingFile};
use crate::event::RoomEvent;
use crate::identity::resolve_user;
use crate::shared::{AppError, AppState};
use crate::websockets::websocket_handler;

/// Builds the full application router over the shared state.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/create", post(create_room))
        .route("/join", post(join_room))
        .route("/j/:code", get(join_via_link))
        .route("/room/:code", get(room_page))
        .route("/upload/:code", post(upload_files))
        .route("/download/:code/:index", get(download_file))
        .route("/download_all/:code", get(download_all))
        .route("/destroy/:code", post(destroy_room))
        .route("/health", get(health))
        .route("/ws/:code", get(websocket_handler))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "service": "fileroom",
        "status": "ok",
    }))
}

/// POST /create — creates a room and redirects its creator into it.
#[instrument(name = "create_room", skip(state, jar))]
async fn create_room(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    let code = state.registry.create_room(Utc::now())?;
    let (user, jar) = resolve_user(jar);

    state.registry.append_history(&code, &user, "created room");
    info!(room_code = %code, user = %user, "Room created");

    Ok((jar, Redirect::to(&format!("/room/{}", code))))
}

#[derive(Debug, Deserialize)]
struct JoinForm {
    code: String,
}

/// POST /join — joins an existing room by code from a form field.
#[instrument(name = "join_room", skip(state, jar, form))]
async fn join_room(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<JoinForm>,
) -> Result<(CookieJar, Redirect), AppError> {
    let code = form.code.trim().to_string();
    join_checked(&state, jar, &code, "joined room")
}

/// GET /j/{code} — direct join links (QR codes).
#[instrument(name = "join_via_link", skip(state, jar))]
async fn join_via_link(
    State(state): State<AppState>,
    Path(code): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), AppError> {
    join_checked(&state, jar, &code, "joined via link")
}

fn join_checked(
    state: &AppState,
    jar: CookieJar,
    code: &str,
    action: &str,
) -> Result<(CookieJar, Redirect), AppError> {
    if !state.registry.room_exists(code) {
        warn!(room_code = %code, "Join attempt for unknown room");
        return Err(AppError::NotFound("Invalid or expired code".to_string()));
    }

    let (user, jar) = resolve_user(jar);
    state.registry.append_history(code, &user, action);
    info!(room_code = %code, user = %user, action, "User joined room");

    Ok((jar, Redirect::to(&format!("/room/{}", code))))
}

#[derive(Debug, Serialize)]
struct FileView {
    index: usize,
    original_name: String,
    size: u64,
    size_display: String,
    kind: String,
    sender: String,
}

impl From<FileEntry> for FileView {
    fn from(entry: FileEntry) -> Self {
        Self {
            index: entry.index,
            original_name: entry.original_name,
            size: entry.size,
            size_display: human_size(entry.size),
            kind: entry.kind,
            sender: entry.sender,
        }
    }
}

#[derive(Debug, Serialize)]
struct RoomView {
    code: String,
    files: Vec<FileView>,
    history: Vec<HistoryEntry>,
    remaining_seconds: u64,
    current_user: String,
}

/// GET /room/{code} — the room's current state for rendering.
#[instrument(name = "room_page", skip(state, jar))]
async fn room_page(
    State(state): State<AppState>,
    Path(code): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<RoomView>), AppError> {
    let snapshot = state
        .registry
        .snapshot(&code, state.config.room_ttl, Utc::now())
        .ok_or_else(|| AppError::NotFound("Room not found or expired".to_string()))?;

    let (user, jar) = resolve_user(jar);

    Ok((
        jar,
        Json(RoomView {
            code: snapshot.code,
            files: snapshot.files.into_iter().map(FileView::from).collect(),
            history: snapshot.history,
            remaining_seconds: snapshot.remaining_seconds,
            current_user: user.0,
        }),
    ))
}

/// POST /upload/{code} — accepts one or more `file` parts.
///
/// Bytes hit the disk before the registry lock is taken; metadata for all
/// parts of the request is then appended in one atomic step. A failing part
/// is logged and skipped, never aborting its siblings. Missing rooms and
/// empty uploads redirect silently with no changes.
#[instrument(name = "upload_files", skip(state, jar, multipart))]
async fn upload_files(
    State(state): State<AppState>,
    Path(code): Path<String>,
    jar: CookieJar,
    mut multipart: Multipart,
) -> Result<(CookieJar, Redirect), AppError> {
    if !state.registry.room_exists(&code) {
        warn!(room_code = %code, "Upload to unknown room");
        return Ok((jar, Redirect::to("/")));
    }

    let (user, jar) = resolve_user(jar);
    let room_redirect = Redirect::to(&format!("/room/{}", code));

    let mut pending: Vec<PendingFile> = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                // Parts already written for this request never reached the
                // registry, so no destroy or sweep would ever delete them
                let orphaned: Vec<String> =
                    pending.into_iter().map(|p| p.stored_name).collect();
                warn!(
                    room_code = %code,
                    orphaned = orphaned.len(),
                    error = %e,
                    "Malformed multipart body, discarding saved parts"
                );
                state.store.delete_all(&orphaned).await;
                return Err(AppError::Validation(format!(
                    "Malformed multipart body: {}",
                    e
                )));
            }
        };
        if field.name() != Some("file") {
            continue;
        }
        let original_name = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        let bytes = match field.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(room_code = %code, file = %original_name, error = %e, "Failed to read part");
                continue;
            }
        };

        match state.store.save(&code, &original_name, &bytes).await {
            Ok(saved) => pending.push(PendingFile {
                original_name,
                stored_name: saved.stored_name,
                size: saved.size,
                sender: user.0.clone(),
            }),
            Err(e) => {
                warn!(room_code = %code, file = %original_name, error = %e, "Failed to save part");
            }
        }
    }

    if pending.is_empty() {
        warn!(room_code = %code, "No valid files in upload");
        return Ok((jar, room_redirect));
    }

    match state.registry.append_files(&code, pending.clone()) {
        Some(appended) => {
            state.registry.append_history(
                &code,
                &user,
                &format!("sent {} file(s)", appended.len()),
            );
            info!(room_code = %code, count = appended.len(), "Files uploaded");

            state
                .event_bus
                .publish(
                    &code,
                    RoomEvent::FilesAdded {
                        files: appended,
                        sender: user.0.clone(),
                    },
                )
                .await;
        }
        None => {
            // Room destroyed while we were writing; the destroyer's deletion
            // list never saw these names, so clean them up here
            let orphaned: Vec<String> = pending.into_iter().map(|p| p.stored_name).collect();
            warn!(room_code = %code, count = orphaned.len(), "Room vanished mid-upload");
            state.store.delete_all(&orphaned).await;
            return Ok((jar, Redirect::to("/")));
        }
    }

    Ok((jar, room_redirect))
}

/// GET /download/{code}/{index} — streams one file as an attachment under
/// its original name. Metadata is copied out under the registry lock; the
/// bytes stream outside it.
#[instrument(name = "download_file", skip(state, jar))]
async fn download_file(
    State(state): State<AppState>,
    Path((code, index)): Path<(String, usize)>,
    jar: CookieJar,
) -> Result<(CookieJar, Response), AppError> {
    let entry = state
        .registry
        .get_file(&code, index)
        .ok_or_else(|| AppError::NotFound("File not found".to_string()))?;

    let (user, jar) = resolve_user(jar);

    state.registry.append_history(
        &code,
        &user,
        &format!("downloaded: {}", entry.original_name),
    );
    state
        .event_bus
        .publish(
            &code,
            RoomEvent::FileDownloaded {
                filename: entry.original_name.clone(),
                user: user.0.clone(),
            },
        )
        .await;

    // A destroy racing this download may have removed the bytes already;
    // that surfaces as NotFound here, which is the documented outcome
    let (file, len) = state.store.open(&entry.stored_name).await?;
    info!(room_code = %code, file = %entry.original_name, size = len, "File downloaded");

    let body = Body::from_stream(ReaderStream::new(file));
    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            attachment_header(&entry.original_name),
        )
        .body(body)
        .map_err(|_| AppError::Internal)?;

    Ok((jar, response))
}

/// GET /download_all/{code} — a deflate zip of every file in the room,
/// entries named by their original names.
#[instrument(name = "download_all", skip(state, jar))]
async fn download_all(
    State(state): State<AppState>,
    Path(code): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Response), AppError> {
    let files = state
        .registry
        .list_files(&code)
        .ok_or_else(|| AppError::NotFound("Room not found".to_string()))?;

    if files.is_empty() {
        return Err(AppError::NotFound("No files to download".to_string()));
    }

    let (user, jar) = resolve_user(jar);

    // The file list is a snapshot; a concurrent destroy only makes entries
    // go missing on disk, which zip_all skips and logs
    let entries: Vec<(String, String)> = files
        .into_iter()
        .map(|f| (f.stored_name, f.original_name))
        .collect();
    let archive = state.store.zip_all(entries).await?;

    state
        .registry
        .append_history(&code, &user, "downloaded all files");
    info!(room_code = %code, bytes = archive.len(), "Zip export downloaded");

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            attachment_header(&format!("files_{}.zip", code)),
        )
        .body(Body::from(archive))
        .map_err(|_| AppError::Internal)?;

    Ok((jar, response))
}

/// POST /destroy/{code} — immediate room destruction.
#[instrument(name = "destroy_room", skip(state))]
async fn destroy_room(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Redirect, AppError> {
    // Whoever removes the room from the registry owns the file deletions;
    // losing the race to a sweep means nothing further to do
    if let Some(stored_names) = state.registry.destroy_room(&code) {
        let deleted = state.store.delete_all(&stored_names).await;
        info!(room_code = %code, deleted, "Room destroyed and files deleted");

        state
            .event_bus
            .publish(&code, RoomEvent::RoomDestroyed {})
            .await;
        state.event_bus.remove_room(&code).await;
    }

    Ok(Redirect::to("/"))
}

/// GET /health — liveness probe.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "rooms": state.registry.room_count(),
        "uptime_secs": state.uptime_secs(),
    }))
}

fn attachment_header(filename: &str) -> String {
    format!("attachment; filename=\"{}\"", filename.replace('"', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::test_utils::AppStateBuilder;
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt; // for `oneshot`

    fn test_state(dir: &TempDir) -> AppState {
        AppStateBuilder::new()
            .with_storage_root(dir.path().to_path_buf())
            .build()
    }

    fn router(state: AppState) -> Router {
        build_router(state)
    }

    #[tokio::test]
    async fn test_create_room_redirects_and_sets_cookie() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/create")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let location = response.headers().get(header::LOCATION).unwrap();
        let location = location.to_str().unwrap();
        assert!(location.starts_with("/room/"));

        let cookie = response.headers().get(header::SET_COOKIE).unwrap();
        assert!(cookie.to_str().unwrap().contains("user_id=user_"));

        let code = location.trim_start_matches("/room/");
        assert!(state.registry.room_exists(code));
    }

    #[tokio::test]
    async fn test_join_unknown_room_is_404() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/join")
                    .header(
                        header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(Body::from("code=000000"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_join_existing_room_redirects() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/join")
                    .header(
                        header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(Body::from(format!("code={}", code)))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            &format!("/room/{}", code)
        );
    }

    #[tokio::test]
    async fn test_join_via_link() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/j/{}", code))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let snap = state
            .registry
            .snapshot(&code, std::time::Duration::from_secs(900), Utc::now())
            .unwrap();
        assert_eq!(snap.history.last().unwrap().action, "joined via link");
    }

    #[tokio::test]
    async fn test_room_page_shape() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/room/{}", code))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(view["code"], code);
        assert!(view["files"].as_array().unwrap().is_empty());
        assert!(view["remaining_seconds"].as_u64().unwrap() <= 900);
        assert!(view["current_user"].as_str().unwrap().starts_with("user_"));
    }

    #[tokio::test]
    async fn test_room_page_uses_configured_ttl() {
        let dir = TempDir::new().unwrap();
        let state = AppStateBuilder::new()
            .with_storage_root(dir.path().to_path_buf())
            .with_room_ttl(std::time::Duration::from_secs(60))
            .build();
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/room/{}", code))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let view: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let remaining = view["remaining_seconds"].as_u64().unwrap();
        assert!(remaining <= 60, "remaining {} exceeds the 60s ttl", remaining);
        assert!(remaining > 55);
    }

    #[tokio::test]
    async fn test_room_page_unknown_room_is_404() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/room/000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_bad_index_is_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/download/{}/0", code))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_download_all_empty_room_is_404() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/download_all/{}", code))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_destroy_unknown_room_still_redirects_home() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/destroy/000000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers().get(header::LOCATION).unwrap(), "/");
    }

    #[tokio::test]
    async fn test_health_shape() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["rooms"], 1);
        assert!(health["uptime_secs"].is_u64());
    }

    #[tokio::test]
    async fn test_ws_subscribe_unknown_room_is_404() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ws/000000")
                    .header(header::CONNECTION, "upgrade")
                    .header(header::UPGRADE, "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_live_room_without_upgradable_connection_is_426() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let code = state.registry.create_room(Utc::now()).unwrap();
        let app = router(state);

        // Upgrade headers are present but the connection cannot actually be
        // upgraded, so the handshake rejection passes through untouched
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/ws/{}", code))
                    .header(header::CONNECTION, "upgrade")
                    .header(header::UPGRADE, "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[test]
    fn test_attachment_header_escapes_quotes() {
        assert_eq!(
            attachment_header("my \"file\".txt"),
            "attachment; filename=\"my _file_.txt\""
        );
    }
}
