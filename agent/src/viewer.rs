use std::sync::Arc;

use accident_watch_common::config::{LocationConfig, ServerConfig};
use accident_watch_common::frame::is_artifact_name;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::store::{ImageStore, StoreError};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct ViewerState {
    store: ImageStore,
    latitude: f64,
    longitude: f64,
    refresh_secs: u32,
}

impl ViewerState {
    fn map_url(&self) -> String {
        format!(
            "https://www.google.com/maps?q={},{}",
            self.latitude, self.longitude
        )
    }
}

pub fn router(store: ImageStore, location: &LocationConfig, server: &ServerConfig) -> Router {
    let state = Arc::new(ViewerState {
        store,
        latitude: location.latitude,
        longitude: location.longitude,
        refresh_secs: server.refresh_secs,
    });

    Router::new()
        .route("/", get(gallery))
        .route("/images/:filename", get(serve_image))
        .route("/location", get(location_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET / — gallery of all captured images, newest first, auto-refreshing.
async fn gallery(State(state): State<Arc<ViewerState>>) -> impl IntoResponse {
    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || store.list()).await;

    match result {
        Ok(Ok(mut names)) => {
            // Stray files in the directory are not artifacts; skip them.
            names.retain(|n| is_artifact_name(n));
            // Artifact names encode capture time, so reverse-lexicographic
            // order is newest-first.
            names.sort_unstable_by(|a, b| b.cmp(a));
            Html(render_gallery(&names, &state)).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "failed to list image store");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /images/:filename — raw JPEG bytes, 404 on missing or traversal names.
async fn serve_image(
    State(state): State<Arc<ViewerState>>,
    AxumPath(filename): AxumPath<String>,
) -> impl IntoResponse {
    let store = state.store.clone();
    let name = filename.clone();
    let result = tokio::task::spawn_blocking(move || store.read(&name)).await;

    match result {
        Ok(Ok(bytes)) => {
            ([(header::CONTENT_TYPE, "image/jpeg")], bytes).into_response()
        }
        Ok(Err(StoreError::NotFound(_))) => StatusCode::NOT_FOUND.into_response(),
        Ok(Err(e)) => {
            error!(error = %e, filename, "failed to read image");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(e) => {
            error!(error = %e, "spawn_blocking failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /location — static camera coordinates with a map link.
async fn location_page(State(state): State<Arc<ViewerState>>) -> Html<String> {
    let mut page = String::from(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>Camera Location</title>\n<style>",
    );
    page.push_str(PAGE_STYLE);
    page.push_str("</style>\n</head>\n<body>\n<h1>Camera Location</h1>\n");
    page.push_str(&format!(
        "<h2>Latitude: {}</h2>\n<h2>Longitude: {}</h2>\n\
         <a href=\"{}\" target=\"_blank\" class=\"button\">Open in Maps</a>\n",
        state.latitude,
        state.longitude,
        state.map_url()
    ));
    page.push_str("</body>\n</html>\n");
    Html(page)
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

const PAGE_STYLE: &str = "\
body {
    font-family: 'Arial', sans-serif;
    background-color: #222222;
    color: #fff;
    text-align: center;
    margin: 0;
    padding: 0;
    min-height: 100vh;
}
h1 { font-size: 50px; color: #e74c3c; margin-bottom: 20px; }
h2 { font-size: 30px; color: #f39c12; }
.gallery {
    display: grid;
    grid-template-columns: repeat(auto-fill, minmax(300px, 1fr));
    gap: 20px;
    padding: 20px;
    max-width: 90%;
    margin: 0 auto;
}
.gallery div {
    overflow: hidden;
    border-radius: 10px;
    box-shadow: 0 4px 8px rgba(0, 0, 0, 0.2);
    background-color: #333;
    padding: 10px;
    text-align: center;
}
.gallery img {
    width: 100%;
    height: auto;
    max-height: 200px;
    object-fit: cover;
    transition: transform 0.3s ease;
}
.gallery div:hover img { transform: scale(1.1); }
.button {
    margin-top: 10px;
    padding: 8px 12px;
    background-color: #3498db;
    color: #fff;
    text-decoration: none;
    border-radius: 5px;
    font-size: 16px;
    display: inline-block;
}
.button:hover { background-color: #2980b9; }
.footer { position: fixed; bottom: 10px; color: #7f8c8d; font-size: 14px; }
";

fn render_gallery(names: &[String], state: &ViewerState) -> String {
    let map_url = state.map_url();

    let mut page = String::from(
        "<!doctype html>\n<html lang=\"en\">\n<head>\n\
         <meta charset=\"UTF-8\">\n\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
         <title>Accident Alert</title>\n<style>",
    );
    page.push_str(PAGE_STYLE);
    page.push_str("</style>\n");
    page.push_str(&format!(
        "<meta http-equiv=\"refresh\" content=\"{}\">\n",
        state.refresh_secs
    ));
    page.push_str(
        "</head>\n<body>\n\
         <h1>&#128680; Accident Alert! &#128680;</h1>\n\
         <h2>Real-Time Accident Detection</h2>\n\
         <div class=\"gallery\">\n",
    );

    for name in names {
        // Names normally come from our own artifact naming, but anything
        // dropped into the directory ends up here — escape it.
        let name = escape_html(name);
        page.push_str(&format!(
            "<div>\n\
             <img src=\"/images/{name}\" alt=\"{name}\">\n\
             <p>{name}</p>\n\
             <a href=\"{map_url}\" target=\"_blank\" class=\"button\">Accident Location</a>\n\
             </div>\n"
        ));
    }

    page.push_str(
        "</div>\n\
         <div class=\"footer\"><p>accident-watch</p></div>\n\
         </body>\n</html>\n",
    );
    page
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
