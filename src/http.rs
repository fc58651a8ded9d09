//! ==============================================================================
//! http.rs - web surface
//! ==============================================================================
//!
//! routes:
//!     POST /envirodata   device ingestion; answers 200 or 400, nothing else
//!     GET  /api/readings merged view (json)
//!     GET  /api/charts   one chart spec per field (json)
//!     GET  /api/manual   manual table + version for the edit grid
//!     POST /api/manual   append one manual reading
//!     PUT  /api/manual   replace the manual table with the edited grid
//!     GET  /             plain html summary, or an error page
//!
//! relationships:
//!     - used by: main.rs (serve), tests/ (oneshot)
//!     - uses: service.rs, chart.rs
//!
//! ==============================================================================

use crate::chart;
use crate::editor::{EditError, ManualEntry, TableEdit};
use crate::service::{ReadingService, ReadingView};
use crate::store::StoreError;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(service: ReadingService) -> Router {
    Router::new()
        .route("/", get(summary_handler))
        .route("/envirodata", post(envirodata_handler))
        .route("/api/readings", get(readings_handler))
        .route("/api/charts", get(charts_handler))
        .route(
            "/api/manual",
            get(manual_table_handler)
                .post(manual_append_handler)
                .put(manual_replace_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

// ==============================================================================
// errors
// ==============================================================================

/// json error body: {"status": "error", "message": ...}
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let status = match e {
            StoreError::Unavailable(_) => StatusCode::BAD_GATEWAY,
            StoreError::Malformed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::Conflict { .. } => StatusCode::CONFLICT,
        };
        Self { status, message: e.to_string() }
    }
}

impl From<EditError> for ApiError {
    fn from(e: EditError) -> Self {
        match e {
            EditError::Store(e) => e.into(),
            other => Self {
                status: StatusCode::BAD_REQUEST,
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, "{}", self.message);
        } else {
            tracing::warn!(status = %self.status, "{}", self.message);
        }
        let body = serde_json::json!({"status": "error", "message": self.message});
        (self.status, Json(body)).into_response()
    }
}

// ==============================================================================
// ingestion
// ==============================================================================

/// POST /envirodata
/// the device only looks at the number, so the body repeats the status code
async fn envirodata_handler(State(service): State<ReadingService>, body: Bytes) -> (StatusCode, Json<u16>) {
    let status = match service.ingest(&body).await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!("enviro post rejected: {}", e);
            StatusCode::BAD_REQUEST
        }
    };
    (status, Json(status.as_u16()))
}

// ==============================================================================
// views
// ==============================================================================

async fn readings_handler(
    State(service): State<ReadingService>,
) -> Result<Json<ReadingView>, ApiError> {
    Ok(Json(service.view().await?))
}

async fn charts_handler(
    State(service): State<ReadingService>,
) -> Result<Json<Vec<chart::ChartSpec>>, ApiError> {
    let view = service.view().await?;
    Ok(Json(chart::charts(&view.merged)))
}

async fn summary_handler(State(service): State<ReadingService>) -> Html<String> {
    let view = match service.view().await {
        Ok(view) => view,
        Err(e) => {
            tracing::error!("failed to load readings: {}", e);
            return Html(error_page(&e.to_string()));
        }
    };

    let mut rows = String::new();
    for spec in chart::charts(&view.merged) {
        let latest = spec
            .points
            .last()
            .map(|p| format!("{} ({})", p.value, p.timestamp.format("%Y-%m-%d %H:%M")))
            .unwrap_or_else(|| "-".to_string());
        rows.push_str(&format!(
            "<tr><td style=\"color: {}\">{}</td><td>{}</td><td>{}</td><td>0 - {}</td></tr>\n",
            spec.color,
            html_escape(&spec.title),
            spec.points.len(),
            html_escape(&latest),
            spec.y_range[1],
        ));
    }

    let skipped = if view.rejected.is_empty() {
        String::new()
    } else {
        format!(
            "<p>{} stored rows could not be read and are not shown.</p>",
            view.rejected.len()
        )
    };

    Html(format!(
        r#"<!doctype html>
<html>
<head><title>garden readings</title></head>
<body style="font-family: system-ui; padding: 2rem;">
    <h1>garden readings</h1>
    <table>
        <tr><th>field</th><th>points</th><th>latest</th><th>axis</th></tr>
{}    </table>
    {}
</body>
</html>"#,
        rows, skipped
    ))
}

fn error_page(message: &str) -> String {
    format!(
        r#"<!doctype html>
<html>
<head><title>error</title></head>
<body style="font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee;">
    <h1 style="color: #ff6b6b;">readings unavailable</h1>
    <p>failed to load readings from the store:</p>
    <pre style="background: #16213e; padding: 1rem; border-radius: 8px; overflow-x: auto;">{}</pre>
</body>
</html>"#,
        html_escape(message)
    )
}

// ==============================================================================
// manual editor
// ==============================================================================

async fn manual_table_handler(
    State(service): State<ReadingService>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = service.manual_table().await?;
    let table = &snapshot.table;
    // rows as records, the same shape PUT takes back
    let rows: Vec<serde_json::Map<String, serde_json::Value>> = table
        .rows
        .iter()
        .map(|row| {
            table
                .columns
                .iter()
                .cloned()
                .zip(row.iter().cloned().map(serde_json::Value::String))
                .collect()
        })
        .collect();
    Ok(Json(serde_json::json!({
        "columns": table.columns,
        "rows": rows,
        "version": snapshot.version,
    })))
}

async fn manual_append_handler(
    State(service): State<ReadingService>,
    Json(entry): Json<ManualEntry>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let version = service.append_manual(&entry).await?;
    Ok(Json(serde_json::json!({"status": "ok", "version": version})))
}

async fn manual_replace_handler(
    State(service): State<ReadingService>,
    Json(edit): Json<TableEdit>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let version = service.replace_manual(&edit).await?;
    Ok(Json(serde_json::json!({"status": "ok", "version": version})))
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
     .replace('<', "&lt;")
     .replace('>', "&gt;")
     .replace('"', "&quot;")
}
