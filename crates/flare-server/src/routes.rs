//! HTTP routes for the Flare runtime server.
//!
//! Two specialize endpoints (the fixed-path original form and the v2 form
//! with an explicit load request) plus a catch-all invoke route: once the
//! process is specialized, every other request on any method and path is
//! dispatched to the loaded function.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use flare_core::{
    CompileOptions, Error, InvokeRequest, InvokeResponse, RuntimeLoader, SpecializationSlot,
};

/// Application state shared across handlers.
pub struct AppState {
    /// The process's one specialization.
    pub slot: SpecializationSlot,
    /// Package root used when a specialize request names no filepath.
    pub package_root: PathBuf,
    /// The process-wide loader; its resolver caches survive across
    /// specialize attempts.
    pub loader: RuntimeLoader,
}

impl AppState {
    pub fn new(
        package_root: impl Into<PathBuf>,
        options: CompileOptions,
    ) -> flare_core::Result<Self> {
        Ok(Self {
            slot: SpecializationSlot::new(),
            package_root: package_root.into(),
            loader: RuntimeLoader::new(options)?,
        })
    }
}

/// v2 specialize payload.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecializeRequest {
    /// Package root to load from; defaults to the configured package.
    #[serde(default)]
    pub filepath: Option<String>,
    /// Entry identifier: a module name, or `module.function`.
    #[serde(default)]
    pub function_name: Option<String>,
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_handler))
        .route("/specialize", post(specialize_v1_handler))
        .route("/v2/specialize", post(specialize_v2_handler))
        .fallback(invoke_handler)
        .with_state(state)
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// Original specialize form: no payload, load the configured package with
/// the build-time entry.
async fn specialize_v1_handler(State(state): State<Arc<AppState>>) -> Response {
    specialize(state, SpecializeRequest::default()).await
}

/// v2 specialize form: explicit load request.
async fn specialize_v2_handler(
    State(state): State<Arc<AppState>>,
    body: axum::extract::Json<SpecializeRequest>,
) -> Response {
    specialize(state, body.0).await
}

async fn specialize(state: Arc<AppState>, request: SpecializeRequest) -> Response {
    let package_root = request
        .filepath
        .map(PathBuf::from)
        .unwrap_or_else(|| state.package_root.clone());
    let entry = request.function_name;

    // Compilation and loading are blocking; keep the runtime free so
    // concurrent requests still get their fast failures.
    let task_state = state.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        task_state.slot.specialize(|| {
            let loaded = task_state.loader.load(&package_root, entry.as_deref())?;
            Ok(Arc::new(loaded) as Arc<dyn flare_core::Artifact>)
        })
    })
    .await;

    match outcome {
        Ok(Ok(())) => (StatusCode::OK, "function loaded\n").into_response(),
        Ok(Err(e)) => error_response(e),
        Err(join) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("specialize task failed: {}", join),
        )
            .into_response(),
    }
}

/// Catch-all invoke: any method, any path.
async fn invoke_handler(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let invoke = match into_invoke_request(request).await {
        Ok(invoke) => invoke,
        Err(response) => return response,
    };

    let outcome =
        tokio::task::spawn_blocking(move || state.slot.invoke(&invoke)).await;

    match outcome {
        Ok(Ok(response)) => into_http_response(response),
        Ok(Err(e)) => error_response(e),
        Err(join) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invoke task failed: {}", join),
        )
            .into_response(),
    }
}

async fn into_invoke_request(request: Request) -> Result<InvokeRequest, Response> {
    let (parts, body) = request.into_parts();

    let mut headers = HashMap::new();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            headers.insert(name.to_string(), value.to_string());
        }
    }

    let bytes = axum::body::to_bytes(body, usize::MAX).await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("cannot read request body: {}", e),
        )
            .into_response()
    })?;
    let body = String::from_utf8(bytes.to_vec()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "request body is not valid UTF-8".to_string(),
        )
            .into_response()
    })?;

    Ok(InvokeRequest {
        method: parts.method.to_string(),
        url: parts.uri.to_string(),
        headers,
        body,
    })
}

fn into_http_response(invoke: InvokeResponse) -> Response {
    let status =
        StatusCode::from_u16(invoke.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::builder().status(status);
    for (name, value) in &invoke.headers {
        response = response.header(name, value);
    }
    response
        .body(Body::from(invoke.body))
        .unwrap_or_else(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("malformed function response: {}", e),
            )
                .into_response()
        })
}

fn error_response(e: Error) -> Response {
    let status = match &e {
        Error::AlreadySpecialized | Error::SpecializeInProgress => StatusCode::CONFLICT,
        Error::NotSpecialized => StatusCode::INTERNAL_SERVER_ERROR,
        Error::Compile(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = match e.render_diagnostics() {
        Some(diagnostics) => format!("{}\n{}", e, diagnostics),
        None => e.to_string(),
    };
    tracing::warn!("request failed: {}", body);
    (status, body).into_response()
}
