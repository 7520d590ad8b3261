use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use armada_common::ServiceKind;

use crate::registry::{SelectionRequirements, ServiceRegistry};
use crate::strategy::Strategy;

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<ServiceRegistry>,
    pub default_strategy: Strategy,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorDetail {
            code: code.to_string(),
            message: message.to_string(),
            request_id: format!("req_{}", Uuid::new_v4()),
        },
    };
    (status, Json(body)).into_response()
}

/// Read-only view of the registry for runtime consumers.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/services", get(list_services))
        .route("/v1/services/:id", get(get_service))
        .route("/v1/select/:kind", get(select_service))
        .route("/v1/summary", get(summary))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    kind: Option<String>,
}

async fn list_services(State(st): State<ApiState>, Query(q): Query<ListQuery>) -> Response {
    match q.kind.as_deref() {
        None => Json(st.registry.list()).into_response(),
        Some(raw) => match raw.parse::<ServiceKind>() {
            Ok(kind) => Json(st.registry.list_by_kind(kind)).into_response(),
            Err(e) => error_response(StatusCode::BAD_REQUEST, "invalid_kind", &e.to_string()),
        },
    }
}

async fn get_service(State(st): State<ApiState>, Path(id): Path<String>) -> Response {
    match st.registry.get(&id) {
        Some(inst) => Json(inst).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_found", "service instance not found"),
    }
}

async fn summary(State(st): State<ApiState>) -> Response {
    let body: serde_json::Map<String, serde_json::Value> = st
        .registry
        .summary()
        .into_iter()
        .map(|(kind, s)| (kind.as_str().to_string(), json!(s)))
        .collect();
    Json(body).into_response()
}

#[derive(Debug, Deserialize)]
struct SelectQuery {
    strategy: Option<String>,
    min_free_vram_mb: Option<u64>,
    model: Option<String>,
    max_load: Option<f64>,
    host: Option<String>,
}

async fn select_service(
    State(st): State<ApiState>,
    Path(kind): Path<String>,
    Query(q): Query<SelectQuery>,
) -> Response {
    let kind = match kind.parse::<ServiceKind>() {
        Ok(k) => k,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "invalid_kind", &e.to_string()),
    };
    let strategy = match q.strategy.as_deref().map(str::parse::<Strategy>) {
        None => st.default_strategy,
        Some(Ok(s)) => s,
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, "invalid_strategy", &e),
    };
    let req = SelectionRequirements {
        min_free_vram_mb: q.min_free_vram_mb,
        model: q.model,
        max_load: q.max_load,
        host: q.host,
    };
    match st.registry.select_instance(kind, &req, strategy) {
        Some(inst) => Json(inst).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "no_instance",
            "no healthy instance meets the requirements",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_common::{HealthStatus, ServiceCapabilities, ServiceInstance};

    async fn serve(registry: Arc<ServiceRegistry>) -> String {
        let app = router(ApiState {
            registry,
            default_strategy: Strategy::LeastLoaded,
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn registry() -> Arc<ServiceRegistry> {
        let reg = ServiceRegistry::in_memory();
        for (host, models, load) in [("10.0.0.1", 3, 0.2), ("10.0.0.2", 1, 0.9)] {
            let mut s = ServiceInstance::new(ServiceKind::Ollama, host, 11434);
            s.health_status = HealthStatus::Healthy;
            s.current_load = load;
            s.capabilities = ServiceCapabilities::with_models((0..models).map(|i| format!("m{i}")).collect());
            reg.register(s).unwrap();
        }
        Arc::new(reg)
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let base = serve(registry()).await;
        let all: Vec<ServiceInstance> = reqwest::get(format!("{base}/v1/services"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let one = reqwest::get(format!("{base}/v1/services/ollama_10.0.0.2_11434")).await.unwrap();
        assert_eq!(one.status(), 200);
        let missing = reqwest::get(format!("{base}/v1/services/nope")).await.unwrap();
        assert_eq!(missing.status(), 404);

        let bad = reqwest::get(format!("{base}/v1/services?kind=bogus")).await.unwrap();
        assert_eq!(bad.status(), 400);
    }

    #[tokio::test]
    async fn test_select_endpoint() {
        let base = serve(registry()).await;
        let best: ServiceInstance = reqwest::get(format!("{base}/v1/select/ollama?strategy=capability_based"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(best.host, "10.0.0.1");

        let none = reqwest::get(format!("{base}/v1/select/ollama?max_load=0.1")).await.unwrap();
        assert_eq!(none.status(), 404);
        let body: serde_json::Value = none.json().await.unwrap();
        assert_eq!(body["error"]["code"], "no_instance");

        let bad = reqwest::get(format!("{base}/v1/select/ollama?strategy=random")).await.unwrap();
        assert_eq!(bad.status(), 400);
    }
}
