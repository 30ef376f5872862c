//! HTTP surface: `POST /deployer` webhook endpoint and a health check.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::gate::Rejection;
use crate::pipeline::{DeployError, DeploymentOutcome, Pipeline};

pub const NOT_INTERESTED: &str = "Not interested";
pub const DEPLOYED: &str = "Artifact deployed";

pub struct AppState {
    pub pipeline: Pipeline,
    pub respond_with_body: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/deployer", post(deployer))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve `app` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "deployer listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health() -> &'static str {
    "ok"
}

async fn deployer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let outcome = state.pipeline.handle(&body, &headers).await;
    outcome_response(&outcome, state.respond_with_body)
}

/// Map an outcome to what the CI system sees. Only the status code carries
/// meaning for non-success paths; details go to the log.
pub fn outcome_response(outcome: &DeploymentOutcome, respond_with_body: bool) -> Response {
    match outcome {
        DeploymentOutcome::Deployed(_) if respond_with_body => {
            (StatusCode::OK, DEPLOYED).into_response()
        }
        DeploymentOutcome::Deployed(_) => StatusCode::OK.into_response(),
        DeploymentOutcome::Rejected(
            Rejection::NotApplicable { .. } | Rejection::NameMismatch { .. },
        ) => (StatusCode::OK, NOT_INTERESTED).into_response(),
        DeploymentOutcome::Rejected(Rejection::Unauthorized) => {
            StatusCode::FORBIDDEN.into_response()
        }
        DeploymentOutcome::Rejected(Rejection::MalformedPayload(_)) => {
            StatusCode::BAD_REQUEST.into_response()
        }
        DeploymentOutcome::Failed(DeployError::Ci(_)) => StatusCode::BAD_GATEWAY.into_response(),
        DeploymentOutcome::Failed(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::SwapError;
    use std::path::PathBuf;

    async fn body_of(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn deployed_with_and_without_body() {
        let outcome = DeploymentOutcome::Deployed(PathBuf::from("/srv/site"));
        assert_eq!(
            body_of(outcome_response(&outcome, true)).await,
            (StatusCode::OK, DEPLOYED.to_string())
        );
        assert_eq!(
            body_of(outcome_response(&outcome, false)).await,
            (StatusCode::OK, String::new())
        );
    }

    #[tokio::test]
    async fn rejections_map_to_statuses() {
        let cases = [
            (
                Rejection::NotApplicable {
                    kind: Some("push".to_string()),
                    status: None,
                },
                StatusCode::OK,
                NOT_INTERESTED,
            ),
            (
                Rejection::NameMismatch {
                    expected: "pages".to_string(),
                    actual: "test".to_string(),
                },
                StatusCode::OK,
                NOT_INTERESTED,
            ),
            // No way to leave the connection hanging from a handler, so an
            // unknown token gets an empty 403 and nothing else.
            (Rejection::Unauthorized, StatusCode::FORBIDDEN, ""),
            (
                Rejection::MalformedPayload("eof".to_string()),
                StatusCode::BAD_REQUEST,
                "",
            ),
        ];
        for (rejection, status, body) in cases {
            let response = outcome_response(&DeploymentOutcome::Rejected(rejection), true);
            assert_eq!(body_of(response).await, (status, body.to_string()));
        }
    }

    #[tokio::test]
    async fn empty_artifact_is_internal_error_without_body() {
        let outcome = DeploymentOutcome::Failed(DeployError::Swap(SwapError::EmptyArtifact {
            staging_dir: PathBuf::from("/tmp/deployer"),
        }));
        assert_eq!(
            body_of(outcome_response(&outcome, true)).await,
            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
        );
    }
}
