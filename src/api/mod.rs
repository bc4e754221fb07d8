// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    escrow::{
        model::{
            AuditStatus, AuditTransaction, DisplayId, Escrow, EscrowStatus, Milestone,
            MilestoneStatus, OperationKind, PendingSigningRequest, ReleaseType, SigningMode,
            SigningRequestStatus,
        },
        resolver::{NotFoundReason, TerminalKind},
        CancelRequest, CreateEscrowRequest, ErrorBody, EscrowView, LedgerState, MilestoneInput,
        PollOutcome, PollReport, ReconcileReport, ReleaseRequest,
    },
    state::AppState,
};

pub mod escrows;
pub mod health;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/escrows", post(escrows::create_escrow))
        .route("/escrows/{escrow_id}", get(escrows::get_escrow))
        .route("/escrows/{escrow_id}/release", post(escrows::release_escrow))
        .route("/escrows/{escrow_id}/cancel", post(escrows::cancel_escrow))
        .route(
            "/escrows/{escrow_id}/reconcile",
            post(escrows::reconcile_escrow),
        )
        .route(
            "/escrows/{escrow_id}/signing/poll",
            post(escrows::poll_signing),
        )
        .with_state(state.clone());

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .with_state(state);

    Router::new()
        .nest("/v1", v1_routes)
        .merge(health_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        escrows::create_escrow,
        escrows::get_escrow,
        escrows::release_escrow,
        escrows::cancel_escrow,
        escrows::reconcile_escrow,
        escrows::poll_signing,
        health::health,
        health::liveness,
        health::readiness
    ),
    components(
        schemas(
            Escrow,
            EscrowStatus,
            EscrowView,
            DisplayId,
            Milestone,
            MilestoneStatus,
            MilestoneInput,
            AuditTransaction,
            AuditStatus,
            OperationKind,
            PendingSigningRequest,
            SigningRequestStatus,
            ReleaseType,
            SigningMode,
            CreateEscrowRequest,
            ReleaseRequest,
            CancelRequest,
            ReconcileReport,
            LedgerState,
            TerminalKind,
            NotFoundReason,
            PollOutcome,
            PollReport,
            ErrorBody,
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Escrows", description = "Escrow lifecycle and ledger reconciliation"),
        (name = "Health", description = "Liveness and readiness probes")
    )
)]
struct ApiDoc;

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::escrow::testing::{Harness, ALICE, BOB};

    fn json_request(method: &str, uri: &str, caller: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(caller) = caller {
            builder = builder.header(escrows::CALLER_HEADER, caller);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const CREATE_BODY: &str = r#"{
        "title": "Logo design",
        "counterparty_id": "bob",
        "amount_fiat": "100",
        "release_type": "custom"
    }"#;

    #[tokio::test]
    async fn create_then_read_over_http() {
        let (state, _dir) = Harness::new().into_app_state();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/v1/escrows", Some(ALICE), CREATE_BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["escrow"]["status"], "active");
        assert_eq!(body["data"]["escrow"]["amount_drops"], 50_000_000);
        let id = body["data"]["escrow"]["id"].as_str().unwrap().to_string();

        let read = Request::builder()
            .uri(format!("/v1/escrows/{id}"))
            .header(escrows::CALLER_HEADER, BOB)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(read).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["escrow"]["id"], id.as_str());
    }

    #[tokio::test]
    async fn missing_caller_is_unauthorized() {
        let (state, _dir) = Harness::new().into_app_state();
        let response = router(state)
            .oneshot(json_request("POST", "/v1/escrows", None, CREATE_BODY))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_body_is_a_bad_request() {
        let (state, _dir) = Harness::new().into_app_state();
        let response = router(state)
            .oneshot(json_request("POST", "/v1/escrows", Some(ALICE), "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn oversized_amount_is_a_validation_envelope() {
        let (state, _dir) = Harness::new().into_app_state();
        let body = r#"{
            "title": "Logo design",
            "counterparty_id": "bob",
            "amount_fiat": "1000000000000000000000000",
            "release_type": "custom"
        }"#;
        let response = router(state)
            .oneshot(json_request("POST", "/v1/escrows", Some(ALICE), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn engine_errors_map_to_http_statuses() {
        let (state, _dir) = Harness::new().into_app_state();
        let uri = format!("/v1/escrows/{}/release", uuid::Uuid::new_v4());
        let response = router(state)
            .oneshot(json_request("POST", &uri, Some(ALICE), "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "ESCROW_NOT_FOUND");
    }

    #[tokio::test]
    async fn readiness_reports_the_store() {
        let (state, _dir) = Harness::new().into_app_state();
        let request = Request::builder()
            .uri("/health/ready")
            .body(Body::empty())
            .unwrap();
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["escrows"], 0);
        assert_eq!(body["checks"]["delegated_signing"], "enabled");
    }
}
