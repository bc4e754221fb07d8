// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Escrow endpoints.
//!
//! Handlers are thin: they extract the caller and body, call the engine and
//! return its envelope with a status derived from the envelope's error code.

use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, Path, State},
    http::request::Parts,
    Json,
};
use uuid::Uuid;

use crate::{
    error::{ApiError, EnvelopeResponse},
    escrow::{
        CancelRequest, CreateEscrowRequest, Envelope, EscrowView, PollReport, ReconcileReport,
        ReleaseRequest,
    },
    state::AppState,
};

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const CALLER_HEADER: &str = "x-user-id";

/// Identity of the platform user making the request.
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(CALLER_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing x-user-id header"))?
            .to_str()
            .map_err(|_| ApiError::unauthorized("Invalid x-user-id header"))?
            .trim();

        if value.is_empty() {
            return Err(ApiError::unauthorized("Empty x-user-id header"));
        }
        Ok(Caller(value.to_string()))
    }
}

/// Bodies of release/cancel are optional; an empty body means defaults.
fn optional_body<T: Default>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        Err(rejection) => Err(rejection.into()),
    }
}

#[utoipa::path(
    post,
    path = "/v1/escrows",
    request_body = CreateEscrowRequest,
    tag = "Escrows",
    params(("x-user-id" = String, Header, description = "Initiating user")),
    responses(
        (status = 201, description = "Escrow created or awaiting signature", body = Envelope<EscrowView>),
        (status = 400, description = "Invalid terms", body = Envelope<EscrowView>),
        (status = 422, description = "Parties unresolved or ledger rejection", body = Envelope<EscrowView>),
        (status = 503, description = "Rate feed, ledger or gateway unavailable", body = Envelope<EscrowView>)
    )
)]
pub async fn create_escrow(
    State(state): State<AppState>,
    Caller(caller): Caller,
    body: Result<Json<CreateEscrowRequest>, JsonRejection>,
) -> Result<EnvelopeResponse<EscrowView>, ApiError> {
    let Json(request) = body?;
    let envelope = state.service.create_escrow(&caller, request).await;
    Ok(EnvelopeResponse::created(envelope))
}

#[utoipa::path(
    get,
    path = "/v1/escrows/{escrow_id}",
    tag = "Escrows",
    params(
        ("escrow_id" = Uuid, Path, description = "Escrow identifier"),
        ("x-user-id" = String, Header, description = "A party to the escrow")
    ),
    responses(
        (status = 200, body = Envelope<EscrowView>),
        (status = 403, body = Envelope<EscrowView>),
        (status = 404, body = Envelope<EscrowView>)
    )
)]
pub async fn get_escrow(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(escrow_id): Path<Uuid>,
) -> EnvelopeResponse<EscrowView> {
    EnvelopeResponse::ok(state.service.get_escrow(&caller, escrow_id).await)
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{escrow_id}/release",
    request_body(content = ReleaseRequest, description = "Optional"),
    tag = "Escrows",
    params(
        ("escrow_id" = Uuid, Path, description = "Escrow identifier"),
        ("x-user-id" = String, Header, description = "The escrow initiator")
    ),
    responses(
        (status = 200, description = "Released or awaiting signature", body = Envelope<EscrowView>),
        (status = 409, description = "Terminal, disputed or already resolved on the ledger", body = Envelope<EscrowView>),
        (status = 422, description = "Commitment not releasable", body = Envelope<EscrowView>)
    )
)]
pub async fn release_escrow(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(escrow_id): Path<Uuid>,
    body: Result<Json<ReleaseRequest>, JsonRejection>,
) -> Result<EnvelopeResponse<EscrowView>, ApiError> {
    let request = optional_body(body)?;
    let envelope = state
        .service
        .release_escrow(&caller, escrow_id, request)
        .await;
    Ok(EnvelopeResponse::ok(envelope))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{escrow_id}/cancel",
    request_body(content = CancelRequest, description = "Optional"),
    tag = "Escrows",
    params(
        ("escrow_id" = Uuid, Path, description = "Escrow identifier"),
        ("x-user-id" = String, Header, description = "A party to the escrow")
    ),
    responses(
        (status = 200, body = Envelope<EscrowView>),
        (status = 409, body = Envelope<EscrowView>)
    )
)]
pub async fn cancel_escrow(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(escrow_id): Path<Uuid>,
    body: Result<Json<CancelRequest>, JsonRejection>,
) -> Result<EnvelopeResponse<EscrowView>, ApiError> {
    let request = optional_body(body)?;
    let envelope = state.service.cancel_escrow(&caller, escrow_id, request).await;
    Ok(EnvelopeResponse::ok(envelope))
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{escrow_id}/reconcile",
    tag = "Escrows",
    params(
        ("escrow_id" = Uuid, Path, description = "Escrow identifier"),
        ("x-user-id" = String, Header, description = "A party to the escrow")
    ),
    responses(
        (status = 200, description = "Record compared with the ledger", body = Envelope<ReconcileReport>),
        (status = 503, body = Envelope<ReconcileReport>)
    )
)]
pub async fn reconcile_escrow(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(escrow_id): Path<Uuid>,
) -> EnvelopeResponse<ReconcileReport> {
    EnvelopeResponse::ok(state.service.reconcile_status(&caller, escrow_id).await)
}

#[utoipa::path(
    post,
    path = "/v1/escrows/{escrow_id}/signing/poll",
    tag = "Escrows",
    params(
        ("escrow_id" = Uuid, Path, description = "Escrow identifier"),
        ("x-user-id" = String, Header, description = "A party to the escrow")
    ),
    responses(
        (status = 200, description = "Pending or submitted", body = Envelope<PollReport>),
        (status = 422, description = "Declined, expired or rejected", body = Envelope<PollReport>)
    )
)]
pub async fn poll_signing(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(escrow_id): Path<Uuid>,
) -> EnvelopeResponse<PollReport> {
    EnvelopeResponse::ok(state.service.poll_signing(&caller, escrow_id).await)
}
