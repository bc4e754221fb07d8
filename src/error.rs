// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::escrow::Envelope;

/// Failure raised before a request reaches the engine.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// HTTP status of an envelope error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
        "FORBIDDEN" => StatusCode::FORBIDDEN,
        "ESCROW_NOT_FOUND" => StatusCode::NOT_FOUND,
        "INVALID_STATE"
        | "ESCROW_DISPUTED"
        | "SIGNING_IN_PROGRESS"
        | "NO_PENDING_SIGNING_REQUEST"
        | "COMMITMENT_ALREADY_TERMINAL"
        | "CONFLICT" => StatusCode::CONFLICT,
        "PARTY_RESOLUTION_ERROR"
        | "NOT_YET_RELEASABLE"
        | "COMMITMENT_EXPIRED"
        | "COMMITMENT_NOT_FOUND"
        | "UNSUPPORTED_CONDITIONAL_RELEASE"
        | "SIGNER_MISMATCH"
        | "LEDGER_REJECTED"
        | "GATEWAY_DECLINED"
        | "GATEWAY_EXPIRED" => StatusCode::UNPROCESSABLE_ENTITY,
        "RATE_UNAVAILABLE" | "LEDGER_UNAVAILABLE" | "GATEWAY_UNAVAILABLE" => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Envelope plus the status derived from its error code.
pub struct EnvelopeResponse<T> {
    pub envelope: Envelope<T>,
    /// Status of a successful envelope.
    pub success_status: StatusCode,
}

impl<T> EnvelopeResponse<T> {
    pub fn ok(envelope: Envelope<T>) -> Self {
        Self {
            envelope,
            success_status: StatusCode::OK,
        }
    }

    pub fn created(envelope: Envelope<T>) -> Self {
        Self {
            envelope,
            success_status: StatusCode::CREATED,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.envelope.error_code() {
            Some(code) => status_for_code(code),
            None => self.success_status,
        }
    }
}

impl<T: Serialize> IntoResponse for EnvelopeResponse<T> {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.envelope)).into_response()
    }
}
