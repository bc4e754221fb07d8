// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Uniform result envelope returned by every produced operation.

use serde::Serialize;
use utoipa::ToSchema;

use super::error::EscrowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Stable machine-readable code, e.g. `LEDGER_REJECTED`.
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Envelope<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T> Envelope<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: &EscrowError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            data: None,
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }

    /// Failure that still carries the state it left behind.
    pub fn fail_with(error: &EscrowError, data: T) -> Self {
        Self {
            data: Some(data),
            ..Self::fail(error)
        }
    }

    pub fn from_result(result: Result<T, EscrowError>, message: impl Into<String>) -> Self {
        match result {
            Ok(data) => Self::ok(message, data),
            Err(e) => Self::fail(&e),
        }
    }

    /// Machine code of the failure, if any.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_serializes_without_data() {
        let envelope: Envelope<u32> = Envelope::fail(&EscrowError::GatewayDeclined);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "GATEWAY_DECLINED");
        assert!(json.get("data").is_none());
    }

    #[test]
    fn success_carries_data() {
        let envelope = Envelope::from_result(Ok::<_, EscrowError>(7u32), "done");
        assert!(envelope.success);
        assert_eq!(envelope.data, Some(7));
        assert_eq!(envelope.error_code(), None);
    }
}
