// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Xaman (XUMM) payload API integration for delegated signing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::config::{env_optional, env_or_default, env_required};
use crate::signing::{GatewayError, GatewayHandle, GatewayState, SigningGateway};

const DEFAULT_API_BASE_URL: &str = "https://xumm.app";
const PAYLOAD_PATH: &str = "/api/v1/platform/payload";
/// Minutes a payload stays signable.
const DEFAULT_EXPIRE_MINUTES: u32 = 15;

#[derive(Debug, Clone)]
pub struct XummGateway {
    api_base_url: String,
    api_key: String,
    api_secret: String,
    /// Let the gateway submit signed transactions itself.
    auto_submit: bool,
    timeout: Duration,
    http: Client,
}

impl XummGateway {
    pub fn is_configured() -> bool {
        env_optional("XUMM_API_KEY").is_some() && env_optional("XUMM_API_SECRET").is_some()
    }

    pub fn from_env(timeout: Duration) -> Result<Self, GatewayError> {
        let api_base_url = env_or_default("XUMM_API_BASE_URL", DEFAULT_API_BASE_URL);
        let api_key = env_required("XUMM_API_KEY").map_err(GatewayError::MissingConfig)?;
        let api_secret = env_required("XUMM_API_SECRET").map_err(GatewayError::MissingConfig)?;
        let auto_submit = env_optional("XUMM_AUTO_SUBMIT")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self::new(api_base_url, api_key, api_secret, auto_submit, timeout)
    }

    pub fn new(
        api_base_url: String,
        api_key: String,
        api_secret: String,
        auto_submit: bool,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url,
            api_key,
            api_secret,
            auto_submit,
            timeout,
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url.trim_end_matches('/'), path)
    }

    async fn send_json(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Value, GatewayError> {
        let exchange = async {
            let response = request
                .header("X-API-Key", &self.api_key)
                .header("X-API-Secret", &self.api_secret)
                .header("Content-Type", "application/json")
                .send()
                .await
                .map_err(|e| GatewayError::Request(format!("{what} failed: {e}")))?;

            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(GatewayError::NotFound(what.to_string()));
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(GatewayError::Request(format!(
                    "{what} returned {status}: {body}"
                )));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| GatewayError::InvalidResponse(format!("{what} invalid JSON: {e}")))
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| GatewayError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl SigningGateway for XummGateway {
    async fn create_request(&self, tx_json: Value) -> Result<GatewayHandle, GatewayError> {
        let payload = json!({
            "txjson": tx_json,
            "options": {
                "submit": self.auto_submit,
                "expire": DEFAULT_EXPIRE_MINUTES
            }
        });

        let request = self.http.post(self.url(PAYLOAD_PATH)).json(&payload);
        let response = self.send_json(request, "POST payload").await?;
        let handle = parse_created_payload(&response)?;

        info!(
            request_id = %handle.request_id,
            auto_submit = self.auto_submit,
            "Signing payload created"
        );
        Ok(handle)
    }

    async fn request_state(&self, request_id: &str) -> Result<GatewayState, GatewayError> {
        let request = self
            .http
            .get(self.url(&format!("{PAYLOAD_PATH}/{request_id}")));
        let response = self.send_json(request, "GET payload").await?;
        let state = map_payload_state(&response)?;
        debug!(request_id, state = ?state, "Signing payload state");
        Ok(state)
    }
}

/// Extract the handle from a payload-creation response.
pub fn parse_created_payload(response: &Value) -> Result<GatewayHandle, GatewayError> {
    let request_id = response
        .get("uuid")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidResponse("missing payload uuid".to_string()))?
        .to_string();

    let next_url = response
        .pointer("/next/always")
        .and_then(Value::as_str)
        .map(str::to_string);
    let qr_url = response
        .pointer("/refs/qr_png")
        .and_then(Value::as_str)
        .map(str::to_string);
    let expires_at = response
        .pointer("/payload/expires_at")
        .or_else(|| response.pointer("/expires_at"))
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc));

    Ok(GatewayHandle {
        request_id,
        next_url,
        qr_url,
        expires_at,
    })
}

/// Map a payload-status response to a [`GatewayState`].
pub fn map_payload_state(response: &Value) -> Result<GatewayState, GatewayError> {
    let meta = response
        .get("meta")
        .ok_or_else(|| GatewayError::InvalidResponse("missing payload meta".to_string()))?;
    let flag = |name: &str| meta.get(name).and_then(Value::as_bool).unwrap_or(false);

    if flag("signed") {
        let tx_hash = response
            .pointer("/response/txid")
            .and_then(Value::as_str)
            .map(str::to_string);
        let dispatched = response
            .pointer("/response/dispatched_result")
            .and_then(Value::as_str)
            .is_some_and(|result| !result.is_empty());

        if flag("submit") && dispatched {
            let tx_hash = tx_hash.ok_or_else(|| {
                GatewayError::InvalidResponse("submitted payload without txid".to_string())
            })?;
            return Ok(GatewayState::Submitted { tx_hash });
        }

        let blob_hex = response
            .pointer("/response/hex")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("signed payload without blob".to_string())
            })?
            .to_string();
        return Ok(GatewayState::Signed { blob_hex, tx_hash });
    }

    if flag("expired") {
        return Ok(GatewayState::Expired);
    }
    if flag("cancelled") || flag("resolved") {
        return Ok(GatewayState::Declined);
    }
    Ok(GatewayState::Pending)
}
