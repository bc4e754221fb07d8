// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Creation terms: input validation, amount quotes, time bounds and
//! milestone planning.
//!
//! Sums use full decimal precision; drops are only truncated when a single
//! amount is converted, and the last milestone absorbs the remainder.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::EscrowError;
use super::model::{Milestone, MilestoneStatus, ReleaseType};
use crate::ledger::{to_ripple_time, xrp_to_drops};

const MAX_TITLE_LEN: usize = 200;
/// Crypto-conditions are a few dozen bytes; anything larger is malformed.
const MAX_CONDITION_BYTES: usize = 128;

/// Absolute slack between the two quoted denominations, in fiat.
const FIAT_TOLERANCE: Decimal = dec!(0.01);
/// Relative slack between the two quoted denominations.
const RELATIVE_TOLERANCE: Decimal = dec!(0.001);

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MilestoneInput {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub amount_fiat: Decimal,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateEscrowRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub counterparty_id: String,
    /// Fiat amount; at least one of `amount_fiat` / `amount_xrp` is required.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub amount_fiat: Option<Decimal>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub amount_xrp: Option<Decimal>,
    /// Defaults to the configured fiat currency.
    #[serde(default)]
    pub fiat_currency: Option<String>,
    pub release_type: ReleaseType,
    #[serde(default)]
    pub release_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub milestones: Vec<MilestoneInput>,
    /// Crypto-condition (hex) locking the commitment.
    #[serde(default)]
    pub condition: Option<String>,
}

/// Configured defaults applied to every new escrow.
#[derive(Debug, Clone)]
pub struct TermsPolicy {
    pub fiat_currency: String,
    /// Earliest release of escrows that are not time-based.
    pub finish_after_delay: Duration,
    /// Window after `FinishAfter` before the commitment expires.
    pub cancel_after_window: Duration,
}

impl Default for TermsPolicy {
    fn default() -> Self {
        Self {
            fiat_currency: "USD".to_string(),
            finish_after_delay: Duration::from_secs(30),
            cancel_after_window: Duration::from_secs(90 * 24 * 60 * 60),
        }
    }
}

/// Both denominations of an escrow amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub amount_drops: u64,
    pub amount_fiat: Decimal,
    /// Fiat price of one XRP.
    pub rate: Decimal,
}

/// Ledger time bounds, Ripple-epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub finish_after: u32,
    pub cancel_after: u32,
}

fn invalid(message: impl Into<String>) -> EscrowError {
    EscrowError::Validation(message.into())
}

fn out_of_range() -> EscrowError {
    invalid("amount is out of range")
}

/// Structural checks that need no collaborator.
pub fn validate_request(request: &CreateEscrowRequest, now: DateTime<Utc>) -> Result<(), EscrowError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(invalid("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(invalid(format!("title exceeds {MAX_TITLE_LEN} characters")));
    }
    if request.counterparty_id.trim().is_empty() {
        return Err(invalid("counterparty_id is required"));
    }
    if request.amount_fiat.is_none() && request.amount_xrp.is_none() {
        return Err(invalid("amount_fiat or amount_xrp is required"));
    }
    for amount in [request.amount_fiat, request.amount_xrp].into_iter().flatten() {
        if amount <= Decimal::ZERO {
            return Err(invalid("amounts must be greater than zero"));
        }
    }

    match request.release_type {
        ReleaseType::TimeBased => match request.release_at {
            Some(at) if at > now => {}
            Some(_) => return Err(invalid("release_at must be in the future")),
            None => return Err(invalid("time_based escrows require release_at")),
        },
        ReleaseType::MilestoneBased if request.milestones.is_empty() => {
            return Err(invalid("milestone_based escrows require at least one milestone"));
        }
        _ => {}
    }
    if request.release_type != ReleaseType::MilestoneBased && !request.milestones.is_empty() {
        return Err(invalid("milestones are only allowed on milestone_based escrows"));
    }
    for (index, milestone) in request.milestones.iter().enumerate() {
        if milestone.title.trim().is_empty() {
            return Err(invalid(format!("milestone {index} has no title")));
        }
        if milestone.amount_fiat <= Decimal::ZERO {
            return Err(invalid(format!("milestone {index} amount must be greater than zero")));
        }
    }

    if let Some(condition) = &request.condition {
        normalize_condition(condition)?;
    }
    Ok(())
}

/// Upper-case hex condition, or a validation error.
pub fn normalize_condition(raw: &str) -> Result<String, EscrowError> {
    let bytes = hex::decode(raw.trim()).map_err(|_| invalid("condition must be hex"))?;
    if bytes.is_empty() || bytes.len() > MAX_CONDITION_BYTES {
        return Err(invalid("condition length is invalid"));
    }
    Ok(hex::encode_upper(bytes))
}

/// Derive both denominations from whichever were given.
///
/// `rate` is the fiat price of one XRP: `xrp = fiat / rate`.
pub fn quote(
    amount_fiat: Option<Decimal>,
    amount_xrp: Option<Decimal>,
    rate: Decimal,
) -> Result<Quote, EscrowError> {
    if rate <= Decimal::ZERO {
        return Err(EscrowError::RateUnavailable("rate is not positive".into()));
    }

    let (xrp, fiat) = match (amount_fiat, amount_xrp) {
        (Some(fiat), Some(xrp)) => {
            let implied = xrp.checked_mul(rate).ok_or_else(out_of_range)?;
            let tolerance = fiat
                .checked_mul(RELATIVE_TOLERANCE)
                .ok_or_else(out_of_range)?
                .max(FIAT_TOLERANCE);
            let drift = implied.checked_sub(fiat).ok_or_else(out_of_range)?.abs();
            if drift > tolerance {
                return Err(invalid(format!(
                    "amounts do not match the exchange rate ({xrp} XRP at {rate} is {implied}, not {fiat})"
                )));
            }
            (xrp, fiat)
        }
        (Some(fiat), None) => (fiat.checked_div(rate).ok_or_else(out_of_range)?, fiat),
        (None, Some(xrp)) => (xrp, xrp.checked_mul(rate).ok_or_else(out_of_range)?),
        (None, None) => return Err(invalid("amount_fiat or amount_xrp is required")),
    };

    let amount_drops = xrp_to_drops(xrp)
        .filter(|drops| *drops > 0)
        .ok_or_else(|| invalid("amount is below one drop or out of range"))?;

    Ok(Quote {
        amount_drops,
        amount_fiat: fiat,
        rate,
    })
}

/// `FinishAfter` / `CancelAfter` for a new commitment.
pub fn time_bounds(
    release_type: ReleaseType,
    release_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    policy: &TermsPolicy,
) -> Result<TimeBounds, EscrowError> {
    let finish_at = match (release_type, release_at) {
        (ReleaseType::TimeBased, Some(at)) => at,
        (ReleaseType::TimeBased, None) => {
            return Err(invalid("time_based escrows require release_at"))
        }
        _ => {
            now + chrono::Duration::from_std(policy.finish_after_delay)
                .map_err(|_| invalid("finish delay out of range"))?
        }
    };

    let finish_after =
        to_ripple_time(finish_at).ok_or_else(|| invalid("release time is out of ledger range"))?;
    let window = u32::try_from(policy.cancel_after_window.as_secs())
        .map_err(|_| invalid("cancel window out of range"))?;
    let cancel_after = finish_after
        .checked_add(window)
        .ok_or_else(|| invalid("cancel time is out of ledger range"))?;

    Ok(TimeBounds {
        finish_after,
        cancel_after,
    })
}

/// Build milestone rows for an escrow using its snapshot rate.
///
/// Fiat amounts must sum to the escrow total within 0.01; drop amounts sum
/// exactly to `quote.amount_drops`.
pub fn plan_milestones(
    escrow_id: Uuid,
    inputs: &[MilestoneInput],
    quote: &Quote,
) -> Result<Vec<Milestone>, EscrowError> {
    let Some((last, rest)) = inputs.split_last() else {
        return Ok(Vec::new());
    };

    let fiat_sum = inputs
        .iter()
        .try_fold(Decimal::ZERO, |sum, m| sum.checked_add(m.amount_fiat))
        .ok_or_else(|| invalid("milestone amounts overflow"))?;
    let drift = fiat_sum
        .checked_sub(quote.amount_fiat)
        .ok_or_else(|| invalid("milestone amounts overflow"))?
        .abs();
    if drift > FIAT_TOLERANCE {
        return Err(invalid(format!(
            "milestone amounts sum to {fiat_sum}, expected {}",
            quote.amount_fiat
        )));
    }

    let mut milestones = Vec::with_capacity(inputs.len());
    let mut allocated: u64 = 0;
    for (index, input) in rest.iter().enumerate() {
        let drops = input
            .amount_fiat
            .checked_div(quote.rate)
            .and_then(xrp_to_drops)
            .filter(|drops| *drops > 0)
            .ok_or_else(|| invalid(format!("milestone {index} is below one drop")))?;
        allocated = allocated
            .checked_add(drops)
            .ok_or_else(|| invalid("milestone amounts overflow"))?;
        milestones.push(milestone(escrow_id, index, input, drops));
    }

    let remainder = quote
        .amount_drops
        .checked_sub(allocated)
        .filter(|drops| *drops > 0)
        .ok_or_else(|| invalid("milestone amounts exceed the escrow total"))?;
    milestones.push(milestone(escrow_id, rest.len(), last, remainder));
    Ok(milestones)
}

fn milestone(escrow_id: Uuid, index: usize, input: &MilestoneInput, drops: u64) -> Milestone {
    Milestone {
        id: Uuid::new_v4(),
        escrow_id,
        order_index: index as u32,
        title: input.title.trim().to_string(),
        description: input.description.clone(),
        amount_fiat: input.amount_fiat,
        amount_drops: drops,
        status: MilestoneStatus::Pending,
        completed_at: None,
    }
}
