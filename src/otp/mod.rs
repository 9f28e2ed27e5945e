//! Doorstep delivery codes.
//!
//! The core never generates codes. It checks the shape locally, forwards the
//! code to whoever issued it, and turns a positive answer into a
//! [`DeliveryProof`] that the state machine requires for `delivered`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::AppError;

pub const CODE_LENGTH: usize = 4;

/// Evidence that a delivery code was accepted for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryProof {
    order_id: u64,
}

impl DeliveryProof {
    pub(crate) fn for_order(order_id: u64) -> Self {
        Self { order_id }
    }

    pub fn order_id(&self) -> u64 {
        self.order_id
    }
}

pub fn validate_code(code: &str) -> Result<(), AppError> {
    if code.len() != CODE_LENGTH || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::BadRequest(format!(
            "delivery code must be exactly {CODE_LENGTH} digits"
        )));
    }
    Ok(())
}

#[async_trait]
pub trait OtpVerifier: Send + Sync {
    async fn verify(&self, order_id: u64, code: &str) -> Result<bool, AppError>;

    /// Hands over a code issued at checkout. Remote verifiers already know
    /// their codes, so the default ignores it.
    fn record_issued_code(&self, _order_id: u64, _code: &str) -> Result<(), AppError> {
        Ok(())
    }
}

/// Validates, verifies within `timeout`, and issues a proof on success.
pub async fn verify_delivery(
    verifier: &dyn OtpVerifier,
    order_id: u64,
    code: &str,
    timeout: Duration,
) -> Result<DeliveryProof, AppError> {
    validate_code(code)?;

    let verified = tokio::time::timeout(timeout, verifier.verify(order_id, code))
        .await
        .map_err(|_| {
            AppError::Timeout(format!("delivery code check for order {order_id} timed out"))
        })??;

    if verified {
        Ok(DeliveryProof::for_order(order_id))
    } else {
        Err(AppError::OtpMismatch)
    }
}

/// Codes held in process, for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryOtpVerifier {
    codes: DashMap<u64, String>,
}

impl InMemoryOtpVerifier {
    pub fn with_code(self, order_id: u64, code: &str) -> Self {
        self.codes.insert(order_id, code.to_string());
        self
    }
}

#[async_trait]
impl OtpVerifier for InMemoryOtpVerifier {
    async fn verify(&self, order_id: u64, code: &str) -> Result<bool, AppError> {
        match self.codes.get(&order_id) {
            Some(expected) => Ok(expected.value() == code),
            None => {
                warn!(order_id, "no delivery code on record");
                Ok(false)
            }
        }
    }

    fn record_issued_code(&self, order_id: u64, code: &str) -> Result<(), AppError> {
        validate_code(code)?;
        self.codes.insert(order_id, code.to_string());
        Ok(())
    }
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    order_id: u64,
    otp: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    verified: bool,
}

/// Forwards codes to the external order backend.
pub struct HttpOtpVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpOtpVerifier {
    pub fn new(url: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|err| AppError::Internal(format!("failed to build http client: {err}")))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl OtpVerifier for HttpOtpVerifier {
    async fn verify(&self, order_id: u64, code: &str) -> Result<bool, AppError> {
        let response = self
            .client
            .post(&self.url)
            .json(&VerifyRequest { order_id, otp: code })
            .send()
            .await
            .map_err(|err| AppError::Upstream(format!("otp verification request failed: {err}")))?;

        if rejects_code(response.status()) {
            return Ok(false);
        }

        let body: VerifyResponse = response
            .error_for_status()
            .map_err(|err| AppError::Upstream(format!("otp verification failed: {err}")))?
            .json()
            .await
            .map_err(|err| AppError::Upstream(format!("invalid otp verification response: {err}")))?;

        Ok(body.verified)
    }
}

/// Statuses the backend uses for a wrong code. Any other failure status is
/// an upstream error, not a mismatch.
fn rejects_code(status: reqwest::StatusCode) -> bool {
    matches!(
        status,
        reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNPROCESSABLE_ENTITY
    )
}
