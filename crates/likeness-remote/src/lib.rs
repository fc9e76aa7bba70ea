//! likeness-remote — HTTP client for a hosted face comparison service.
//!
//! Sends both normalized faces as base64 JSON to `{endpoint}/verify` and maps
//! HTTP failures onto [`ComparisonError`] so the scorer can apply its
//! fallback policy.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use likeness_core::comparison::{Comparison, ComparisonError, FaceComparison};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Serialize)]
struct VerifyRequest {
    image1: String,
    image2: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    confidence: f32,
    is_identical: bool,
}

#[derive(Deserialize, Default)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Deserialize, Default)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// [`FaceComparison`] backed by a REST verification endpoint.
#[derive(Debug, Clone)]
pub struct HttpFaceComparison {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpFaceComparison {
    pub fn new(endpoint: &str, api_key: &str, timeout: Duration) -> Result<Self, ComparisonError> {
        if endpoint.trim().is_empty() || api_key.is_empty() {
            return Err(ComparisonError::NotConfigured);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ComparisonError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: verify_url(endpoint),
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FaceComparison for HttpFaceComparison {
    async fn compare_faces(
        &self,
        image_a: &[u8],
        image_b: &[u8],
    ) -> Result<Comparison, ComparisonError> {
        let request = VerifyRequest {
            image1: STANDARD.encode(image_a),
            image2: STANDARD.encode(image_b),
        };

        tracing::debug!(
            url = %self.url,
            bytes_a = image_a.len(),
            bytes_b = image_b.len(),
            "sending comparison request"
        );

        let response = self
            .client
            .post(&self.url)
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ComparisonError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = classify_failure(status, &body);
            tracing::debug!(status = status.as_u16(), error = %error, "comparison request failed");
            return Err(error);
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|e| ComparisonError::InvalidResponse(e.to_string()))?;

        Ok(Comparison {
            confidence: body.confidence,
            is_identical: body.is_identical,
        })
    }
}

fn verify_url(endpoint: &str) -> String {
    format!("{}/verify", endpoint.trim().trim_end_matches('/'))
}

/// Map a non-2xx response onto the comparison error taxonomy.
pub fn classify_failure(status: StatusCode, body: &str) -> ComparisonError {
    let ErrorBody { code, message } = serde_json::from_str::<ErrorEnvelope>(body)
        .unwrap_or_default()
        .error;
    let detail = if message.is_empty() {
        body.trim().to_string()
    } else {
        message
    };
    let text = detail.to_ascii_lowercase();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            if code.eq_ignore_ascii_case("UnsupportedFeature")
                || text.contains("approval")
                || text.contains("unsupported")
            {
                ComparisonError::UnsupportedFeature(detail)
            } else {
                ComparisonError::Unauthorized(detail)
            }
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY
            if code.eq_ignore_ascii_case("NoFaceDetected") || text.contains("no face") =>
        {
            ComparisonError::NoFaceDetected
        }
        _ => ComparisonError::Transport(format!("HTTP {}: {detail}", status.as_u16())),
    }
}
