use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::assets::EncodedImage;
use crate::error::EditError;
use crate::settings::Settings;

/// Finish reason of a candidate that completed normally.
pub const FINISH_STOP: &str = "STOP";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One element of a content's `parts` list, either inline bytes or text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    fn image(image: &EncodedImage) -> Self {
        Self {
            inline_data: Some(InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            }),
            text: None,
        }
    }

    fn text(text: &str) -> Self {
        Self {
            inline_data: None,
            text: Some(text.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestContent {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<RequestContent>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ContentResponse>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
    status: Option<String>,
}

/// Images first, in order, then the instruction as the trailing part.
pub fn build_request(
    primary: &EncodedImage,
    instruction: &str,
    garment: Option<&EncodedImage>,
) -> GenerateContentRequest {
    let mut parts = vec![Part::image(primary)];
    if let Some(garment) = garment {
        parts.push(Part::image(garment));
    }
    parts.push(Part::text(instruction));

    GenerateContentRequest {
        contents: vec![RequestContent {
            role: "user",
            parts,
        }],
        generation_config: GenerationConfig {
            response_modalities: vec!["IMAGE"],
        },
    }
}

/// Validates a response and pulls out the first inline image.
///
/// When the first candidate has no parts, the block reason is reported
/// before a non-normal finish reason, and both before a bare
/// `MalformedResponse`.
pub fn extract_image(resp: GenerateContentResponse) -> Result<EncodedImage, EditError> {
    let block_reason = resp
        .prompt_feedback
        .and_then(|f| f.block_reason)
        .filter(|r| !r.is_empty());
    let candidate = resp.candidates.and_then(|c| c.into_iter().next());
    let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
    let parts = candidate
        .and_then(|c| c.content)
        .and_then(|c| c.parts)
        .filter(|p| !p.is_empty());

    let Some(parts) = parts else {
        if let Some(reason) = block_reason {
            return Err(EditError::BlockedRequest { reason });
        }
        if let Some(reason) = finish_reason.filter(|r| r != FINISH_STOP) {
            return Err(EditError::GenerationFailed { reason });
        }
        return Err(EditError::MalformedResponse);
    };

    parts
        .into_iter()
        .find_map(|p| p.inline_data.filter(|d| !d.data.is_empty()))
        .map(|d| EncodedImage {
            data: d.data,
            mime_type: d.mime_type,
        })
        .ok_or(EditError::NoImageProduced)
}

fn describe_http_error(status: reqwest::StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| match (b.error.message, b.error.status) {
            (Some(m), Some(s)) => Some(format!("{m} ({s})")),
            (Some(m), None) => Some(m),
            _ => None,
        });
    match detail {
        Some(detail) => format!("HTTP {status}: {detail}"),
        None => format!("HTTP {status}"),
    }
}

/// Anything that can turn encoded images plus an instruction into an edited image.
#[async_trait]
pub trait ImageEditor: Send + Sync {
    async fn edit_image(
        &self,
        primary: &EncodedImage,
        instruction: &str,
        garment: Option<&EncodedImage>,
    ) -> Result<EncodedImage, EditError>;
}

/// Gemini `generateContent` client for image editing.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    settings: Settings,
}

impl GeminiClient {
    pub fn new(settings: Settings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.api_base_url, self.settings.model
        )
    }
}

#[async_trait]
impl ImageEditor for GeminiClient {
    #[instrument(skip_all, fields(model = %self.settings.model, garment = garment.is_some()))]
    async fn edit_image(
        &self,
        primary: &EncodedImage,
        instruction: &str,
        garment: Option<&EncodedImage>,
    ) -> Result<EncodedImage, EditError> {
        let body = build_request(primary, instruction, garment);
        debug!(parts = body.contents[0].parts.len(), "sending gemini edit request");

        let resp = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "gemini request failed");
                EditError::Service(e.to_string())
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let msg = describe_http_error(status, &text);
            error!(%status, "gemini returned an error status");
            return Err(EditError::Service(msg));
        }

        let value: GenerateContentResponse = resp.json().await.map_err(|e| {
            error!(error = %e, "gemini response parse error");
            EditError::Service(format!("gemini parse error: {e}"))
        })?;

        match extract_image(value) {
            Ok(image) => {
                info!(mime_type = %image.mime_type, bytes_b64 = image.data.len(), "gemini image received");
                Ok(image)
            }
            Err(e) => {
                warn!(error = %e, "gemini response rejected");
                Err(e)
            }
        }
    }
}
