use std::env;
use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use vizsynth_contracts::synthesis::{
    search_instruction, GroundingLink, SearchResult, VisualizationKind, VisualizationSource,
};

use crate::error::ProviderError;
use crate::{non_empty_env, truncate_text, ImageSynthesizer, TopicSearcher};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_SEARCH_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const IMAGE_ASPECT_RATIO: &str = "1:1";

const PROVIDER: &str = "Gemini";
const API_KEY_HEADER: &str = "x-goog-api-key";
const EXPECTED_VISUALIZATIONS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_base: String,
    pub search_model: String,
    pub image_model: String,
    /// `None` leaves requests unbounded.
    pub request_timeout: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            search_model: DEFAULT_SEARCH_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            request_timeout: None,
        }
    }
}

impl GeminiConfig {
    /// Defaults with `GEMINI_API_BASE` applied when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(base) = env::var("GEMINI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
        {
            config.api_base = base;
        }
        config
    }
}

/// Blocking client for the `generateContent` REST endpoint, used for both the
/// grounded topic search and the image model.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> anyhow::Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Read at call time so a key exported mid-session is picked up.
    fn api_key() -> Result<String, ProviderError> {
        non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .or_else(|| non_empty_env("API_KEY"))
            .ok_or(ProviderError::MissingCredential)
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.config.api_base, model_path)
    }

    fn generate_content(
        &self,
        model: &str,
        payload: &Value,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let api_key = Self::api_key()?;
        let endpoint = self.endpoint_for_model(model);
        debug!(%endpoint, "posting generateContent request");
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .json(payload)
            .send()
            .map_err(|source| ProviderError::Transport {
                provider: PROVIDER,
                endpoint: endpoint.clone(),
                source: source.without_url(),
            })?;
        parse_response(response)
    }
}

impl TopicSearcher for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn search(&self, topic: &str) -> Result<SearchResult, ProviderError> {
        let payload = search_payload(topic);
        let response = self.generate_content(&self.config.search_model, &payload)?;
        parse_search_response(&response)
    }
}

impl ImageSynthesizer for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn synthesize(&self, prompt: &str) -> Result<String, ProviderError> {
        let payload = image_payload(prompt);
        let response = self.generate_content(&self.config.image_model, &payload)?;
        extract_image_data_url(&response)
    }
}

fn parse_response(response: HttpResponse) -> Result<GenerateContentResponse, ProviderError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|source| ProviderError::Transport {
        provider: PROVIDER,
        endpoint: "response body".to_string(),
        source: source.without_url(),
    })?;
    if !status.is_success() {
        return Err(ProviderError::Status {
            provider: PROVIDER,
            code,
            body: truncate_text(&body, 512),
        });
    }
    serde_json::from_str(&body).map_err(|err| ProviderError::InvalidPayload {
        provider: PROVIDER,
        reason: err.to_string(),
    })
}

pub(crate) fn search_payload(topic: &str) -> Value {
    let kinds: Vec<&str> = VisualizationKind::ALL
        .iter()
        .map(|kind| kind.as_str())
        .collect();
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": search_instruction(topic) }],
        }],
        "tools": [{ "googleSearch": {} }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "summary": { "type": "STRING" },
                    "visualizations": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "title": { "type": "STRING" },
                                "description": { "type": "STRING" },
                                "type": { "type": "STRING", "enum": kinds },
                            },
                            "required": ["title", "description", "type"],
                        },
                    },
                },
                "required": ["summary", "visualizations"],
            },
        },
    })
}

pub(crate) fn image_payload(prompt: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }],
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
            "imageConfig": { "aspectRatio": IMAGE_ASPECT_RATIO },
        },
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, alias = "prompt_feedback")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default, alias = "block_reason")]
    pub block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default, alias = "grounding_metadata")]
    pub grounding_metadata: Option<GroundingMetadata>,
    #[serde(default, alias = "finish_reason")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, alias = "inline_data")]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub thought: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InlineData {
    #[serde(default, alias = "mime_type")]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GroundingMetadata {
    #[serde(default, alias = "grounding_chunks")]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Shape the search model is constrained to by the response schema.
#[derive(Debug, Deserialize)]
struct SearchPayload {
    summary: String,
    visualizations: Vec<VisualizationSource>,
}

/// Thought parts carry the model's reasoning, not its answer.
fn is_answer_part(part: &Part) -> bool {
    part.thought != Some(true)
}

/// Concatenated non-thought text parts of a candidate.
fn candidate_text(candidate: &Candidate) -> String {
    candidate
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter(|part| is_answer_part(part))
                .filter_map(|part| part.text.as_deref())
                .collect::<String>()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_search_response(
    response: &GenerateContentResponse,
) -> Result<SearchResult, ProviderError> {
    let Some(candidate) = response.candidates.first() else {
        return Err(ProviderError::malformed_search(
            "search model returned no candidates",
        ));
    };
    let text = candidate_text(candidate);
    if text.trim().is_empty() {
        return Err(ProviderError::malformed_search(
            "search model returned no text",
        ));
    }
    let payload: SearchPayload = serde_json::from_str(text.trim()).map_err(|err| {
        ProviderError::malformed_search(format!("response does not match the search schema: {err}"))
    })?;
    if payload.visualizations.is_empty() {
        return Err(ProviderError::malformed_search(
            "no visualizations were returned",
        ));
    }
    if payload.visualizations.len() != EXPECTED_VISUALIZATIONS {
        warn!(
            count = payload.visualizations.len(),
            "search model returned an unexpected number of visualizations"
        );
    }
    if !payload
        .visualizations
        .iter()
        .any(|viz| viz.kind == VisualizationKind::Photo)
    {
        warn!("search model returned no photo visualization");
    }

    Ok(SearchResult {
        summary: payload.summary,
        visualizations: payload.visualizations,
        grounding_links: grounding_links(candidate),
    })
}

/// Web citations in source order. Chunks without a web source (or without a
/// URI) are dropped rather than failing the search.
fn grounding_links(candidate: &Candidate) -> Vec<GroundingLink> {
    let chunks = candidate
        .grounding_metadata
        .as_ref()
        .map(|metadata| metadata.grounding_chunks.as_slice())
        .unwrap_or_default();
    let links: Vec<GroundingLink> = chunks
        .iter()
        .filter_map(|chunk| chunk.web.as_ref())
        .filter_map(|web| {
            let uri = web
                .uri
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())?;
            let title = web
                .title
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .unwrap_or(uri);
            Some(GroundingLink {
                title: title.to_string(),
                uri: uri.to_string(),
            })
        })
        .collect();
    if links.len() != chunks.len() {
        debug!(
            dropped = chunks.len() - links.len(),
            "grounding chunks without a web source were skipped"
        );
    }
    links
}

/// First inline image of the first candidate as a PNG data URI.
///
/// Checked in order: no candidate, refusal text, no image at all.
pub(crate) fn extract_image_data_url(
    response: &GenerateContentResponse,
) -> Result<String, ProviderError> {
    let Some(candidate) = response.candidates.first() else {
        if let Some(reason) = response
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
        {
            warn!(block_reason = reason, "image prompt was blocked");
        }
        return Err(ProviderError::NoCandidate);
    };
    let parts = candidate
        .content
        .as_ref()
        .map(|content| content.parts.as_slice())
        .unwrap_or_default();

    if let Some((inline, data)) = parts.iter().find_map(|part| {
        let inline = part.inline_data.as_ref()?;
        let data = inline.data.as_deref().filter(|data| !data.is_empty())?;
        Some((inline, data))
    }) {
        if let Some(mime_type) = inline
            .mime_type
            .as_deref()
            .filter(|mime_type| *mime_type != "image/png")
        {
            debug!(mime_type, "labelling inline image data as image/png");
        }
        return Ok(format!("data:image/png;base64,{data}"));
    }

    if let Some(text) = parts
        .iter()
        .filter(|part| is_answer_part(part))
        .find_map(|part| part.text.as_deref().filter(|text| !text.is_empty()))
    {
        return Err(ProviderError::ModelRefusal(text.to_string()));
    }

    if let Some(reason) = candidate.finish_reason.as_deref() {
        debug!(finish_reason = reason, "image candidate carried no parts");
    }
    Err(ProviderError::NoImageData)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn response_from(value: Value) -> GenerateContentResponse {
        serde_json::from_value(value).expect("wire response")
    }

    fn canned_search_text() -> String {
        json!({
            "summary": "The Silk Road is mapped, charted and photographed.",
            "visualizations": [
                {"title": "Route Map", "description": "Caravan routes. Across Eurasia.", "type": "map"},
                {"title": "Trade Volume", "description": "Goods by century. Stacked bars.", "type": "chart"},
                {"title": "Kashgar Market", "description": "A documentary photo. Busy stalls.", "type": "photo"},
                {"title": "Caravanserai Plan", "description": "A floorplan. Courtyard layout.", "type": "diagram"}
            ]
        })
        .to_string()
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() -> anyhow::Result<()> {
        let client = GeminiClient::new(GeminiConfig {
            api_base: "https://example.test/v1beta".to_string(),
            ..GeminiConfig::default()
        })?;
        assert_eq!(
            client.endpoint_for_model("gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            client.endpoint_for_model(" models/gemini-3-flash-preview "),
            "https://example.test/v1beta/models/gemini-3-flash-preview:generateContent"
        );
        Ok(())
    }

    #[test]
    fn default_config_uses_hosted_models_without_timeout() {
        let config = GeminiConfig::default();
        assert_eq!(config.search_model, "gemini-3-flash-preview");
        assert_eq!(config.image_model, "gemini-2.5-flash-image");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert!(config.request_timeout.is_none());
    }

    #[test]
    fn search_payload_enables_grounding_and_strict_schema() {
        let payload = search_payload("Dark Matter");
        assert_eq!(payload["tools"][0]["googleSearch"], json!({}));
        let config = &payload["generationConfig"];
        assert_eq!(config["responseMimeType"], json!("application/json"));
        assert_eq!(
            config["responseSchema"]["required"],
            json!(["summary", "visualizations"])
        );
        assert_eq!(
            config["responseSchema"]["properties"]["visualizations"]["items"]["properties"]["type"]
                ["enum"],
            json!(["chart", "photo", "diagram", "map"])
        );
        let text = payload["contents"][0]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default();
        assert!(text.contains("\"Dark Matter\""));
    }

    #[test]
    fn image_payload_requests_square_image_from_single_text_part() {
        let payload = image_payload("a lighthouse");
        let parts = payload["contents"][0]["parts"].as_array().cloned().unwrap_or_default();
        assert_eq!(parts, vec![json!({"text": "a lighthouse"})]);
        assert_eq!(
            payload["generationConfig"]["imageConfig"]["aspectRatio"],
            json!("1:1")
        );
    }

    #[test]
    fn search_response_parses_result_and_web_citations_in_order() -> anyhow::Result<()> {
        let response = response_from(json!({
            "candidates": [{
                "content": {"parts": [{"text": canned_search_text()}]},
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://a.test", "title": "A"}},
                        {"retrievedContext": {"uri": "gs://ignored"}},
                        {"web": {"uri": "https://b.test", "title": "B"}},
                        {"web": {"uri": "https://a.test", "title": "A"}}
                    ]
                }
            }]
        }));
        let result = parse_search_response(&response)?;
        assert_eq!(result.visualizations.len(), 4);
        assert!(result.has_kind(VisualizationKind::Photo));
        assert_eq!(result.visualizations[0].title, "Route Map");
        let titles: Vec<&str> = result
            .grounding_links
            .iter()
            .map(|link| link.title.as_str())
            .collect();
        assert_eq!(titles, vec!["A", "B", "A"]);
        Ok(())
    }

    #[test]
    fn search_text_is_joined_across_parts_and_skips_thoughts() -> anyhow::Result<()> {
        let text = canned_search_text();
        let (head, tail) = text.split_at(20);
        let response = response_from(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking out loud", "thought": true},
                    {"text": head},
                    {"text": tail}
                ]}
            }]
        }));
        let result = parse_search_response(&response)?;
        assert!(result.summary.starts_with("The Silk Road"));
        assert!(result.grounding_links.is_empty());
        Ok(())
    }

    #[test]
    fn citation_without_title_falls_back_to_uri() -> anyhow::Result<()> {
        let response = response_from(json!({
            "candidates": [{
                "content": {"parts": [{"text": canned_search_text()}]},
                "grounding_metadata": {"grounding_chunks": [
                    {"web": {"uri": "https://untitled.test"}},
                    {"web": {"title": "No uri"}}
                ]}
            }]
        }));
        let result = parse_search_response(&response)?;
        assert_eq!(result.grounding_links.len(), 1);
        assert_eq!(result.grounding_links[0].title, "https://untitled.test");
        Ok(())
    }

    #[test]
    fn search_rejects_non_json_text() {
        let response = response_from(json!({
            "candidates": [{"content": {"parts": [{"text": "Here are some ideas..."}]}}]
        }));
        let err = parse_search_response(&response).expect_err("should fail");
        assert_eq!(err.kind(), "malformed_search");
    }

    #[test]
    fn search_rejects_missing_required_fields() {
        let response = response_from(json!({
            "candidates": [{"content": {"parts": [{"text": "{\"visualizations\": []}"}]}}]
        }));
        let err = parse_search_response(&response).expect_err("should fail");
        assert!(err.to_string().contains("summary"));
    }

    #[test]
    fn search_rejects_unknown_visualization_type() {
        let text = json!({
            "summary": "s",
            "visualizations": [{"title": "t", "description": "d", "type": "video"}]
        })
        .to_string();
        let response = response_from(json!({
            "candidates": [{"content": {"parts": [{"text": text}]}}]
        }));
        assert!(parse_search_response(&response).is_err());
    }

    #[test]
    fn search_rejects_empty_candidates() {
        let response = response_from(json!({"candidates": []}));
        assert!(parse_search_response(&response).is_err());
    }

    #[test]
    fn image_extraction_returns_first_inline_image_as_png_data_uri() -> anyhow::Result<()> {
        let response = response_from(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your image"},
                    {"inlineData": {"mimeType": "image/png", "data": "Zmlyc3Q="}},
                    {"inline_data": {"mime_type": "image/png", "data": "c2Vjb25k"}}
                ]}
            }]
        }));
        assert_eq!(
            extract_image_data_url(&response)?,
            "data:image/png;base64,Zmlyc3Q="
        );
        Ok(())
    }

    #[test]
    fn image_extraction_accepts_snake_case_inline_data() -> anyhow::Result<()> {
        let response = response_from(json!({
            "candidates": [{"content": {"parts": [
                {"inline_data": {"mime_type": "image/jpeg", "data": "c2Vjb25k"}}
            ]}}]
        }));
        assert_eq!(
            extract_image_data_url(&response)?,
            "data:image/png;base64,c2Vjb25k"
        );
        Ok(())
    }

    #[test]
    fn image_extraction_reports_missing_candidate_first() {
        let response = response_from(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        }));
        let err = extract_image_data_url(&response).expect_err("should fail");
        assert!(matches!(err, ProviderError::NoCandidate));
    }

    #[test]
    fn image_extraction_surfaces_refusal_text_verbatim() {
        let response = response_from(json!({
            "candidates": [{"content": {"parts": [
                {"text": "I can't create images of real people."}
            ]}}]
        }));
        let err = extract_image_data_url(&response).expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "Model Refusal: I can't create images of real people."
        );
    }

    #[test]
    fn image_extraction_ignores_thought_text_when_reporting_refusals() {
        let response = response_from(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Considering whether this is allowed...", "thought": true},
                {"text": "I can't draw that."}
            ]}}]
        }));
        let err = extract_image_data_url(&response).expect_err("should fail");
        assert_eq!(err.to_string(), "Model Refusal: I can't draw that.");

        let thoughts_only = response_from(json!({
            "candidates": [{"content": {"parts": [
                {"text": "Planning the composition.", "thought": true}
            ]}}]
        }));
        let err = extract_image_data_url(&thoughts_only).expect_err("should fail");
        assert!(matches!(err, ProviderError::NoImageData));
    }

    #[test]
    fn image_extraction_without_image_or_text_is_generic_failure() {
        let response = response_from(json!({
            "candidates": [{"finishReason": "IMAGE_SAFETY"}]
        }));
        let err = extract_image_data_url(&response).expect_err("should fail");
        assert!(matches!(err, ProviderError::NoImageData));
    }

    #[test]
    fn missing_credential_is_reported_before_any_request() -> anyhow::Result<()> {
        if non_empty_env("GEMINI_API_KEY").is_some()
            || non_empty_env("GOOGLE_API_KEY").is_some()
            || non_empty_env("API_KEY").is_some()
        {
            return Ok(());
        }
        let client = GeminiClient::new(GeminiConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..GeminiConfig::default()
        })?;
        let err = client.search("Dark Matter").expect_err("no key configured");
        assert!(matches!(err, ProviderError::MissingCredential));
        Ok(())
    }
}
