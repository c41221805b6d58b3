//! Failures at the hosted-model boundary.
//!
//! Every variant's `Display` text is what ends up in the session's error
//! state, so refusal text and HTTP bodies are carried through verbatim.

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("GEMINI_API_KEY or GOOGLE_API_KEY or API_KEY not set")]
    MissingCredential,

    #[error("{provider} request failed ({endpoint}): {source}")]
    Transport {
        provider: &'static str,
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} request failed ({code}): {body}")]
    Status {
        provider: &'static str,
        code: u16,
        body: String,
    },

    #[error("{provider} returned invalid JSON payload: {reason}")]
    InvalidPayload {
        provider: &'static str,
        reason: String,
    },

    #[error("Search response was malformed: {reason}")]
    MalformedSearch { reason: String },

    #[error("No candidates returned from the image model.")]
    NoCandidate,

    #[error("Model Refusal: {0}")]
    ModelRefusal(String),

    #[error("No image data returned from model. This usually happens if the prompt triggered a safety filter or failed to generate.")]
    NoImageData,
}

impl ProviderError {
    pub fn malformed_search(reason: impl Into<String>) -> Self {
        ProviderError::MalformedSearch {
            reason: reason.into(),
        }
    }

    /// Short machine-readable label for event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::MissingCredential => "missing_credential",
            ProviderError::Transport { .. } => "transport",
            ProviderError::Status { .. } => "http_status",
            ProviderError::InvalidPayload { .. } => "invalid_payload",
            ProviderError::MalformedSearch { .. } => "malformed_search",
            ProviderError::NoCandidate => "no_candidate",
            ProviderError::ModelRefusal(_) => "model_refusal",
            ProviderError::NoImageData => "no_image_data",
        }
    }
}
