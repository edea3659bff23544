use async_trait::async_trait;
use reqwest::StatusCode;
use runtime::{Explainer, ServiceError};
use serde::{Deserialize, Serialize};

use crate::config::ApiKey;

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";
const MAX_ERROR_BODY_CHARS: usize = 200;

pub fn build_prompt(volatility: f64, headline: &str) -> String {
    format!(
        "Market Volatility is High (Score: {volatility:.2}). Latest News is: '{headline}'. \
         Explain the connection in 1 sentence."
    )
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: [RequestContent<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestContent<'a> {
    parts: [RequestPart<'a>; 1],
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// Pulls the first candidate's text out of a `generateContent` response body.
pub fn extract_text(body: &str) -> Result<String, ServiceError> {
    let response: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|err| ServiceError::MalformedResponse(err.to_string()))?;

    response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
        .filter(|text| !text.trim().is_empty())
        .ok_or_else(|| ServiceError::MalformedResponse("response carried no text".to_string()))
}

/// `Explainer` backed by the Gemini `generateContent` REST endpoint.
#[derive(Debug, Clone)]
pub struct GeminiExplainer {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<ApiKey>,
}

impl GeminiExplainer {
    pub fn new(model: impl Into<String>, api_key: Option<ApiKey>) -> Result<Self, reqwest::Error> {
        Self::with_base_url(GEMINI_API_BASE, model, api_key)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<ApiKey>,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sentinel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl Explainer for GeminiExplainer {
    async fn explain(&self, volatility: f64, headline: &str) -> Result<String, ServiceError> {
        let Some(api_key) = &self.api_key else {
            return Err(ServiceError::MissingApiKey);
        };

        let prompt = build_prompt(volatility, headline);
        let request = GenerateContentRequest {
            contents: [RequestContent {
                parts: [RequestPart { text: &prompt }],
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|err| ServiceError::Transport(err.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ServiceError::Transport(err.without_url().to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            return Err(ServiceError::Http {
                status: status.as_u16(),
                message: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        extract_text(&body)
    }
}
