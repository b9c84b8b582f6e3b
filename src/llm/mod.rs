use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::llm::model::{ChatCompletionRequest, ChatCompletionResponse};

pub mod model;

pub use model::ChatMessage;

#[async_trait]
pub trait ChatService: Send + Sync {
    /// Run one chat completion and return the assistant's text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Azure OpenAI chat-completions client addressed by deployment name.
#[derive(Clone)]
pub struct AzureOpenAiClient {
    http: Client,
    endpoint: Url,
    deployment: String,
    api_key: Option<String>,
    api_version: String,
    temperature: f32,
    max_tokens: u32,
}

impl fmt::Debug for AzureOpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureOpenAiClient")
            .field("endpoint", &self.endpoint)
            .field("deployment", &self.deployment)
            .finish_non_exhaustive()
    }
}

impl AzureOpenAiClient {
    pub fn new(endpoint: Url, deployment: String, api_key: Option<String>, api_version: String) -> Self {
        let http = Client::builder()
            .user_agent(concat!("pr-mailbot/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client");
        Self {
            http,
            endpoint,
            deployment,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_version,
            temperature: 0.7,
            max_tokens: 1500,
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let endpoint = Url::parse(&cfg.model.endpoint).context("invalid model endpoint URL")?;
        Ok(Self::new(
            endpoint,
            cfg.model.deployment.clone(),
            cfg.model.api_key.clone(),
            cfg.model.api_version.clone(),
        )
        .with_sampling(cfg.model.temperature, cfg.model.max_tokens))
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    fn completions_url(&self) -> Result<Url> {
        let mut base = self.endpoint.clone();
        if !base.path().ends_with('/') {
            base.set_path(&format!("{}/", base.path()));
        }
        let mut url = base
            .join(&format!(
                "openai/deployments/{}/chat/completions",
                self.deployment
            ))
            .context("invalid model endpoint URL")?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    pub fn build_request(&self, messages: &[ChatMessage]) -> Result<reqwest::Request> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("AZURE_OPENAI_API_KEY is not configured"))?;
        let body = ChatCompletionRequest {
            model: &self.deployment,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        self.http
            .post(self.completions_url()?)
            .header("api-key", api_key)
            .json(&body)
            .build()
            .context("failed to build chat completion request")
    }
}

#[async_trait]
impl ChatService for AzureOpenAiClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = self.build_request(messages)?;
        debug!(url = %request.url(), deployment = %self.deployment, "chat completion request");

        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach chat completion endpoint")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by model endpoint: {}", body);
            bail!("received 429 from model endpoint: {}", body);
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "model endpoint error: {}", body);
            bail!("model endpoint error {}: {}", status, body);
        }

        let payload: ChatCompletionResponse = res
            .json()
            .await
            .context("invalid chat completion response JSON")?;
        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| anyhow!("chat completion returned no content"))?;
        info!(chars = content.len(), "received chat completion");
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str, key: Option<&str>) -> AzureOpenAiClient {
        AzureOpenAiClient::new(
            Url::parse(uri).unwrap(),
            "gpt-4o".into(),
            key.map(str::to_string),
            "2024-05-01-preview".into(),
        )
    }

    fn messages() -> Vec<ChatMessage> {
        vec![ChatMessage::system("be terse"), ChatMessage::user("hi")]
    }

    #[test]
    fn completions_url_keeps_endpoint_path() {
        let c = client("https://res.openai.azure.com/proxy", Some("k"));
        assert_eq!(
            c.completions_url().unwrap().as_str(),
            "https://res.openai.azure.com/proxy/openai/deployments/gpt-4o/chat/completions?api-version=2024-05-01-preview"
        );
    }

    #[test]
    fn missing_key_fails_before_io() {
        let c = client("https://res.openai.azure.com/", None);
        let err = c.build_request(&messages()).unwrap_err();
        assert!(err.to_string().contains("AZURE_OPENAI_API_KEY"));
    }

    #[tokio::test]
    async fn test_chat_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/gpt-4o/chat/completions"))
            .and(query_param("api-version", "2024-05-01-preview"))
            .and(header("api-key", "secret-key"))
            .and(body_partial_json(serde_json::json!({
                "temperature": 0.5,
                "max_tokens": 200,
                "messages": [{"role": "system", "content": "be terse"}, {"role": "user", "content": "hi"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "chatcmpl-123",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": { "role": "assistant", "content": "{\"subject\":\"s\",\"body\":\"b\"}" },
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server.uri(), Some("secret-key")).with_sampling(0.5, 200);
        let reply = c.complete(&messages()).await.unwrap();
        assert_eq!(reply, "{\"subject\":\"s\",\"body\":\"b\"}");
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server.uri(), Some("k"))
            .complete(&messages())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server.uri(), Some("k"))
            .complete(&messages())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&server)
            .await;

        let err = client(&server.uri(), Some("k"))
            .complete(&messages())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no content"));
    }
}
