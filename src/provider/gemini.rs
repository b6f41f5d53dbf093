//! Gemini-style REST client implementing all three collaborator roles.
//!
//! | Role | Endpoint |
//! |------|----------|
//! | generate | `POST /v1beta/models/{model}:generateContent` |
//! | embed | `POST /v1beta/models/{embedding_model}:embedContent` |
//! | upload | `POST /upload/v1beta/files` (resumable: start, then upload+finalize) |
//! | get | `GET /v1beta/{name}` |
//!
//! Responses are parsed into typed structs here, once; callers only see
//! strings, vectors, and [`RemoteHandle`]s.

use std::path::Path;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{Embedder, FileStore, GenerateOptions, Generator, RetryPolicy};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::models::{HandleState, RemoteHandle};

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl GeminiProvider {
    /// Create a provider, reading the API key from `config.api_key_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment variable is not set or the
    /// HTTP client cannot be built.
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key,
            _ => bail!("{} environment variable not set", config.api_key_env),
        };
        Self::with_api_key(config, api_key)
    }

    /// Create a provider with an explicit API key.
    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            client,
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        what: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, ProviderError> {
        self.retry
            .run(what, move || async move {
                let response = self
                    .client
                    .post(url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(body)
                    .send()
                    .await?;
                decode(response).await
            })
            .await
    }
}

/// Map a response to `T`, classifying HTTP failures for the retry layer.
async fn decode<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, ProviderError> {
    let status = response.status();
    if status.is_success() {
        let text = response.text().await?;
        return serde_json::from_str(&text)
            .map_err(|e| ProviderError::Fatal(format!("invalid response body: {}", e)));
    }

    Err(status_error(response).await)
}

async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    if status.as_u16() == 429 || status.is_server_error() {
        ProviderError::Transient(format!("API error {}: {}", status, body_text))
    } else {
        ProviderError::Fatal(format!("API error {}: {}", status, body_text))
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("pdf") => "application/pdf",
        Some("md") | Some("markdown") => "text/markdown",
        Some("txt") => "text/plain",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileObject {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    state: String,
}

impl From<FileObject> for RemoteHandle {
    fn from(f: FileObject) -> Self {
        let state = match f.state.as_str() {
            "ACTIVE" => HandleState::Active,
            "FAILED" => HandleState::Failed,
            _ => HandleState::Processing,
        };
        RemoteHandle {
            id: f.name,
            uri: f.uri,
            display_name: f.display_name,
            mime_type: f.mime_type,
            state,
        }
    }
}

#[async_trait]
impl Generator for GeminiProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<String, ProviderError> {
        let mut parts: Vec<serde_json::Value> = options
            .attachments
            .iter()
            .map(|h| json!({ "file_data": { "mime_type": h.mime_type, "file_uri": h.uri } }))
            .collect();
        parts.push(json!({ "text": prompt }));

        let mut generation_config = serde_json::Map::new();
        if let Some(t) = options.temperature {
            generation_config.insert("temperature".into(), json!(t));
        }
        if let Some(n) = options.max_output_tokens {
            generation_config.insert("maxOutputTokens".into(), json!(n));
        }
        if let Some(m) = &options.response_mime_type {
            generation_config.insert("responseMimeType".into(), json!(m));
        }

        let body = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": generation_config,
        });

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let response: GenerateResponse = self.post_json("generate", &url, &body).await?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ProviderError::Fatal("empty generation response".to_string()));
        }
        Ok(text)
    }
}

#[async_trait]
impl Embedder for GeminiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, self.embedding_model
        );
        let response: EmbedResponse = self.post_json("embed", &url, &body).await?;
        Ok(response.embedding.values)
    }
}

#[async_trait]
impl FileStore for GeminiProvider {
    async fn upload(&self, path: &Path, display_name: &str) -> Result<RemoteHandle, ProviderError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ProviderError::Fatal(format!("failed to read {}: {}", path.display(), e)))?;
        let mime = mime_for(path);
        let start_url = format!("{}/upload/v1beta/files", self.base_url);
        let metadata = json!({ "file": { "display_name": display_name } });

        let (bytes, metadata) = (&bytes, &metadata);
        let start_url = start_url.as_str();

        let handle = self
            .retry
            .run("upload", move || async move {
                let start = self
                    .client
                    .post(start_url)
                    .header("x-goog-api-key", &self.api_key)
                    .header("X-Goog-Upload-Protocol", "resumable")
                    .header("X-Goog-Upload-Command", "start")
                    .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
                    .header("X-Goog-Upload-Header-Content-Type", mime)
                    .json(metadata)
                    .send()
                    .await?;

                if !start.status().is_success() {
                    return Err(status_error(start).await);
                }

                let upload_url = start
                    .headers()
                    .get("x-goog-upload-url")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        ProviderError::Fatal("upload start response missing upload url".to_string())
                    })?;

                let finish = self
                    .client
                    .post(&upload_url)
                    .header("X-Goog-Upload-Offset", "0")
                    .header("X-Goog-Upload-Command", "upload, finalize")
                    .body(bytes.clone())
                    .send()
                    .await?;

                let uploaded: UploadResponse = decode(finish).await?;
                Ok(RemoteHandle::from(uploaded.file))
            })
            .await?;

        tracing::debug!(path = %path.display(), handle = %handle.id, "uploaded file");
        Ok(handle)
    }

    async fn get(&self, handle_id: &str) -> Result<RemoteHandle, ProviderError> {
        let url = format!("{}/v1beta/{}", self.base_url, handle_id);
        let url = url.as_str();
        let file: FileObject = self
            .retry
            .run("get_file", move || async move {
                let response = self
                    .client
                    .get(url)
                    .header("x-goog-api-key", &self.api_key)
                    .send()
                    .await?;
                decode(response).await
            })
            .await?;
        Ok(file.into())
    }
}
