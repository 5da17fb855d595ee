use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::time::{Duration, Instant};

/// External image generation capability.
///
/// One synchronous attempt per call; retry policy belongs to the caller.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError>;
}

/// Render the generation prompt for an animal wearing a shirt printed with `text`.
pub fn build_prompt(animal: &str, text: &str) -> String {
    format!(
        "Generate a high-quality, front-facing portrait of a {animal} of any breed or species. \
         The animal looks directly at the camera with a joyful, expressive face. \
         It wears a plain white shirt with the text \"{text}\" printed on it. \
         It may also wear stylish accessories such as a hat, sunglasses or a scarf. \
         Use a minimal, soft background to keep the focus on the animal."
    )
}

const POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Client for Replicate-hosted text-to-image models.
pub struct ReplicateClient {
    http: Client,
    base_url: String,
    model: String,
    api_token: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<serde_json::Value>,
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: String,
}

impl Prediction {
    fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "succeeded" | "failed" | "canceled")
    }
}

impl ReplicateClient {
    pub fn new(
        base_url: &str,
        model: &str,
        api_token: &str,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_token: api_token.to_string(),
            timeout,
        })
    }

    async fn create_prediction(&self, prompt: &str) -> Result<Prediction, GenerationError> {
        let url = format!("{}/v1/models/{}/predictions", self.base_url, self.model);

        let request_body = serde_json::json!({
            "input": {
                "prompt": prompt,
                "output_format": "png"
            }
        });

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&request_body)
            .send()
            .await
            .map_err(GenerationError::Http)?
            .error_for_status()
            .map_err(GenerationError::Http)?;

        response.json().await.map_err(GenerationError::Http)
    }

    async fn wait_for_prediction(
        &self,
        mut prediction: Prediction,
        started: Instant,
    ) -> Result<Prediction, GenerationError> {
        while !prediction.is_terminal() {
            if started.elapsed() >= self.timeout {
                return Err(GenerationError::Timeout(self.timeout));
            }

            let poll_url = prediction
                .urls
                .as_ref()
                .map(|urls| urls.get.clone())
                .ok_or_else(|| {
                    GenerationError::Provider(format!(
                        "prediction {} is {} but has no poll URL",
                        prediction.id, prediction.status
                    ))
                })?;

            tokio::time::sleep(POLL_INTERVAL).await;

            tracing::debug!(prediction_id = %prediction.id, status = %prediction.status, "Polling prediction");
            prediction = self
                .http
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await
                .map_err(GenerationError::Http)?
                .error_for_status()
                .map_err(GenerationError::Http)?
                .json()
                .await
                .map_err(GenerationError::Http)?;
        }

        Ok(prediction)
    }

    async fn fetch_output(&self, output: &str) -> Result<Vec<u8>, GenerationError> {
        if let Some(data) = output.strip_prefix("data:") {
            return decode_data_uri(data);
        }

        let bytes = self
            .http
            .get(output)
            .send()
            .await
            .map_err(GenerationError::Http)?
            .error_for_status()
            .map_err(GenerationError::Http)?
            .bytes()
            .await
            .map_err(GenerationError::Http)?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ImageGenerator for ReplicateClient {
    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, GenerationError> {
        let started = Instant::now();

        let prediction = self.create_prediction(prompt).await?;
        let prediction = self.wait_for_prediction(prediction, started).await?;

        if prediction.status != "succeeded" {
            let reason = prediction
                .error
                .map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .unwrap_or_else(|| format!("prediction {}", prediction.status));
            return Err(GenerationError::Provider(reason));
        }

        let output = prediction
            .output
            .as_ref()
            .and_then(first_output)
            .ok_or(GenerationError::EmptyOutput)?;

        let bytes = self.fetch_output(&output).await?;
        ensure_image(&bytes)?;

        tracing::debug!(
            prediction_id = %prediction.id,
            bytes = bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Generation complete"
        );

        Ok(bytes)
    }
}

/// First output location of a prediction: models return either a single
/// string or a list of strings.
fn first_output(output: &serde_json::Value) -> Option<String> {
    match output {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => items.iter().find_map(first_output),
        _ => None,
    }
}

/// Decode the part of a `data:` URI after the scheme, e.g. `image/png;base64,iVBOR...`.
fn decode_data_uri(data: &str) -> Result<Vec<u8>, GenerationError> {
    let (meta, payload) = data
        .split_once(',')
        .ok_or_else(|| GenerationError::Provider("malformed data URI output".to_string()))?;

    if !meta.ends_with(";base64") {
        return Err(GenerationError::Provider(format!(
            "unsupported data URI encoding: {meta}"
        )));
    }

    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(GenerationError::Decode)
}

fn ensure_image(bytes: &[u8]) -> Result<(), GenerationError> {
    image::guess_format(bytes)
        .map(|_| ())
        .map_err(|_| GenerationError::NotAnImage(bytes.len()))
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Generation provider reported failure: {0}")]
    Provider(String),

    #[error("Generation did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Generation returned no output")]
    EmptyOutput,

    #[error("Generation output ({0} bytes) is not a recognised image")]
    NotAnImage(usize),

    #[error("Failed to decode generation output: {0}")]
    Decode(#[from] base64::DecodeError),
}
