//! HTTP implementation of the video service
//!
//! Endpoints:
//! - `GET  /create-video?script=&music=&voice=` (text/event-stream)
//! - `POST /upload` (multipart: `file`, `user_id`)
//! - `GET  /download/{id}`
//! - `GET  /music-list`, `GET /voices`

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{header, Client, Response};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::{CreationRequest, LineStream, SupplementFile, UploadReceipt, VideoService};
use crate::catalog::{MusicListResponse, MusicOption, VoiceListResponse, VoiceOption};
use crate::config::ServiceConfig;
use crate::error::TransportError;
use crate::stream::sse_lines;

/// Longest error body kept in a status error
const MAX_ERROR_BODY: usize = 512;

/// Video service reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpVideoService {
    client: Client,
    base_url: Url,
}

impl HttpVideoService {
    pub fn new(config: &ServiceConfig) -> anyhow::Result<Self> {
        let base_url = config.url()?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;
        info!("Video service at {}", base_url);
        Ok(Self { client, base_url })
    }

    /// Base URL with `segments` appended as encoded path segments
    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Turn a non-success response into a status error
    async fn handle_error_response(response: Response) -> Result<Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|i| body.is_char_boundary(*i))
                .unwrap_or(0);
            body.truncate(cut);
        }
        warn!("Video service returned {}: {}", status, body);
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// Stream the artifact at `locator` into `dest`, returning bytes written.
    ///
    /// The body goes to a sibling `.part` file that is renamed over `dest`
    /// only once fully received, so a failed download leaves `dest` untouched.
    pub async fn download_artifact(&self, locator: &str, dest: &Path) -> Result<u64, TransportError> {
        let url = Url::parse(locator)?;
        info!("Downloading {} to {:?}", url, dest);
        let response = self.client.get(url).send().await?;
        let response = Self::handle_error_response(response).await?;

        // A missing video is reported as a 200 JSON body, not a status code
        if is_json(&response) {
            let body = response.text().await?;
            let message = artifact_error(&body);
            warn!("Download refused: {}", message);
            return Err(TransportError::Artifact(message));
        }

        let part = partial_path(dest);
        match write_body(response, &part).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest).await?;
                info!("Downloaded {} bytes", written);
                Ok(written)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                    debug!("Could not remove {:?}: {}", part, cleanup);
                }
                Err(e)
            }
        }
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim_start().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

/// Message from an `{"error": ..}` or `{"detail": ..}` body, else the body itself
fn artifact_error(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            ["error", "detail"]
                .iter()
                .find_map(|key| json.get(*key).and_then(|v| v.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// `dir/.name.part` next to `dest`
fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    dest.with_file_name(format!(".{}.part", name))
}

async fn write_body(response: Response, path: &Path) -> Result<u64, TransportError> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut written = 0u64;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

#[async_trait]
impl VideoService for HttpVideoService {
    async fn open_stream(&self, request: &CreationRequest) -> Result<LineStream, TransportError> {
        let mut url = self.endpoint(&["create-video"])?;
        url.query_pairs_mut()
            .append_pair("script", &request.script)
            .append_pair("music", &request.music)
            .append_pair("voice", &request.voice);
        debug!(
            "Opening creation stream ({} chars script, music={:?}, voice={})",
            request.script.len(),
            request.music,
            request.voice
        );

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .header(header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let response = Self::handle_error_response(response).await?;
        info!("Creation stream opened ({})", response.status());

        Ok(sse_lines(response.bytes_stream()))
    }

    async fn upload(
        &self,
        session_id: &str,
        file: SupplementFile,
    ) -> Result<UploadReceipt, TransportError> {
        let url = self.endpoint(&["upload"])?;
        let sent_name = file.file_name.clone();
        let size = file.contents.len();

        let mut part = Part::bytes(file.contents.to_vec()).file_name(file.file_name);
        if let Some(mime) = &file.mime_type {
            part = part.mime_str(mime)?;
        }
        let form = Form::new()
            .part("file", part)
            .text("user_id", session_id.to_string());

        info!("Uploading {} ({} bytes) for session {}", sent_name, size, session_id);
        let response = self.client.post(url).multipart(form).send().await?;
        let response = Self::handle_error_response(response).await?;

        // The body is informational; success is the status code
        let body = response.text().await?;
        let receipt = serde_json::from_str::<UploadReceipt>(&body).unwrap_or_else(|_| {
            debug!("Upload response had no filename, using {}", sent_name);
            UploadReceipt {
                file_name: sent_name,
            }
        });
        Ok(receipt)
    }

    fn download_locator(&self, session_id: &str) -> Result<String, TransportError> {
        Ok(self.endpoint(&["download", session_id])?.to_string())
    }

    async fn fetch_music(&self) -> Result<Vec<MusicOption>, TransportError> {
        let response = self.client.get(self.endpoint(&["music-list"])?).send().await?;
        let response = Self::handle_error_response(response).await?;
        let list: MusicListResponse = response.json().await?;
        debug!("Fetched {} music tracks", list.music_files.len());
        Ok(list.music_files)
    }

    async fn fetch_voices(&self) -> Result<Vec<VoiceOption>, TransportError> {
        let response = self.client.get(self.endpoint(&["voices"])?).send().await?;
        let response = Self::handle_error_response(response).await?;
        let list: VoiceListResponse = response.json().await?;
        debug!("Fetched {} voices", list.voices.len());
        Ok(list.voices)
    }
}
