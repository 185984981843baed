//! Video service seam
//!
//! The coordinator only talks to the remote service through `VideoService`,
//! so the workflow can be driven by a scripted stream in tests.

mod http;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::catalog::{MusicOption, VoiceOption};
use crate::error::TransportError;

pub use http::HttpVideoService;

/// Protocol lines of one creation stream, in arrival order
pub type LineStream = BoxStream<'static, Result<String, TransportError>>;

/// Parameters of a creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreationRequest {
    pub script: String,
    /// Music track name, empty for none
    pub music: String,
    /// Voice id
    pub voice: String,
}

impl CreationRequest {
    pub fn new(
        script: impl Into<String>,
        music: impl Into<String>,
        voice: impl Into<String>,
    ) -> Self {
        Self {
            script: script.into(),
            music: music.into(),
            voice: voice.into(),
        }
    }
}

/// File attached to a session
#[derive(Debug, Clone)]
pub struct SupplementFile {
    pub file_name: String,
    pub contents: Bytes,
    pub mime_type: Option<String>,
}

impl SupplementFile {
    pub fn new(file_name: impl Into<String>, contents: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Read a file from disk, named after its last path component
    pub async fn from_path(path: &Path) -> Result<Self, TransportError> {
        let contents = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        Ok(Self::new(file_name, contents))
    }
}

/// What the service acknowledged for an upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    #[serde(rename = "filename")]
    pub file_name: String,
}

/// Remote video generation service
#[async_trait]
pub trait VideoService: Send + Sync + 'static {
    /// Submit a creation request and open its progress stream
    async fn open_stream(&self, request: &CreationRequest) -> Result<LineStream, TransportError>;

    /// Attach a file to the job keyed by `session_id`
    async fn upload(
        &self,
        session_id: &str,
        file: SupplementFile,
    ) -> Result<UploadReceipt, TransportError>;

    /// Address of the finished artifact for `session_id`
    fn download_locator(&self, session_id: &str) -> Result<String, TransportError>;

    /// Advertised music tracks
    async fn fetch_music(&self) -> Result<Vec<MusicOption>, TransportError>;

    /// Advertised voices
    async fn fetch_voices(&self) -> Result<Vec<VoiceOption>, TransportError>;
}
