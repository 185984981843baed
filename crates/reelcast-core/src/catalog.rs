//! Music and voice catalogs
//!
//! Read-only option lists advertised by the service. They only feed the
//! creation request: defaults come from here and selections are checked
//! against them.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::service::CreationRequest;

/// Background music track, identified by file name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MusicOption(pub String);

impl MusicOption {
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Narration voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceOption {
    pub id: String,
    pub name: String,
    /// Preview clip name
    #[serde(default)]
    pub preview: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

/// `GET /music-list` body
#[derive(Debug, Deserialize)]
pub(crate) struct MusicListResponse {
    pub music_files: Vec<MusicOption>,
}

/// `GET /voices` body
#[derive(Debug, Deserialize)]
pub(crate) struct VoiceListResponse {
    pub voices: Vec<VoiceOption>,
}

/// Both option lists, fetched once per workflow
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub music: Vec<MusicOption>,
    pub voices: Vec<VoiceOption>,
}

impl Catalog {
    pub fn new(music: Vec<MusicOption>, voices: Vec<VoiceOption>) -> Self {
        Self { music, voices }
    }

    /// First advertised track, or empty for no music
    pub fn default_music(&self) -> &str {
        self.music.first().map(MusicOption::name).unwrap_or_default()
    }

    /// First advertised voice id
    pub fn default_voice(&self) -> Option<&str> {
        self.voices.first().map(|voice| voice.id.as_str())
    }

    pub fn has_music(&self, name: &str) -> bool {
        self.music.iter().any(|music| music.name() == name)
    }

    pub fn voice(&self, id: &str) -> Option<&VoiceOption> {
        self.voices.iter().find(|voice| voice.id == id)
    }

    /// Check a request's selections against what was advertised.
    ///
    /// Empty music means no music and is always accepted.
    pub fn validate(&self, request: &CreationRequest) -> Result<(), ValidationError> {
        if !request.music.is_empty() && !self.has_music(&request.music) {
            return Err(ValidationError::UnknownMusic(request.music.clone()));
        }
        if self.voice(&request.voice).is_none() {
            return Err(ValidationError::UnknownVoice(request.voice.clone()));
        }
        Ok(())
    }
}
