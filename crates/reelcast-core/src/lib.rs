//! Reelcast core
//!
//! Client-side coordination of a server-driven video generation job:
//! - `stream`: SSE framing and protocol line classification
//! - `session`: the session state machine and action gating
//! - `coordinator`: runs a session against a `VideoService`
//! - `service`: the service seam and its HTTP implementation
//! - `catalog`, `config`, `error`: supporting types

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod service;
pub mod session;
pub mod stream;

pub use catalog::{Catalog, MusicOption, VoiceOption};
pub use config::ServiceConfig;
pub use coordinator::WorkflowCoordinator;
pub use error::{GateError, TransportError, ValidationError, WorkflowError};
pub use service::{CreationRequest, HttpVideoService, SupplementFile, UploadReceipt, VideoService};
pub use session::{FailureKind, Phase, Session};
