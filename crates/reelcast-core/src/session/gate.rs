//! Eligibility checks for the actions that depend on a session id
//!
//! Both checks read the current snapshot every time they are asked.

use super::state::Session;
use crate::error::GateError;

/// Session id to upload against, if uploads are allowed.
///
/// Phase does not matter: uploads are fine mid-stream and after the end.
pub fn upload_target(session: &Session) -> Result<&str, GateError> {
    session.session_id().ok_or(GateError::NoSessionId)
}

/// Session id to download, if the artifact can exist yet.
///
/// Downloads wait for the job to leave `Creating`.
pub fn download_target(session: &Session) -> Result<&str, GateError> {
    let id = session.session_id().ok_or(GateError::NoSessionId)?;
    if session.is_creating() {
        return Err(GateError::NoArtifactAvailable);
    }
    Ok(id)
}
