//! Workflow coordinator
//!
//! Starts a creation request, feeds its stream through the parser into the
//! session state machine on a single consumer task, and exposes the two
//! gated follow-up actions. Callers observe progress through `subscribe`
//! or `snapshot`; nothing here blocks on the stream.

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::error::{TransportError, ValidationError, WorkflowError};
use crate::service::{CreationRequest, SupplementFile, UploadReceipt, VideoService};
use crate::session::{download_target, upload_target, Session, SessionCancellation, Transition};
use crate::stream::parse_line;

/// Drives one session at a time against a video service
pub struct WorkflowCoordinator<S: VideoService> {
    service: Arc<S>,
    state: Arc<watch::Sender<Session>>,
    /// Also serializes start against cancel
    cancellation: Mutex<SessionCancellation>,
    catalog: RwLock<Option<Catalog>>,
}

impl<S: VideoService> WorkflowCoordinator<S> {
    pub fn new(service: S) -> Self {
        Self::with_service(Arc::new(service))
    }

    pub fn with_service(service: Arc<S>) -> Self {
        let (state, _) = watch::channel(Session::new());
        Self {
            service,
            state: Arc::new(state),
            cancellation: Mutex::new(SessionCancellation::new()),
            catalog: RwLock::new(None),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Receiver that sees every state change
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Copy of the current session
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Fetch both option lists and keep them for validating requests
    pub async fn load_catalog(&self) -> Result<Catalog, WorkflowError> {
        let (music, voices) =
            futures::try_join!(self.service.fetch_music(), self.service.fetch_voices())?;
        info!(
            "Catalog loaded: {} music tracks, {} voices",
            music.len(),
            voices.len()
        );
        let catalog = Catalog::new(music, voices);
        *self.catalog.write() = Some(catalog.clone());
        Ok(catalog)
    }

    /// Catalog from the last successful `load_catalog`
    pub fn catalog(&self) -> Option<Catalog> {
        self.catalog.read().clone()
    }

    /// Submit a creation request and start consuming its stream.
    ///
    /// Returns once the session is `Creating`; the stream is read on a
    /// spawned task. Must be called inside a tokio runtime.
    pub fn start_creation(&self, request: CreationRequest) -> Result<(), WorkflowError> {
        if request.script.trim().is_empty() {
            return Err(ValidationError::EmptyScript.into());
        }
        if let Some(catalog) = self.catalog.read().as_ref() {
            catalog.validate(&request)?;
        }

        let mut cancellation = self.cancellation.lock();
        let mut attempt = None;
        self.state.send_if_modified(|session| {
            if !session.begin() {
                return false;
            }
            attempt = Some(session.attempt());
            true
        });
        let attempt = attempt.ok_or(ValidationError::AlreadyCreating)?;
        let token = cancellation.arm(attempt);
        drop(cancellation);

        info!("Starting video creation (attempt {})", attempt);
        tokio::spawn(consume_stream(
            self.service.clone(),
            self.state.clone(),
            request,
            attempt,
            token,
        ));
        Ok(())
    }

    /// Cancel the session in progress.
    ///
    /// The session fails with the cancellation reason and the stream is
    /// closed without reading anything further. Returns `false` if nothing
    /// was being created.
    pub fn cancel(&self) -> bool {
        let cancellation = self.cancellation.lock();
        let mut cancelled = None;
        self.state.send_if_modified(|session| {
            if session.cancel() == Transition::Ignored {
                return false;
            }
            cancelled = Some(session.attempt());
            true
        });
        match cancelled {
            Some(attempt) => {
                cancellation.cancel(attempt);
                true
            }
            None => false,
        }
    }

    /// Attach a file to the current session.
    ///
    /// Allowed as soon as a session id is known, in any phase. Failures
    /// are returned to the caller and leave the session untouched.
    pub async fn upload_supplement(
        &self,
        file: SupplementFile,
    ) -> Result<UploadReceipt, WorkflowError> {
        let session_id = upload_target(&self.state.borrow())?.to_string();
        let file_name = file.file_name.clone();

        match self.service.upload(&session_id, file).await {
            Ok(receipt) => {
                info!("Uploaded {} for session {}", receipt.file_name, session_id);
                Ok(receipt)
            }
            Err(e) => {
                warn!("Failed to upload {}: {}", file_name, e);
                Err(e.into())
            }
        }
    }

    /// Locator of the finished video. Does not fetch any bytes.
    pub fn request_download(&self) -> Result<String, WorkflowError> {
        let session_id = download_target(&self.state.borrow())?.to_string();
        let locator = self.service.download_locator(&session_id)?;
        debug!("Download locator for {}: {}", session_id, locator);
        Ok(locator)
    }

    /// Wait until the session is no longer `Creating`
    pub async fn wait_for_outcome(&self) -> Session {
        let mut rx = self.state.subscribe();
        let outcome = match rx.wait_for(|session| !session.is_creating()).await {
            Ok(session) => session.clone(),
            Err(_) => self.snapshot(),
        };
        outcome
    }
}

impl<S: VideoService> Drop for WorkflowCoordinator<S> {
    fn drop(&mut self) {
        let cancellation = self.cancellation.get_mut();
        cancellation.cancel(cancellation.attempt());
    }
}

/// Apply a change only if `attempt` is still the current session
fn apply_to(
    state: &watch::Sender<Session>,
    attempt: u64,
    change: impl FnOnce(&mut Session) -> Transition,
) -> Transition {
    let mut transition = Transition::Ignored;
    state.send_if_modified(|session| {
        if session.attempt() != attempt {
            return false;
        }
        transition = change(session);
        transition != Transition::Ignored
    });
    transition
}

/// Single consumer of one creation stream
async fn consume_stream<S: VideoService>(
    service: Arc<S>,
    state: Arc<watch::Sender<Session>>,
    request: CreationRequest,
    attempt: u64,
    token: CancellationToken,
) {
    let opened = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!("Attempt {} cancelled before the stream opened", attempt);
            return;
        }
        opened = service.open_stream(&request) => opened,
    };

    let mut lines = match opened {
        Ok(lines) => lines,
        Err(e) => {
            apply_to(&state, attempt, |session| session.fail_transport(&e.to_string()));
            return;
        }
    };

    let mut received = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Closing stream for attempt {} after {} lines", attempt, received);
                break;
            }
            next = lines.next() => next,
        };

        let transition = match next {
            Some(Ok(line)) => {
                received += 1;
                debug!("Line #{}: {}", received, line);
                apply_to(&state, attempt, |session| session.apply(parse_line(&line)))
            }
            Some(Err(e)) => apply_to(&state, attempt, |session| session.fail_transport(&e.to_string())),
            None => {
                let reason = TransportError::Stream("closed before a terminal line".to_string());
                apply_to(&state, attempt, |session| session.fail_transport(&reason.to_string()))
            }
        };

        match transition {
            Transition::Logged | Transition::SessionAssigned { .. } => continue,
            Transition::Completed | Transition::Failed { .. } => {
                debug!("Attempt {} finished after {} lines", attempt, received);
                break;
            }
            Transition::Ignored => {
                debug!("Attempt {} no longer current, dropping stream", attempt);
                break;
            }
        }
    }
    // Dropping `lines` closes the connection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MusicOption, VoiceOption};
    use crate::error::GateError;
    use crate::service::LineStream;
    use crate::session::{FailureKind, Phase, SUCCESS_MARKER, TRANSPORT_FAILURE_MESSAGE};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type LineSender = mpsc::UnboundedSender<Result<String, TransportError>>;

    /// Service whose streams are fed by the test
    #[derive(Default)]
    struct ScriptedService {
        streams: parking_lot::Mutex<VecDeque<Result<LineStream, TransportError>>>,
        requests: parking_lot::Mutex<Vec<CreationRequest>>,
        uploads: parking_lot::Mutex<Vec<(String, String)>>,
        fail_uploads: bool,
    }

    impl ScriptedService {
        fn with_stream() -> (Self, LineSender) {
            let service = Self::default();
            let tx = service.push_stream();
            (service, tx)
        }

        fn push_stream(&self) -> LineSender {
            let (tx, rx) = mpsc::unbounded_channel();
            self.streams
                .lock()
                .push_back(Ok(UnboundedReceiverStream::new(rx).boxed()));
            tx
        }
    }

    #[async_trait]
    impl VideoService for ScriptedService {
        async fn open_stream(
            &self,
            request: &CreationRequest,
        ) -> Result<LineStream, TransportError> {
            self.requests.lock().push(request.clone());
            self.streams
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Stream("no stream scripted".to_string())))
        }

        async fn upload(
            &self,
            session_id: &str,
            file: SupplementFile,
        ) -> Result<UploadReceipt, TransportError> {
            if self.fail_uploads {
                return Err(TransportError::Status {
                    status: 500,
                    body: "disk full".to_string(),
                });
            }
            self.uploads
                .lock()
                .push((session_id.to_string(), file.file_name.clone()));
            Ok(UploadReceipt {
                file_name: file.file_name,
            })
        }

        fn download_locator(&self, session_id: &str) -> Result<String, TransportError> {
            Ok(format!("http://localhost:8000/download/{}", session_id))
        }

        async fn fetch_music(&self) -> Result<Vec<MusicOption>, TransportError> {
            Ok(vec![MusicOption("funny 2.mp3".to_string())])
        }

        async fn fetch_voices(&self) -> Result<Vec<VoiceOption>, TransportError> {
            Ok(vec![VoiceOption {
                id: "gbLy9ep70G3JW53cTzFC".to_string(),
                name: "Madalina".to_string(),
                preview: None,
                language: None,
            }])
        }
    }

    fn request(script: &str) -> CreationRequest {
        CreationRequest::new(script, "funny 2.mp3", "gbLy9ep70G3JW53cTzFC")
    }

    fn send(tx: &LineSender, line: &str) {
        tx.send(Ok(line.to_string())).unwrap();
    }

    async fn wait_until(
        coordinator: &WorkflowCoordinator<ScriptedService>,
        predicate: impl FnMut(&Session) -> bool,
    ) -> Session {
        let mut rx = coordinator.subscribe();
        let session = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for session state")
            .unwrap()
            .clone();
        session
    }

    async fn wait_closed(tx: &LineSender) {
        tokio::time::timeout(Duration::from_secs(5), tx.closed())
            .await
            .expect("stream was not closed");
    }

    #[tokio::test]
    async fn test_scenario_completed_with_session_id() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        assert_eq!(coordinator.snapshot().phase(), Phase::Creating);

        send(&tx, "rendering");
        send(&tx, r#"{"user_id":"abc123"}"#);
        send(&tx, "DONE");

        let session = coordinator.wait_for_outcome().await;
        assert_eq!(session.phase(), Phase::Completed);
        assert_eq!(session.session_id(), Some("abc123"));
        assert_eq!(
            session.progress_log(),
            &["rendering", r#"{"user_id":"abc123"}"#, SUCCESS_MARKER]
        );
        assert_eq!(
            coordinator.request_download().unwrap(),
            "http://localhost:8000/download/abc123"
        );
        wait_closed(&tx).await;
    }

    #[tokio::test]
    async fn test_scenario_job_error_first_line() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, "ERROR: invalid voice");

        let session = coordinator.wait_for_outcome().await;
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.error_message(), Some("invalid voice"));
        assert_eq!(session.failure(), Some(FailureKind::Job));
        assert_eq!(session.session_id(), None);

        let err = coordinator
            .upload_supplement(SupplementFile::new("broll.mp4", b"x".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.gate(), Some(GateError::NoSessionId));
    }

    #[tokio::test]
    async fn test_scenario_connection_drop() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, "rendering");
        drop(tx);

        let session = coordinator.wait_for_outcome().await;
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.failure(), Some(FailureKind::Transport));
        assert_eq!(session.error_message(), Some(TRANSPORT_FAILURE_MESSAGE));
        assert_eq!(session.progress_log(), &["rendering"]);
    }

    #[tokio::test]
    async fn test_transport_error_mid_stream() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, r#"{"user_id":"abc123"}"#);
        tx.send(Err(TransportError::Stream("reset".to_string())))
            .unwrap();

        let session = coordinator.wait_for_outcome().await;
        assert_eq!(session.failure(), Some(FailureKind::Transport));
        // The id survives the failure and still unlocks both actions
        assert_eq!(session.session_id(), Some("abc123"));
        assert!(coordinator.request_download().is_ok());
        wait_closed(&tx).await;
    }

    #[tokio::test]
    async fn test_open_failure_fails_session() {
        let coordinator = WorkflowCoordinator::new(ScriptedService::default());
        coordinator.start_creation(request("Hello world")).unwrap();

        let session = coordinator.wait_for_outcome().await;
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.failure(), Some(FailureKind::Transport));
    }

    #[tokio::test]
    async fn test_request_is_forwarded() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, "DONE");
        coordinator.wait_for_outcome().await;

        assert_eq!(
            coordinator.service().requests.lock().as_slice(),
            &[request("Hello world")]
        );
    }

    #[tokio::test]
    async fn test_empty_script_rejected_without_state_change() {
        let coordinator = WorkflowCoordinator::new(ScriptedService::default());
        for script in ["", "   \n"] {
            let err = coordinator.start_creation(request(script)).unwrap_err();
            assert!(matches!(
                err,
                WorkflowError::Validation(ValidationError::EmptyScript)
            ));
        }
        assert_eq!(coordinator.snapshot().phase(), Phase::Idle);
        assert_eq!(coordinator.snapshot().attempt(), 0);
    }

    #[tokio::test]
    async fn test_reentrant_start_rejected() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("first")).unwrap();
        send(&tx, "rendering");
        wait_until(&coordinator, |s| s.progress_log().len() == 1).await;

        let err = coordinator.start_creation(request("second")).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::AlreadyCreating)
        ));
        let session = coordinator.snapshot();
        assert_eq!(session.attempt(), 1);
        assert_eq!(session.progress_log(), &["rendering"]);
    }

    #[tokio::test]
    async fn test_restart_after_completion_clears_state() {
        let (service, first) = ScriptedService::with_stream();
        let second = service.push_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("first")).unwrap();
        send(&first, r#"{"user_id":"old"}"#);
        send(&first, "DONE");
        coordinator.wait_for_outcome().await;

        coordinator.start_creation(request("second")).unwrap();
        let session = coordinator.snapshot();
        assert_eq!(session.phase(), Phase::Creating);
        assert_eq!(session.session_id(), None);
        assert!(session.progress_log().is_empty());

        send(&second, "DONE");
        let session = coordinator.wait_for_outcome().await;
        assert_eq!(session.attempt(), 2);
        assert_eq!(session.progress_log(), &[SUCCESS_MARKER]);
    }

    #[tokio::test]
    async fn test_upload_gated_on_session_id() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        let err = coordinator
            .upload_supplement(SupplementFile::new("a.png", b"png".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.gate(), Some(GateError::NoSessionId));

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, "rendering");
        wait_until(&coordinator, |s| !s.progress_log().is_empty()).await;
        let err = coordinator
            .upload_supplement(SupplementFile::new("a.png", b"png".to_vec()))
            .await
            .unwrap_err();
        assert_eq!(err.gate(), Some(GateError::NoSessionId));

        send(&tx, r#"{"user_id":"abc123"}"#);
        wait_until(&coordinator, |s| s.session_id().is_some()).await;

        // Allowed mid-stream
        let receipt = coordinator
            .upload_supplement(SupplementFile::new("a.png", b"png".to_vec()))
            .await
            .unwrap();
        assert_eq!(receipt.file_name, "a.png");
        assert_eq!(
            coordinator.service().uploads.lock().as_slice(),
            &[("abc123".to_string(), "a.png".to_string())]
        );

        // Uploads never touch the log or phase
        let session = coordinator.snapshot();
        assert_eq!(session.phase(), Phase::Creating);
        assert_eq!(session.progress_log().len(), 2);
    }

    #[tokio::test]
    async fn test_upload_failure_leaves_session_alone() {
        let service = ScriptedService {
            fail_uploads: true,
            ..Default::default()
        };
        let tx = service.push_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, r#"{"user_id":"abc123"}"#);
        wait_until(&coordinator, |s| s.session_id().is_some()).await;

        let err = coordinator
            .upload_supplement(SupplementFile::new("a.png", b"png".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Transport(_)));
        let session = coordinator.snapshot();
        assert_eq!(session.phase(), Phase::Creating);
        assert_eq!(session.error_message(), None);
    }

    #[tokio::test]
    async fn test_download_gated_while_creating() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        assert_eq!(
            coordinator.request_download().unwrap_err().gate(),
            Some(GateError::NoSessionId)
        );

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, r#"{"user_id":"abc123"}"#);
        wait_until(&coordinator, |s| s.session_id().is_some()).await;
        assert_eq!(
            coordinator.request_download().unwrap_err().gate(),
            Some(GateError::NoArtifactAvailable)
        );

        send(&tx, "DONE");
        coordinator.wait_for_outcome().await;
        assert!(coordinator.request_download().is_ok());
    }

    #[tokio::test]
    async fn test_cancel_closes_stream_and_skips_buffered_lines() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);

        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, "rendering");
        wait_until(&coordinator, |s| s.progress_log().len() == 1).await;

        assert!(coordinator.cancel());
        let session = coordinator.snapshot();
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.failure(), Some(FailureKind::Cancelled));

        // Buffered after cancel; must never be applied
        let _ = tx.send(Ok("late".to_string()));
        let _ = tx.send(Ok("DONE".to_string()));
        wait_closed(&tx).await;

        let session = coordinator.snapshot();
        assert_eq!(session.phase(), Phase::Failed);
        assert_eq!(session.progress_log(), &["rendering"]);
        assert!(!coordinator.cancel());
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let coordinator = WorkflowCoordinator::new(ScriptedService::default());
        assert!(!coordinator.cancel());
        assert_eq!(coordinator.snapshot().phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn test_catalog_validates_selections() {
        let (service, _tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);
        let catalog = coordinator.load_catalog().await.unwrap();
        assert_eq!(catalog.default_music(), "funny 2.mp3");
        assert_eq!(coordinator.catalog(), Some(catalog));

        let err = coordinator
            .start_creation(CreationRequest::new("Hello", "", "unknown-voice"))
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::UnknownVoice(_))
        ));
        assert_eq!(coordinator.snapshot().phase(), Phase::Idle);

        coordinator
            .start_creation(CreationRequest::new("Hello", "", "gbLy9ep70G3JW53cTzFC"))
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropping_coordinator_closes_stream() {
        let (service, tx) = ScriptedService::with_stream();
        let coordinator = WorkflowCoordinator::new(service);
        coordinator.start_creation(request("Hello world")).unwrap();
        send(&tx, "rendering");
        wait_until(&coordinator, |s| !s.progress_log().is_empty()).await;

        drop(coordinator);
        wait_closed(&tx).await;
    }
}
