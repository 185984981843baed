//! `reelcast create`
//!
//! Renders the session by observing the coordinator: new progress lines are
//! printed as they arrive, supplements go up once a session id is known.

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::{info, warn};

use reelcast_core::{
    CreationRequest, GateError, HttpVideoService, Phase, Session, SupplementFile, VideoService,
    WorkflowCoordinator,
};

#[derive(Args)]
pub struct CreateArgs {
    /// Script text to narrate
    #[arg(short, long, conflicts_with = "script_file")]
    script: Option<String>,

    /// Read the script from a file
    #[arg(long)]
    script_file: Option<PathBuf>,

    /// Music track name (defaults to the first advertised track, "" for none)
    #[arg(short, long)]
    music: Option<String>,

    /// Voice id (defaults to the first advertised voice)
    #[arg(long)]
    voice: Option<String>,

    /// Files to attach once the job has a session id
    #[arg(short, long)]
    upload: Vec<PathBuf>,

    /// Save the finished video here
    #[arg(short, long)]
    download: Option<PathBuf>,
}

async fn read_script(args: &CreateArgs) -> Result<String> {
    match (&args.script, &args.script_file) {
        (Some(script), _) => Ok(script.clone()),
        (None, Some(path)) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read script {}", path.display())),
        (None, None) => bail!("Provide --script or --script-file"),
    }
}

/// Run one session. Returns whether it completed.
pub async fn run(
    coordinator: &WorkflowCoordinator<HttpVideoService>,
    args: CreateArgs,
) -> Result<bool> {
    let script = read_script(&args).await?;
    let catalog = coordinator
        .load_catalog()
        .await
        .context("Failed to load options")?;

    let music = args
        .music
        .clone()
        .unwrap_or_else(|| catalog.default_music().to_string());
    let voice = match args.voice.clone() {
        Some(voice) => voice,
        None => catalog
            .default_voice()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Service advertises no voices"))?,
    };

    // Read supplements up front so a bad path fails before submitting
    let mut pending = Vec::with_capacity(args.upload.len());
    for path in &args.upload {
        let file = SupplementFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        pending.push(file);
    }

    coordinator.start_creation(CreationRequest::new(script, music, voice))?;
    let session = follow(coordinator, pending).await;

    match outcome(coordinator, &session)? {
        Outcome::Artifact(locator) => {
            println!("Download: {}", locator);
            if let Some(dest) = &args.download {
                let bytes = coordinator
                    .service()
                    .download_artifact(&locator, dest)
                    .await
                    .context("Failed to download video")?;
                println!("Saved {} ({} bytes)", dest.display(), bytes);
            }
            Ok(true)
        }
        Outcome::NoArtifact => {
            println!("Video completed, no artifact locator available");
            if let Some(dest) = &args.download {
                warn!("Not downloading to {}: no session id", dest.display());
            }
            Ok(true)
        }
        Outcome::Failed(message) => {
            eprintln!("Error: {}", message);
            Ok(false)
        }
    }
}

/// How a finished session is reported
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Completed with a downloadable artifact
    Artifact(String),
    /// Completed, but the job never announced a session id
    NoArtifact,
    /// Failed or cancelled, with the reason
    Failed(String),
}

fn outcome<S: VideoService>(
    coordinator: &WorkflowCoordinator<S>,
    session: &Session,
) -> Result<Outcome> {
    if session.phase() != Phase::Completed {
        let message = session.error_message().unwrap_or("video creation failed");
        return Ok(Outcome::Failed(message.to_string()));
    }
    match coordinator.request_download() {
        Ok(locator) => Ok(Outcome::Artifact(locator)),
        Err(e) if e.gate() == Some(GateError::NoSessionId) => Ok(Outcome::NoArtifact),
        Err(e) => Err(e.into()),
    }
}

/// Print progress until the session leaves `Creating`. Ctrl-C cancels.
async fn follow(
    coordinator: &WorkflowCoordinator<HttpVideoService>,
    mut pending: Vec<SupplementFile>,
) -> Session {
    let mut rx = coordinator.subscribe();
    let mut printed = 0;

    loop {
        let session = rx.borrow_and_update().clone();
        for line in &session.progress_log()[printed..] {
            println!("{}", line);
        }
        printed = session.progress_log().len();

        if session.session_id().is_some() && !pending.is_empty() {
            for file in pending.drain(..) {
                match coordinator.upload_supplement(file).await {
                    Ok(receipt) => println!("Uploaded file: {}", receipt.file_name),
                    Err(e) => eprintln!("Upload failed: {}", e),
                }
            }
        }

        if !session.is_creating() {
            if !pending.is_empty() {
                warn!("{} file(s) not uploaded: no session id", pending.len());
            }
            return session;
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return coordinator.snapshot();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, cancelling");
                coordinator.cancel();
            }
        }
    }
}
