//! `reelcast options`

use anyhow::{Context, Result};

use reelcast_core::{HttpVideoService, WorkflowCoordinator};

pub async fn run(coordinator: &WorkflowCoordinator<HttpVideoService>) -> Result<()> {
    let catalog = coordinator
        .load_catalog()
        .await
        .context("Failed to load options")?;

    println!("Music:");
    if catalog.music.is_empty() {
        println!("  (none)");
    }
    for music in &catalog.music {
        println!("  {}", music.name());
    }

    println!("Voices:");
    if catalog.voices.is_empty() {
        println!("  (none)");
    }
    for voice in &catalog.voices {
        match &voice.language {
            Some(language) => println!("  {}  {} ({})", voice.id, voice.name, language),
            None => println!("  {}  {}", voice.id, voice.name),
        }
    }
    Ok(())
}
