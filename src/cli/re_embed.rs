//! CLI `re-embed` command: move facts from an older embedding model onto the current one.

use anyhow::{Context, Result};
use apex::config::ApexConfig;
use indicatif::{ProgressBar, ProgressStyle};

use super::open_knowledge;

pub async fn re_embed(config: &ApexConfig) -> Result<()> {
    let store = open_knowledge(config)?;

    let stale = store.stale_facts().await.context("failed to list stale facts")?;
    if stale.is_empty() {
        println!("All facts already use '{}'. Nothing to do.", store.embedding_model());
        // still record the model so future start-ups don't warn
        store.re_embed_stale(|_, _| {}).await?;
        return Ok(());
    }

    println!(
        "Re-embedding {} fact(s) with model '{}'...",
        stale.len(),
        store.embedding_model()
    );

    let pb = ProgressBar::new(stale.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let done = store
        .re_embed_stale(|n, _| pb.set_position(n as u64))
        .await
        .context("re-embedding failed")?;

    pb.finish_and_clear();
    println!("Re-embedded {done} fact(s).");
    Ok(())
}
