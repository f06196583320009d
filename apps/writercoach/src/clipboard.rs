use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use client_core::Clipboard;

/// The desktop clipboard. Each write opens a fresh handle on a blocking thread.
pub struct SystemClipboard;

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn write_text(&self, text: &str) -> Result<()> {
        let text = text.to_string();
        tokio::task::spawn_blocking(move || {
            let mut clipboard = arboard::Clipboard::new().context("clipboard is unavailable")?;
            clipboard
                .set_text(text)
                .map_err(|err| anyhow!("failed to write clipboard: {err}"))
        })
        .await
        .context("clipboard task panicked")?
    }
}
