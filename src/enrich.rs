use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::fetch::Client;
use crate::model::{MediaNode, Post, RawPost};
use crate::page;
use crate::settings::Settings;

const CONCURRENCY: usize = 4;

pub struct EnrichStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
}

/// Fetch the detail page for every raw post without a normalized record and
/// write the normalized records as results arrive. Fetches run concurrently
/// behind a semaphore; the archive is only written from the receiving loop.
pub async fn run(
    settings: &Settings,
    archive: &Archive,
    client: &Client,
    limit: Option<usize>,
) -> Result<EnrichStats> {
    let mut pending = pending_raw(archive)?;
    if let Some(n) = limit {
        pending.truncate(n);
    }
    let total = pending.len();
    if total == 0 {
        return Ok(EnrichStats {
            total: 0,
            ok: 0,
            errors: 0,
        });
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(String, Result<Post>)>(CONCURRENCY * 2);

    for raw in pending {
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let client = client.clone();
        let base_url = settings.base_url.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let result = enrich_one(&client, &base_url, &raw).await;
            let _ = tx.send((raw.shortcode.clone(), result)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;
    while let Some((code, result)) = rx.recv().await {
        match result {
            Ok(post) => {
                archive.save_post(&post)?;
                ok += 1;
            }
            Err(err) => {
                warn!("failed to enrich {}: {:#}", code, err);
                errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!("enriched {} posts ({} ok, {} errors)", total, ok, errors);

    Ok(EnrichStats { total, ok, errors })
}

/// Raw records with no normalized counterpart, oldest first.
fn pending_raw(archive: &Archive) -> Result<Vec<RawPost>> {
    let done = archive.post_ids()?;
    Ok(archive
        .list_raw()?
        .into_iter()
        .filter(|raw| !done.contains(&raw.id))
        .collect())
}

async fn enrich_one(client: &Client, base_url: &str, raw: &RawPost) -> Result<Post> {
    let url = format!(
        "{}/p/{}/?__a=1",
        base_url.trim_end_matches('/'),
        raw.shortcode
    );
    let body = client.get_text(&url).await?;
    let doc = page::parse_document(&body).context("post page had no usable data")?;
    let node = page::post_media_node(&doc)?;
    let media: MediaNode =
        serde_json::from_value(node).context("post node has unexpected shape")?;
    let post = media.into_post(base_url)?;
    Ok(post)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_skips_enriched_ids() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();

        for (id, code) in [("1", "a"), ("2", "b")] {
            let raw: RawPost = serde_json::from_str(&format!(
                r#"{{"id": "{}", "shortcode": "{}", "taken_at_timestamp": 1556112793}}"#,
                id, code
            ))
            .unwrap();
            archive.save_raw(&raw).unwrap();
        }

        let node: MediaNode = serde_json::from_str(
            r#"{"id": "1", "shortcode": "a", "taken_at_timestamp": 1556112793,
                "display_url": "http://x/a.jpg"}"#,
        )
        .unwrap();
        archive
            .save_post(&node.into_post("https://example.com").unwrap())
            .unwrap();

        let pending = pending_raw(&archive).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "2");
    }
}
