use std::fs;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::archive::Archive;
use crate::fetch::Client;
use crate::model::Post;

const CONCURRENCY: usize = 4;

pub struct MediaStats {
    pub total: usize,
    pub ok: usize,
    pub errors: usize,
    pub skipped: usize,
}

/// Download the media file for every normalized post that does not have one
/// yet. Files are written with their modification time set to the post
/// timestamp so the archive sorts like a camera roll.
pub async fn run(archive: &Archive, client: &Client, limit: Option<usize>) -> Result<MediaStats> {
    let posts = archive.load_posts()?;
    let total_posts = posts.len();

    let mut pending: Vec<Post> = posts
        .into_iter()
        .filter(|p| !archive.media_path(p).exists())
        .collect();
    let skipped = total_posts - pending.len();
    if let Some(n) = limit {
        pending.truncate(n);
    }
    let total = pending.len();
    if total == 0 {
        return Ok(MediaStats {
            total: 0,
            ok: 0,
            errors: 0,
            skipped,
        });
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(Post, Result<Vec<u8>>)>(CONCURRENCY * 2);

    for post in pending {
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let client = client.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let result = client.get_bytes(&post.media_url).await;
            let _ = tx.send((post, result)).await;
        });
    }

    drop(tx);

    let mut ok = 0usize;
    let mut errors = 0usize;
    while let Some((post, result)) = rx.recv().await {
        match result.and_then(|bytes| save_media(archive, &post, &bytes)) {
            Ok(()) => ok += 1,
            Err(err) => {
                warn!("failed to download media for {}: {:#}", post.code, err);
                errors += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    info!(
        "downloaded {} media files ({} ok, {} errors, {} already present)",
        total, ok, errors, skipped
    );

    Ok(MediaStats {
        total,
        ok,
        errors,
        skipped,
    })
}

/// Write the file and stamp it with the post timestamp. A half-written file
/// is removed so the next run retries it.
fn save_media(archive: &Archive, post: &Post, bytes: &[u8]) -> Result<()> {
    let path = archive.media_path(post);
    let result = (|| -> Result<()> {
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(post.timestamp.max(0) as u64);
        let file = fs::File::options()
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to reopen {}", path.display()))?;
        file.set_modified(modified)
            .with_context(|| format!("failed to set mtime on {}", path.display()))?;
        Ok(())
    })();

    if result.is_err() && path.exists() {
        let _ = fs::remove_file(&path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: &str, is_video: bool) -> Post {
        Post {
            id: id.to_string(),
            code: format!("c{}", id),
            caption: String::new(),
            tags: Vec::new(),
            media_url: "http://x/m".to_string(),
            display_url: String::new(),
            post_url: String::new(),
            is_video,
            location: None,
            timestamp: 1556112793,
            dimensions: None,
        }
    }

    #[test]
    fn save_media_stamps_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        let p = post("1", false);

        save_media(&archive, &p, b"bytes").unwrap();

        let path = archive.media_path(&p);
        assert!(path.exists());
        let modified = fs::metadata(&path).unwrap().modified().unwrap();
        let expected = SystemTime::UNIX_EPOCH + Duration::from_secs(1556112793);
        assert_eq!(modified, expected);
    }

    #[tokio::test]
    async fn present_media_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        let settings = crate::settings::Settings::default();
        let client = Client::new(&settings).unwrap();

        let p = post("1", false);
        archive.save_post(&p).unwrap();
        fs::write(archive.media_path(&p), b"already here").unwrap();

        let stats = run(&archive, &client, None).await.unwrap();
        assert_eq!(stats.total, 0);
        assert_eq!(stats.skipped, 1);
    }
}
