use anyhow::{bail, Context, Result};
use tracing::info;

use crate::archive::Archive;
use crate::fetch::Client;
use crate::model::RawPost;
use crate::page;
use crate::settings::Settings;

pub struct CollectStats {
    pub seen: usize,
    pub new: usize,
}

/// Fetch the profile page and archive every post not already present.
/// Matching is by post ID only, never by file name.
pub async fn run(settings: &Settings, archive: &Archive, client: &Client) -> Result<CollectStats> {
    let username = settings.require_username()?;
    let url = settings.page_url(&format!("{}/?__a=1", username));

    info!("fetching profile page for {}", username);
    let body = client.get_text(&url).await?;
    let doc = page::parse_document(&body).context("profile page had no usable data")?;
    let nodes = page::profile_media_nodes(&doc)?;

    let existing = archive.raw_ids()?;
    let mut new = 0;
    for node in &nodes {
        let raw: RawPost = serde_json::from_value(node.clone())
            .context("profile post node has unexpected shape")?;
        if existing.contains(&raw.id) {
            continue;
        }
        info!("{} is new", raw.id);
        archive.save_raw(&raw)?;
        new += 1;
    }

    // When the whole visible window was new, older posts may have scrolled
    // out before this run. The new records are already saved at this point.
    if new >= settings.page_size && new > 0 {
        bail!(
            "all {} posts in the window were new, older posts may be missing",
            new
        );
    }

    Ok(CollectStats {
        seen: nodes.len(),
        new,
    })
}

/// Archive a single post by shortcode, for backfilling gaps the profile
/// window has scrolled past.
pub async fn fetch_one(
    settings: &Settings,
    archive: &Archive,
    client: &Client,
    code: &str,
) -> Result<Option<String>> {
    let url = settings.page_url(&format!("p/{}/?__a=1", code));

    let body = client.get_text(&url).await?;
    let doc = page::parse_document(&body).context("post page had no usable data")?;
    let node = page::post_media_node(&doc)?;
    let raw: RawPost =
        serde_json::from_value(node).context("post node has unexpected shape")?;

    if archive.raw_ids()?.contains(&raw.id) {
        info!("{} already archived", raw.id);
        return Ok(None);
    }

    let path = archive.save_raw(&raw)?;
    Ok(Some(path.display().to_string()))
}
