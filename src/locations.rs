use std::collections::HashSet;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::archive::Archive;
use crate::fetch::Client;
use crate::model::{Location, LocationNode, PostLocation};
use crate::page;
use crate::settings::Settings;

pub struct LocationStats {
    pub used: usize,
    pub resolved: usize,
    pub pruned: usize,
    pub unlocated_posts: usize,
}

/// Resolve every location referenced by a normalized post and not yet
/// saved. With `prune`, location records no longer referenced by any post
/// are removed afterwards.
pub async fn run(
    settings: &Settings,
    archive: &Archive,
    client: &Client,
    prune: bool,
) -> Result<LocationStats> {
    let posts = archive.load_posts()?;

    let mut used: Vec<PostLocation> = Vec::new();
    let mut unlocated_posts = 0;
    for post in &posts {
        match &post.location {
            Some(reference) => {
                if !used.iter().any(|u| u.id == reference.id) {
                    used.push(reference.clone());
                }
            }
            None => {
                warn!("post missing location: {}", post.code);
                unlocated_posts += 1;
            }
        }
    }

    let saved: HashSet<String> = archive.location_ids()?.into_iter().collect();
    let mut resolved = 0;
    for reference in &used {
        if saved.contains(&reference.id) {
            continue;
        }
        info!("resolving location {} ({})", reference.id, reference.name);
        let location = resolve(settings, client, &reference.id).await?;
        archive.save_location(&location)?;
        resolved += 1;
    }

    let mut pruned = 0;
    if prune {
        for id in archive.location_ids()? {
            if !used.iter().any(|u| u.id == id) {
                archive.remove_location(&id)?;
                info!("pruned unused location {}", id);
                pruned += 1;
            }
        }
    }

    Ok(LocationStats {
        used: used.len(),
        resolved,
        pruned,
        unlocated_posts,
    })
}

async fn resolve(settings: &Settings, client: &Client, id: &str) -> Result<Location> {
    let url = settings.page_url(&format!("explore/locations/{}/?__a=1", id));
    let body = client.get_text(&url).await?;
    let doc = page::parse_document(&body)
        .with_context(|| format!("location page {} had no usable data", id))?;
    let node = page::location_node(&doc)?;
    let parsed: LocationNode =
        serde_json::from_value(node).context("location node has unexpected shape")?;
    Ok(parsed.into_location()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Post;

    fn post(id: &str, location: Option<PostLocation>) -> Post {
        Post {
            id: id.to_string(),
            code: format!("c{}", id),
            caption: String::new(),
            tags: Vec::new(),
            media_url: "http://x/m.jpg".to_string(),
            display_url: String::new(),
            post_url: String::new(),
            is_video: false,
            location,
            timestamp: 1556112793,
            dimensions: None,
        }
    }

    fn reference(id: &str) -> PostLocation {
        PostLocation {
            id: id.to_string(),
            name: format!("loc {}", id),
            slug: format!("loc-{}", id),
        }
    }

    #[tokio::test]
    async fn prune_removes_unreferenced_records() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        let settings = Settings::default();
        let client = Client::new(&settings).unwrap();

        archive.save_post(&post("1", Some(reference("a")))).unwrap();
        archive.save_post(&post("2", None)).unwrap();
        for id in ["a", "b"] {
            archive
                .save_location(&Location {
                    id: id.to_string(),
                    name: String::new(),
                    slug: String::new(),
                    lat: Some(0.0),
                    long: Some(0.0),
                })
                .unwrap();
        }

        // "a" is referenced and saved, so nothing needs resolving and no
        // network call happens; "b" is unreferenced and gets pruned.
        let stats = run(&settings, &archive, &client, true).await.unwrap();
        assert_eq!(stats.used, 1);
        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.pruned, 1);
        assert_eq!(stats.unlocated_posts, 1);
        assert_eq!(archive.location_ids().unwrap(), vec!["a"]);
    }
}
