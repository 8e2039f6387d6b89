use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::warn;

use crate::model::{Location, Post, RawPost};

const RAW_DIR: &str = "raw";
const POSTS_DIR: &str = "posts";
const LOCATIONS_DIR: &str = "locations";
const MEDIA_DIR: &str = "media";
const STATIC_DIR: &str = "static";

/// The JSON archive: one directory per record kind, one file per record.
/// File presence is the only pipeline state, which is what makes every
/// stage idempotent and re-runnable.
pub struct Archive {
    root: PathBuf,
}

/// Write a record the way every archive and site file is written:
/// pretty-printed with a trailing newline.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, json + "\n").with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

static FILE_ID_RE: OnceLock<Regex> = OnceLock::new();

/// Trailing ID of a `YYYY-MM-DD-<id>.json` file name. Matching ignores the
/// date part: the same post collected in another timezone gets a different
/// date prefix.
fn file_id(name: &str) -> Option<String> {
    let re = FILE_ID_RE.get_or_init(|| Regex::new(r"-([^-]+)\.json$").expect("file id regex"));
    re.captures(name).map(|c| c[1].to_string())
}

fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().map(|e| e == "json").unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl Archive {
    pub fn open(root: impl Into<PathBuf>) -> Result<Archive> {
        let root = root.into();
        for dir in [RAW_DIR, POSTS_DIR, LOCATIONS_DIR, MEDIA_DIR] {
            fs::create_dir_all(root.join(dir))
                .with_context(|| format!("failed to create {}/{}", root.display(), dir))?;
        }
        Ok(Archive { root })
    }

    pub fn static_dir(&self) -> PathBuf {
        self.root.join(STATIC_DIR)
    }

    // ── Raw posts ──

    pub fn raw_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for path in list_json_files(&self.root.join(RAW_DIR))? {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                match file_id(name) {
                    Some(id) => {
                        ids.insert(id);
                    }
                    None => warn!("ignoring unexpected raw file name: {}", name),
                }
            }
        }
        Ok(ids)
    }

    pub fn save_raw(&self, raw: &RawPost) -> Result<PathBuf> {
        let path = self.root.join(RAW_DIR).join(format!("{}.json", raw.full_id()));
        write_json(&path, raw)?;
        Ok(path)
    }

    pub fn list_raw(&self) -> Result<Vec<RawPost>> {
        let mut raws = Vec::new();
        for path in list_json_files(&self.root.join(RAW_DIR))? {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let raw: RawPost = serde_json::from_str(&content)
                .with_context(|| format!("invalid raw post record {}", path.display()))?;
            raws.push(raw);
        }
        Ok(raws)
    }

    // ── Normalized posts ──

    pub fn post_ids(&self) -> Result<HashSet<String>> {
        let mut ids = HashSet::new();
        for post in self.load_posts()? {
            ids.insert(post.id);
        }
        Ok(ids)
    }

    pub fn save_post(&self, post: &Post) -> Result<()> {
        let path = self
            .root
            .join(POSTS_DIR)
            .join(format!("{}.json", post.full_id()));
        write_json(&path, post)
    }

    pub fn load_posts(&self) -> Result<Vec<Post>> {
        let mut posts = Vec::new();
        for path in list_json_files(&self.root.join(POSTS_DIR))? {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let post: Post = serde_json::from_str(&content)
                .with_context(|| format!("invalid post record {}", path.display()))?;
            posts.push(post);
        }
        Ok(posts)
    }

    // ── Locations ──

    pub fn location_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for path in list_json_files(&self.root.join(LOCATIONS_DIR))? {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    pub fn save_location(&self, location: &Location) -> Result<()> {
        let path = self
            .root
            .join(LOCATIONS_DIR)
            .join(format!("{}.json", location.id));
        write_json(&path, location)
    }

    /// Load location records, skipping (and reporting) files that are not
    /// valid JSON rather than failing the run over one bad record.
    pub fn load_locations(&self) -> Result<Vec<Location>> {
        let mut locations = Vec::new();
        for path in list_json_files(&self.root.join(LOCATIONS_DIR))? {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            match serde_json::from_str::<Location>(&content) {
                Ok(location) => locations.push(location),
                Err(err) => warn!("skipping malformed location {}: {}", path.display(), err),
            }
        }
        Ok(locations)
    }

    pub fn remove_location(&self, id: &str) -> Result<()> {
        let path = self.root.join(LOCATIONS_DIR).join(format!("{}.json", id));
        fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))
    }

    // ── Media ──

    pub fn media_path(&self, post: &Post) -> PathBuf {
        self.root
            .join(MEDIA_DIR)
            .join(format!("{}.{}", post.full_id(), post.media_extension()))
    }

    fn media_count(&self) -> Result<usize> {
        let dir = self.root.join(MEDIA_DIR);
        let mut count = 0;
        for entry in fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))? {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    // ── Stats ──

    pub fn stats(&self) -> Result<Stats> {
        let posts = self.load_posts()?;
        let unlocated = posts.iter().filter(|p| p.location.is_none()).count();
        let media_missing = posts
            .iter()
            .filter(|p| !self.media_path(p).exists())
            .count();
        Ok(Stats {
            raw: self.raw_ids()?.len(),
            posts: posts.len(),
            locations: self.location_ids()?.len(),
            media: self.media_count()?,
            media_missing,
            unlocated_posts: unlocated,
        })
    }
}

pub struct Stats {
    pub raw: usize,
    pub posts: usize,
    pub locations: usize,
    pub media: usize,
    pub media_missing: usize,
    pub unlocated_posts: usize,
}
