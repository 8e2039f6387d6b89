pub mod near;
pub mod sitemap;

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{write_json, Archive};
use crate::model::{date_string, Location, Post};
use crate::settings::Settings;
use self::near::Near;

pub struct BuildCounts {
    pub posts: usize,
    pub locations: usize,
    pub tags: usize,
}

// ── Output shapes ──

#[derive(Serialize)]
struct IndexItem {
    id: String,
    is_video: bool,
    location_count: usize,
    lat: f64,
    long: f64,
}

/// A post as rendered: the archived record plus coordinates and the number
/// of posts sharing its location.
#[derive(Serialize)]
struct SitePost<'a> {
    #[serde(flatten)]
    post: &'a Post,
    lat: f64,
    long: f64,
    location_count: usize,
}

/// A location as rendered: the archived record plus its posts and the
/// `near` list. `near` is derived at build time and never written back to
/// the archive.
#[derive(Serialize)]
struct SiteLocation<'a> {
    #[serde(flatten)]
    location: &'a Location,
    posts: Vec<SitePost<'a>>,
    near: &'a [Near],
}

#[derive(Serialize)]
struct LocationIndexItem<'a> {
    id: &'a str,
    name: &'a str,
    slug: &'a str,
    count: usize,
    most_recent_post: String,
}

#[derive(Serialize)]
struct SiteTag<'a> {
    name: &'a str,
    posts: Vec<SitePost<'a>>,
}

#[derive(Serialize)]
struct TagIndexItem<'a> {
    name: &'a str,
    count: usize,
    most_recent_post: String,
}

/// Render the site data directory from the archive. The archive itself is
/// never touched.
pub fn build(settings: &Settings, archive: &Archive, output: &Path) -> Result<BuildCounts> {
    let mut posts = archive.load_posts()?;
    let locations = archive.load_locations()?;

    // newest first, everywhere
    posts.sort_by_cached_key(|p| std::cmp::Reverse(p.full_id()));

    let location_by_id: HashMap<&str, &Location> =
        locations.iter().map(|l| (l.id.as_str(), l)).collect();

    let mut location_post_count: HashMap<String, usize> = HashMap::new();
    for post in &posts {
        if let Some(reference) = &post.location {
            *location_post_count.entry(reference.id.clone()).or_insert(0) += 1;
            if !location_by_id.contains_key(reference.id.as_str()) {
                warn!(
                    "post {} references unknown location {}",
                    post.code, reference.id
                );
            }
        }
    }

    for dir in ["posts", "locations", "tags"] {
        fs::create_dir_all(output.join(dir))
            .with_context(|| format!("failed to create {}/{}", output.display(), dir))?;
    }

    // index.json
    let index: Vec<IndexItem> = posts
        .iter()
        .map(|post| {
            let rendered = site_post(post, &location_by_id, &location_post_count);
            IndexItem {
                id: post.full_id(),
                is_video: post.is_video,
                location_count: rendered.location_count,
                lat: rendered.lat,
                long: rendered.long,
            }
        })
        .collect();
    write_json(&output.join("index.json"), &index)?;

    // posts/
    let pb = ProgressBar::new(posts.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );
    posts.par_iter().try_for_each(|post| -> Result<()> {
        let rendered = site_post(post, &location_by_id, &location_post_count);
        write_json(
            &output.join("posts").join(format!("{}.json", post.full_id())),
            &rendered,
        )?;
        pb.inc(1);
        Ok(())
    })?;
    pb.finish_and_clear();

    // locations/ and locations.json
    let nearby = near::nearby_index(&locations);
    let mut location_index: Vec<LocationIndexItem> = Vec::new();
    for location in &locations {
        let posts_here: Vec<SitePost> = posts
            .iter()
            .filter(|p| {
                p.location
                    .as_ref()
                    .map(|r| r.id == location.id)
                    .unwrap_or(false)
            })
            .map(|p| site_post(p, &location_by_id, &location_post_count))
            .collect();

        let rendered = SiteLocation {
            location,
            near: nearby.get(&location.id).map(Vec::as_slice).unwrap_or(&[]),
            posts: posts_here,
        };
        write_json(
            &output
                .join("locations")
                .join(format!("{}.json", location.id)),
            &rendered,
        )?;

        location_index.push(LocationIndexItem {
            id: &location.id,
            name: &location.name,
            slug: &location.slug,
            count: rendered.posts.len(),
            most_recent_post: rendered
                .posts
                .first()
                .map(|p| p.post.full_id())
                .unwrap_or_default(),
        });
    }
    location_index.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(b.name)));
    write_json(&output.join("locations.json"), &location_index)?;

    // tags/ and tags.json
    let mut tagged: BTreeMap<&str, Vec<&Post>> = BTreeMap::new();
    for post in &posts {
        for tag in &post.tags {
            let name = tag.trim_start_matches('#');
            if name.is_empty() || settings.excluded_tags.iter().any(|t| t == name) {
                continue;
            }
            if name.chars().any(std::path::is_separator) {
                warn!("skipping tag with path separator: {}", name);
                continue;
            }
            let entry = tagged.entry(name).or_default();
            if !entry.iter().any(|p| p.id == post.id) {
                entry.push(post);
            }
        }
    }

    let mut tag_index: Vec<TagIndexItem> = Vec::new();
    for (name, tag_posts) in &tagged {
        let rendered = SiteTag {
            name,
            posts: tag_posts
                .iter()
                .map(|p| site_post(p, &location_by_id, &location_post_count))
                .collect(),
        };
        write_json(&output.join("tags").join(format!("{}.json", name)), &rendered)?;
        tag_index.push(TagIndexItem {
            name,
            count: tag_posts.len(),
            most_recent_post: tag_posts
                .first()
                .map(|p| p.full_id())
                .unwrap_or_default(),
        });
    }
    tag_index.sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(b.name)));
    write_json(&output.join("tags.json"), &tag_index)?;

    // calendar.json
    let mut calendar: BTreeMap<String, usize> = BTreeMap::new();
    for post in &posts {
        *calendar.entry(date_string(post.timestamp)).or_insert(0) += 1;
    }
    write_json(&output.join("calendar.json"), &calendar)?;

    // sitemap.xml
    let mut pages: Vec<String> = vec![String::new()];
    pages.extend(posts.iter().map(|p| format!("posts/{}", p.full_id())));
    pages.extend(locations.iter().map(|l| format!("locations/{}", l.id)));
    pages.extend(tagged.keys().map(|name| format!("tags/{}", name)));
    sitemap::write_sitemap(&output.join("sitemap.xml"), &settings.site_url, &pages)?;

    // static assets shipped with the archive
    let static_dir = archive.static_dir();
    if static_dir.is_dir() {
        copy_dir(&static_dir, output)?;
    }

    info!(
        "rendered {} posts, {} locations, {} tags to {}",
        posts.len(),
        locations.len(),
        tagged.len(),
        output.display()
    );

    Ok(BuildCounts {
        posts: posts.len(),
        locations: locations.len(),
        tags: tagged.len(),
    })
}

fn site_post<'a>(
    post: &'a Post,
    location_by_id: &HashMap<&str, &Location>,
    counts: &HashMap<String, usize>,
) -> SitePost<'a> {
    let mut lat = 0.0;
    let mut long = 0.0;
    let mut location_count = 0;
    if let Some(reference) = &post.location {
        location_count = counts.get(&reference.id).copied().unwrap_or(0);
        if let Some(location) = location_by_id.get(reference.id.as_str()) {
            if let Some((la, lo)) = location.coordinates() {
                lat = la;
                long = lo;
            }
        }
    }
    SitePost {
        post,
        lat,
        long,
        location_count,
    }
}

fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("failed to create {}", dst.display()))?;
    for entry in fs::read_dir(src).with_context(|| format!("failed to list {}", src.display()))? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PostLocation;
    use serde_json::Value;

    fn post(id: &str, timestamp: i64, location: Option<&str>, tags: &[&str]) -> Post {
        Post {
            id: id.to_string(),
            code: format!("c{}", id),
            caption: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            media_url: "http://x/m.jpg".to_string(),
            display_url: "http://x/m.jpg".to_string(),
            post_url: "http://x/p".to_string(),
            is_video: false,
            location: location.map(|id| PostLocation {
                id: id.to_string(),
                name: format!("location {}", id),
                slug: format!("location-{}", id),
            }),
            timestamp,
            dimensions: None,
        }
    }

    fn location(id: &str, lat: f64, long: f64) -> Location {
        Location {
            id: id.to_string(),
            name: format!("location {}", id),
            slug: format!("location-{}", id),
            lat: Some(lat),
            long: Some(long),
        }
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
    }

    fn sample_archive(dir: &Path) -> Archive {
        let archive = Archive::open(dir).unwrap();
        // 2019-04-24 / 2018-04-26 / 2017-04-26, deliberately saved out of order
        archive
            .save_post(&post("300", 1493209919, Some("A"), &["sunset"]))
            .unwrap();
        archive
            .save_post(&post("100", 1556112793, Some("A"), &["sunset", "nofilter"]))
            .unwrap();
        archive
            .save_post(&post("200", 1524744000, None, &["sunset", "private"]))
            .unwrap();
        archive.save_location(&location("A", 51.5074, -0.1278)).unwrap();
        // ~20km away, inside the nearby radius
        archive.save_location(&location("B", 51.68, -0.1278)).unwrap();
        archive
    }

    fn build_sample(dir: &Path) -> std::path::PathBuf {
        let archive = sample_archive(dir);
        let mut settings = Settings::default();
        settings.excluded_tags = vec!["private".to_string()];
        let output = dir.join("out");
        build(&settings, &archive, &output).unwrap();
        output
    }

    #[test]
    fn index_is_newest_first_with_location_data() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let index = read(&output.join("index.json"));
        let ids: Vec<&str> = index
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["id"].as_str().unwrap())
            .collect();
        assert_eq!(
            ids,
            vec!["2019-04-24-100", "2018-04-26-200", "2017-04-26-300"]
        );
        assert_eq!(index[0]["location_count"], 2);
        assert_eq!(index[0]["lat"], 51.5074);
        // the unlocated post renders with zeroed location data
        assert_eq!(index[1]["location_count"], 0);
        assert_eq!(index[1]["lat"], 0.0);
    }

    #[test]
    fn post_files_are_augmented() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let post = read(&output.join("posts/2019-04-24-100.json"));
        assert_eq!(post["id"], "100");
        assert_eq!(post["location"]["id"], "A");
        assert_eq!(post["location_count"], 2);
        assert_eq!(post["long"], -0.1278);
    }

    #[test]
    fn location_files_carry_posts_and_near() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let a = read(&output.join("locations/A.json"));
        let post_ids: Vec<&str> = a["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["id"].as_str().unwrap())
            .collect();
        assert_eq!(post_ids, vec!["100", "300"]);
        assert_eq!(a["near"][0]["id"], "B");
        let distance = a["near"][0]["distance"].as_f64().unwrap();
        assert!(distance > 0.0 && distance < 50_000.0, "got {}", distance);

        // B has no posts but is still rendered, with A nearby
        let b = read(&output.join("locations/B.json"));
        assert!(b["posts"].as_array().unwrap().is_empty());
        assert_eq!(b["near"][0]["id"], "A");
    }

    #[test]
    fn location_index_counts_and_recency() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let index = read(&output.join("locations.json"));
        assert_eq!(index[0]["id"], "A");
        assert_eq!(index[0]["count"], 2);
        assert_eq!(index[0]["most_recent_post"], "2019-04-24-100");
        assert_eq!(index[1]["id"], "B");
        assert_eq!(index[1]["count"], 0);
    }

    #[test]
    fn excluded_tags_appear_nowhere() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        assert!(!output.join("tags/private.json").exists());
        let index = read(&output.join("tags.json"));
        for item in index.as_array().unwrap() {
            assert_ne!(item["name"], "private");
        }

        let sunset = read(&output.join("tags/sunset.json"));
        assert_eq!(sunset["posts"].as_array().unwrap().len(), 3);
        assert_eq!(index[0]["name"], "sunset");
        assert_eq!(index[0]["count"], 3);
        assert_eq!(index[0]["most_recent_post"], "2019-04-24-100");
    }

    #[test]
    fn calendar_groups_by_day() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let calendar = read(&output.join("calendar.json"));
        assert_eq!(calendar["2019-04-24"], 1);
        assert_eq!(calendar["2018-04-26"], 1);
        assert_eq!(calendar["2017-04-26"], 1);
    }

    #[test]
    fn sitemap_lists_rendered_pages() {
        let dir = tempfile::tempdir().unwrap();
        let output = build_sample(dir.path());

        let xml = fs::read_to_string(output.join("sitemap.xml")).unwrap();
        assert!(xml.contains("posts/2019-04-24-100"));
        assert!(xml.contains("locations/A"));
        assert!(xml.contains("tags/sunset"));
        assert!(!xml.contains("tags/private"));
    }

    #[test]
    fn static_assets_copied() {
        let dir = tempfile::tempdir().unwrap();
        let archive = sample_archive(dir.path());
        fs::create_dir_all(dir.path().join("static/js")).unwrap();
        fs::write(dir.path().join("static/js/app.js"), "// app").unwrap();

        let output = dir.path().join("out");
        build(&Settings::default(), &archive, &output).unwrap();
        assert!(output.join("js/app.js").exists());
    }

    #[test]
    fn unknown_location_reference_still_renders() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        archive
            .save_post(&post("1", 1556112793, Some("ghost"), &[]))
            .unwrap();

        let output = dir.path().join("out");
        let counts = build(&Settings::default(), &archive, &output).unwrap();
        assert_eq!(counts.posts, 1);

        let rendered = read(&output.join("posts/2019-04-24-1.json"));
        assert_eq!(rendered["lat"], 0.0);
        // the reference itself still counts its posts
        assert_eq!(rendered["location_count"], 1);
    }

    #[test]
    fn empty_archive_builds_empty_site() {
        let dir = tempfile::tempdir().unwrap();
        let archive = Archive::open(dir.path()).unwrap();
        let output = dir.path().join("out");
        let counts = build(&Settings::default(), &archive, &output).unwrap();
        assert_eq!(counts.posts, 0);
        assert_eq!(counts.locations, 0);
        assert_eq!(read(&output.join("index.json")), serde_json::json!([]));
    }
}
