use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("page node was missing required field `{0}`")]
    MissingField(&'static str),
}

/// UTC calendar date of a Unix timestamp, `YYYY-MM-DD`.
pub fn date_string(timestamp: i64) -> String {
    let date = DateTime::<Utc>::from_timestamp(timestamp, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    date.format("%Y-%m-%d").to_string()
}

/// Date-prefixed identifier used for archive file names and site ordering.
/// Dates are UTC; diffing between runs is by the trailing ID only, since
/// records collected in another timezone may carry a different date.
pub fn full_id(timestamp: i64, id: &str) -> String {
    format!("{}-{}", date_string(timestamp), id)
}

static TAG_RE: OnceLock<Regex> = OnceLock::new();

/// `#tag` tokens from a caption, deduplicated, order of first appearance,
/// without the leading `#`.
pub fn caption_tags(caption: &str) -> Vec<String> {
    let re = TAG_RE.get_or_init(|| Regex::new(r"#\w+").expect("tag regex"));
    let mut tags: Vec<String> = Vec::new();
    for m in re.find_iter(caption) {
        let tag = m.as_str().trim_start_matches('#').to_string();
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Accept a number, or map anything else (null, missing, strings) to None.
/// Location records come from scraped pages and are not always well formed.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_f64())
}

// ── Archive records ──

/// A page-embedded post node persisted exactly as scraped. Only the fields
/// the pipeline needs are typed; everything else round-trips through `rest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub id: String,
    #[serde(alias = "code")]
    pub shortcode: String,
    #[serde(alias = "date")]
    pub taken_at_timestamp: i64,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, serde_json::Value>,
}

impl RawPost {
    pub fn full_id(&self) -> String {
        full_id(self.taken_at_timestamp, &self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: i64,
    pub height: i64,
}

/// Location reference carried on a post. A full record with coordinates
/// lives in the locations archive under the same ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostLocation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
}

/// Normalized post record, the enricher's output and the site generator's
/// input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub media_url: String,
    #[serde(default)]
    pub display_url: String,
    #[serde(default)]
    pub post_url: String,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PostLocation>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

impl Post {
    pub fn full_id(&self) -> String {
        full_id(self.timestamp, &self.id)
    }

    pub fn media_extension(&self) -> &'static str {
        if self.is_video {
            "mp4"
        } else {
            "jpg"
        }
    }
}

/// Resolved location record: `locations/<id>.json`. Coordinates are lenient
/// on load so one bad record can be excluded rather than failing a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub long: Option<f64>,
}

impl Location {
    /// (lat, long) when both are present and finite.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.long) {
            (Some(lat), Some(long)) if lat.is_finite() && long.is_finite() => Some((lat, long)),
            _ => None,
        }
    }
}

// ── Page nodes ──

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CaptionEdges {
    #[serde(default)]
    pub edges: Vec<CaptionEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionEdge {
    pub node: CaptionNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptionNode {
    #[serde(default)]
    pub text: String,
}

/// Media node shape shared by the profile grid and the post detail page.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaNode {
    #[serde(default)]
    pub id: String,
    #[serde(default, alias = "code")]
    pub shortcode: String,
    #[serde(default, alias = "date")]
    pub taken_at_timestamp: i64,
    #[serde(default)]
    pub display_url: String,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub dimensions: Option<Dimensions>,
    #[serde(default)]
    pub edge_media_to_caption: CaptionEdges,
    #[serde(default)]
    pub location: Option<PostLocation>,
}

impl MediaNode {
    pub fn into_post(self, base_url: &str) -> Result<Post, ExtractError> {
        if self.id.is_empty() {
            return Err(ExtractError::MissingField("id"));
        }
        if self.shortcode.is_empty() {
            return Err(ExtractError::MissingField("shortcode"));
        }

        let caption = self
            .edge_media_to_caption
            .edges
            .first()
            .map(|e| e.node.text.clone())
            .unwrap_or_default();
        let tags = caption_tags(&caption);

        let media_url = match (&self.video_url, self.is_video) {
            (Some(url), true) => url.clone(),
            _ => self.display_url.clone(),
        };

        let post_url = format!("{}/p/{}", base_url.trim_end_matches('/'), self.shortcode);
        let location = self.location.filter(|l| !l.id.is_empty());

        Ok(Post {
            id: self.id,
            code: self.shortcode,
            caption,
            tags,
            media_url,
            display_url: self.display_url,
            post_url,
            is_video: self.is_video,
            location,
            timestamp: self.taken_at_timestamp,
            dimensions: self.dimensions,
        })
    }
}

/// Location node on the location detail page; the source uses `lng` where
/// the archive uses `long`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationNode {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", alias = "long")]
    pub lng: Option<f64>,
}

impl LocationNode {
    pub fn into_location(self) -> Result<Location, ExtractError> {
        if self.id.is_empty() {
            return Err(ExtractError::MissingField("id"));
        }
        Ok(Location {
            id: self.id,
            name: self.name,
            slug: self.slug,
            lat: self.lat,
            long: self.lng,
        })
    }
}
