use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PageError {
    #[error("no embedded JSON object found in page")]
    NoEmbeddedJson,
    #[error("page JSON did not contain `{0}`")]
    MissingNode(&'static str),
}

static CANDIDATE_RE: OnceLock<Regex> = OnceLock::new();

/// Parse a fetched document body. The endpoints usually answer with plain
/// JSON; when they answer with an HTML page instead, fall back to scanning
/// script bodies for brace-delimited candidates and take the first one that
/// parses, the structure of these pages being too unstable for anything
/// more targeted.
pub fn parse_document(body: &str) -> Result<Value, PageError> {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let re = CANDIDATE_RE.get_or_init(|| Regex::new(r"\{[^\n]+\}").expect("candidate regex"));
    for m in re.find_iter(body) {
        if let Ok(value) = serde_json::from_str::<Value>(m.as_str()) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }
    Err(PageError::NoEmbeddedJson)
}

/// Post nodes from a profile document, wherever the page buries them.
pub fn profile_media_nodes(doc: &Value) -> Result<Vec<Value>, PageError> {
    let user = doc
        .pointer("/graphql/user")
        .or_else(|| doc.pointer("/entry_data/ProfilePage/0/graphql/user"))
        .ok_or(PageError::MissingNode("graphql.user"))?;

    let edges = user
        .pointer("/edge_owner_to_timeline_media/edges")
        .and_then(Value::as_array)
        .ok_or(PageError::MissingNode("edge_owner_to_timeline_media.edges"))?;

    Ok(edges.iter().filter_map(|e| e.get("node").cloned()).collect())
}

/// The media node from a post detail document.
pub fn post_media_node(doc: &Value) -> Result<Value, PageError> {
    doc.pointer("/graphql/shortcode_media")
        .or_else(|| doc.pointer("/entry_data/PostPage/0/graphql/shortcode_media"))
        .cloned()
        .ok_or(PageError::MissingNode("graphql.shortcode_media"))
}

/// The location node from a location detail document. Older page versions
/// kept the node directly under the entry data.
pub fn location_node(doc: &Value) -> Result<Value, PageError> {
    doc.pointer("/graphql/location")
        .or_else(|| doc.pointer("/entry_data/LocationsPage/0/graphql/location"))
        .or_else(|| doc.pointer("/entry_data/LocationsPage/0/location"))
        .cloned()
        .ok_or(PageError::MissingNode("graphql.location"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_json_document() {
        let doc = parse_document(r#"{"graphql": {"user": {}}}"#).unwrap();
        assert!(doc.pointer("/graphql/user").is_some());
    }

    #[test]
    fn embedded_json_document() {
        let html = concat!(
            "<html><body>\n",
            "<script type=\"text/javascript\">window._sharedData = ",
            r#"{"entry_data": {"PostPage": [{"graphql": {"shortcode_media": {"id": "1"}}}]}};"#,
            "</script>\n</body></html>"
        );
        let doc = parse_document(html).unwrap();
        let node = post_media_node(&doc).unwrap();
        assert_eq!(node["id"], "1");
    }

    #[test]
    fn no_embedded_json() {
        assert!(matches!(
            parse_document("<html><body>nope</body></html>"),
            Err(PageError::NoEmbeddedJson)
        ));
    }

    #[test]
    fn profile_nodes_both_shapes() {
        let direct = serde_json::json!({
            "graphql": {"user": {"edge_owner_to_timeline_media": {"edges": [
                {"node": {"id": "1"}}, {"node": {"id": "2"}}
            ]}}}
        });
        assert_eq!(profile_media_nodes(&direct).unwrap().len(), 2);

        let wrapped = serde_json::json!({
            "entry_data": {"ProfilePage": [{"graphql": {"user": {
                "edge_owner_to_timeline_media": {"edges": [{"node": {"id": "1"}}]}
            }}}]}
        });
        assert_eq!(profile_media_nodes(&wrapped).unwrap().len(), 1);
    }

    #[test]
    fn missing_node_is_named() {
        let doc = serde_json::json!({"graphql": {}});
        let err = post_media_node(&doc).unwrap_err();
        assert!(err.to_string().contains("shortcode_media"));
    }

    #[test]
    fn location_node_legacy_shape() {
        let doc = serde_json::json!({
            "entry_data": {"LocationsPage": [{"location": {"id": "9", "lat": 1.5, "lng": 2.5}}]}
        });
        let node = location_node(&doc).unwrap();
        assert_eq!(node["lat"], 1.5);
    }
}
