use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Runtime settings, loaded from an optional `archiver.toml` next to the
/// archive plus `ARCHIVER_*` environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Profile whose posts are archived.
    pub username: String,
    /// Base URL of the source site.
    pub base_url: String,
    /// Root directory of the JSON archive.
    pub archive: String,
    /// Public URL the generated site is served from. May be empty, in which
    /// case sitemap entries are path-only.
    pub site_url: String,
    pub user_agent: String,
    /// Optional session cookie sent with every page fetch.
    pub cookie: Option<String>,
    /// Tags omitted from generated site data.
    pub excluded_tags: Vec<String>,
    /// Number of posts the profile page shows. A collect run where every
    /// post was new means older posts may have scrolled out unarchived.
    pub page_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            username: String::new(),
            base_url: "https://www.instagram.com".to_string(),
            archive: ".".to_string(),
            site_url: String::new(),
            user_agent: "Mozilla/5.0 (compatible; gram-archiver)".to_string(),
            cookie: None,
            excluded_tags: Vec::new(),
            page_size: 12,
        }
    }
}

impl Settings {
    pub fn load() -> Result<Settings> {
        let cfg = Config::builder()
            .add_source(File::with_name("archiver").required(false))
            .add_source(
                Environment::with_prefix("ARCHIVER")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("excluded_tags"),
            )
            .build()
            .context("failed to load configuration")?;
        Settings::from_config(cfg)
    }

    fn from_config(cfg: Config) -> Result<Settings> {
        cfg.try_deserialize().context("invalid configuration")
    }

    /// Username is only needed by the network stages, so it is validated
    /// where it is used rather than at load time.
    pub fn require_username(&self) -> Result<&str> {
        if self.username.is_empty() {
            anyhow::bail!("username must be set (archiver.toml or ARCHIVER_USERNAME)");
        }
        Ok(&self.username)
    }

    pub fn page_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert_eq!(s.archive, ".");
        assert_eq!(s.page_size, 12);
        assert!(s.cookie.is_none());
        assert!(s.excluded_tags.is_empty());
    }

    #[test]
    fn file_overrides() {
        let cfg = Config::builder()
            .add_source(File::from_str(
                "username = \"someone\"\nexcluded_tags = [\"latergram\"]\n",
                FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let s = Settings::from_config(cfg).unwrap();
        assert_eq!(s.username, "someone");
        assert_eq!(s.excluded_tags, vec!["latergram"]);
        // untouched fields keep their defaults
        assert_eq!(s.base_url, "https://www.instagram.com");
    }

    #[test]
    fn username_required() {
        assert!(Settings::default().require_username().is_err());
    }

    #[test]
    fn page_url_joins() {
        let mut s = Settings::default();
        s.base_url = "https://example.com/".to_string();
        assert_eq!(s.page_url("p/abc/?__a=1"), "https://example.com/p/abc/?__a=1");
    }
}
