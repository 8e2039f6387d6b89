use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

const URLSET_XMLNS: &str = "http://www.sitemaps.org/schemas/sitemap/0.9";

/// Write a sitemap urlset for the given page paths. Paths are joined onto
/// `site_url`; with an empty `site_url` the entries are path-only.
pub fn write_sitemap(path: &Path, site_url: &str, pages: &[String]) -> Result<()> {
    let xml = render(site_url, pages)?;
    fs::write(path, xml).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn render(site_url: &str, pages: &[String]) -> Result<Vec<u8>> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    let mut urlset = BytesStart::new("urlset");
    urlset.push_attribute(("xmlns", URLSET_XMLNS));
    writer.write_event(Event::Start(urlset))?;

    let base = site_url.trim_end_matches('/');
    for page in pages {
        let loc = format!("{}/{}", base, page.trim_start_matches('/'));
        writer.write_event(Event::Start(BytesStart::new("url")))?;
        writer.write_event(Event::Start(BytesStart::new("loc")))?;
        writer.write_event(Event::Text(BytesText::new(&loc)))?;
        writer.write_event(Event::End(BytesEnd::new("loc")))?;
        writer.write_event(Event::End(BytesEnd::new("url")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("urlset")))?;

    let mut xml = writer.into_inner();
    xml.push(b'\n');
    Ok(xml)
}
