//! RSS 2.0 / Atom feed parsing built on quick-xml's pull parser.
//!
//! Feeds in the wild are messy: mixed namespaces, CDATA everywhere, dates in
//! half a dozen formats. The parser tracks the element path and collects only
//! the fields FeedHarvest stores; everything else is skipped without error.

use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::warn;

use feedharvest_shared::{FeedHarvestError, Result};

/// One entry (RSS `<item>` or Atom `<entry>`) from a parsed feed.
#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Feed-provided body: `content:encoded` / `<content>` when present,
    /// otherwise the description/summary.
    pub summary: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
}

/// A parsed feed document.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// Parse an RSS 2.0 or Atom document.
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut path: Vec<String> = Vec::new();
    let mut current: Option<FeedEntry> = None;
    // Rich content beats the plain description when both are present.
    let mut current_rich_content: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = element_name(&e);
                path.push(name.clone());
                text.clear();

                if is_entry_path(&path) {
                    current = Some(FeedEntry::default());
                    current_rich_content = None;
                }

                // Atom links carry their URL in the href attribute.
                if name == "link" && in_entry(&path) {
                    if let Some(href) = atom_link_href(&e) {
                        if let Some(entry) = current.as_mut() {
                            if entry.link.is_none() {
                                entry.link = Some(href);
                            }
                        }
                    }
                }
            }
            Ok(Event::Empty(e)) => {
                let name = element_name(&e);
                if name == "link" && in_entry_children(&path) {
                    if let Some(href) = atom_link_href(&e) {
                        if let Some(entry) = current.as_mut() {
                            if entry.link.is_none() {
                                entry.link = Some(href);
                            }
                        }
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let fragment = t
                    .unescape()
                    .map_err(|e| FeedHarvestError::parse(format!("bad text content: {e}")))?;
                text.push_str(&fragment);
            }
            Ok(Event::CData(t)) => {
                text.push_str(&String::from_utf8_lossy(&t));
            }
            Ok(Event::End(_)) => {
                let finished = path.pop();
                if let Some(name) = finished {
                    if is_entry_name(&name) && current.is_some() {
                        if let Some(mut entry) = current.take() {
                            // Rich content beats the plain description.
                            if let Some(rich) = current_rich_content.take() {
                                entry.summary = Some(rich);
                            }
                            feed.entries.push(entry);
                        }
                    } else {
                        collect_field(
                            &name,
                            &path,
                            std::mem::take(&mut text),
                            &mut feed,
                            &mut current,
                            &mut current_rich_content,
                        );
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(FeedHarvestError::parse(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )));
            }
        }
    }

    if feed.entries.is_empty() && feed.title.is_none() {
        return Err(FeedHarvestError::parse(
            "document contains no recognizable feed elements",
        ));
    }

    Ok(feed)
}

/// Element local name, preserving namespace prefixes like `content:encoded`.
fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_string()
}

fn is_entry_name(name: &str) -> bool {
    name == "item" || name == "entry"
}

/// Path ends at a freshly-opened item/entry element.
fn is_entry_path(path: &[String]) -> bool {
    matches!(path.last().map(String::as_str), Some("item") | Some("entry"))
        && path.iter().filter(|n| is_entry_name(n)).count() == 1
}

/// Whether the current path is inside an item/entry.
fn in_entry(path: &[String]) -> bool {
    path.iter().any(|n| is_entry_name(n))
}

/// Whether the path is a direct child position of an item/entry (used for
/// self-closing Atom links, where the link element never enters the path).
fn in_entry_children(path: &[String]) -> bool {
    matches!(path.last().map(String::as_str), Some("item") | Some("entry"))
}

/// Pull the href from an Atom `<link>` element, honoring the rel attribute.
fn atom_link_href(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut rel_ok = true;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => {
                href = Some(String::from_utf8_lossy(&attr.value).to_string());
            }
            b"rel" => {
                rel_ok = attr.value.as_ref() == b"alternate";
            }
            _ => {}
        }
    }
    if rel_ok { href } else { None }
}

/// Route collected element text into the right field.
fn collect_field(
    name: &str,
    path: &[String],
    text: String,
    feed: &mut ParsedFeed,
    current: &mut Option<FeedEntry>,
    rich_content: &mut Option<String>,
) {
    if text.is_empty() {
        return;
    }

    match current.as_mut() {
        Some(entry) => match name {
            "title" => entry.title = Some(text),
            "link" => {
                // RSS puts the URL in the element text.
                if entry.link.is_none() {
                    entry.link = Some(text.trim().to_string());
                }
            }
            "description" | "summary" => {
                if entry.summary.is_none() {
                    entry.summary = Some(text);
                }
            }
            "content:encoded" | "content" => *rich_content = Some(text),
            "pubDate" | "published" | "updated" | "dc:date" => {
                if entry.published.is_none() {
                    entry.published = parse_entry_date(&text);
                }
            }
            "author" | "dc:creator" => {
                if entry.author.is_none() {
                    entry.author = Some(text.trim().to_string());
                }
            }
            "name" if path.last().map(String::as_str) == Some("author") => {
                entry.author = Some(text.trim().to_string());
            }
            _ => {}
        },
        None => {
            // Channel/feed-level title only (ignore e.g. image titles).
            if name == "title" && path.len() <= 2 && feed.title.is_none() {
                feed.title = Some(text);
            }
        }
    }
}

/// Parse the date formats feeds actually use: RFC 2822 (RSS), RFC 3339
/// (Atom), and a few common ISO-ish variants.
pub fn parse_entry_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    warn!(date = %s, "could not parse entry date");
    None
}
