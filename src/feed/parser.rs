use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use thiserror::Error;

const ITUNES_NS: &[u8] = b"http://www.itunes.com/dtds/podcast-1.0.dtd";
const MEDIA_RSS_NS: &[u8] = b"http://search.yahoo.com/mrss/";
const ATOM_NS: &[u8] = b"http://www.w3.org/2005/Atom";

/// Feed bytes could not be read as RSS or Atom.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid feed document: {0}")]
    Invalid(#[from] feed_rs::parser::ParseFeedError),
}

/// One feed item, as close to the document as possible.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    /// `<guid>` / `<id>` text exactly as published (`None` when absent or blank)
    pub guid: Option<String>,
    pub title: String,
    /// Full content (`content:encoded` or Atom content)
    pub content: Option<String>,
    /// Description or summary
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub enclosure_url: Option<String>,
    /// Item-level `itunes:image@href`
    pub itunes_image: Option<String>,
    /// First item-level `media:thumbnail@url`
    pub media_thumbnail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    /// Channel-level image: `itunes:image`, then the RSS/Atom logo
    pub channel_image: Option<String>,
    pub items: Vec<RawItem>,
}

/// Turns feed bytes into items. Implementations must not do I/O.
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError>;
}

/// RSS/Atom parser built on `feed-rs`, with a namespace-aware pass for the
/// podcast extensions `feed-rs` does not keep apart.
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlFeedParser;

impl FeedParser for XmlFeedParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let feed = feed_rs::parser::parse(bytes)?;

        let scan = match scan_extensions(bytes) {
            Ok(scan) if scan.items.len() == feed.entries.len() => scan,
            Ok(scan) => {
                tracing::warn!(
                    scanned = scan.items.len(),
                    parsed = feed.entries.len(),
                    "Item count mismatch, ignoring item images and raw guids"
                );
                ExtensionScan {
                    channel_image: scan.channel_image,
                    items: Vec::new(),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Extension scan failed, ignoring item images and raw guids");
                ExtensionScan::default()
            }
        };

        let channel_image = scan
            .channel_image
            .or_else(|| feed.logo.as_ref().map(|logo| logo.uri.clone()))
            .filter(|uri| !uri.trim().is_empty());

        let mut extensions = scan.items.into_iter();
        let items = feed
            .entries
            .into_iter()
            .map(|entry| match extensions.next() {
                Some(ext) => raw_item(entry, ext),
                // No scan: fall back to whatever id feed-rs found
                None => {
                    let guid = Some(entry.id.clone()).filter(|id| !id.trim().is_empty());
                    raw_item(
                        entry,
                        ItemExtensions {
                            guid,
                            ..ItemExtensions::default()
                        },
                    )
                }
            })
            .collect();

        Ok(ParsedFeed {
            channel_image,
            items,
        })
    }
}

fn raw_item(entry: Entry, ext: ItemExtensions) -> RawItem {
    let enclosure_url = ext.enclosure.or_else(|| enclosure_from_entry(&entry));
    RawItem {
        guid: ext.guid,
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        content: entry.content.and_then(|c| c.body),
        description: entry.summary.map(|s| s.content),
        published: entry.published.or(entry.updated),
        enclosure_url,
        itunes_image: ext.itunes_image,
        media_thumbnail: ext.media_thumbnail,
    }
}

/// Audio/video media first, then any media content, then `rel="enclosure"` links.
fn enclosure_from_entry(entry: &Entry) -> Option<String> {
    let contents = || entry.media.iter().flat_map(|m| m.content.iter());
    let is_playable = |mime: &str| mime.starts_with("audio/") || mime.starts_with("video/");

    contents()
        .find(|c| {
            c.content_type
                .as_ref()
                .is_some_and(|m| is_playable(&m.to_string()))
        })
        .or_else(|| contents().next())
        .and_then(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("enclosure"))
                .map(|l| l.href.clone())
        })
}

// ============================================================================
// Extension Scan
// ============================================================================

#[derive(Debug, Default)]
struct ItemExtensions {
    guid: Option<String>,
    enclosure: Option<String>,
    itunes_image: Option<String>,
    media_thumbnail: Option<String>,
}

#[derive(Debug, Default)]
struct ExtensionScan {
    channel_image: Option<String>,
    items: Vec<ItemExtensions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    Itunes,
    MediaRss,
    Atom,
    /// No namespace, or one we do not care about
    Other,
}

fn classify(resolved: &ResolveResult<'_>) -> Ns {
    match resolved {
        ResolveResult::Bound(Namespace(ns)) if *ns == ITUNES_NS => Ns::Itunes,
        ResolveResult::Bound(Namespace(ns)) if *ns == MEDIA_RSS_NS => Ns::MediaRss,
        ResolveResult::Bound(Namespace(ns)) if *ns == ATOM_NS => Ns::Atom,
        _ => Ns::Other,
    }
}

/// Walk the document once, recording per item the raw guid, the enclosure
/// and the two image extensions, plus the channel-level iTunes image.
///
/// Items are `<item>` (RSS) or `<entry>` (Atom) elements, in document order,
/// so the result lines up with `feed-rs` entries.
fn scan_extensions(bytes: &[u8]) -> Result<ExtensionScan, quick_xml::Error> {
    let mut reader = NsReader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut scan = ExtensionScan::default();
    let mut buf = Vec::new();
    let mut depth: usize = 0;
    let mut item_depth: Option<usize> = None;
    let mut guid_text: Option<String> = None;

    loop {
        let (resolved, event) = reader.read_resolved_event_into(&mut buf)?;
        let ns = classify(&resolved);

        match event {
            Event::Start(e) => {
                depth += 1;
                let local = e.local_name();
                match item_depth {
                    None if matches!(local.as_ref(), b"item" | b"entry") => {
                        item_depth = Some(depth);
                        scan.items.push(ItemExtensions::default());
                    }
                    Some(d) if depth == d + 1 && is_guid(ns, local.as_ref()) => {
                        guid_text = Some(String::new());
                    }
                    _ => {}
                }
                record_element(&mut scan, item_depth.is_some(), ns, &e, &reader);
            }
            Event::Empty(e) => {
                record_element(&mut scan, item_depth.is_some(), ns, &e, &reader);
            }
            Event::Text(e) => {
                if let Some(text) = guid_text.as_mut() {
                    text.push_str(&e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let Some(text) = guid_text.as_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(text) = guid_text.take() {
                    let text = text.trim();
                    if let Some(item) = scan.items.last_mut() {
                        if !text.is_empty() && item.guid.is_none() {
                            item.guid = Some(text.to_string());
                        }
                    }
                }
                if item_depth == Some(depth) {
                    item_depth = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(scan)
}

fn is_guid(ns: Ns, local: &[u8]) -> bool {
    match ns {
        Ns::Atom => local == b"id",
        Ns::Other => local == b"guid",
        _ => false,
    }
}

fn record_element(
    scan: &mut ExtensionScan,
    in_item: bool,
    ns: Ns,
    e: &BytesStart<'_>,
    reader: &NsReader<&[u8]>,
) {
    let local = e.local_name();
    match (ns, local.as_ref()) {
        (Ns::Itunes, b"image") => {
            let href = attribute(e, b"href", reader);
            if in_item {
                if let Some(item) = scan.items.last_mut() {
                    item.itunes_image = item.itunes_image.take().or(href);
                }
            } else if scan.channel_image.is_none() {
                scan.channel_image = href;
            }
        }
        (Ns::MediaRss, b"thumbnail") if in_item => {
            let url = attribute(e, b"url", reader);
            if let Some(item) = scan.items.last_mut() {
                item.media_thumbnail = item.media_thumbnail.take().or(url);
            }
        }
        (Ns::Other, b"enclosure") if in_item => {
            let url = attribute(e, b"url", reader);
            if let Some(item) = scan.items.last_mut() {
                item.enclosure = item.enclosure.take().or(url);
            }
        }
        (Ns::Atom, b"link") if in_item => {
            if attribute(e, b"rel", reader).as_deref() == Some("enclosure") {
                let href = attribute(e, b"href", reader);
                if let Some(item) = scan.items.last_mut() {
                    item.enclosure = item.enclosure.take().or(href);
                }
            }
        }
        _ => {}
    }
}

/// Unescaped, non-blank value of an unprefixed attribute.
fn attribute(e: &BytesStart<'_>, key: &[u8], reader: &NsReader<&[u8]>) -> Option<String> {
    e.attributes()
        .filter_map(|a| match a {
            Ok(attr) => Some(attr),
            Err(err) => {
                tracing::debug!(error = %err, "Skipping malformed attribute");
                None
            }
        })
        .find(|attr| attr.key.as_ref() == key)
        .and_then(|attr| {
            attr.decode_and_unescape_value(reader.decoder())
                .ok()
                .map(|v| v.trim().to_string())
        })
        .filter(|v| !v.is_empty())
}
