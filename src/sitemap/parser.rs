//! Best-effort streaming XML parsing of sitemap payloads.
//!
//! Accepts both root shapes (`sitemapindex` and `urlset`) without requiring
//! the caller to know which in advance: every `<loc>` found inside a
//! `<sitemap>` element is a child sitemap URL, and every `<loc>` found
//! inside a `<url>` element is a page URL. Malformed XML yields an empty
//! result rather than an error — sitemap XML in the wild is not always
//! well-formed, and one broken sitemap should not abort a run.

use quick_xml::events::Event;
use quick_xml::reader::Reader;

/// The two `<loc>` collections a sitemap payload can contain.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParsedSitemap {
    /// `<loc>` values nested under `<sitemap>` — child sitemaps to recurse into.
    pub children: Vec<String>,
    /// `<loc>` values nested under `<url>` — page URLs to warm.
    pub pages: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Elem {
    Sitemap,
    Url,
    Loc,
    Other,
}

/// Parses `xml`, extracting child-sitemap and page URLs. Never returns an
/// error: any parse failure simply stops accumulation and returns whatever
/// was collected up to that point (often nothing).
pub fn parse(xml: &[u8]) -> ParsedSitemap {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut result = ParsedSitemap::default();
    // Stack of enclosing elements, including `<loc>` itself, so `End` events
    // pop in lockstep with `Start` events regardless of nesting depth.
    let mut stack: Vec<Elem> = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(tag)) => {
                stack.push(classify(tag.local_name().as_ref()));
            }
            Ok(Event::Empty(_)) => {
                // Self-closing elements (e.g. `<loc/>`) carry no text; ignore.
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(text)) => {
                if stack.last() != Some(&Elem::Loc) {
                    continue;
                }
                let Ok(unescaped) = text.unescape() else {
                    continue;
                };
                let value = unescaped.trim();
                if value.is_empty() {
                    continue;
                }
                // The element enclosing `<loc>` determines which list it belongs to.
                match stack.get(stack.len().wrapping_sub(2)) {
                    Some(Elem::Sitemap) => result.children.push(value.to_string()),
                    Some(Elem::Url) => result.pages.push(value.to_string()),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    result
}

fn classify(local_name: &[u8]) -> Elem {
    match local_name {
        b"sitemap" => Elem::Sitemap,
        b"url" => Elem::Url,
        b"loc" => Elem::Loc,
        _ => Elem::Other,
    }
}
