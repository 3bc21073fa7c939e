//! Extraction idioms shared by the site handlers: selector parsing, text
//! normalisation, URL resolution, content-region cleanup and image harvesting.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use sha2::{Digest, Sha256};

use crate::error::InkwellError;
use crate::markup::{write_start_tag, Attr, Markup};
use crate::model::ImageRef;

/// Parse a CSS selector or return an error (avoids panics from Selector::parse).
pub fn parse_selector(sel: &str) -> Result<Selector, InkwellError> {
    Selector::parse(sel).map_err(|e| InkwellError::Selector {
        selector: sel.to_string(),
        message: e.to_string(),
    })
}

pub fn regex(pattern: &str) -> Result<Regex, InkwellError> {
    Regex::new(pattern).map_err(|e| InkwellError::Selector {
        selector: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Concatenated element text with runs of whitespace collapsed to single spaces.
pub fn text_of(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// First non-empty text matched by `sel`.
pub fn select_text(doc: &Html, sel: &str) -> Result<Option<String>, InkwellError> {
    let selector = parse_selector(sel)?;
    Ok(doc
        .select(&selector)
        .map(text_of)
        .find(|s| !s.is_empty()))
}

/// Every non-empty text matched by `sel`, in document order.
pub fn select_all_text(doc: &Html, sel: &str) -> Result<Vec<String>, InkwellError> {
    let selector = parse_selector(sel)?;
    Ok(doc
        .select(&selector)
        .map(text_of)
        .filter(|s| !s.is_empty())
        .collect())
}

/// First non-empty value of `attr` on an element matched by `sel`.
pub fn select_attr(doc: &Html, sel: &str, attr: &str) -> Result<Option<String>, InkwellError> {
    let selector = parse_selector(sel)?;
    Ok(doc
        .select(&selector)
        .filter_map(|e| e.value().attr(attr))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string))
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Resolve `href` against `base`. Protocol-relative and absolute hrefs are handled by the URL parser.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}

/// `scheme://host[:port]` of a URL.
pub fn origin_of(url: &str) -> Result<String, InkwellError> {
    let parsed = Url::parse(url).map_err(|e| InkwellError::invalid_url(url, e))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| InkwellError::invalid_url(url, "URL has no host"))?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}

/// Strip known site suffix from the end of a page title (e.g. " - Royal Road", " | Scribble Hub")
/// so that titles containing " - " or " | " in the actual title are preserved.
pub fn strip_title_site_suffix(s: &str, suffixes: &[&str]) -> String {
    let mut t = s.trim();
    for suffix in suffixes {
        if t.ends_with(suffix) {
            t = t[..t.len() - suffix.len()].trim();
            break;
        }
    }
    t.to_string()
}

/// Parse a number with thousands separators ("12,345").
pub fn parse_count(s: &str) -> Option<u64> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// RFC 3339 timestamps (also with a `+0000` offset), bare `YYYY-MM-DD` dates
/// (midnight UTC) and Unix seconds.
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n));
    }
    s.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Objects from every `application/ld+json` script, with top-level arrays and `@graph` flattened.
pub fn json_ld_objects(doc: &Html) -> Result<Vec<serde_json::Value>, InkwellError> {
    let selector = parse_selector(r#"script[type="application/ld+json"]"#)?;
    let mut out = Vec::new();
    for script in doc.select(&selector) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
            continue;
        };
        let mut stack = vec![value];
        while let Some(v) = stack.pop() {
            match v {
                serde_json::Value::Array(items) => stack.extend(items.into_iter().rev()),
                serde_json::Value::Object(mut map) => {
                    if let Some(graph) = map.remove("@graph") {
                        stack.push(graph);
                    }
                    out.push(serde_json::Value::Object(map));
                }
                _ => {}
            }
        }
    }
    Ok(out)
}

/// First JSON-LD object whose `@type` is `ty`.
pub fn json_ld_of_type(doc: &Html, ty: &str) -> Result<Option<serde_json::Value>, InkwellError> {
    Ok(json_ld_objects(doc)?
        .into_iter()
        .find(|v| v.get("@type").and_then(|t| t.as_str()) == Some(ty)))
}

pub fn strip_html_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cleaned content region of a chapter page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRegion {
    /// Outer HTML of the region with image `src` attributes made absolute.
    pub html: String,
    pub images: Vec<ImageRef>,
    pub word_count: usize,
}

/// Select the content region (first matching selector wins), drop `strip`
/// matches plus scripts and styles from inside it, and harvest its images.
pub fn extract_content(
    document: &str,
    page_url: &str,
    content: &[&str],
    strip: &[&str],
) -> Result<ContentRegion, InkwellError> {
    let mut doc = Html::parse_document(document);

    let mut region_id = None;
    for sel in content {
        let selector = parse_selector(sel)?;
        if let Some(el) = doc.select(&selector).next() {
            region_id = Some(el.id());
            break;
        }
    }
    let region_id = region_id.ok_or_else(|| {
        InkwellError::parse(
            page_url,
            format!("no content region matched ({})", content.join(", ")),
        )
    })?;

    let mut doomed = Vec::new();
    if let Some(region) = doc.tree.get(region_id).and_then(ElementRef::wrap) {
        for sel in strip.iter().copied().chain(["script", "style"]) {
            let selector = parse_selector(sel)?;
            doomed.extend(
                region
                    .select(&selector)
                    .map(|e| e.id())
                    .filter(|id| *id != region_id),
            );
        }
    }
    for id in doomed {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }

    let region = doc
        .tree
        .get(region_id)
        .and_then(ElementRef::wrap)
        .ok_or_else(|| InkwellError::parse(page_url, "content region vanished during cleanup"))?;
    let word_count = count_words(&region.text().collect::<String>());
    let (html, images) = rewrite_images(&region.html(), page_url)?;
    Ok(ContentRegion {
        html,
        images,
        word_count,
    })
}

/// Attributes that may carry the real image URL, in priority order.
const IMAGE_SOURCE_ATTRS: [&str; 4] = ["src", "data-src", "data-lazy-src", "data-original"];
/// Attributes dropped when an `<img>` tag is rewritten.
const IMAGE_DROPPED_ATTRS: [&str; 7] = [
    "src",
    "data-src",
    "data-lazy-src",
    "data-original",
    "srcset",
    "data-srcset",
    "loading",
];

/// Rewrite every `<img>` in serialized HTML to a single absolute `src` and
/// collect one [ImageRef] per distinct image URL.
pub fn rewrite_images(html: &str, page_url: &str) -> Result<(String, Vec<ImageRef>), InkwellError> {
    let markup = Markup::new().map_err(|e| InkwellError::Selector {
        selector: "img".to_string(),
        message: e.to_string(),
    })?;

    let mut namer = ImageNamer::default();
    let mut images = Vec::new();
    let mut out = String::with_capacity(html.len());
    let mut last = 0;

    for tag in markup.start_tags(html).into_iter().filter(|t| t.name == "img") {
        out.push_str(&html[last..tag.start]);
        last = tag.end;

        let source = IMAGE_SOURCE_ATTRS.iter().find_map(|name| {
            tag.attr(name)
                .map(unescape_attr)
                .filter(|v| !v.trim().is_empty() && !v.trim_start().starts_with("data:"))
        });
        let Some(absolute) = source.and_then(|s| resolve_url(page_url, &s)) else {
            out.push_str(&html[tag.start..tag.end]);
            continue;
        };

        let (filename, is_new) = namer.assign(&absolute);
        if is_new {
            images.push(ImageRef {
                media_type: guess_media_type(&filename).to_string(),
                url: absolute.clone(),
                filename,
                data: None,
            });
        }

        let mut attrs: Vec<Attr> = tag
            .attrs
            .into_iter()
            .filter(|a| !IMAGE_DROPPED_ATTRS.contains(&a.name.to_ascii_lowercase().as_str()))
            .collect();
        attrs.push(Attr::new("src", escape_attr(&absolute)));
        write_start_tag(&mut out, "img", &attrs, false);
    }
    out.push_str(&html[last..]);
    Ok((out, images))
}

pub fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\u{a0}', "&nbsp;")
}

fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

fn short_hash(s: &str) -> String {
    let mut h = hex::encode(Sha256::digest(s.as_bytes()));
    h.truncate(6);
    h
}

/// Filesystem-safe name from the last path segment of an image URL.
/// Empty results fall back to `img_{hash}.jpg`.
pub fn sanitize_image_filename(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next().unwrap_or(path);
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches(|c| c == '_' || c == '.').is_empty() {
        format!("img_{}.jpg", short_hash(url))
    } else {
        cleaned
    }
}

/// Assigns per-chapter unique filenames; the same URL always gets the same name.
#[derive(Debug, Default)]
pub struct ImageNamer {
    by_url: HashMap<String, String>,
    used: HashSet<String>,
}

impl ImageNamer {
    /// Returns the filename and whether this URL was seen for the first time.
    pub fn assign(&mut self, url: &str) -> (String, bool) {
        if let Some(existing) = self.by_url.get(url) {
            return (existing.clone(), false);
        }
        let base = sanitize_image_filename(url);
        let mut name = base.clone();
        if self.used.contains(&name) {
            let (stem, ext) = match base.rfind('.') {
                Some(dot) if dot > 0 => (&base[..dot], &base[dot..]),
                _ => (base.as_str(), ""),
            };
            name = format!("{}_{}{}", stem, short_hash(url), ext);
            let mut n = 2;
            while self.used.contains(&name) {
                name = format!("{}_{}_{}{}", stem, short_hash(url), n, ext);
                n += 1;
            }
        }
        self.used.insert(name.clone());
        self.by_url.insert(url.to_string(), name.clone());
        (name, true)
    }
}

pub fn guess_media_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit('.')
        .next()
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "avif" => "image/avif",
        _ => "image/jpeg",
    }
}
