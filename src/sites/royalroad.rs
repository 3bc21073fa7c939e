//! Royal Road adapter. The fiction page carries both metadata and the chapter table,
//! so `get_story` needs a single request.
//!
//! Cloudflare: cookie jar and browser-like User-Agent are used; captcha is not handled.

use reqwest::Url;
use scraper::Html;
use serde::Deserialize;

use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata, StoryStatus};
use crate::sites::extract::{
    self, extract_content, json_ld_of_type, parse_selector, regex, resolve_url, select_all_text,
    select_attr, select_text, strip_html_tags, strip_title_site_suffix, text_of,
};
use crate::sites::{
    build_story, downloaded_chapter, fetch_html, ChapterEntry, RegistryBuilder, SiteHandler,
    UrlPattern, Window,
};
use crate::transport::{Fetch, Profile};

pub const SITE_NAME: &str = "Royal Road";
const ROYALROAD_BASE: &str = "https://www.royalroad.com";
const TITLE_SUFFIXES: [&str; 3] = [" _ Royal Road", " - Royal Road", " | Royal Road"];
/// Royal Road reports length in pages; roughly this many words per page.
const WORDS_PER_PAGE: u64 = 275;

pub fn register(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    registry.register(SITE_NAME, &[UrlPattern::Substring("royalroad.com")], build)
}

fn build<'a>(client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
    Box::new(RoyalRoad::new(client))
}

pub struct RoyalRoad<'a> {
    client: &'a dyn Fetch,
}

impl<'a> RoyalRoad<'a> {
    pub fn new(client: &'a dyn Fetch) -> Self {
        Self { client }
    }
}

/// Reduce any Royal Road URL (fiction page, chapter page) to `.../fiction/{id}`.
pub fn normalize_fiction_url(url: &str) -> Result<String, InkwellError> {
    let re = regex(r"(https?://(?:www\.)?royalroad\.com/fiction/\d+)")?;
    re.captures(url)
        .map(|c| c[1].to_string())
        .ok_or_else(|| {
            InkwellError::invalid_url(
                url,
                "expected a fiction URL, e.g. https://www.royalroad.com/fiction/21220/mother-of-learning",
            )
        })
}

fn story_id(url: &str) -> String {
    regex(r"/fiction/(\d+)")
        .ok()
        .and_then(|re| re.captures(url).map(|c| c[1].to_string()))
        .unwrap_or_default()
}

/// Extract metadata from the fiction page: DOM first, JSON-LD Book as fallback.
fn parse_metadata(html: &str, url: &str) -> Result<StoryMetadata, InkwellError> {
    let doc = Html::parse_document(html);
    let book = json_ld_of_type(&doc, "Book")?;
    let ld_str = |key: &str| -> Option<String> {
        book.as_ref()
            .and_then(|b| b.get(key))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let title = select_text(&doc, "h1.font-white")?
        .or_else(|| ld_str("name"))
        .ok_or_else(|| InkwellError::parse(url, "missing fiction title"))?;
    let author = select_text(&doc, "h4.font-white a")?
        .or_else(|| {
            book.as_ref()
                .and_then(|b| b.get("author"))
                .and_then(|a| a.get("name"))
                .and_then(|n| n.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| "Unknown".to_string());
    let summary = select_text(&doc, "div.description div.hidden-content")?
        .or_else(|| ld_str("description").map(|d| strip_html_tags(&d)))
        .unwrap_or_default();
    let cover_url = select_attr(&doc, "div.fic-header img.thumbnail", "src")?
        .or(select_attr(&doc, r#"meta[property="og:image"]"#, "content")?)
        .or_else(|| ld_str("image"))
        .and_then(|src| resolve_url(url, &src));

    let status = select_all_text(&doc, "span.label-sm")?
        .iter()
        .map(|label| StoryStatus::from_label(label))
        .find(|s| *s != StoryStatus::Unknown)
        .unwrap_or_default();

    let page_text = doc.root_element().text().collect::<Vec<_>>().join(" ");
    let word_count = regex(r"([\d,]+)\s+Pages")?
        .captures(&page_text)
        .and_then(|c| extract::parse_count(&c[1]))
        .map(|pages| pages * WORDS_PER_PAGE)
        .unwrap_or(0);

    let mut meta = StoryMetadata::new(title, author, url, SITE_NAME, story_id(url));
    meta.summary = summary;
    meta.cover_url = cover_url;
    meta.tags = select_all_text(&doc, "span.tags a.fiction-tag")?;
    meta.status = status;
    meta.word_count = word_count;
    meta.chapter_count = parse_toc(html)?.len();
    Ok(meta)
}

/// Chapter table rows; falls back to the `window.chapters` script array (unlocked chapters only).
fn parse_toc(html: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
    let doc = Html::parse_document(html);
    let row_sel = parse_selector("table#chapters tbody tr[data-url]")?;
    let link_sel = parse_selector("td a")?;
    let time_sel = parse_selector("time[datetime]")?;

    let mut entries = Vec::new();
    for (i, row) in doc.select(&row_sel).enumerate() {
        let Some(url) = row
            .value()
            .attr("data-url")
            .and_then(|u| resolve_url(ROYALROAD_BASE, u))
        else {
            continue;
        };
        let title = row
            .select(&link_sel)
            .map(text_of)
            .find(|t| !t.is_empty())
            .unwrap_or_else(|| format!("Chapter {}", i + 1));
        let mut entry = ChapterEntry::new(title, url);
        entry.date_published = row
            .select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(extract::parse_datetime);
        entries.push(entry);
    }
    if entries.is_empty() && html.contains("window.chapters") {
        entries = parse_window_chapters(html)?;
    }
    Ok(entries)
}

/// Shape of one entry in window.chapters (relative url, order 0-based, isUnlocked).
#[derive(Debug, Deserialize)]
struct WindowChapter {
    title: String,
    url: String,
    #[serde(default)]
    order: u32,
    #[serde(rename = "isUnlocked", default = "default_true")]
    is_unlocked: bool,
    #[serde(default)]
    date: Option<String>,
}

fn default_true() -> bool {
    true
}

fn parse_window_chapters(html: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
    let needle = "window.chapters = ";
    let start = html
        .find(needle)
        .ok_or_else(|| InkwellError::parse(ROYALROAD_BASE, "window.chapters not found"))?;
    let array = extract_json_array_with_strings(&html[start + needle.len()..]).ok_or_else(|| {
        InkwellError::parse(ROYALROAD_BASE, "could not extract window.chapters array")
    })?;
    let mut chapters: Vec<WindowChapter> = serde_json::from_str(array)
        .map_err(|e| InkwellError::parse(ROYALROAD_BASE, format!("window.chapters: {}", e)))?;
    chapters.sort_by_key(|c| c.order);
    let base = Url::parse(ROYALROAD_BASE).map_err(|e| InkwellError::invalid_url(ROYALROAD_BASE, e))?;
    let mut entries = Vec::with_capacity(chapters.len());
    for ch in chapters.into_iter().filter(|c| c.is_unlocked) {
        let Ok(url) = base.join(&ch.url) else {
            continue;
        };
        let mut entry = ChapterEntry::new(ch.title, url.to_string());
        entry.date_published = ch.date.as_deref().and_then(extract::parse_datetime);
        entries.push(entry);
    }
    Ok(entries)
}

/// Find the matching closing bracket for the first '[' in s, skipping content inside JSON strings.
fn extract_json_array_with_strings(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (byte_offset, c) in s[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + byte_offset + 1]);
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }
    None
}

fn parse_chapter_page(html: &str, url: &str) -> Result<Chapter, InkwellError> {
    let doc = Html::parse_document(html);
    let title = select_text(&doc, "h1.font-white")?
        .or(select_attr(&doc, r#"meta[property="og:title"]"#, "content")?
            .map(|t| strip_title_site_suffix(&t, &TITLE_SUFFIXES)))
        .or(select_text(&doc, "title")?.map(|t| strip_title_site_suffix(&t, &TITLE_SUFFIXES)))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Chapter".to_string());

    let region = extract_content(
        html,
        url,
        &["div.chapter-inner.chapter-content", "div.chapter-content"],
        &["div.portlet", "div.nav-buttons"],
    )?;
    Ok(downloaded_chapter(url, title, region))
}

impl SiteHandler for RoyalRoad<'_> {
    fn site_name(&self) -> &str {
        SITE_NAME
    }

    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError> {
        let fiction_url = normalize_fiction_url(url)?;
        let html = fetch_html(self.client, &fiction_url, Profile::Standard)?;
        parse_metadata(&html, &fiction_url)
    }

    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError> {
        let fiction_url = normalize_fiction_url(url)?;
        let html = fetch_html(self.client, &fiction_url, Profile::Standard)?;
        let meta = parse_metadata(&html, &fiction_url)?;
        let entries = parse_toc(&html)?;
        tracing::debug!(url = %fiction_url, chapters = entries.len(), "Enumerated chapters");
        Ok(build_story(meta, entries, window))
    }

    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError> {
        let html = fetch_html(self.client, url, Profile::Standard)?;
        parse_chapter_page(&html, url)
    }
}
