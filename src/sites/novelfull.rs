//! NovelFull sits behind bot protection, so every request uses the browser profile.

use scraper::{ElementRef, Html};

use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata, StoryStatus};
use crate::sites::extract::{
    extract_content, parse_selector, regex, resolve_url, select_attr, select_text, text_of,
};
use crate::sites::{
    build_story, downloaded_chapter, fetch_html, ChapterEntry, RegistryBuilder, SiteHandler,
    UrlPattern, Window,
};
use crate::transport::{Fetch, Profile};

pub const SITE_NAME: &str = "NovelFull";
const NOVELFULL_BASE: &str = "https://novelfull.com";

pub fn register(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    registry.register(SITE_NAME, &[UrlPattern::Substring("novelfull.com")], build)
}

fn build<'a>(client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
    Box::new(NovelFull::new(client))
}

pub struct NovelFull<'a> {
    client: &'a dyn Fetch,
}

/// `/slug.html` for story pages; chapter URLs `/slug/chapter-n.html` map back to the story.
fn normalize_novel_url(url: &str) -> Result<String, InkwellError> {
    let url = url.trim();
    if let Some(c) = regex(r"(https?://(?:www\.)?novelfull\.com/[^/]+\.html)")?.captures(url) {
        return Ok(c[1].to_string());
    }
    if let Some(c) = regex(r"(https?://(?:www\.)?novelfull\.com/)([^/]+)/")?.captures(url) {
        return Ok(format!("{}{}.html", &c[1], &c[2]));
    }
    Err(InkwellError::invalid_url(
        url,
        "expected a NovelFull story URL (novelfull.com/slug.html)",
    ))
}

/// Rows of the `.info` block whose heading contains `label`.
fn info_rows<'d>(doc: &'d Html, label: &str) -> Result<Vec<ElementRef<'d>>, InkwellError> {
    let row_sel = parse_selector(".info div")?;
    let heading_sel = parse_selector("h3")?;
    Ok(doc
        .select(&row_sel)
        .filter(|row| {
            row.select(&heading_sel)
                .next()
                .map(|h| text_of(h).to_lowercase().contains(label))
                .unwrap_or(false)
        })
        .collect())
}

fn novel_id(doc: &Html) -> Result<Option<String>, InkwellError> {
    if let Some(id) = select_attr(doc, "[data-novel-id]", "data-novel-id")? {
        return Ok(Some(id));
    }
    let script_sel = parse_selector("script")?;
    let script_re = regex(r#"novelId\s*[=:]\s*['"]?(\d+)"#)?;
    for script in doc.select(&script_sel) {
        let text = script.text().collect::<String>();
        if let Some(c) = script_re.captures(&text) {
            return Ok(Some(c[1].to_string()));
        }
    }
    let link_sel = parse_selector("a[href]")?;
    let href_re = regex(r"novelId=(\d+)")?;
    Ok(doc
        .select(&link_sel)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| href_re.captures(href).map(|c| c[1].to_string())))
}

fn parse_metadata(html: &str, url: &str) -> Result<StoryMetadata, InkwellError> {
    let doc = Html::parse_document(html);
    let title =
        select_text(&doc, "h3.title")?.ok_or_else(|| InkwellError::parse(url, "missing novel title"))?;
    let author =
        select_text(&doc, ".info a[href*='/author/']")?.unwrap_or_else(|| "Unknown".to_string());
    let story_id = regex(r"novelfull\.com/([^/]+?)\.html")?
        .captures(url)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    let mut meta = StoryMetadata::new(title, author, url, SITE_NAME, story_id);
    meta.summary = select_text(&doc, ".desc-text")?.unwrap_or_default();
    meta.cover_url = select_attr(&doc, ".book img", "data-src")?
        .or(select_attr(&doc, ".book img", "src")?)
        .and_then(|src| resolve_url(NOVELFULL_BASE, &src));

    let link_sel = parse_selector("a")?;
    for row in info_rows(&doc, "genre")? {
        meta.tags.extend(row.select(&link_sel).map(text_of).filter(|t| !t.is_empty()));
    }
    for row in info_rows(&doc, "status")? {
        let text = text_of(row).to_uppercase();
        if text.contains("ONGOING") {
            meta.status = StoryStatus::Ongoing;
        } else if text.contains("COMPLETE") {
            meta.status = StoryStatus::Complete;
        }
    }
    Ok(meta)
}

fn parse_chapter_options(html: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
    let doc = Html::parse_document(html);
    let option_sel = parse_selector("option[value]")?;
    Ok(doc
        .select(&option_sel)
        .enumerate()
        .filter_map(|(i, opt)| {
            let href = resolve_url(NOVELFULL_BASE, opt.value().attr("value")?)?;
            let title = text_of(opt);
            let title = if title.is_empty() {
                format!("Chapter {}", i + 1)
            } else {
                title
            };
            Some(ChapterEntry::new(title, href))
        })
        .collect())
}

impl<'a> NovelFull<'a> {
    pub fn new(client: &'a dyn Fetch) -> Self {
        Self { client }
    }

    fn fetch(&self, url: &str) -> Result<String, InkwellError> {
        fetch_html(self.client, url, Profile::Browser)
    }

    fn chapter_options(&self, novel_id: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
        let html = self.fetch(&format!(
            "{}/ajax-chapter-option?novelId={}",
            NOVELFULL_BASE, novel_id
        ))?;
        parse_chapter_options(&html)
    }
}

impl SiteHandler for NovelFull<'_> {
    fn site_name(&self) -> &str {
        SITE_NAME
    }

    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError> {
        let url = normalize_novel_url(url)?;
        let html = self.fetch(&url)?;
        let mut meta = parse_metadata(&html, &url)?;
        if let Some(id) = novel_id(&Html::parse_document(&html))? {
            match self.chapter_options(&id) {
                Ok(entries) => meta.chapter_count = entries.len(),
                Err(e) => tracing::debug!(error = %e, "Could not fetch NovelFull chapter count"),
            }
        }
        Ok(meta)
    }

    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError> {
        let url = normalize_novel_url(url)?;
        let html = self.fetch(&url)?;
        let meta = parse_metadata(&html, &url)?;
        let id = novel_id(&Html::parse_document(&html))?
            .ok_or_else(|| InkwellError::parse(&url, "could not find the novel id"))?;
        let entries = self.chapter_options(&id)?;
        Ok(build_story(meta, entries, window))
    }

    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError> {
        let html = self.fetch(url)?;
        let doc = Html::parse_document(&html);
        let title = select_text(&doc, "a.chapter-title")?
            .or(select_text(&doc, "h2")?)
            .unwrap_or_else(|| "Chapter".to_string());
        // Ads are injected as nested divs.
        let region = extract_content(
            &html,
            url,
            &["#chapter-content", "#chr-content"],
            &[
                "div",
                r#"div[align="left"]"#,
                r#"img[src*="proxy?container=focus"]"#,
            ],
        )?;
        Ok(downloaded_chapter(url, title, region))
    }
}
