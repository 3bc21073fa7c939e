//! Scribble Hub adapter. The series page carries metadata and the first TOC
//! page; the full TOC comes from the "show all chapters" AJAX endpoint, with
//! the paginated series page as fallback.
//!
//! Chapter body: `#chp_raw` only.

use std::collections::HashSet;

use reqwest::Url;
use scraper::Html;

use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata};
use crate::sites::extract::{
    extract_content, json_ld_of_type, parse_selector, select_all_text, select_attr, select_text,
    strip_html_tags, strip_title_site_suffix, text_of,
};
use crate::sites::{
    build_story, downloaded_chapter, fetch_html, post_form_html, ChapterEntry, RegistryBuilder,
    SiteHandler, UrlPattern, Window,
};
use crate::transport::{Fetch, Profile};

pub const SITE_NAME: &str = "Scribble Hub";
const SCRIBBLEHUB_BASE: &str = "https://www.scribblehub.com";
const SCRIBBLEHUB_AJAX_URL: &str = "https://www.scribblehub.com/wp-admin/admin-ajax.php";
const TITLE_SUFFIXES: [&str; 2] = [" | Scribble Hub", " - Scribble Hub"];

pub fn register(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    registry.register(SITE_NAME, &[UrlPattern::Substring("scribblehub.com")], build)
}

fn build<'a>(client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
    Box::new(ScribbleHub::new(client))
}

/// Scribble Hub handler. Holds a reference to the shared transport.
pub struct ScribbleHub<'a> {
    client: &'a dyn Fetch,
}

/// Series ID from the path `/series/{id}/{slug}/`.
fn series_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let id = parsed.path().strip_prefix("/series/")?.split('/').next()?;
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(id.to_string())
}

/// Require a series (index) URL; chapter URLs under `/read/.../chapter/` are rejected.
fn ensure_series_url(url: &str) -> Result<(String, String), InkwellError> {
    let url = url.trim();
    let parsed = Url::parse(url).map_err(|e| InkwellError::invalid_url(url, e))?;
    let path = parsed.path();
    if path.contains("/read/") && path.contains("/chapter/") {
        return Err(InkwellError::invalid_url(
            url,
            "expected a series (index) URL, not a chapter URL",
        ));
    }
    let id = series_id(url)
        .ok_or_else(|| InkwellError::invalid_url(url, "expected /series/{id}/{slug}/"))?;
    Ok((url.to_string(), id))
}

/// JSON-LD `Book` first, then the DOM.
fn parse_metadata(html: &str, url: &str, id: &str) -> Result<StoryMetadata, InkwellError> {
    let doc = Html::parse_document(html);
    let book = json_ld_of_type(&doc, "Book")?;
    let ld = |key: &str| -> Option<String> {
        book.as_ref()
            .and_then(|b| b.get(key))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let ld_author = book
        .as_ref()
        .and_then(|b| b.get("author"))
        .and_then(|a| a.get("name"))
        .and_then(|n| n.as_str())
        .map(String::from)
        .filter(|s| !s.is_empty());

    let title = match ld("name") {
        Some(t) => Some(t),
        None => select_text(&doc, "div.fic_title")?
            .or(select_attr(&doc, r#"meta[property="og:title"]"#, "content")?),
    };
    let author = match ld_author {
        Some(a) => Some(a),
        None => select_text(
            &doc,
            r#"div.sb_content.author div[property="author"] a span.auth_name_fic"#,
        )?
        .or(select_text(&doc, r#"div.sb_content.author div[property="author"] a"#)?),
    };
    let (Some(title), Some(author)) = (title, author) else {
        return Err(InkwellError::parse(url, "missing title or author"));
    };

    let mut meta = StoryMetadata::new(title, author, url, SITE_NAME, id);
    meta.summary = match ld("description") {
        Some(d) => strip_html_tags(&d),
        None => select_text(&doc, "div.wi_fic_desc")?.unwrap_or_default(),
    };
    meta.cover_url = match ld("image") {
        Some(c) => Some(c),
        None => select_attr(&doc, r#"meta[property="og:image"]"#, "content")?,
    };
    meta.tags = select_all_text(&doc, "a.fic_genre")?;
    Ok(meta)
}

/// One TOC page: `ol.toc_ol > li.toc_w` with an `order` attribute.
fn parse_toc_page(html: &str) -> Result<Vec<(u32, ChapterEntry)>, InkwellError> {
    let doc = Html::parse_document(html);
    let li_sel = parse_selector("ol.toc_ol li.toc_w")?;
    let a_sel = parse_selector("a.toc_a")?;
    let date_sel = parse_selector("span.fic_date_pub")?;
    let base = Url::parse(SCRIBBLEHUB_BASE).map_err(|e| InkwellError::invalid_url(SCRIBBLEHUB_BASE, e))?;

    let mut entries = Vec::new();
    for li in doc.select(&li_sel) {
        let order = li
            .value()
            .attr("order")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        let Some(a) = li.select(&a_sel).next() else {
            continue;
        };
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(full) = base.join(href) else {
            continue;
        };
        let title = text_of(a);
        if title.is_empty() {
            continue;
        }
        let mut entry = ChapterEntry::new(title, full.to_string());
        entry.date_published = li
            .select(&date_sel)
            .next()
            .and_then(|d| d.value().attr("title"))
            .and_then(crate::sites::extract::parse_datetime);
        entries.push((order, entry));
    }
    Ok(entries)
}

/// `toc=N` from a URL or query string; 1 if missing.
fn toc_page_number(url: &str) -> u32 {
    let query = url.split('?').nth(1).unwrap_or("");
    query
        .split('&')
        .filter_map(|param| param.trim().strip_prefix("toc="))
        .filter_map(|rest| rest.split(['#', '&']).next()?.trim().parse().ok())
        .next()
        .unwrap_or(1)
}

/// The next TOC page from `#pagination-mesh-toc a.page-link.next`, or any
/// pagination link pointing at `toc=(current+1)` since the `.next` class is sometimes omitted.
fn next_toc_page_url(html: &str, series_base: &Url, current: &str) -> Result<Option<String>, InkwellError> {
    let doc = Html::parse_document(html);
    let next_sel = parse_selector("#pagination-mesh-toc a.page-link.next")?;
    if let Some(href) = doc
        .select(&next_sel)
        .filter_map(|a| a.value().attr("href"))
        .find(|h| !h.is_empty() && *h != "#")
    {
        if let Ok(u) = series_base.join(href) {
            return Ok(Some(u.to_string()));
        }
    }

    let wanted = toc_page_number(current) + 1;
    let any_sel = parse_selector(r#"#pagination-mesh-toc a[href*="toc="]"#)?;
    Ok(doc
        .select(&any_sel)
        .filter_map(|a| a.value().attr("href"))
        .filter(|h| toc_page_number(h) == wanted)
        .find_map(|h| series_base.join(h).ok())
        .map(|u| u.to_string()))
}

/// Sort by reading order and drop repeated URLs (first occurrence kept).
fn merge_toc_entries(mut all: Vec<(u32, ChapterEntry)>) -> Vec<ChapterEntry> {
    all.sort_by_key(|(order, _)| *order);
    let mut seen = HashSet::new();
    all.into_iter()
        .filter(|(_, e)| seen.insert(e.url.clone()))
        .map(|(_, e)| e)
        .collect()
}

impl<'a> ScribbleHub<'a> {
    pub fn new(client: &'a dyn Fetch) -> Self {
        Self { client }
    }

    /// All chapters in one request via the "show all" endpoint.
    fn toc_via_ajax(&self, id: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
        let html = post_form_html(
            self.client,
            SCRIBBLEHUB_AJAX_URL,
            &[
                ("action", "wi_getreleases_pagination"),
                ("pagenum", "-1"),
                ("mypostid", id),
            ],
        )?;
        Ok(merge_toc_entries(parse_toc_page(&html)?))
    }

    fn toc_via_pages(&self, series_url: &str, first_page: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
        let series_base = Url::parse(series_url).map_err(|e| InkwellError::invalid_url(series_url, e))?;
        let mut all = parse_toc_page(first_page)?;
        let mut visited = HashSet::from([series_url.to_string()]);
        let mut next = next_toc_page_url(first_page, &series_base, series_url)?;
        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                break;
            }
            let html = fetch_html(self.client, &url, Profile::Standard)?;
            all.extend(parse_toc_page(&html)?);
            next = next_toc_page_url(&html, &series_base, &url)?;
        }
        Ok(merge_toc_entries(all))
    }

    fn table_of_contents(
        &self,
        series_url: &str,
        id: &str,
        first_page: &str,
    ) -> Result<Vec<ChapterEntry>, InkwellError> {
        match self.toc_via_ajax(id) {
            Ok(entries) if !entries.is_empty() => return Ok(entries),
            Ok(_) => tracing::debug!(series = id, "AJAX table of contents was empty"),
            Err(e) => tracing::debug!(series = id, error = %e, "AJAX table of contents failed"),
        }
        self.toc_via_pages(series_url, first_page)
    }
}

impl SiteHandler for ScribbleHub<'_> {
    fn site_name(&self) -> &str {
        SITE_NAME
    }

    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError> {
        let (series_url, id) = ensure_series_url(url)?;
        let html = fetch_html(self.client, &series_url, Profile::Standard)?;
        let mut meta = parse_metadata(&html, &series_url, &id)?;
        meta.chapter_count = parse_toc_page(&html)?.len();
        Ok(meta)
    }

    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError> {
        let (series_url, id) = ensure_series_url(url)?;
        let html = fetch_html(self.client, &series_url, Profile::Standard)?;
        let meta = parse_metadata(&html, &series_url, &id)?;
        let entries = self.table_of_contents(&series_url, &id, &html)?;
        Ok(build_story(meta, entries, window))
    }

    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError> {
        let html = fetch_html(self.client, url, Profile::Standard)?;
        let doc = Html::parse_document(&html);
        let title = match select_text(&doc, "div.chapter-title")? {
            Some(t) => t,
            None => select_text(&doc, "title")?
                .map(|t| strip_title_site_suffix(&t, &TITLE_SUFFIXES))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "Chapter".to_string()),
        };
        let region = extract_content(&html, url, &["#chp_raw"], &[".wi_authornotes"])?;
        Ok(downloaded_chapter(url, title, region))
    }
}
