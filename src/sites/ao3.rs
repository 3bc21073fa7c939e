//! Archive of Our Own adapter.
//!
//! A work's chapters are enumerated from its `/navigate` page. A series URL is
//! treated as a story whose "chapters" are the full-work views of its works.

use scraper::Html;

use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata, StoryStatus};
use crate::sites::extract::{
    self, extract_content, parse_selector, regex, resolve_url, select_all_text, select_attr,
    select_text, text_of,
};
use crate::sites::{
    build_story, downloaded_chapter, fetch_html, ChapterEntry, RegistryBuilder, SiteHandler,
    UrlPattern, Window,
};
use crate::transport::{Fetch, Profile};

pub const SITE_NAME: &str = "Archive of Our Own";
const AO3_BASE: &str = "https://archiveofourown.org";

pub fn register(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    registry.register(
        SITE_NAME,
        &[
            UrlPattern::Substring("archiveofourown.org"),
            UrlPattern::Substring("ao3.org"),
        ],
        build,
    )
}

fn build<'a>(client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
    Box::new(Ao3::new(client))
}

pub struct Ao3<'a> {
    client: &'a dyn Fetch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Work(String),
    Series(String),
}

fn target(url: &str) -> Result<Target, InkwellError> {
    if let Some(c) = regex(r"/series/(\d+)")?.captures(url) {
        return Ok(Target::Series(c[1].to_string()));
    }
    if let Some(c) = regex(r"/works/(\d+)")?.captures(url) {
        return Ok(Target::Work(c[1].to_string()));
    }
    Err(InkwellError::invalid_url(
        url,
        "expected an AO3 work (/works/ID) or series (/series/ID) URL",
    ))
}

fn work_url(id: &str) -> String {
    format!("{}/works/{}", AO3_BASE, id)
}

fn language_code(name: &str) -> &'static str {
    match name.trim() {
        "Español" => "es",
        "Français" => "fr",
        "Deutsch" => "de",
        "Italiano" => "it",
        "Português brasileiro" | "Português europeu" => "pt",
        "Русский" => "ru",
        "日本語" => "ja",
        "한국어" => "ko",
        "中文-普通话 國語" => "zh",
        _ => "en",
    }
}

fn parse_work_metadata(html: &str, id: &str) -> Result<StoryMetadata, InkwellError> {
    let url = work_url(id);
    let doc = Html::parse_document(html);
    let title = select_text(&doc, "h2.title")?
        .ok_or_else(|| InkwellError::parse(&url, "missing work title"))?;
    let authors = select_all_text(&doc, "a[rel='author']")?;
    let author = if authors.is_empty() {
        "Anonymous".to_string()
    } else {
        authors.join(", ")
    };

    let mut meta = StoryMetadata::new(title, author, url, SITE_NAME, id);
    meta.summary = select_text(&doc, "div.summary blockquote")?.unwrap_or_default();
    meta.tags = select_all_text(&doc, "dd.tags ul li a.tag, ul.tags li a.tag")?;
    meta.word_count = select_text(&doc, "dl.stats dd.words")?
        .and_then(|w| extract::parse_count(&w))
        .unwrap_or(0);

    meta.status = StoryStatus::Complete;
    meta.chapter_count = 1;
    if let Some(chapters) = select_text(&doc, "dl.stats dd.chapters")? {
        let (done, planned) = chapters.split_once('/').unwrap_or((chapters.as_str(), ""));
        let done = done.trim().parse::<usize>().unwrap_or(1);
        meta.chapter_count = done;
        let planned = planned.trim();
        if planned == "?" || planned.parse::<usize>().map_or(false, |p| done < p) {
            meta.status = StoryStatus::Ongoing;
        }
    }
    meta.date_published = select_text(&doc, "dl.stats dd.published")?
        .as_deref()
        .and_then(extract::parse_datetime);
    meta.date_updated = select_text(&doc, "dl.stats dd.status")?
        .as_deref()
        .and_then(extract::parse_datetime);
    meta.language = select_text(&doc, "dd.language")?
        .map(|l| language_code(&l))
        .unwrap_or("en")
        .to_string();
    Ok(meta)
}

/// Chapter links from the navigate page, each with its `(YYYY-MM-DD)` date.
fn parse_navigate(html: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
    let doc = Html::parse_document(html);
    let item_sel = parse_selector("ol.chapter li")?;
    let link_sel = parse_selector("a")?;
    let date_sel = parse_selector("span.datetime")?;
    let mut entries = Vec::new();
    for item in doc.select(&item_sel) {
        let Some(link) = item.select(&link_sel).next() else {
            continue;
        };
        let Some(href) = link.value().attr("href").and_then(|h| resolve_url(AO3_BASE, h)) else {
            continue;
        };
        let mut entry = ChapterEntry::new(text_of(link), format!("{}?view_adult=true", href));
        entry.date_published = item
            .select(&date_sel)
            .next()
            .map(text_of)
            .and_then(|d| extract::parse_datetime(d.trim_matches(|c| c == '(' || c == ')')));
        entries.push(entry);
    }
    Ok(entries)
}

fn parse_series(html: &str, id: &str) -> Result<(StoryMetadata, Vec<ChapterEntry>), InkwellError> {
    let url = format!("{}/series/{}", AO3_BASE, id);
    let doc = Html::parse_document(html);
    let title = select_text(&doc, "h2.heading")?
        .ok_or_else(|| InkwellError::parse(&url, "missing series title"))?;
    let author = select_text(&doc, "dl.series a[rel='author']")?
        .unwrap_or_else(|| "Anonymous".to_string());

    let link_sel = parse_selector("ul.series li.work h4 a:first-child")?;
    let work_re = regex(r"/works/(\d+)")?;
    let entries: Vec<ChapterEntry> = doc
        .select(&link_sel)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let full = match work_re.captures(href) {
                Some(c) => format!("{}?view_adult=true&view_full_work=true", work_url(&c[1])),
                None => resolve_url(AO3_BASE, href)?,
            };
            Some(ChapterEntry::new(text_of(a), full))
        })
        .collect();

    let mut meta = StoryMetadata::new(title, author, url, SITE_NAME, format!("series-{}", id));
    meta.summary = select_text(&doc, "blockquote.userstuff")?.unwrap_or_default();
    meta.chapter_count = entries.len();
    Ok((meta, entries))
}

impl<'a> Ao3<'a> {
    pub fn new(client: &'a dyn Fetch) -> Self {
        Self { client }
    }

    fn fetch(&self, url: &str) -> Result<String, InkwellError> {
        fetch_html(self.client, url, Profile::Standard)
    }

    fn work_metadata(&self, id: &str) -> Result<StoryMetadata, InkwellError> {
        let html = self.fetch(&format!("{}?view_adult=true", work_url(id)))?;
        parse_work_metadata(&html, id)
    }

    fn series(&self, id: &str) -> Result<(StoryMetadata, Vec<ChapterEntry>), InkwellError> {
        let html = self.fetch(&format!("{}/series/{}", AO3_BASE, id))?;
        parse_series(&html, id)
    }
}

impl SiteHandler for Ao3<'_> {
    fn site_name(&self) -> &str {
        SITE_NAME
    }

    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError> {
        match target(url)? {
            Target::Work(id) => self.work_metadata(&id),
            Target::Series(id) => self.series(&id).map(|(meta, _)| meta),
        }
    }

    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError> {
        match target(url)? {
            Target::Work(id) => {
                let meta = self.work_metadata(&id)?;
                let nav = self.fetch(&format!("{}/navigate", work_url(&id)))?;
                let mut entries = parse_navigate(&nav)?;
                if entries.is_empty() {
                    entries.push(ChapterEntry::new(
                        meta.title.clone(),
                        format!("{}?view_adult=true", work_url(&id)),
                    ));
                }
                Ok(build_story(meta, entries, window))
            }
            Target::Series(id) => {
                let (meta, entries) = self.series(&id)?;
                Ok(build_story(meta, entries, window))
            }
        }
    }

    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError> {
        let html = self.fetch(url)?;
        let doc = Html::parse_document(&html);
        let title = select_text(&doc, "div.chapter h3.title")?
            .or(select_text(&doc, "h3.title")?)
            .or(select_text(&doc, "h2.title")?)
            .or(select_attr(&doc, "meta[name='title']", "content")?)
            .unwrap_or_else(|| "Chapter".to_string());
        let region = extract_content(
            &html,
            url,
            &[
                "div#chapters div.userstuff",
                "div.userstuff[role='article']",
                "div.userstuff",
            ],
            &["h3.landmark"],
        )?;
        Ok(downloaded_chapter(url, title, region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::fake::FakeWeb;

    const WORK: &str = r#"<html><body>
<h2 class="title heading">The Long Way Home</h2>
<h3 class="byline heading"><a rel="author" href="/users/a">writer_one</a>, <a rel="author" href="/users/b">writer_two</a></h3>
<div class="summary module"><blockquote class="userstuff"><p>A journey.</p></blockquote></div>
<dd class="freeform tags"><ul class="commas"><li><a class="tag">Angst</a></li><li><a class="tag">Fluff</a></li></ul></dd>
<dd class="language">Deutsch</dd>
<dl class="stats"><dd class="published">2020-03-04</dd><dd class="status">2021-05-06</dd>
<dd class="words">12,345</dd><dd class="chapters">2/?</dd></dl>
</body></html>"#;

    const NAVIGATE: &str = r#"<ol class="chapter index group">
<li><a href="/works/42/chapters/100">1. Departure</a> <span class="datetime">(2020-03-04)</span></li>
<li><a href="/works/42/chapters/101">2. Arrival</a> <span class="datetime">(2020-04-01)</span></li>
</ol>"#;

    #[test]
    fn target_distinguishes_work_and_series() -> Result<(), InkwellError> {
        assert_eq!(
            target("https://archiveofourown.org/works/42/chapters/100")?,
            Target::Work("42".into())
        );
        assert_eq!(
            target("https://archiveofourown.org/series/7")?,
            Target::Series("7".into())
        );
        assert!(target("https://archiveofourown.org/users/x").is_err());
        Ok(())
    }

    #[test]
    fn work_metadata_reads_stats() -> Result<(), InkwellError> {
        let meta = parse_work_metadata(WORK, "42")?;
        assert_eq!(meta.title, "The Long Way Home");
        assert_eq!(meta.author, "writer_one, writer_two");
        assert_eq!(meta.summary, "A journey.");
        assert_eq!(meta.tags, vec!["Angst", "Fluff"]);
        assert_eq!(meta.word_count, 12345);
        assert_eq!(meta.chapter_count, 2);
        assert_eq!(meta.status, StoryStatus::Ongoing);
        assert_eq!(meta.language, "de");
        assert_eq!(meta.url, "https://archiveofourown.org/works/42");
        assert!(meta.date_published.is_some());
        assert!(meta.date_updated.is_some());
        Ok(())
    }

    #[test]
    fn work_story_uses_navigate_page() -> Result<(), InkwellError> {
        let web = FakeWeb::new()
            .page("https://archiveofourown.org/works/42?view_adult=true", WORK)
            .page("https://archiveofourown.org/works/42/navigate", NAVIGATE);
        let story = Ao3::new(&web).get_story("https://archiveofourown.org/works/42", Window::all())?;
        assert_eq!(story.chapters.len(), 2);
        assert_eq!(
            story.chapters[1].url,
            "https://archiveofourown.org/works/42/chapters/101?view_adult=true"
        );
        assert_eq!(story.chapters[1].title, "2. Arrival");
        assert!(story.chapters[0].date_published.is_some());
        Ok(())
    }

    #[test]
    fn single_chapter_work_becomes_one_chapter() -> Result<(), InkwellError> {
        let web = FakeWeb::new()
            .page("https://archiveofourown.org/works/42?view_adult=true", WORK)
            .page("https://archiveofourown.org/works/42/navigate", "<ol class=\"chapter\"></ol>");
        let story = Ao3::new(&web).get_story("https://archiveofourown.org/works/42", Window::all())?;
        assert_eq!(story.chapters.len(), 1);
        assert_eq!(story.chapters[0].title, "The Long Way Home");
        assert_eq!(story.metadata.chapter_count, 1);
        Ok(())
    }

    #[test]
    fn series_lists_full_work_views() -> Result<(), InkwellError> {
        let html = r#"<h2 class="heading">Saga</h2>
<dl class="series"><dd><a rel="author">saga_writer</a></dd></dl>
<blockquote class="userstuff">Three parts.</blockquote>
<ul class="series work index group">
<li class="work"><h4 class="heading"><a href="/works/1">Part One</a> by <a rel="author">saga_writer</a></h4></li>
<li class="work"><h4 class="heading"><a href="/works/2">Part Two</a> by <a rel="author">saga_writer</a></h4></li>
</ul>"#;
        let web = FakeWeb::new().page("https://archiveofourown.org/series/7", html);
        let handler = Ao3::new(&web);
        let story = handler.get_story("https://archiveofourown.org/series/7", Window::new(1, None))?;
        assert_eq!(story.metadata.title, "Saga");
        assert_eq!(story.metadata.story_id, "series-7");
        assert_eq!(story.chapters.len(), 1);
        assert_eq!(story.chapters[0].index, 1);
        assert_eq!(
            story.chapters[0].url,
            "https://archiveofourown.org/works/2?view_adult=true&view_full_work=true"
        );
        Ok(())
    }

    #[test]
    fn chapter_strips_landmark_heading() -> Result<(), InkwellError> {
        let html = r##"<div id="chapters"><div class="chapter"><h3 class="title"><a href="#">Chapter 1</a>: Departure</h3>
<div class="userstuff module" role="article"><h3 class="landmark heading">Chapter Text</h3><p>They left at dawn.</p></div></div></div>"##;
        let url = "https://archiveofourown.org/works/42/chapters/100?view_adult=true";
        let web = FakeWeb::new().page(url, html);
        let ch = Ao3::new(&web).get_chapter(url)?;
        assert_eq!(ch.title, "Chapter 1: Departure");
        assert!(!ch.html_content.contains("Chapter Text"));
        assert_eq!(ch.word_count, 4);
        Ok(())
    }
}
