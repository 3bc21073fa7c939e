//! XenForo forums (SpaceBattles, Sufficient Velocity, Questionable Questing).
//!
//! A thread is a story; its threadmarks are the chapters. Each chapter URL
//! points at a single post and the post body is the content region.

use scraper::{ElementRef, Html};

use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata};
use crate::sites::extract::{
    self, extract_content, origin_of, parse_selector, regex, resolve_url, select_all_text,
    select_text, text_of,
};
use crate::sites::{
    build_story, downloaded_chapter, fetch_html, ChapterEntry, RegistryBuilder, SiteHandler,
    UrlPattern, Window,
};
use crate::transport::{Fetch, Profile};

pub const SITE_NAME: &str = "XenForo (SpaceBattles, SV, QQ)";

pub fn register(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    registry.register(
        SITE_NAME,
        &[
            UrlPattern::Substring("forums.spacebattles.com"),
            UrlPattern::Substring("forums.sufficientvelocity.com"),
            UrlPattern::Substring("forum.questionablequesting.com"),
        ],
        build,
    )
}

fn build<'a>(client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
    Box::new(XenForo::new(client))
}

pub struct XenForo<'a> {
    client: &'a dyn Fetch,
}

/// `{origin}/threads/{slug}.{id}/`, dropping page, post and reader suffixes.
fn thread_url(url: &str) -> Result<String, InkwellError> {
    let url = url.trim();
    let re = regex(r"^(https?://[^/]+/threads/[^/?#]+)")?;
    re.captures(url)
        .map(|c| format!("{}/", &c[1]))
        .ok_or_else(|| InkwellError::invalid_url(url, "expected a forum thread URL (/threads/...)"))
}

fn forum_name(url: &str) -> &'static str {
    if url.contains("spacebattles") {
        "SpaceBattles"
    } else if url.contains("sufficientvelocity") {
        "Sufficient Velocity"
    } else if url.contains("questionablequesting") {
        "Questionable Questing"
    } else {
        "XenForo"
    }
}

/// Title text without the prefix labels XenForo renders as nested spans.
fn thread_title(doc: &Html) -> Result<Option<String>, InkwellError> {
    let sel = parse_selector("h1.p-title-value")?;
    Ok(doc
        .select(&sel)
        .next()
        .map(|h1| {
            h1.children()
                .filter_map(|n| n.value().as_text())
                .map(|t| &**t)
                .collect::<String>()
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|t| !t.is_empty()))
}

fn parse_thread(html: &str, thread: &str) -> Result<StoryMetadata, InkwellError> {
    let doc = Html::parse_document(html);
    let title =
        thread_title(&doc)?.ok_or_else(|| InkwellError::parse(thread, "missing thread title"))?;
    let author = select_text(&doc, "a.username")?.unwrap_or_else(|| "Unknown".to_string());
    let story_id = regex(r"/threads/[^/]*?\.?(\d+)/?$")?
        .captures(thread)
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let mut meta = StoryMetadata::new(title, author, thread, forum_name(thread), story_id);
    meta.tags = select_all_text(&doc, "a.tagItem")?;
    Ok(meta)
}

fn first_link<'d>(item: ElementRef<'d>) -> Result<Option<ElementRef<'d>>, InkwellError> {
    let title_link = parse_selector(".structItem-title a")?;
    let any_link = parse_selector("a[href]")?;
    Ok(item
        .select(&title_link)
        .find(|a| a.value().attr("href").is_some())
        .or_else(|| item.select(&any_link).next()))
}

fn parse_threadmarks(html: &str, origin: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
    let doc = Html::parse_document(html);
    let item_sel = parse_selector(".structItem--threadmark")?;
    let time_sel = parse_selector("time[datetime]")?;
    let mut entries = Vec::new();
    for item in doc.select(&item_sel) {
        let Some(link) = first_link(item)? else {
            continue;
        };
        let Some(href) = link
            .value()
            .attr("href")
            .and_then(|h| resolve_url(&format!("{}/", origin), h))
        else {
            continue;
        };
        let title = text_of(link);
        let title = if title.is_empty() {
            format!("Chapter {}", entries.len() + 1)
        } else {
            title
        };
        let mut entry = ChapterEntry::new(title, href);
        entry.date_published = item
            .select(&time_sel)
            .next()
            .and_then(|t| t.value().attr("datetime"))
            .and_then(extract::parse_datetime);
        entries.push(entry);
    }
    Ok(entries)
}

impl<'a> XenForo<'a> {
    pub fn new(client: &'a dyn Fetch) -> Self {
        Self { client }
    }

    fn fetch(&self, url: &str) -> Result<String, InkwellError> {
        fetch_html(self.client, url, Profile::Standard)
    }

    fn threadmarks(&self, thread: &str) -> Result<Vec<ChapterEntry>, InkwellError> {
        let html = self.fetch(&format!("{}threadmarks", thread))?;
        parse_threadmarks(&html, &origin_of(thread)?)
    }
}

impl SiteHandler for XenForo<'_> {
    fn site_name(&self) -> &str {
        SITE_NAME
    }

    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError> {
        let thread = thread_url(url)?;
        let mut meta = parse_thread(&self.fetch(&thread)?, &thread)?;
        meta.chapter_count = self.threadmarks(&thread)?.len();
        Ok(meta)
    }

    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError> {
        let thread = thread_url(url)?;
        let meta = parse_thread(&self.fetch(&thread)?, &thread)?;
        let entries = self.threadmarks(&thread)?;
        if entries.is_empty() {
            tracing::warn!(url = %thread, "Thread has no threadmarks");
        }
        Ok(build_story(meta, entries, window))
    }

    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError> {
        let html = self.fetch(url)?;
        let post_id = regex(r"(?:post-|posts/)(\d+)")?
            .captures(url)
            .map(|c| c[1].to_string());

        let mut selectors = Vec::new();
        if let Some(id) = &post_id {
            selectors.push(format!("article[data-content='post-{}'] div.bbWrapper", id));
        }
        selectors.push("article.hasThreadmark div.bbWrapper".to_string());
        selectors.push("div.bbWrapper".to_string());
        let selectors: Vec<&str> = selectors.iter().map(String::as_str).collect();

        let doc = Html::parse_document(&html);
        let label = match &post_id {
            Some(id) => select_text(
                &doc,
                &format!("article[data-content='post-{}'] .threadmarkLabel", id),
            )?,
            None => None,
        };
        let title = match label {
            Some(label) => label,
            None => thread_title(&doc)?.unwrap_or_else(|| "Chapter".to_string()),
        };

        let region = extract_content(
            &html,
            url,
            &selectors,
            &["div.bbCodeBlock--quote .bbCodeBlock-expandLink"],
        )?;
        Ok(downloaded_chapter(url, title, region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sites::fake::FakeWeb;

    const THREAD: &str = r#"<html><body>
<h1 class="p-title-value"><span class="label">Worm</span><span class="label-append"> </span>Ward Rewritten</h1>
<a class="username" href="/members/scribe.1/">scribe</a>
<a class="tagItem">alternate universe</a><a class="tagItem">crossover</a>
</body></html>"#;

    const MARKS: &str = r#"<div class="structItemContainer">
<div class="structItem structItem--threadmark"><div class="structItem-title"><a href="/threads/ward-rewritten.9001/post-100">Arc 1.1</a></div><time datetime="2022-01-01T00:00:00+0000"></time></div>
<div class="structItem structItem--threadmark"><div class="structItem-title"><a href="/threads/ward-rewritten.9001/post-200">Arc 1.2</a></div></div>
<div class="structItem structItem--threadmark"><div class="structItem-title"><a href="/threads/ward-rewritten.9001/post-200">Arc 1.2 (again)</a></div></div>
</div>"#;

    #[test]
    fn thread_urls_are_normalised() -> Result<(), InkwellError> {
        assert_eq!(
            thread_url("https://forums.spacebattles.com/threads/ward-rewritten.9001/page-4#post-17")?,
            "https://forums.spacebattles.com/threads/ward-rewritten.9001/"
        );
        assert_eq!(
            thread_url("https://forums.sufficientvelocity.com/threads/x.55")?,
            "https://forums.sufficientvelocity.com/threads/x.55/"
        );
        assert!(thread_url("https://forums.spacebattles.com/forums/creative.18/").is_err());
        Ok(())
    }

    #[test]
    fn thread_metadata_drops_prefix_labels() -> Result<(), InkwellError> {
        let meta = parse_thread(THREAD, "https://forums.spacebattles.com/threads/ward-rewritten.9001/")?;
        assert_eq!(meta.title, "Ward Rewritten");
        assert_eq!(meta.author, "scribe");
        assert_eq!(meta.story_id, "9001");
        assert_eq!(meta.site_name, "SpaceBattles");
        assert_eq!(meta.tags, vec!["alternate universe", "crossover"]);
        Ok(())
    }

    #[test]
    fn story_lists_threadmarks_once() -> Result<(), InkwellError> {
        let web = FakeWeb::new()
            .page("https://forums.spacebattles.com/threads/ward-rewritten.9001/", THREAD)
            .page("https://forums.spacebattles.com/threads/ward-rewritten.9001/threadmarks", MARKS);
        let story = XenForo::new(&web).get_story(
            "https://forums.spacebattles.com/threads/ward-rewritten.9001/page-2",
            Window::all(),
        )?;
        let titles: Vec<&str> = story.chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Arc 1.1", "Arc 1.2"]);
        assert_eq!(
            story.chapters[0].url,
            "https://forums.spacebattles.com/threads/ward-rewritten.9001/post-100"
        );
        assert!(story.chapters[0].date_published.is_some());
        assert!(story.chapters[1].date_published.is_none());
        Ok(())
    }

    #[test]
    fn chapter_picks_the_addressed_post() -> Result<(), InkwellError> {
        let page = r#"<h1 class="p-title-value">Ward Rewritten</h1>
<article class="message hasThreadmark" data-content="post-100"><span class="threadmarkLabel">Arc 1.1</span>
  <div class="bbWrapper">First post.</div></article>
<article class="message hasThreadmark" data-content="post-200"><span class="threadmarkLabel">Arc 1.2</span>
  <div class="bbWrapper">Second post <img src="/attachments/map.png"> here.</div></article>"#;
        let url = "https://forums.spacebattles.com/threads/ward-rewritten.9001/post-200";
        let web = FakeWeb::new().page(url, page);
        let ch = XenForo::new(&web).get_chapter(url)?;
        assert_eq!(ch.title, "Arc 1.2");
        assert!(ch.html_content.contains("Second post"));
        assert!(!ch.html_content.contains("First post"));
        assert_eq!(ch.images.len(), 1);
        assert_eq!(ch.images[0].url, "https://forums.spacebattles.com/attachments/map.png");
        Ok(())
    }

    #[test]
    fn chapter_without_post_id_uses_threadmarked_post() -> Result<(), InkwellError> {
        let page = r#"<h1 class="p-title-value">Ward Rewritten</h1>
<article class="message"><div class="bbWrapper">Chatter.</div></article>
<article class="message hasThreadmark"><div class="bbWrapper">Story text.</div></article>"#;
        let url = "https://forums.spacebattles.com/threads/ward-rewritten.9001/reader/";
        let web = FakeWeb::new().page(url, page);
        let ch = XenForo::new(&web).get_chapter(url)?;
        assert_eq!(ch.title, "Ward Rewritten");
        assert!(ch.html_content.contains("Story text."));
        Ok(())
    }
}
