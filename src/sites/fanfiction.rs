//! FanFiction.net and FictionPress share one page layout.

use scraper::Html;

use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata, StoryStatus};
use crate::sites::extract::{
    self, extract_content, parse_selector, regex, resolve_url, select_attr, select_text, text_of,
};
use crate::sites::{
    build_story, downloaded_chapter, fetch_html, ChapterEntry, RegistryBuilder, SiteHandler,
    UrlPattern, Window,
};
use crate::transport::{Fetch, Profile};

pub const SITE_NAME: &str = "FanFiction.net / FictionPress";

const LANGUAGES: [(&str, &str); 10] = [
    ("English", "en"),
    ("Spanish", "es"),
    ("French", "fr"),
    ("German", "de"),
    ("Portuguese", "pt"),
    ("Italian", "it"),
    ("Russian", "ru"),
    ("Chinese", "zh"),
    ("Japanese", "ja"),
    ("Korean", "ko"),
];

pub fn register(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    registry.register(
        SITE_NAME,
        &[UrlPattern::Regex(
            r"^https?://(www\.|m\.)?(fanfiction\.net|fictionpress\.com)/s/\d+",
        )],
        build,
    )
}

fn build<'a>(client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
    Box::new(FanFiction::new(client))
}

pub struct FanFiction<'a> {
    client: &'a dyn Fetch,
}

/// Story id plus the site origin it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StoryRef {
    id: String,
    base: &'static str,
    site: &'static str,
}

impl StoryRef {
    fn parse(url: &str) -> Result<Self, InkwellError> {
        let id = regex(r"/s/(\d+)")?
            .captures(url)
            .map(|c| c[1].to_string())
            .ok_or_else(|| InkwellError::invalid_url(url, "cannot extract story id (/s/ID)"))?;
        let (base, site) = if url.contains("fictionpress.com") {
            ("https://www.fictionpress.com", "FictionPress")
        } else {
            ("https://www.fanfiction.net", "FanFiction.net")
        };
        Ok(Self { id, base, site })
    }

    fn story_url(&self) -> String {
        format!("{}/s/{}", self.base, self.id)
    }

    fn chapter_url(&self, number: &str) -> String {
        format!("{}/s/{}/{}", self.base, self.id, number)
    }
}

fn genre_tags(info: &str) -> Result<Vec<String>, InkwellError> {
    let genre_re = regex(r"^[A-Z][a-z]+(?:/[A-Z][a-z]+)*$")?;
    Ok(info
        .split(" - ")
        .map(str::trim)
        .filter(|seg| *seg != "Complete" && !LANGUAGES.iter().any(|(name, _)| name == seg))
        .find(|seg| genre_re.is_match(seg))
        .map(|g| g.split('/').map(String::from).collect())
        .unwrap_or_default())
}

fn parse_metadata(html: &str, story: &StoryRef) -> Result<StoryMetadata, InkwellError> {
    let doc = Html::parse_document(html);
    let url = story.story_url();
    let title = select_text(&doc, "#profile_top b.xcontrast_txt")?
        .ok_or_else(|| InkwellError::parse(&url, "missing story title"))?;
    let author =
        select_text(&doc, "#profile_top a.xcontrast_txt")?.unwrap_or_else(|| "Unknown".to_string());

    let mut meta = StoryMetadata::new(title, author, url.as_str(), story.site, story.id.as_str());
    meta.summary = select_text(&doc, "#profile_top div.xcontrast_txt")?.unwrap_or_default();
    meta.cover_url = select_attr(&doc, "#profile_top img.cimage", "src")?
        .and_then(|src| resolve_url(story.base, &src));

    let info_sel = parse_selector("#profile_top span.xgray")?;
    let Some(info_el) = doc.select(&info_sel).next() else {
        meta.chapter_count = 1;
        return Ok(meta);
    };
    let info = text_of(info_el);

    meta.word_count = regex(r"Words:\s*([\d,]+)")?
        .captures(&info)
        .and_then(|c| extract::parse_count(&c[1]))
        .unwrap_or(0);
    meta.chapter_count = regex(r"Chapters:\s*(\d+)")?
        .captures(&info)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(1);
    meta.status = if info.contains("Complete") {
        StoryStatus::Complete
    } else {
        StoryStatus::Ongoing
    };
    if let Some((_, code)) = LANGUAGES
        .iter()
        .find(|(name, _)| info.split(" - ").any(|seg| seg.trim() == *name))
    {
        meta.language = code.to_string();
    }
    meta.tags = genre_tags(&info)?;

    // Updated precedes Published when both are shown.
    let time_sel = parse_selector("span[data-xutime]")?;
    let times: Vec<_> = info_el
        .select(&time_sel)
        .filter_map(|s| s.value().attr("data-xutime"))
        .filter_map(extract::parse_datetime)
        .collect();
    match times.as_slice() {
        [updated, published, ..] => {
            meta.date_updated = Some(*updated);
            meta.date_published = Some(*published);
        }
        [published] => meta.date_published = Some(*published),
        [] => {}
    }
    Ok(meta)
}

fn parse_toc(html: &str, story: &StoryRef) -> Result<Vec<ChapterEntry>, InkwellError> {
    let doc = Html::parse_document(html);
    let prefix = regex(r"^\d+\.\s*")?;
    // The selector is rendered twice (top and bottom of the page).
    let select_sel = parse_selector("select#chap_select")?;
    let option_sel = parse_selector("option")?;
    let Some(select) = doc.select(&select_sel).next() else {
        return Ok(Vec::new());
    };
    Ok(select
        .select(&option_sel)
        .enumerate()
        .map(|(i, opt)| {
            let number = opt
                .value()
                .attr("value")
                .map(str::to_string)
                .unwrap_or_else(|| (i + 1).to_string());
            let title = prefix.replace(&text_of(opt), "").into_owned();
            let title = if title.is_empty() {
                format!("Chapter {}", number)
            } else {
                title
            };
            ChapterEntry::new(title, story.chapter_url(&number))
        })
        .collect())
}

impl<'a> FanFiction<'a> {
    pub fn new(client: &'a dyn Fetch) -> Self {
        Self { client }
    }

    fn first_page(&self, story: &StoryRef) -> Result<String, InkwellError> {
        fetch_html(self.client, &story.chapter_url("1"), Profile::Standard)
    }
}

impl SiteHandler for FanFiction<'_> {
    fn site_name(&self) -> &str {
        SITE_NAME
    }

    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError> {
        let story = StoryRef::parse(url)?;
        parse_metadata(&self.first_page(&story)?, &story)
    }

    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError> {
        let story = StoryRef::parse(url)?;
        let html = self.first_page(&story)?;
        let meta = parse_metadata(&html, &story)?;
        let mut entries = parse_toc(&html, &story)?;
        if entries.is_empty() {
            entries.push(ChapterEntry::new(meta.title.clone(), story.chapter_url("1")));
        }
        Ok(build_story(meta, entries, window))
    }

    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError> {
        let html = fetch_html(self.client, url, Profile::Standard)?;
        let doc = Html::parse_document(&html);
        let prefix = regex(r"^\d+\.\s*")?;
        let title = select_text(&doc, "select#chap_select option[selected]")?
            .map(|t| prefix.replace(&t, "").into_owned())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Chapter".to_string());
        let region = extract_content(&html, url, &["#storytext"], &[])?;
        Ok(downloaded_chapter(url, title, region))
    }
}
