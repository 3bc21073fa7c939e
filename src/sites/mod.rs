//! Site handlers and the registry that dispatches URLs to them.
//!
//! Every adapter implements [SiteHandler] and is added to the [Registry]
//! through its module's `register` function, called from [register_builtin].

pub mod extract;

pub mod ao3;
pub mod fanfiction;
pub mod novelfull;
pub mod royalroad;
pub mod scribblehub;
pub mod xenforo;

use std::collections::HashSet;
use std::ops::Range;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::InkwellError;
use crate::model::{Chapter, ChapterStatus, Story, StoryMetadata};
use crate::transport::{Fetch, Profile, Request};

/// The three-operation contract every site adapter implements.
pub trait SiteHandler {
    fn site_name(&self) -> &str;

    /// Landing/info page(s) only; never fetches chapters.
    fn get_metadata(&self, url: &str) -> Result<StoryMetadata, InkwellError>;

    /// Metadata plus the windowed chapter list, all chapters `pending` and empty.
    fn get_story(&self, url: &str, window: Window) -> Result<Story, InkwellError>;

    /// One chapter's cleaned content region, returned `downloaded`.
    fn get_chapter(&self, url: &str) -> Result<Chapter, InkwellError>;
}

/// Constructor stored in the registry.
pub type BuildHandler = for<'a> fn(&'a dyn Fetch) -> Box<dyn SiteHandler + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlPattern {
    Substring(&'static str),
    Regex(&'static str),
}

impl UrlPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlPattern::Substring(s) | UrlPattern::Regex(s) => *s,
        }
    }
}

#[derive(Debug)]
enum Matcher {
    Substring(&'static str),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, url: &str) -> bool {
        match self {
            Matcher::Substring(s) => url.contains(s),
            Matcher::Regex(re) => re.is_match(url),
        }
    }
}

pub struct HandlerDescriptor {
    pub name: &'static str,
    patterns: Vec<UrlPattern>,
    matchers: Vec<Matcher>,
    build: BuildHandler,
}

impl HandlerDescriptor {
    pub fn patterns(&self) -> &[UrlPattern] {
        &self.patterns
    }

    pub fn matches(&self, url: &str) -> bool {
        self.matchers.iter().any(|m| m.is_match(url))
    }

    pub fn build<'a>(&self, client: &'a dyn Fetch) -> Box<dyn SiteHandler + 'a> {
        (self.build)(client)
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .finish()
    }
}

/// Append-only while building; frozen into a [Registry].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    handlers: Vec<HandlerDescriptor>,
}

impl RegistryBuilder {
    pub fn register(
        &mut self,
        name: &'static str,
        patterns: &[UrlPattern],
        build: BuildHandler,
    ) -> Result<(), InkwellError> {
        let matchers = patterns
            .iter()
            .map(|p| match p {
                UrlPattern::Substring(s) => Ok(Matcher::Substring(*s)),
                UrlPattern::Regex(r) => extract::regex(r).map(Matcher::Regex),
            })
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(handler = name, patterns = patterns.len(), "Registered site handler");
        self.handlers.push(HandlerDescriptor {
            name,
            patterns: patterns.to_vec(),
            matchers,
            build,
        });
        Ok(())
    }

    pub fn build(self) -> Registry {
        Registry {
            handlers: self.handlers,
        }
    }
}

/// Immutable dispatch table.
#[derive(Debug)]
pub struct Registry {
    handlers: Vec<HandlerDescriptor>,
}

impl Registry {
    /// Registry with every built-in adapter.
    pub fn builtin() -> Result<Self, InkwellError> {
        let mut builder = RegistryBuilder::default();
        register_builtin(&mut builder)?;
        Ok(builder.build())
    }

    /// First descriptor (in registration order) whose patterns match. No network access.
    pub fn resolve(&self, url: &str) -> Result<&HandlerDescriptor, InkwellError> {
        let url = url.trim();
        self.handlers
            .iter()
            .find(|h| h.matches(url))
            .ok_or_else(|| InkwellError::UnsupportedSite {
                url: url.to_string(),
            })
    }

    pub fn descriptors(&self) -> &[HandlerDescriptor] {
        &self.handlers
    }
}

/// Explicit initialisation routine for the built-in adapters.
pub fn register_builtin(registry: &mut RegistryBuilder) -> Result<(), InkwellError> {
    royalroad::register(registry)?;
    ao3::register(registry)?;
    fanfiction::register(registry)?;
    novelfull::register(registry)?;
    xenforo::register(registry)?;
    scribblehub::register(registry)?;
    Ok(())
}

/// Half-open slice `[offset, offset + limit)` over an enumerated chapter list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Window {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(offset: usize, limit: Option<usize>) -> Self {
        Self { offset, limit }
    }

    pub fn range(&self, total: usize) -> Range<usize> {
        let start = self.offset.min(total);
        let end = match self.limit {
            Some(limit) => start.saturating_add(limit).min(total),
            None => total,
        };
        start..end
    }
}

/// One entry of an enumerated table of contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    pub title: String,
    pub url: String,
    pub date_published: Option<DateTime<Utc>>,
}

impl ChapterEntry {
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            date_published: None,
        }
    }
}

/// Deduplicate by URL (first wins), window, and build a story of pending chapters.
/// Chapter indices are positions in the full deduplicated list.
pub fn build_story(mut metadata: StoryMetadata, entries: Vec<ChapterEntry>, window: Window) -> Story {
    let mut seen = HashSet::new();
    let entries: Vec<ChapterEntry> = entries
        .into_iter()
        .filter(|e| seen.insert(e.url.clone()))
        .collect();
    let range = window.range(entries.len());
    let start = range.start;
    let chapters: Vec<Chapter> = entries
        .into_iter()
        .enumerate()
        .skip(start)
        .take(range.len())
        .map(|(index, e)| {
            let mut chapter = Chapter::pending(index, e.title, e.url);
            chapter.date_published = e.date_published;
            chapter
        })
        .collect();
    metadata.chapter_count = chapters.len();
    Story { metadata, chapters }
}

/// A `downloaded` chapter built from an extracted region. The orchestrator assigns the index.
pub(crate) fn downloaded_chapter(
    url: &str,
    title: String,
    region: extract::ContentRegion,
) -> Chapter {
    let mut chapter = Chapter::pending(0, title, url);
    chapter.html_content = region.html;
    chapter.word_count = region.word_count;
    chapter.images = region.images;
    chapter.status = ChapterStatus::Downloaded;
    chapter
}

pub(crate) fn fetch_html(
    client: &dyn Fetch,
    url: &str,
    profile: Profile,
) -> Result<String, InkwellError> {
    Ok(client
        .fetch(&Request::get(url).with_profile(profile))?
        .text())
}

pub(crate) fn post_form_html(
    client: &dyn Fetch,
    url: &str,
    form: &[(&str, &str)],
) -> Result<String, InkwellError> {
    Ok(client.fetch(&Request::post_form(url, form))?.text())
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory web for handler and orchestrator tests.

    use std::cell::RefCell;
    use std::collections::{HashMap, HashSet};

    use crate::error::NetworkError;
    use crate::transport::{Fetch, Fetched, Profile, Request};

    #[derive(Default)]
    pub struct FakeWeb {
        pages: HashMap<String, Vec<u8>>,
        failing: HashSet<String>,
        requests: RefCell<Vec<String>>,
        profiles: RefCell<Vec<Profile>>,
    }

    impl FakeWeb {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn page(mut self, url: &str, body: &str) -> Self {
            self.pages.insert(url.to_string(), body.as_bytes().to_vec());
            self
        }

        pub fn bytes(mut self, url: &str, body: &[u8]) -> Self {
            self.pages.insert(url.to_string(), body.to_vec());
            self
        }

        pub fn fail(mut self, url: &str) -> Self {
            self.failing.insert(url.to_string());
            self
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.borrow().clone()
        }

        pub fn profiles(&self) -> Vec<Profile> {
            self.profiles.borrow().clone()
        }

        pub fn count(&self, url: &str) -> usize {
            self.requests.borrow().iter().filter(|u| *u == url).count()
        }
    }

    impl Fetch for FakeWeb {
        fn fetch(&self, request: &Request) -> Result<Fetched, NetworkError> {
            self.requests.borrow_mut().push(request.url.clone());
            self.profiles.borrow_mut().push(request.profile);
            if self.failing.contains(&request.url) {
                return Err(NetworkError::HttpStatus {
                    status: 500,
                    url: request.url.clone(),
                });
            }
            match self.pages.get(&request.url) {
                Some(body) => Ok(Fetched {
                    url: request.url.clone(),
                    status: 200,
                    content_type: None,
                    body: body.clone(),
                }),
                None => Err(NetworkError::HttpStatus {
                    status: 404,
                    url: request.url.clone(),
                }),
            }
        }
    }
}
