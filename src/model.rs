//! Canonical data model for downloaded fiction.
//!
//! Every site handler produces these types; the orchestrator, resume store and
//! EPUB packager consume them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publication status as declared by the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Ongoing,
    Complete,
    Hiatus,
    #[default]
    Unknown,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Ongoing => "ongoing",
            StoryStatus::Complete => "complete",
            StoryStatus::Hiatus => "hiatus",
            StoryStatus::Unknown => "unknown",
        }
    }

    /// Map free-form status labels ("ONGOING", "Completed", "On Hiatus") to a status.
    pub fn from_label(label: &str) -> Self {
        let upper = label.to_uppercase();
        if upper.contains("ONGOING") {
            StoryStatus::Ongoing
        } else if upper.contains("COMPLETE") {
            StoryStatus::Complete
        } else if upper.contains("HIATUS") {
            StoryStatus::Hiatus
        } else {
            StoryStatus::Unknown
        }
    }
}

/// Chapter lifecycle: `pending` → `downloaded` | `failed`.
///
/// `skipped` is reserved for resume bookkeeping and never produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterStatus {
    #[default]
    Pending,
    Downloaded,
    Failed,
    Skipped,
}

impl ChapterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ChapterStatus::Pending => "pending",
            ChapterStatus::Downloaded => "downloaded",
            ChapterStatus::Failed => "failed",
            ChapterStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ChapterStatus::Downloaded | ChapterStatus::Failed)
    }

    pub fn can_transition_to(self, next: ChapterStatus) -> bool {
        match (self, next) {
            (ChapterStatus::Pending, ChapterStatus::Downloaded | ChapterStatus::Failed) => true,
            (from, to) => from == to,
        }
    }
}

/// Image embedded in a chapter. `data` stays empty until the orchestrator downloads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Absolute source URL.
    pub url: String,
    /// Filesystem-safe name, unique within the owning chapter.
    pub filename: String,
    pub media_type: String,
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

/// One addressable unit of narrative content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    /// Position in the full enumerated chapter list (not renumbered by windowing).
    pub index: usize,
    pub title: String,
    /// Unique key within a story.
    pub url: String,
    /// HTML fragment of the content region; empty until fetched.
    #[serde(default)]
    pub html_content: String,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub status: ChapterStatus,
}

impl Chapter {
    pub fn pending(index: usize, title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            url: url.into(),
            html_content: String::new(),
            word_count: 0,
            date_published: None,
            images: Vec::new(),
            status: ChapterStatus::Pending,
        }
    }

    /// Apply a lifecycle transition. Returns false (and leaves the status alone)
    /// when the transition would leave a terminal state.
    pub fn set_status(&mut self, next: ChapterStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::debug!(
                url = %self.url,
                from = self.status.as_str(),
                to = next.as_str(),
                "Ignoring chapter status transition"
            );
            false
        }
    }
}

/// Story-level metadata, fetched from the landing page(s) only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMetadata {
    pub title: String,
    pub author: String,
    /// Canonical story URL; also the resume-store key.
    pub url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub language: String,
    #[serde(default)]
    pub status: StoryStatus,
    #[serde(default)]
    pub chapter_count: usize,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_updated: Option<DateTime<Utc>>,
    pub site_name: String,
    pub story_id: String,
}

impl StoryMetadata {
    /// Metadata with only the required fields set; optional fields take their "unknown" values.
    pub fn new(
        title: impl Into<String>,
        author: impl Into<String>,
        url: impl Into<String>,
        site_name: impl Into<String>,
        story_id: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            url: url.into(),
            summary: String::new(),
            cover_url: None,
            tags: Vec::new(),
            language: "en".to_string(),
            status: StoryStatus::Unknown,
            chapter_count: 0,
            word_count: 0,
            date_published: None,
            date_updated: None,
            site_name: site_name.into(),
            story_id: story_id.into(),
        }
    }
}

/// Metadata plus chapters in fetch order (indices strictly increasing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub metadata: StoryMetadata,
    pub chapters: Vec<Chapter>,
}

impl Story {
    /// `"{title} - {author}.epub"` keeping only alphanumerics, spaces, `-` and `_`.
    pub fn default_filename(&self) -> String {
        let title = safe_name(&self.metadata.title);
        let author = safe_name(&self.metadata.author);
        let title = if title.is_empty() { "story" } else { &title };
        if author.is_empty() {
            format!("{}.epub", title)
        } else {
            format!("{} - {}.epub", title, author)
        }
    }

    pub fn downloaded_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Downloaded)
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Failed)
            .count()
    }

    /// Keep only downloaded chapters, preserving order.
    pub fn retain_downloaded(&mut self) {
        self.chapters
            .retain(|c| c.status == ChapterStatus::Downloaded);
    }
}

fn safe_name(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect::<String>()
        .trim()
        .to_string()
}
