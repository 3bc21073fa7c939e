//! One download run: enumerate, fetch chapters one at a time, checkpoint after
//! every attempt, then hand the downloaded chapters to the packager.

use std::collections::HashSet;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::epub::Packager;
use crate::error::InkwellError;
use crate::model::{Chapter, ChapterStatus, Story};
use crate::resume::ResumeStore;
use crate::sites::{SiteHandler, Window};
use crate::transport::Fetch;

/// Phases of a run, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Start,
    MetadataFetched,
    ChaptersEnumerated,
    Fetching,
    BuildRequested,
    Done,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Start => "start",
            RunPhase::MetadataFetched => "metadata-fetched",
            RunPhase::ChaptersEnumerated => "chapters-enumerated",
            RunPhase::Fetching => "fetching",
            RunPhase::BuildRequested => "build-requested",
            RunPhase::Done => "done",
        }
    }
}

/// Receives per-chapter progress. All methods default to no-ops.
pub trait ProgressSink {
    fn start(&self, _story: &Story) {}
    fn chapter_finished(&self, _chapter: &Chapter) {}
    fn finish(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// What to download and how.
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub window: Window,
    pub resume: bool,
    pub include_images: bool,
    /// Explicit output file; the packager picks a default path when absent.
    pub output: Option<PathBuf>,
    /// Delete the checkpoint once every chapter of the run is downloaded.
    pub prune_checkpoint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub path: PathBuf,
    /// Chapters packaged (fetched this run plus restored from the checkpoint).
    pub downloaded: usize,
    pub failed: usize,
    /// Chapters satisfied from the checkpoint without a network call.
    pub resumed: usize,
}

/// Drives one story through the run phases.
pub struct Orchestrator<'a> {
    handler: &'a dyn SiteHandler,
    images: &'a dyn Fetch,
    store: Option<&'a ResumeStore>,
    packager: &'a dyn Packager,
    progress: &'a dyn ProgressSink,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        handler: &'a dyn SiteHandler,
        images: &'a dyn Fetch,
        packager: &'a dyn Packager,
    ) -> Self {
        Self {
            handler,
            images,
            store: None,
            packager,
            progress: &NoProgress,
        }
    }

    pub fn with_store(mut self, store: &'a ResumeStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    fn enter(&self, phase: RunPhase, url: &str) {
        debug!(phase = phase.as_str(), url, site = self.handler.site_name(), "Run phase");
    }

    pub fn run(
        &self,
        url: &str,
        request: &DownloadRequest,
    ) -> Result<DownloadOutcome, InkwellError> {
        self.enter(RunPhase::Start, url);
        let mut story = self.handler.get_story(url, request.window)?;
        self.enter(RunPhase::MetadataFetched, &story.metadata.url);
        self.enter(RunPhase::ChaptersEnumerated, &story.metadata.url);
        info!(
            title = %story.metadata.title,
            chapters = story.chapters.len(),
            "Enumerated chapters"
        );

        let completed = match (request.resume, self.store) {
            (true, Some(store)) => store.completed_urls(&story.metadata.url),
            _ => HashSet::new(),
        };
        if !completed.is_empty() {
            info!(already = completed.len(), "Resuming from checkpoint");
        }

        self.enter(RunPhase::Fetching, &story.metadata.url);
        self.progress.start(&story);
        let story_url = story.metadata.url.clone();
        let mut resumed = 0;
        for i in 0..story.chapters.len() {
            if completed.contains(&story.chapters[i].url)
                && self.restore(&story_url, &mut story.chapters[i])
            {
                resumed += 1;
            } else {
                self.attempt(&story_url, &mut story.chapters[i], request.include_images);
            }
            self.checkpoint(&story);
            self.progress.chapter_finished(&story.chapters[i]);
        }
        self.progress.finish();

        let downloaded = story.downloaded_count();
        let failed = story.failed_count();
        if downloaded == 0 {
            warn!(url = %story_url, failed, "No chapters were downloaded");
            return Err(InkwellError::NoChaptersDownloaded);
        }

        self.enter(RunPhase::BuildRequested, &story_url);
        story.retain_downloaded();
        let path = self.packager.package(&story, request.output.as_deref())?;

        if request.prune_checkpoint && failed == 0 {
            if let Some(store) = self.store {
                match store.clear(&story_url) {
                    Ok(_) => debug!(url = %story_url, "Pruned completed checkpoint"),
                    Err(e) => warn!(url = %story_url, error = %e, "Could not prune checkpoint"),
                }
            }
        }
        self.enter(RunPhase::Done, &story_url);
        info!(path = %path.display(), downloaded, failed, resumed, "Saved story");
        Ok(DownloadOutcome {
            path,
            downloaded,
            failed,
            resumed,
        })
    }

    /// Restore a checkpointed chapter from its retained content. Returns false
    /// when nothing was retained, so the caller fetches it again.
    fn restore(&self, story_url: &str, chapter: &mut Chapter) -> bool {
        let Some(stored) = self.store.and_then(|s| s.load_chapter(story_url, &chapter.url)) else {
            warn!(
                index = chapter.index,
                chapter = %chapter.title,
                "Checkpoint has no retained content for chapter, fetching again"
            );
            return false;
        };
        chapter.html_content = stored.html_content;
        chapter.word_count = stored.word_count;
        chapter.images = stored.images;
        if chapter.date_published.is_none() {
            chapter.date_published = stored.date_published;
        }
        chapter.set_status(ChapterStatus::Downloaded);
        debug!(index = chapter.index, url = %chapter.url, "Skipped already-downloaded chapter");
        true
    }

    /// Fetch one chapter. Any failure marks only this chapter failed.
    fn attempt(&self, story_url: &str, chapter: &mut Chapter, include_images: bool) {
        let fetched = match self.handler.get_chapter(&chapter.url) {
            Ok(c) => c,
            Err(e) => {
                warn!(index = chapter.index, title = %chapter.title, error = %e, "Chapter failed");
                chapter.set_status(ChapterStatus::Failed);
                return;
            }
        };
        chapter.html_content = fetched.html_content;
        chapter.word_count = fetched.word_count;
        chapter.images = fetched.images;
        if chapter.date_published.is_none() {
            chapter.date_published = fetched.date_published;
        }

        if include_images {
            chapter.images.retain_mut(|img| match self.images.get_bytes(&img.url) {
                Ok(bytes) => {
                    img.data = Some(bytes);
                    true
                }
                Err(e) => {
                    warn!(image = %img.url, error = %e, "Image download failed, omitting");
                    false
                }
            });
        }
        chapter.set_status(ChapterStatus::Downloaded);
        debug!(index = chapter.index, words = chapter.word_count, "Downloaded chapter");

        if let Some(store) = self.store {
            if let Err(e) = store.store_chapter(story_url, chapter) {
                warn!(error = %e, "Could not retain chapter content");
            }
        }
    }

    fn checkpoint(&self, story: &Story) {
        if let Some(store) = self.store {
            if let Err(e) = store.save(story) {
                warn!(url = %story.metadata.url, error = %e, "Could not save checkpoint");
            }
        }
    }
}

/// URLs from a batch file: one per line, blank lines and `#` comments ignored.
pub fn parse_url_list(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}
