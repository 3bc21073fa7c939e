//! Content-addressed checkpoint store for resumable downloads.
//!
//! One JSON document per story at `{root}/{key}.json`, where `key` is the first
//! 16 hex characters of the SHA-256 of the story's canonical URL. Writes are
//! full overwrites via temp file + rename. Downloaded chapter bodies live in a
//! sidecar directory `{root}/{key}/` so a resumed run can package them again.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config;
use crate::error::CacheError;
use crate::model::{Chapter, ChapterStatus, ImageRef, Story};

const KEY_LEN: usize = 16;

/// Serialized snapshot of one story. Unknown fields are ignored and missing
/// ones default so older or newer checkpoints stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub chapters: Vec<CheckpointChapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointChapter {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub status: String,
}

impl Checkpoint {
    pub fn from_story(story: &Story) -> Self {
        Self {
            url: story.metadata.url.clone(),
            title: story.metadata.title.clone(),
            author: story.metadata.author.clone(),
            chapters: story
                .chapters
                .iter()
                .map(|c| CheckpointChapter {
                    index: c.index,
                    title: c.title.clone(),
                    url: c.url.clone(),
                    status: c.status.as_str().to_string(),
                })
                .collect(),
        }
    }

    pub fn completed_urls(&self) -> HashSet<String> {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Downloaded.as_str())
            .map(|c| c.url.clone())
            .collect()
    }

    pub fn downloaded(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| c.status == ChapterStatus::Downloaded.as_str())
            .count()
    }
}

/// A story with fewer downloaded chapters than recorded chapters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncompleteDownload {
    pub url: String,
    pub title: String,
    pub author: String,
    pub downloaded: usize,
    pub total: usize,
}

impl IncompleteDownload {
    pub fn progress(&self) -> String {
        format!("{}/{}", self.downloaded, self.total)
    }
}

/// Retained body of a downloaded chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChapter {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub html_content: String,
    #[serde(default)]
    pub word_count: usize,
    #[serde(default)]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone)]
pub struct ResumeStore {
    root: PathBuf,
}

impl ResumeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `{cache_dir}/inkwell/downloads`.
    pub fn open_default() -> Result<Self, CacheError> {
        config::cache_dir()
            .map(|d| Self::new(d.join("downloads")))
            .ok_or(CacheError::NoCacheDir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key(url: &str) -> String {
        let digest = Sha256::digest(url.as_bytes());
        let mut key = hex::encode(digest);
        key.truncate(KEY_LEN);
        key
    }

    pub fn checkpoint_path(&self, url: &str) -> PathBuf {
        self.root.join(format!("{}.json", Self::key(url)))
    }

    fn sidecar_dir(&self, url: &str) -> PathBuf {
        self.root.join(Self::key(url))
    }

    fn chapter_path(&self, story_url: &str, chapter_url: &str) -> PathBuf {
        self.sidecar_dir(story_url)
            .join("chapters")
            .join(format!("{}.json", Self::key(chapter_url)))
    }

    fn image_path(&self, story_url: &str, chapter_url: &str, filename: &str) -> PathBuf {
        self.sidecar_dir(story_url)
            .join("images")
            .join(format!("{}-{}", Self::key(chapter_url), filename))
    }

    /// Overwrite the checkpoint with the current status of every chapter.
    pub fn save(&self, story: &Story) -> Result<(), CacheError> {
        let checkpoint = Checkpoint::from_story(story);
        let json =
            serde_json::to_vec_pretty(&checkpoint).map_err(|source| CacheError::Encode {
                url: story.metadata.url.clone(),
                source,
            })?;
        let path = self.checkpoint_path(&story.metadata.url);
        write_atomic(&path, &json)?;
        debug!(path = %path.display(), chapters = checkpoint.chapters.len(), "Saved checkpoint");
        Ok(())
    }

    /// Missing or unreadable checkpoints are "no prior state".
    pub fn load(&self, url: &str) -> Option<Checkpoint> {
        let path = self.checkpoint_path(url);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Cannot read checkpoint, ignoring");
                return None;
            }
        };
        match serde_json::from_slice::<Checkpoint>(&bytes) {
            Ok(cp) => Some(cp),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt checkpoint, ignoring");
                None
            }
        }
    }

    pub fn completed_urls(&self, url: &str) -> HashSet<String> {
        self.load(url)
            .map(|cp| cp.completed_urls())
            .unwrap_or_default()
    }

    /// Delete the checkpoint and retained chapter content. Returns whether a checkpoint existed.
    pub fn clear(&self, url: &str) -> Result<bool, CacheError> {
        let path = self.checkpoint_path(url);
        let existed = match std::fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let sidecar = self.sidecar_dir(url);
        match std::fs::remove_dir_all(&sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                return Err(CacheError::Io {
                    path: sidecar,
                    source,
                })
            }
        }
        Ok(existed)
    }

    /// Every checkpoint whose downloaded count is below its chapter count, sorted by URL.
    pub fn list_incomplete(&self) -> Result<Vec<IncompleteDownload>, CacheError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| CacheError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let cp = match std::fs::read(&path)
                .ok()
                .and_then(|b| serde_json::from_slice::<Checkpoint>(&b).ok())
            {
                Some(cp) => cp,
                None => {
                    debug!(path = %path.display(), "Skipping unreadable checkpoint");
                    continue;
                }
            };
            let downloaded = cp.downloaded();
            let total = cp.chapters.len();
            if downloaded < total {
                out.push(IncompleteDownload {
                    url: cp.url,
                    title: cp.title,
                    author: cp.author,
                    downloaded,
                    total,
                });
            }
        }
        out.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(out)
    }

    /// Retain a downloaded chapter's content and image bytes for later runs.
    pub fn store_chapter(&self, story_url: &str, chapter: &Chapter) -> Result<(), CacheError> {
        for img in &chapter.images {
            if let Some(data) = &img.data {
                write_atomic(
                    &self.image_path(story_url, &chapter.url, &img.filename),
                    data,
                )?;
            }
        }
        let stored = StoredChapter {
            url: chapter.url.clone(),
            title: chapter.title.clone(),
            html_content: chapter.html_content.clone(),
            word_count: chapter.word_count,
            date_published: chapter.date_published,
            images: chapter.images.clone(),
        };
        let json = serde_json::to_vec(&stored).map_err(|source| CacheError::Encode {
            url: chapter.url.clone(),
            source,
        })?;
        write_atomic(&self.chapter_path(story_url, &chapter.url), &json)
    }

    /// Restore a retained chapter. Images whose bytes are missing come back without data.
    pub fn load_chapter(&self, story_url: &str, chapter_url: &str) -> Option<StoredChapter> {
        let path = self.chapter_path(story_url, chapter_url);
        let bytes = std::fs::read(&path).ok()?;
        let mut stored: StoredChapter = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt stored chapter, ignoring");
                return None;
            }
        };
        for img in &mut stored.images {
            img.data = std::fs::read(self.image_path(story_url, chapter_url, &img.filename)).ok();
        }
        Some(stored)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CacheError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes).map_err(|source| CacheError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryMetadata;

    fn story(statuses: &[ChapterStatus]) -> Story {
        let metadata = StoryMetadata::new(
            "Worm",
            "Wildbow",
            "https://forums.spacebattles.com/threads/worm.1/",
            "SpaceBattles",
            "1",
        );
        let chapters = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let mut c = Chapter::pending(i, format!("Chapter {}", i + 1), format!("https://x.test/c/{}", i));
                c.set_status(*s);
                c
            })
            .collect();
        Story { metadata, chapters }
    }

    #[test]
    fn key_is_sixteen_hex_chars_and_stable() {
        let a = ResumeStore::key("https://x.test/story");
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, ResumeStore::key("https://x.test/story"));
        assert_ne!(a, ResumeStore::key("https://x.test/story2"));
    }

    #[test]
    fn save_then_load_round_trips_statuses() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        let s = story(&[ChapterStatus::Downloaded, ChapterStatus::Failed, ChapterStatus::Pending]);
        store.save(&s)?;
        let cp = store.load(&s.metadata.url).ok_or("missing checkpoint")?;
        assert_eq!(cp.title, "Worm");
        let statuses: Vec<&str> = cp.chapters.iter().map(|c| c.status.as_str()).collect();
        assert_eq!(statuses, vec!["downloaded", "failed", "pending"]);
        Ok(())
    }

    #[test]
    fn saving_twice_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        let s = story(&[ChapterStatus::Downloaded, ChapterStatus::Downloaded, ChapterStatus::Failed]);
        store.save(&s)?;
        let first = store.completed_urls(&s.metadata.url);
        store.save(&s)?;
        let second = store.completed_urls(&s.metadata.url);
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first.contains("https://x.test/c/0"));
        Ok(())
    }

    #[test]
    fn missing_and_corrupt_checkpoints_are_absent() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        assert!(store.load("https://x.test/none").is_none());
        let path = store.checkpoint_path("https://x.test/bad");
        std::fs::write(&path, b"{ not json")?;
        assert!(store.load("https://x.test/bad").is_none());
        assert!(store.completed_urls("https://x.test/bad").is_empty());
        Ok(())
    }

    #[test]
    fn load_tolerates_unknown_and_missing_fields() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        let url = "https://x.test/old";
        let json = r#"{"url":"https://x.test/old","version":7,
            "chapters":[{"url":"https://x.test/c/0","status":"downloaded","extra":true},
                        {"url":"https://x.test/c/1"}]}"#;
        std::fs::write(store.checkpoint_path(url), json)?;
        let cp = store.load(url).ok_or("missing checkpoint")?;
        assert_eq!(cp.title, "");
        assert_eq!(cp.downloaded(), 1);
        assert_eq!(cp.chapters[1].status, "");
        Ok(())
    }

    #[test]
    fn list_incomplete_reports_only_unfinished() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        let mut partial = story(&[ChapterStatus::Downloaded, ChapterStatus::Failed]);
        partial.metadata.url = "https://x.test/partial".into();
        let mut done = story(&[ChapterStatus::Downloaded]);
        done.metadata.url = "https://x.test/done".into();
        store.save(&partial)?;
        store.save(&done)?;
        std::fs::write(dir.path().join("garbage.json"), b"[]")?;

        let incomplete = store.list_incomplete()?;
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].url, "https://x.test/partial");
        assert_eq!(incomplete[0].progress(), "1/2");
        Ok(())
    }

    #[test]
    fn list_incomplete_on_missing_root_is_empty() -> Result<(), CacheError> {
        let store = ResumeStore::new("/nonexistent/inkwell/test/root");
        assert!(store.list_incomplete()?.is_empty());
        Ok(())
    }

    #[test]
    fn clear_removes_checkpoint_and_content() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        let s = story(&[ChapterStatus::Downloaded]);
        store.save(&s)?;
        store.store_chapter(&s.metadata.url, &s.chapters[0])?;
        assert!(store.clear(&s.metadata.url)?);
        assert!(store.load(&s.metadata.url).is_none());
        assert!(store.load_chapter(&s.metadata.url, &s.chapters[0].url).is_none());
        assert!(!store.clear(&s.metadata.url)?);
        Ok(())
    }

    #[test]
    fn stored_chapter_restores_html_and_image_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let store = ResumeStore::new(dir.path());
        let mut ch = Chapter::pending(3, "Interlude", "https://x.test/c/3");
        ch.html_content = "<p>Hello there</p>".into();
        ch.word_count = 2;
        ch.images = vec![
            ImageRef {
                url: "https://x.test/a.png".into(),
                filename: "a.png".into(),
                media_type: "image/png".into(),
                data: Some(vec![137, 80, 78, 71]),
            },
            ImageRef {
                url: "https://x.test/b.png".into(),
                filename: "b.png".into(),
                media_type: "image/png".into(),
                data: None,
            },
        ];
        store.store_chapter("https://x.test/story", &ch)?;
        let back = store
            .load_chapter("https://x.test/story", &ch.url)
            .ok_or("missing stored chapter")?;
        assert_eq!(back.html_content, "<p>Hello there</p>");
        assert_eq!(back.word_count, 2);
        assert_eq!(back.images[0].data.as_deref(), Some(&[137u8, 80, 78, 71][..]));
        assert!(back.images[1].data.is_none());
        Ok(())
    }
}
