//! inkwell: download serialized web fiction from several sites and package it as EPUB.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod epub;
pub mod error;
pub mod logging;
mod markup;
pub mod model;
pub mod resume;
pub mod sites;
pub mod transport;

// Re-exports for the CLI and library consumers.
pub use config::Config;
pub use downloader::{DownloadOutcome, DownloadRequest, Orchestrator, ProgressSink};
pub use epub::{EpubError, EpubPackager, PackageOptions, Packager};
pub use error::{CacheError, ConfigError, InkwellError, NetworkError};
pub use model::{Chapter, ChapterStatus, ImageRef, Story, StoryMetadata, StoryStatus};
pub use resume::ResumeStore;
pub use sites::{Registry, SiteHandler, Window};
pub use transport::{Fetch, Transport, TransportBuilder};
