//! CLI parsing and command dispatch. Resolves a handler, runs the download
//! orchestrator and hands the story to the EPUB packager. Maps errors to exit codes.

use crate::config::{self, Config};
use crate::downloader::{parse_url_list, DownloadOutcome, DownloadRequest, NoProgress, Orchestrator, ProgressSink};
use crate::epub::{EpubPackager, PackageOptions};
use crate::error::InkwellError;
use crate::model::{Chapter, Story, StoryMetadata};
use crate::resume::ResumeStore;
use crate::sites::{Registry, Window};
use crate::transport::TransportBuilder;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

/// CLI error carrying exit code and message.
#[derive(Debug, Error)]
pub enum CliRunError {
    #[error("{0}")]
    Inkwell(#[from] InkwellError),

    #[error("File not found: {}", .0.display())]
    BatchFileMissing(PathBuf),

    #[error("Cannot read {}: {source}", .path.display())]
    BatchFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No URLs found in {}", .0.display())]
    EmptyBatch(PathBuf),
}

impl CliRunError {
    pub fn exit_code(&self) -> i32 {
        1
    }
}

#[derive(Parser, Debug)]
#[command(name = "inkwell", version)]
#[command(about = "Download web fiction and package it as EPUB")]
#[command(
    after_help = "Settings are read from ./inkwell.toml, then the user config directory (see `inkwell config-path`). CLI flags override the file."
)]
pub struct Args {
    /// Enable debug logging and print the error cause chain.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress the progress bar.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a story and convert it to EPUB.
    Download {
        /// Story URL.
        url: String,

        /// Output EPUB path. Default: {output_dir}/{title} - {author}.epub.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Show metadata without downloading.
        #[arg(long)]
        dry_run: bool,

        /// Skip the first N chapters.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Download at most N chapters.
        #[arg(long)]
        limit: Option<usize>,

        /// Skip chapters an earlier run already downloaded.
        #[arg(long)]
        resume: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Download every story listed in a file (one URL per line, `#` comments).
    Batch {
        file: PathBuf,

        /// Directory for the EPUB files (overrides config).
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        resume: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Show story metadata without downloading chapters.
    Info {
        url: String,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// List supported sites and their URL patterns.
    Sites,

    /// List incomplete downloads that can be resumed.
    ResumeList,

    /// Delete the checkpoint for a story URL.
    ResumeClear { url: String },

    /// Show config and cache directory paths.
    ConfigPath,
}

/// Per-invocation overrides layered on top of the config file.
#[derive(clap::Args, Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    /// Delay between requests in seconds.
    #[arg(long)]
    pub delay: Option<f64>,

    /// HTTP User-Agent.
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<f64>,

    /// Do not download or embed chapter images.
    #[arg(long)]
    pub no_images: bool,

    /// Do not generate a cover.
    #[arg(long)]
    pub no_cover: bool,

    /// Chapter style: default, classic or modern.
    #[arg(long)]
    pub style: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(delay) = self.delay {
            config.download.rate_limit = delay.max(0.0);
        }
        if let Some(ua) = &self.user_agent {
            config.download.user_agent = ua.clone();
        }
        if let Some(timeout) = self.timeout {
            config.download.timeout = timeout;
        }
        if self.no_images {
            config.epub.include_images = false;
        }
        if self.no_cover {
            config.epub.include_cover = false;
        }
        if let Some(style) = &self.style {
            config.epub.chapter_style = style.clone();
        }
    }
}

fn load_config(overrides: &Overrides) -> Result<Config, CliRunError> {
    let mut config = Config::load().map_err(InkwellError::from)?;
    overrides.apply(&mut config);
    config.download.validate().map_err(InkwellError::from)?;
    Ok(config)
}

/// Progress bar for the chapter loop.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner} {msg} [{bar:40}] {pos}/{len} ({elapsed})")
        {
            bar.set_style(
                style
                    .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
                    .progress_chars("█▉▊▋▌▍▎▏ "),
            );
        }
        Self { bar }
    }

    fn message(&self) {
        let len = self.bar.length().unwrap_or(0);
        let next = (self.bar.position() + 1).min(len);
        self.bar
            .set_message(format!("Fetching chapter {}/{}", next, len));
    }
}

impl ProgressSink for BarProgress {
    fn start(&self, story: &Story) {
        self.bar.set_length(story.chapters.len() as u64);
        self.bar.set_position(0);
        self.message();
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn chapter_finished(&self, _chapter: &Chapter) {
        self.bar.inc(1);
        self.message();
    }

    fn finish(&self) {
        self.bar.disable_steady_tick();
        self.bar.finish_and_clear();
    }
}

fn open_store() -> Option<ResumeStore> {
    match ResumeStore::open_default() {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, "Checkpoints disabled");
            None
        }
    }
}

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Metadata block printed by `info` and `download --dry-run`.
pub fn format_metadata(meta: &StoryMetadata) -> String {
    let mut lines = vec![
        format!("{} ({})", meta.title, meta.site_name),
        format!("  Author:    {}", meta.author),
        format!("  Status:    {}", meta.status.as_str()),
        format!("  Chapters:  {}", meta.chapter_count),
    ];
    if meta.word_count > 0 {
        lines.push(format!("  Words:     {}", thousands(meta.word_count)));
    }
    if !meta.tags.is_empty() {
        let tags: Vec<&str> = meta.tags.iter().take(10).map(String::as_str).collect();
        lines.push(format!("  Tags:      {}", tags.join(", ")));
    }
    if let Some(d) = meta.date_published {
        lines.push(format!("  Published: {}", d.format("%Y-%m-%d")));
    }
    if let Some(d) = meta.date_updated {
        lines.push(format!("  Updated:   {}", d.format("%Y-%m-%d")));
    }
    lines.push(format!("  URL:       {}", meta.url));
    let summary = meta.summary.trim();
    if !summary.is_empty() {
        let mut short: String = summary.chars().take(300).collect();
        if summary.chars().count() > 300 {
            short.push_str("...");
        }
        lines.push(String::new());
        lines.push(format!("  {}", short));
    }
    lines.join("\n")
}

/// Read a batch file, rejecting a missing file or one without URLs.
pub fn read_batch_file(path: &Path) -> Result<Vec<String>, CliRunError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CliRunError::BatchFileMissing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(CliRunError::BatchFileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let urls = parse_url_list(&text);
    if urls.is_empty() {
        return Err(CliRunError::EmptyBatch(path.to_path_buf()));
    }
    Ok(urls)
}

struct Session<'r> {
    registry: &'r Registry,
    config: &'r Config,
    store: Option<&'r ResumeStore>,
    quiet: bool,
}

impl Session<'_> {
    /// Handler resolution happens before any network access; the transport
    /// lives only for this one story.
    fn show_metadata(&self, url: &str) -> Result<(), InkwellError> {
        let descriptor = self.registry.resolve(url)?;
        let transport = TransportBuilder::from_config(&self.config.download)?.build()?;
        let handler = descriptor.build(&transport);
        let meta = handler.get_metadata(url)?;
        println!("{}", format_metadata(&meta));
        Ok(())
    }

    fn download(&self, url: &str, request: &DownloadRequest) -> Result<DownloadOutcome, InkwellError> {
        let descriptor = self.registry.resolve(url)?;
        let transport = TransportBuilder::from_config(&self.config.download)?.build()?;
        let handler = descriptor.build(&transport);
        let packager = EpubPackager::new(PackageOptions::from_config(self.config));

        let bar;
        let progress: &dyn ProgressSink = if self.quiet {
            &NoProgress
        } else {
            bar = BarProgress::new();
            &bar
        };
        let mut orchestrator =
            Orchestrator::new(handler.as_ref(), &transport, &packager).with_progress(progress);
        if let Some(store) = self.store {
            orchestrator = orchestrator.with_store(store);
        } else if request.resume {
            warn!("Resume requested but no checkpoint store is available");
        }
        let outcome = orchestrator.run(url, request)?;
        if outcome.resumed > 0 {
            eprintln!("Resumed {} chapters from an earlier run", outcome.resumed);
        }
        if outcome.failed > 0 {
            eprintln!("Warning: {} chapters failed and were left out", outcome.failed);
        }
        println!(
            "Saved: {} ({} chapters)",
            outcome.path.display(),
            outcome.downloaded
        );
        Ok(outcome)
    }
}

fn request_for(config: &Config, window: Window, resume: bool, output: Option<PathBuf>) -> DownloadRequest {
    DownloadRequest {
        window,
        resume,
        include_images: config.epub.include_images,
        output,
        prune_checkpoint: config.resume.prune_completed,
    }
}

/// Entry point for the CLI.
pub fn run(args: &Args) -> Result<(), CliRunError> {
    match &args.command {
        Command::Download {
            url,
            output,
            dry_run,
            offset,
            limit,
            resume,
            overrides,
        } => {
            let config = load_config(overrides)?;
            let registry = Registry::builtin()?;
            let store = open_store();
            let session = Session {
                registry: &registry,
                config: &config,
                store: store.as_ref(),
                quiet: args.quiet,
            };
            if *dry_run {
                session.show_metadata(url)?;
                return Ok(());
            }
            let request = request_for(&config, Window::new(*offset, *limit), *resume, output.clone());
            session.download(url, &request)?;
            Ok(())
        }
        Command::Batch {
            file,
            output_dir,
            resume,
            overrides,
        } => {
            let urls = read_batch_file(file)?;
            let mut config = load_config(overrides)?;
            if let Some(dir) = output_dir {
                config.download.output_dir = dir.clone();
            }
            let registry = Registry::builtin()?;
            let store = open_store();
            let session = Session {
                registry: &registry,
                config: &config,
                store: store.as_ref(),
                quiet: args.quiet,
            };
            println!("Found {} URLs to download.", urls.len());
            let mut failures = 0;
            for (i, url) in urls.iter().enumerate() {
                println!("\n== Story {}/{} ==", i + 1, urls.len());
                let request = request_for(&config, Window::all(), *resume, None);
                if let Err(e) = session.download(url, &request) {
                    failures += 1;
                    error!(url = %url, error = %e, "Story failed");
                    eprintln!("Failed: {} - {}", url, e);
                }
            }
            println!(
                "\nBatch finished: {} saved, {} failed",
                urls.len() - failures,
                failures
            );
            Ok(())
        }
        Command::Info { url, overrides } => {
            let config = load_config(overrides)?;
            let registry = Registry::builtin()?;
            let session = Session {
                registry: &registry,
                config: &config,
                store: None,
                quiet: true,
            };
            session.show_metadata(url)?;
            Ok(())
        }
        Command::Sites => {
            let registry = Registry::builtin()?;
            println!("Supported sites:");
            for descriptor in registry.descriptors() {
                let patterns: Vec<&str> = descriptor.patterns().iter().map(|p| p.as_str()).collect();
                println!("  {:<32} {}", descriptor.name, patterns.join(", "));
            }
            Ok(())
        }
        Command::ResumeList => {
            let store = ResumeStore::open_default().map_err(InkwellError::from)?;
            let items = store.list_incomplete().map_err(InkwellError::from)?;
            if items.is_empty() {
                println!("No incomplete downloads found.");
            }
            for item in items {
                println!("{} by {}  [{}]", item.title, item.author, item.progress());
                println!("  {}", item.url);
            }
            Ok(())
        }
        Command::ResumeClear { url } => {
            let store = ResumeStore::open_default().map_err(InkwellError::from)?;
            if store.clear(url).map_err(InkwellError::from)? {
                println!("Cleared checkpoint for {}", url);
            } else {
                println!("No checkpoint found for {}", url);
            }
            Ok(())
        }
        Command::ConfigPath => {
            let show = |p: Option<PathBuf>| {
                p.map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(unavailable)".to_string())
            };
            println!("Config: {}", show(config::config_dir()));
            println!("Cache:  {}", show(config::cache_dir()));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryStatus;

    #[test]
    fn download_flags_parse() {
        let args = Args::try_parse_from([
            "inkwell",
            "download",
            "https://www.royalroad.com/fiction/21220",
            "--offset",
            "5",
            "--limit",
            "10",
            "--resume",
            "--no-images",
            "--style",
            "classic",
            "-o",
            "out/mol.epub",
        ])
        .unwrap();
        match args.command {
            Command::Download {
                url,
                output,
                dry_run,
                offset,
                limit,
                resume,
                overrides,
            } => {
                assert_eq!(url, "https://www.royalroad.com/fiction/21220");
                assert_eq!(output, Some(PathBuf::from("out/mol.epub")));
                assert!(!dry_run);
                assert_eq!(offset, 5);
                assert_eq!(limit, Some(10));
                assert!(resume);
                assert!(overrides.no_images);
                assert_eq!(overrides.style.as_deref(), Some("classic"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn global_verbose_after_subcommand() {
        let args = Args::try_parse_from(["inkwell", "sites", "--verbose"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Sites));
        let args = Args::try_parse_from(["inkwell", "resume-clear", "https://x.test/s/1"]).unwrap();
        assert!(matches!(args.command, Command::ResumeClear { .. }));
        assert!(Args::try_parse_from(["inkwell", "download"]).is_err());
    }

    #[test]
    fn overrides_layer_over_config() {
        let mut config = Config::default();
        let overrides = Overrides {
            delay: Some(2.5),
            user_agent: Some("bot/1".to_string()),
            timeout: None,
            no_images: true,
            no_cover: true,
            style: Some("modern".to_string()),
        };
        overrides.apply(&mut config);
        assert_eq!(config.download.rate_limit, 2.5);
        assert_eq!(config.download.user_agent, "bot/1");
        assert_eq!(config.download.timeout, Config::default().download.timeout);
        assert!(!config.epub.include_images);
        assert!(!config.epub.include_cover);
        assert_eq!(config.epub.chapter_style, "modern");

        let mut untouched = Config::default();
        Overrides::default().apply(&mut untouched);
        assert_eq!(untouched, Config::default());
    }

    #[test]
    fn infinite_delay_flag_is_rejected_not_a_panic() {
        let args = Args::try_parse_from(["inkwell", "info", "https://x.test/s/1", "--delay", "inf"]).unwrap();
        let Command::Info { overrides, .. } = args.command else {
            panic!("expected info command");
        };
        let mut config = Config::default();
        overrides.apply(&mut config);
        assert!(matches!(
            config.download.validate(),
            Err(crate::error::ConfigError::Duration { key: "download.rate_limit", .. })
        ));
    }

    #[test]
    fn metadata_block_lists_known_fields() {
        let mut meta = StoryMetadata::new(
            "Mother of Learning",
            "nobody103",
            "https://www.royalroad.com/fiction/21220",
            "Royal Road",
            "21220",
        );
        meta.status = StoryStatus::Complete;
        meta.chapter_count = 109;
        meta.word_count = 1_234_567;
        meta.tags = (1..=12).map(|i| format!("t{}", i)).collect();
        meta.summary = "x".repeat(320);
        let text = format_metadata(&meta);
        assert!(text.starts_with("Mother of Learning (Royal Road)"));
        assert!(text.contains("Status:    complete"));
        assert!(text.contains("Words:     1,234,567"));
        assert!(text.contains("t10") && !text.contains("t11"));
        assert!(text.contains(&format!("{}...", "x".repeat(300))));
        assert!(!text.contains("Published"));
    }

    #[test]
    fn thousands_groups_digits() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(12_345_678), "12,345,678");
    }

    #[test]
    fn batch_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        assert!(matches!(read_batch_file(&missing), Err(CliRunError::BatchFileMissing(_))));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "# nothing\n\n").unwrap();
        assert!(matches!(read_batch_file(&empty), Err(CliRunError::EmptyBatch(_))));

        let list = dir.path().join("list.txt");
        std::fs::write(&list, "https://a.test/1\n# skip\n  https://b.test/2  \n").unwrap();
        assert_eq!(read_batch_file(&list).unwrap(), vec!["https://a.test/1", "https://b.test/2"]);
    }

    #[test]
    fn unsupported_site_fails_before_network() {
        let config = Config::default();
        let registry = Registry::builtin().unwrap();
        let session = Session {
            registry: &registry,
            config: &config,
            store: None,
            quiet: true,
        };
        let err = session
            .download("https://example.com/story/1", &DownloadRequest::default())
            .unwrap_err();
        assert!(matches!(err, InkwellError::UnsupportedSite { .. }));
        assert_eq!(CliRunError::from(err).exit_code(), 1);
    }
}
