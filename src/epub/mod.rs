//! EPUB 3 packaging. Consumes a downloaded [Story] and writes mimetype, container,
//! OPF, nav/NCX, stylesheet, optional cover, title page, chapters and images.

pub mod cover;
pub mod styles;
pub mod templates;

use std::collections::HashMap;
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::Config;
use crate::model::Story;

pub use styles::ChapterStyle;
use templates::xml_escape;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";
const XHTML: &str = "application/xhtml+xml";

/// Errors from the EPUB writer.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: story title is empty.")]
    EmptyTitle,

    #[error("Cannot write EPUB: story author is empty.")]
    EmptyAuthor,

    #[error("Cannot write EPUB: story has no chapters.")]
    NoChapters,

    #[error("Cannot write EPUB: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Failed to encode cover image: {0}")]
    Cover(#[from] image::ImageError),

    #[error("Cover size {width}x{height} is too small")]
    CoverSize { width: u32, height: u32 },

    #[error("Invalid markup pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Turns a downloaded story into a file on disk.
pub trait Packager {
    /// Write `story` to `output`, or to the packager's default location, and
    /// return the path written.
    fn package(&self, story: &Story, output: Option<&Path>) -> Result<PathBuf, EpubError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackageOptions {
    pub include_images: bool,
    pub include_cover: bool,
    pub style: ChapterStyle,
    pub output_dir: PathBuf,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_cover: true,
            style: ChapterStyle::Default,
            output_dir: PathBuf::from("."),
        }
    }
}

impl PackageOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            include_images: config.epub.include_images,
            include_cover: config.epub.include_cover,
            style: ChapterStyle::from_name(&config.epub.chapter_style),
            output_dir: config.download.output_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpubPackager {
    options: PackageOptions,
}

struct ManifestItem {
    id: String,
    href: String,
    media_type: String,
    properties: Option<&'static str>,
}

impl ManifestItem {
    fn new(id: impl Into<String>, href: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
            properties: None,
        }
    }

    fn with_properties(mut self, properties: &'static str) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A document in reading order, listed in the spine and the tables of contents.
struct ReadingItem {
    id: String,
    href: String,
    title: String,
    xhtml: String,
}

struct Layout<'s> {
    manifest: Vec<ManifestItem>,
    spine: Vec<ReadingItem>,
    cover: Option<Vec<u8>>,
    images: Vec<(String, &'s [u8])>,
}

impl EpubPackager {
    pub fn new(options: PackageOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    /// `output` when given, else `output_dir/{title} - {author}.epub`.
    pub fn output_path(&self, story: &Story, output: Option<&Path>) -> PathBuf {
        match output {
            Some(path) => path.to_path_buf(),
            None => self.options.output_dir.join(story.default_filename()),
        }
    }

    fn layout<'s>(&self, story: &'s Story) -> Result<Layout<'s>, EpubError> {
        let meta = &story.metadata;
        let style = self.options.style;
        let css_href = style.href();
        let language = if meta.language.trim().is_empty() {
            "en"
        } else {
            meta.language.as_str()
        };

        let mut manifest = vec![
            ManifestItem::new("nav", "nav.xhtml", XHTML).with_properties("nav"),
            ManifestItem::new("ncx", "toc.ncx", "application/x-dtbncx+xml"),
            ManifestItem::new("css", css_href.clone(), "text/css"),
        ];
        let mut spine = Vec::new();

        let cover = if self.options.include_cover {
            match cover::generate_cover(
                &meta.title,
                &meta.author,
                cover::DEFAULT_WIDTH,
                cover::DEFAULT_HEIGHT,
            ) {
                Ok(png) => Some(png),
                Err(e) => {
                    warn!(error = %e, "Could not generate cover, packaging without one");
                    None
                }
            }
        } else {
            None
        };
        if cover.is_some() {
            manifest.push(
                ManifestItem::new("cover-img", "images/cover.png", "image/png")
                    .with_properties("cover-image"),
            );
            spine.push(ReadingItem {
                id: "cover".to_string(),
                href: "cover.xhtml".to_string(),
                title: "Cover".to_string(),
                xhtml: templates::cover_page("images/cover.png", &meta.title, &css_href),
            });
        }

        spine.push(ReadingItem {
            id: "titlepage".to_string(),
            href: "titlepage.xhtml".to_string(),
            title: "Title Page".to_string(),
            xhtml: templates::title_page(meta, &css_href),
        });

        let mut images = Vec::new();
        for chapter in &story.chapters {
            let mut embedded = HashMap::new();
            if self.options.include_images {
                for (n, image) in chapter.images.iter().enumerate() {
                    let Some(data) = image.data.as_deref() else {
                        continue;
                    };
                    let href = format!("images/{:04}_{}", chapter.index, image.filename);
                    manifest.push(ManifestItem::new(
                        format!("img-{}-{}", chapter.index, n + 1),
                        href.clone(),
                        image.media_type.clone(),
                    ));
                    embedded.insert(image.url.clone(), href.clone());
                    images.push((href, data));
                }
            }
            let body = templates::embed_images(&chapter.html_content, &embedded)?;
            let body = templates::to_xhtml(&body)?;
            spine.push(ReadingItem {
                id: format!("chapter-{}", chapter.index),
                href: format!("chapter_{:04}.xhtml", chapter.index),
                title: chapter.title.clone(),
                xhtml: templates::chapter(&chapter.title, &body, language, &css_href),
            });
        }

        for item in &spine {
            manifest.push(ManifestItem::new(item.id.clone(), item.href.clone(), XHTML));
        }
        Ok(Layout {
            manifest,
            spine,
            cover,
            images,
        })
    }

    fn write(&self, story: &Story, path: &Path) -> Result<(), EpubError> {
        let layout = self.layout(story)?;

        let file = fs::File::create(path).map_err(|e| EpubError::CreateFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut zip = ZipWriter::new(file);

        let options_stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let options_deflate = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        // Mimetype first, uncompressed.
        zip.start_file("mimetype", options_stored)?;
        zip.write_all(MIMETYPE)?;

        zip.start_file("META-INF/container.xml", options_deflate)?;
        zip.write_all(CONTAINER_XML)?;

        write_opf(story, &layout, &mut zip, options_deflate)?;
        write_nav_xhtml(story, &layout.spine, &mut zip, options_deflate)?;
        write_ncx(story, &layout.spine, &mut zip, options_deflate)?;

        let style = self.options.style;
        write_entry(&mut zip, &style.href(), style.css().as_bytes(), options_deflate)?;

        if let Some(png) = &layout.cover {
            write_entry(&mut zip, "images/cover.png", png, options_stored)?;
        }
        for item in &layout.spine {
            write_entry(&mut zip, &item.href, item.xhtml.as_bytes(), options_deflate)?;
        }
        for (href, data) in &layout.images {
            write_entry(&mut zip, href, data, options_stored)?;
        }

        zip.finish()?;
        debug!(
            path = %path.display(),
            documents = layout.spine.len(),
            images = layout.images.len(),
            "EPUB archive written"
        );
        Ok(())
    }
}

impl Packager for EpubPackager {
    fn package(&self, story: &Story, output: Option<&Path>) -> Result<PathBuf, EpubError> {
        validate_story(story)?;
        let path = self.output_path(story, output);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| EpubError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        self.write(story, &path)?;
        info!(path = %path.display(), chapters = story.chapters.len(), "EPUB saved");
        Ok(path)
    }
}

fn validate_story(story: &Story) -> Result<(), EpubError> {
    if story.metadata.title.trim().is_empty() {
        return Err(EpubError::EmptyTitle);
    }
    if story.metadata.author.trim().is_empty() {
        return Err(EpubError::EmptyAuthor);
    }
    if story.chapters.is_empty() {
        return Err(EpubError::NoChapters);
    }
    Ok(())
}

fn identifier(story: &Story) -> String {
    format!(
        "inkwell-{}-{}",
        story.metadata.site_name, story.metadata.story_id
    )
}

fn write_entry(
    zip: &mut ZipWriter<impl Write + Seek>,
    href: &str,
    data: &[u8],
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    zip.start_file(format!("{}{}", OEBPS_PREFIX, href), options)?;
    zip.write_all(data)?;
    Ok(())
}

fn write_opf(
    story: &Story,
    layout: &Layout<'_>,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let meta = &story.metadata;
    let language = if meta.language.trim().is_empty() {
        "en"
    } else {
        meta.language.as_str()
    };

    let mut metadata = format!(
        r#"    <dc:identifier id="book-id">{}</dc:identifier>
    <dc:title>{}</dc:title>
    <dc:creator>{}</dc:creator>
    <dc:language>{}</dc:language>
    <dc:source>{}</dc:source>
    <dc:publisher>{}</dc:publisher>
"#,
        xml_escape(&identifier(story)),
        xml_escape(&meta.title),
        xml_escape(&meta.author),
        xml_escape(language),
        xml_escape(&meta.url),
        xml_escape(&meta.site_name),
    );
    if !meta.summary.trim().is_empty() {
        metadata.push_str(&format!(
            "    <dc:description>{}</dc:description>\n",
            xml_escape(meta.summary.trim())
        ));
    }
    for tag in &meta.tags {
        metadata.push_str(&format!("    <dc:subject>{}</dc:subject>\n", xml_escape(tag)));
    }
    if let Some(published) = meta.date_published {
        metadata.push_str(&format!(
            "    <dc:date>{}</dc:date>\n",
            published.format("%Y-%m-%d")
        ));
    }
    metadata.push_str(&format!(
        "    <meta property=\"dcterms:modified\">{}</meta>\n",
        Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    ));
    if layout.cover.is_some() {
        metadata.push_str("    <meta name=\"cover\" content=\"cover-img\"/>\n");
    }

    let mut manifest = String::new();
    for item in &layout.manifest {
        let properties = item
            .properties
            .map(|p| format!(r#" properties="{}""#, p))
            .unwrap_or_default();
        manifest.push_str(&format!(
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            xml_escape(&item.id),
            xml_escape(&item.href),
            xml_escape(&item.media_type),
            properties
        ));
    }

    // Nav is not in the spine.
    let mut spine = String::new();
    for item in &layout.spine {
        spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", item.id));
    }

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
{metadata}  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        metadata = metadata,
        manifest = manifest,
        spine = spine
    );
    write_entry(zip, "content.opf", opf.as_bytes(), options)
}

/// Title page and chapters; the cover page is navigable but not listed.
fn toc_entries(spine: &[ReadingItem]) -> impl Iterator<Item = &ReadingItem> {
    spine.iter().filter(|item| item.id != "cover")
}

fn write_nav_xhtml(
    story: &Story,
    spine: &[ReadingItem],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_links = String::new();
    for item in toc_entries(spine) {
        nav_links.push_str(&format!(
            "      <li><a href=\"{}\">{}</a></li>\n",
            xml_escape(&item.href),
            xml_escape(&item.title)
        ));
    }
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>
</head>
<body>
  <nav epub:type="toc" id="toc">
    <h1>Contents</h1>
    <ol>
{}    </ol>
  </nav>
</body>
</html>
"#,
        xml_escape(&story.metadata.title),
        nav_links
    );
    write_entry(zip, "nav.xhtml", nav.as_bytes(), options)
}

fn write_ncx(
    story: &Story,
    spine: &[ReadingItem],
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    for (i, item) in toc_entries(spine).enumerate() {
        nav_points.push_str(&format!(
            r#"    <navPoint id="navpoint-{}" playOrder="{}">
      <navLabel><text>{}</text></navLabel>
      <content src="{}"/>
    </navPoint>
"#,
            i + 1,
            i + 1,
            xml_escape(&item.title),
            xml_escape(&item.href)
        ));
    }
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&identifier(story)),
        xml_escape(&story.metadata.title),
        nav_points
    );
    write_entry(zip, "toc.ncx", ncx.as_bytes(), options)
}
