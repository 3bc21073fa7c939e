//! Stylesheets for the selectable chapter styles.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChapterStyle {
    #[default]
    Default,
    Classic,
    Modern,
}

impl ChapterStyle {
    pub const ALL: [ChapterStyle; 3] = [ChapterStyle::Default, ChapterStyle::Classic, ChapterStyle::Modern];

    /// Unknown names fall back to [ChapterStyle::Default] with a warning.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" | "" => ChapterStyle::Default,
            "classic" => ChapterStyle::Classic,
            "modern" => ChapterStyle::Modern,
            other => {
                warn!(style = other, "Unknown chapter style, using default");
                ChapterStyle::Default
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChapterStyle::Default => "default",
            ChapterStyle::Classic => "classic",
            ChapterStyle::Modern => "modern",
        }
    }

    /// Path of the stylesheet inside `OEBPS/`.
    pub fn href(self) -> String {
        format!("style/{}.css", self.name())
    }

    pub fn css(self) -> String {
        let body = match self {
            ChapterStyle::Default => DEFAULT_BODY,
            ChapterStyle::Classic => CLASSIC_BODY,
            ChapterStyle::Modern => MODERN_BODY,
        };
        format!("{}{}", body, SHARED)
    }
}

const DEFAULT_BODY: &str = r#"body {
    font-family: Georgia, "Times New Roman", serif;
    line-height: 1.6;
    margin: 1em;
    color: #222;
}

p {
    margin: 0.5em 0;
    text-indent: 1.5em;
}

p:first-of-type {
    text-indent: 0;
}

h1 {
    font-size: 1.8em;
    margin-bottom: 0.5em;
    text-align: center;
}
"#;

const CLASSIC_BODY: &str = r#"body {
    font-family: "Palatino Linotype", Palatino, "Book Antiqua", serif;
    line-height: 1.5;
    margin: 1.5em;
    text-align: justify;
    hyphens: auto;
}

p {
    margin: 0;
    text-indent: 2em;
}

p:first-of-type {
    text-indent: 0;
}

p:first-of-type::first-letter {
    font-size: 2.4em;
    float: left;
    line-height: 1;
    margin-right: 0.1em;
}

h1 {
    font-size: 1.6em;
    font-variant: small-caps;
    letter-spacing: 0.08em;
    text-align: center;
    margin: 1.5em 0 1em;
}
"#;

const MODERN_BODY: &str = r#"body {
    font-family: "Helvetica Neue", Helvetica, Arial, sans-serif;
    line-height: 1.7;
    margin: 1em 1.2em;
    color: #1d1d1f;
}

p {
    margin: 0 0 1em;
    text-indent: 0;
}

h1 {
    font-size: 1.6em;
    font-weight: 600;
    text-align: left;
    border-bottom: 2px solid #e94560;
    padding-bottom: 0.3em;
    margin-bottom: 1em;
}
"#;

const SHARED: &str = r#"
h2 {
    font-size: 1.4em;
    margin-top: 1.5em;
    margin-bottom: 0.5em;
}

h3 {
    font-size: 1.2em;
    margin-top: 1em;
}

blockquote {
    margin: 1em 2em;
    padding-left: 1em;
    border-left: 3px solid #ccc;
    font-style: italic;
}

hr {
    border: none;
    border-top: 1px solid #ccc;
    margin: 2em auto;
    width: 40%;
}

img {
    max-width: 100%;
    height: auto;
    display: block;
    margin: 1em auto;
}

.chapter-title {
    text-align: center;
    margin-bottom: 2em;
}

.story-info {
    text-align: center;
    margin: 2em 0;
}

.story-info .author {
    font-size: 1.2em;
    font-style: italic;
}

.story-info .summary {
    margin-top: 1em;
    text-align: left;
    font-style: italic;
}

.story-info .tags {
    margin-top: 1em;
    font-size: 0.9em;
    color: #666;
}
"#;
