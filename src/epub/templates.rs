//! XHTML documents written into the EPUB, plus the chapter-body normalisation.

use std::collections::HashMap;

use crate::markup::{write_start_tag, Attr, Markup};
use crate::model::StoryMetadata;

use super::EpubError;

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn unescape_attr(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&nbsp;", "\u{a0}")
        .replace("&#160;", "\u{a0}")
        .replace("&amp;", "&")
}

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

/// Serialized HTML fragments use HTML void tags, bare `<` in attribute values
/// and `&nbsp;`; XHTML needs self-closed tags, escaped values and numeric entities.
pub fn to_xhtml(html: &str) -> Result<String, EpubError> {
    let markup = Markup::new()?;
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for tag in markup.start_tags(html) {
        out.push_str(&html[last..tag.start]);
        last = tag.end;
        let self_close = tag.self_closed || VOID_ELEMENTS.contains(&tag.name.as_str());
        write_start_tag(&mut out, &tag.name, &tag.attrs, self_close);
    }
    out.push_str(&html[last..]);
    Ok(out.replace("&nbsp;", "&#160;"))
}

/// Point every `<img>` whose source was packaged at its archive path.
///
/// `embedded` maps absolute image URL to the path relative to the chapter
/// document. Images that were not packaged are removed: the archive must
/// not reference remote resources.
pub fn embed_images(html: &str, embedded: &HashMap<String, String>) -> Result<String, EpubError> {
    let markup = Markup::new()?;
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for tag in markup.start_tags(html).into_iter().filter(|t| t.name == "img") {
        out.push_str(&html[last..tag.start]);
        last = tag.end;

        let Some(local) = tag.attr("src").and_then(|src| embedded.get(&unescape_attr(src))) else {
            continue;
        };
        let attrs: Vec<Attr> = tag
            .attrs
            .iter()
            .map(|a| {
                if a.name.eq_ignore_ascii_case("src") {
                    Attr::new(a.name.as_str(), xml_escape(local))
                } else {
                    a.clone()
                }
            })
            .collect();
        write_start_tag(&mut out, "img", &attrs, tag.self_closed);
    }
    out.push_str(&html[last..]);
    Ok(out)
}

fn document(title: &str, language: &str, css_href: &str, body: &str) -> String {
    let lang = xml_escape(language);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="{css}"/>
</head>
<body>
{body}
</body>
</html>
"#,
        lang = lang,
        title = xml_escape(title),
        css = xml_escape(css_href),
        body = body
    )
}

pub fn title_page(meta: &StoryMetadata, css_href: &str) -> String {
    let mut body = String::from("<div class=\"story-info\">\n");
    body.push_str(&format!("  <h1>{}</h1>\n", xml_escape(&meta.title)));
    body.push_str(&format!(
        "  <p class=\"author\">by {}</p>\n",
        xml_escape(&meta.author)
    ));
    let summary = meta.summary.trim();
    if !summary.is_empty() {
        body.push_str("  <div class=\"summary\">\n");
        for para in summary.split('\n').map(str::trim).filter(|p| !p.is_empty()) {
            body.push_str(&format!("    <p>{}</p>\n", xml_escape(para)));
        }
        body.push_str("  </div>\n");
    }
    body.push_str(&format!(
        "  <p class=\"status\">Status: {}</p>\n",
        meta.status.as_str()
    ));
    if !meta.tags.is_empty() {
        body.push_str(&format!(
            "  <p class=\"tags\">Tags: {}</p>\n",
            xml_escape(&meta.tags.join(", "))
        ));
    }
    body.push_str(&format!(
        "  <p class=\"source\">{}: <a href=\"{}\">{}</a></p>\n",
        xml_escape(&meta.site_name),
        xml_escape(&meta.url),
        xml_escape(&meta.url)
    ));
    body.push_str("</div>");
    document(&meta.title, &meta.language, css_href, &body)
}

/// `content` must already be XHTML (see [to_xhtml]).
pub fn chapter(title: &str, content: &str, language: &str, css_href: &str) -> String {
    let body = format!(
        "<div class=\"chapter-title\"><h1>{}</h1></div>\n<div class=\"chapter-content\">\n{}\n</div>",
        xml_escape(title),
        content
    );
    document(title, language, css_href, &body)
}

pub fn cover_page(image_href: &str, title: &str, css_href: &str) -> String {
    let body = format!(
        "<div style=\"text-align: center;\">\n  <img src=\"{}\" alt=\"{}\" style=\"max-width: 100%; height: auto;\"/>\n</div>",
        xml_escape(image_href),
        xml_escape(title)
    );
    document("Cover", "en", css_href, &body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryStatus;

    #[test]
    fn void_elements_are_self_closed() -> Result<(), EpubError> {
        let out = to_xhtml(r#"<p>a<br>b<br/>c&nbsp;d</p><hr class="scene"><img src="x.png" alt="">"#)?;
        assert_eq!(
            out,
            r#"<p>a<br/>b<br/>c&#160;d</p><hr class="scene"/><img src="x.png" alt=""/>"#
        );
        Ok(())
    }

    #[test]
    fn br_prefix_does_not_match_other_tags() -> Result<(), EpubError> {
        let out = to_xhtml("<b>bold</b><brand>x</brand>")?;
        assert_eq!(out, "<b>bold</b><brand>x</brand>");
        Ok(())
    }

    #[test]
    fn angle_brackets_in_attributes_stay_well_formed() -> Result<(), EpubError> {
        let html = r#"<div id="c"><p title="x < y">Hi</p><img alt="before > after" src="images/0000_map.png"></div>"#;
        let mut embedded = HashMap::new();
        embedded.insert("images/0000_map.png".to_string(), "images/0000_map.png".to_string());
        let out = to_xhtml(&embed_images(html, &embedded)?)?;
        assert_eq!(
            out,
            r#"<div id="c"><p title="x &lt; y">Hi</p><img alt="before &gt; after" src="images/0000_map.png"/></div>"#
        );
        Ok(())
    }

    #[test]
    fn packaged_images_are_rewritten_and_others_dropped() -> Result<(), EpubError> {
        let html = r#"<p><img alt="map" src="https://cdn.test/a.png?x=1&amp;y=2"> and <img src="https://cdn.test/gone.jpg"></p>"#;
        let mut embedded = HashMap::new();
        embedded.insert(
            "https://cdn.test/a.png?x=1&y=2".to_string(),
            "images/0003_a.png".to_string(),
        );
        let out = embed_images(html, &embedded)?;
        assert_eq!(out, r#"<p><img alt="map" src="images/0003_a.png"> and </p>"#);
        Ok(())
    }

    #[test]
    fn title_page_lists_story_details() {
        let mut meta = StoryMetadata::new(
            "Tom & Jerry",
            "Hanna <Barbera>",
            "https://example.test/s/1",
            "Example",
            "1",
        );
        meta.summary = "First line.\n\nSecond line.".to_string();
        meta.status = StoryStatus::Complete;
        meta.tags = vec!["Comedy".to_string(), "Slapstick".to_string()];
        let page = title_page(&meta, "style/default.css");
        assert!(page.contains("<h1>Tom &amp; Jerry</h1>"));
        assert!(page.contains("by Hanna &lt;Barbera&gt;"));
        assert!(page.contains("<p>Second line.</p>"));
        assert!(page.contains("Status: complete"));
        assert!(page.contains("Tags: Comedy, Slapstick"));
        assert!(page.contains(r#"href="style/default.css""#));
    }

    #[test]
    fn chapter_wraps_content() {
        let doc = chapter("1. \"Start\"", "<p>Hi</p>", "de", "style/modern.css");
        assert!(doc.contains(r#"xml:lang="de""#));
        assert!(doc.contains("<title>1. &quot;Start&quot;</title>"));
        assert!(doc.contains("<div class=\"chapter-content\">\n<p>Hi</p>\n</div>"));
    }
}
