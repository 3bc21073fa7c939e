//! Start-tag scanning over serialized HTML.
//!
//! The serializer escapes `&` and `"` inside attribute values but leaves `<`
//! and `>` alone, so tags are matched quote-aware and attribute values are
//! re-escaped on output.

use regex::Regex;

const START_TAG: &str = r#"(?s)<([A-Za-z][A-Za-z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#;
const ATTRIBUTE: &str =
    r#"([^\s"'<>/=]+)(?:\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'=<>`]+)))?"#;

/// One attribute as serialized; `value` keeps its entity escapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

impl Attr {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTag {
    /// Byte range of the whole tag in the scanned text.
    pub start: usize,
    pub end: usize,
    /// Lower-cased element name.
    pub name: String,
    pub attrs: Vec<Attr>,
    pub self_closed: bool,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.as_str())
    }
}

#[derive(Debug)]
pub struct Markup {
    tag: Regex,
    attr: Regex,
}

impl Markup {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            tag: Regex::new(START_TAG)?,
            attr: Regex::new(ATTRIBUTE)?,
        })
    }

    /// Every start tag in document order. End tags, comments and doctypes are skipped.
    pub fn start_tags(&self, html: &str) -> Vec<StartTag> {
        self.tag
            .captures_iter(html)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let name = caps.get(1)?.as_str().to_ascii_lowercase();
                let body = caps.get(2).map_or("", |m| m.as_str()).trim_end();
                let (body, self_closed) = match body.strip_suffix('/') {
                    Some(rest) => (rest, true),
                    None => (body, false),
                };
                Some(StartTag {
                    start: whole.start(),
                    end: whole.end(),
                    name,
                    attrs: self.attributes(body),
                    self_closed,
                })
            })
            .collect()
    }

    fn attributes(&self, body: &str) -> Vec<Attr> {
        self.attr
            .captures_iter(body)
            .filter_map(|c| {
                let name = c.get(1)?.as_str();
                let value = c
                    .get(2)
                    .or_else(|| c.get(3))
                    .or_else(|| c.get(4))
                    .map_or("", |m| m.as_str());
                Some(Attr::new(name, value))
            })
            .collect()
    }
}

/// Append `<name a="v"...>` (or `/>`), escaping `<`, `>` and `"` in values.
pub fn write_start_tag(out: &mut String, name: &str, attrs: &[Attr], self_close: bool) {
    out.push('<');
    out.push_str(name);
    for attr in attrs {
        out.push(' ');
        out.push_str(&attr.name);
        out.push_str("=\"");
        out.push_str(
            &attr
                .value
                .replace('"', "&quot;")
                .replace('<', "&lt;")
                .replace('>', "&gt;"),
        );
        out.push('"');
    }
    out.push_str(if self_close { "/>" } else { ">" });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_brackets_inside_quoted_values_stay_in_the_tag() -> Result<(), regex::Error> {
        let html = r#"<p>x</p><img alt="before > after" src="/img/map.png"><br/>"#;
        let tags = Markup::new()?.start_tags(html);
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["p", "img", "br"]);

        let img = &tags[1];
        assert_eq!(&html[img.start..img.end], r#"<img alt="before > after" src="/img/map.png">"#);
        assert_eq!(img.attr("ALT"), Some("before > after"));
        assert_eq!(img.attr("src"), Some("/img/map.png"));
        assert!(!img.self_closed);
        assert!(tags[2].self_closed);
        Ok(())
    }

    #[test]
    fn single_quoted_unquoted_and_bare_attributes() -> Result<(), regex::Error> {
        let tags = Markup::new()?.start_tags(r#"<input type=checkbox checked title='say "hi"'>"#);
        assert_eq!(
            tags[0].attrs,
            vec![
                Attr::new("type", "checkbox"),
                Attr::new("checked", ""),
                Attr::new("title", "say \"hi\""),
            ]
        );
        Ok(())
    }

    #[test]
    fn written_values_are_escaped() {
        let mut out = String::new();
        write_start_tag(
            &mut out,
            "img",
            &[Attr::new("alt", "a < b > \"c\""), Attr::new("src", "x.png")],
            true,
        );
        assert_eq!(out, r#"<img alt="a &lt; b &gt; &quot;c&quot;" src="x.png"/>"#);
    }
}
