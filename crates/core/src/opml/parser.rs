//! OPML parsing.
//!
//! A small pull scanner over the document text that understands the subset of
//! XML OPML files use in practice: declarations, comments, CDATA, doctype,
//! elements, and quoted attributes. Only `<outline>` elements inside `<body>`
//! become items; everything else is skipped.

use tracing::{debug, warn};

use crate::errors::OpmlError;
use crate::models::{Feed, Folder, Item};

/// A parsed OPML document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OpmlDocument {
    /// Contents of `<head><title>`, if present and non-empty.
    pub title: Option<String>,
    /// Top-level outlines of `<body>`, in document order.
    pub items: Vec<Item>,
}

/// Parse raw bytes into an [`OpmlDocument`].
pub fn parse(bytes: &[u8]) -> Result<OpmlDocument, OpmlError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    debug!("parsing OPML document ({} bytes)", text.len());

    let mut scanner = Scanner { src: text, pos: 0 };
    let mut builder = TreeBuilder::default();
    while let Some(token) = scanner.next_token()? {
        builder.accept(token)?;
    }
    let document = builder.finish()?;
    debug!(items = document.items.len(), "parsed OPML document");
    Ok(document)
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

enum Token<'a> {
    Open {
        name: &'a str,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    Close {
        name: &'a str,
        offset: usize,
    },
    Text(String),
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn next_token(&mut self) -> Result<Option<Token<'a>>, OpmlError> {
        loop {
            let src: &'a str = self.src;
            let rest = &src[self.pos..];
            if rest.is_empty() {
                return Ok(None);
            }

            if !rest.starts_with('<') {
                let end = rest.find('<').unwrap_or(rest.len());
                self.pos += end;
                return Ok(Some(Token::Text(unescape(&rest[..end]))));
            }

            let offset = self.pos;
            if rest.starts_with("<?") {
                self.skip_past(offset, "?>")?;
                continue;
            }
            if rest.starts_with("<!--") {
                self.skip_past(offset, "-->")?;
                continue;
            }
            if let Some(after) = rest.strip_prefix("<![CDATA[") {
                let end = after
                    .find("]]>")
                    .ok_or(OpmlError::UnterminatedTag { offset })?;
                self.pos += "<![CDATA[".len() + end + "]]>".len();
                return Ok(Some(Token::Text(after[..end].to_string())));
            }
            if rest.starts_with("<!") {
                self.skip_past(offset, ">")?;
                continue;
            }

            let end = find_tag_end(rest).ok_or(OpmlError::UnterminatedTag { offset })?;
            let inner = &rest[1..end];
            self.pos += end + 1;

            if let Some(name) = inner.strip_prefix('/') {
                return Ok(Some(Token::Close {
                    name: name.trim(),
                    offset,
                }));
            }

            let (inner, self_closing) = match inner.strip_suffix('/') {
                Some(stripped) => (stripped, true),
                None => (inner, false),
            };
            let name_end = inner
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(inner.len());
            let name = &inner[..name_end];
            if name.is_empty() {
                return Err(OpmlError::MalformedAttribute {
                    tag: String::new(),
                    offset,
                });
            }
            let attrs = parse_attributes(name, &inner[name_end..], offset)?;
            return Ok(Some(Token::Open {
                name,
                attrs,
                self_closing,
            }));
        }
    }

    fn skip_past(&mut self, offset: usize, terminator: &str) -> Result<(), OpmlError> {
        let rest = &self.src[self.pos..];
        let end = rest
            .find(terminator)
            .ok_or(OpmlError::UnterminatedTag { offset })?;
        self.pos += end + terminator.len();
        Ok(())
    }
}

/// Index of the `>` closing the tag that starts at `rest[0]`, ignoring any
/// `>` inside quoted attribute values.
fn find_tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (idx, ch) in rest.char_indices().skip(1) {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '>') => return Some(idx),
            (None, '<') => return None,
            _ => {}
        }
    }
    None
}

fn parse_attributes(
    tag: &str,
    source: &str,
    offset: usize,
) -> Result<Vec<(String, String)>, OpmlError> {
    let malformed = || OpmlError::MalformedAttribute {
        tag: tag.to_string(),
        offset,
    };

    let mut attrs = Vec::new();
    let mut rest = source.trim_start();
    while !rest.is_empty() {
        let name_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_end];
        if name.is_empty() {
            return Err(malformed());
        }
        rest = rest[name_end..].trim_start();

        let Some(after_eq) = rest.strip_prefix('=') else {
            // Valueless attribute (HTML habit); keep it with an empty value.
            attrs.push((name.to_string(), String::new()));
            continue;
        };
        let after_eq = after_eq.trim_start();
        let quote = after_eq
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(malformed)?;
        let value_src = &after_eq[1..];
        let close = value_src.find(quote).ok_or_else(malformed)?;
        attrs.push((name.to_string(), unescape(&value_src[..close])));
        rest = value_src[close + 1..].trim_start();
    }
    Ok(attrs)
}

// ---------------------------------------------------------------------------
// Tree building
// ---------------------------------------------------------------------------

struct OpenElement {
    name: String,
    outline: Option<OutlineFrame>,
}

struct OutlineFrame {
    attrs: Vec<(String, String)>,
    children: Vec<Item>,
}

#[derive(Default)]
struct TreeBuilder {
    stack: Vec<OpenElement>,
    seen_root: bool,
    root_closed: bool,
    body: Option<Vec<Item>>,
    title: Option<String>,
    title_buf: Option<String>,
}

impl TreeBuilder {
    fn accept(&mut self, token: Token<'_>) -> Result<(), OpmlError> {
        match token {
            Token::Open {
                name,
                attrs,
                self_closing,
            } => self.open(name, attrs, self_closing),
            Token::Close { name, offset } => self.close(name, offset),
            Token::Text(text) => {
                if let Some(buf) = self.title_buf.as_mut() {
                    buf.push_str(&text);
                }
                Ok(())
            }
        }
    }

    fn open(
        &mut self,
        name: &str,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    ) -> Result<(), OpmlError> {
        if self.stack.is_empty() {
            if self.root_closed {
                warn!(element = name, "ignoring element after </opml>");
                return Ok(());
            }
            if name != "opml" {
                return Err(OpmlError::MissingRoot);
            }
            self.seen_root = true;
        }

        let parent = self.stack.last().map(|e| e.name.as_str());
        match name {
            "body" if parent == Some("opml") => {
                if self.body.is_none() {
                    self.body = Some(Vec::new());
                }
            }
            "title" if parent == Some("head") && !self_closing => {
                self.title_buf = Some(String::new());
            }
            "outline" if self.in_body() => {
                if self_closing {
                    self.push_item(build_item(&attrs, Vec::new()));
                } else {
                    self.stack.push(OpenElement {
                        name: name.to_string(),
                        outline: Some(OutlineFrame {
                            attrs,
                            children: Vec::new(),
                        }),
                    });
                }
                return Ok(());
            }
            _ => {}
        }

        if !self_closing {
            self.stack.push(OpenElement {
                name: name.to_string(),
                outline: None,
            });
        }
        Ok(())
    }

    fn close(&mut self, name: &str, offset: usize) -> Result<(), OpmlError> {
        let open = self.stack.pop().ok_or_else(|| OpmlError::MismatchedTag {
            expected: String::new(),
            found: name.to_string(),
            offset,
        })?;
        if open.name != name {
            return Err(OpmlError::MismatchedTag {
                expected: open.name,
                found: name.to_string(),
                offset,
            });
        }

        if let Some(frame) = open.outline {
            let item = build_item(&frame.attrs, frame.children);
            self.push_item(item);
        } else if name == "title" {
            if let Some(buf) = self.title_buf.take() {
                let trimmed = buf.trim();
                if !trimmed.is_empty() {
                    self.title = Some(trimmed.to_string());
                }
            }
        }

        if self.stack.is_empty() {
            self.root_closed = true;
        }
        Ok(())
    }

    fn in_body(&self) -> bool {
        self.body.is_some() && self.stack.iter().any(|e| e.name == "body")
    }

    fn push_item(&mut self, item: Item) {
        if let Some(frame) = self.stack.iter_mut().rev().find_map(|e| e.outline.as_mut()) {
            frame.children.push(item);
        } else if let Some(body) = self.body.as_mut() {
            body.push(item);
        }
    }

    fn finish(self) -> Result<OpmlDocument, OpmlError> {
        if let Some(open) = self.stack.last() {
            return Err(OpmlError::UnexpectedEof(open.name.clone()));
        }
        if !self.seen_root {
            return Err(OpmlError::MissingRoot);
        }
        let items = self.body.ok_or(OpmlError::MissingBody)?;
        Ok(OpmlDocument {
            title: self.title,
            items,
        })
    }
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty())
}

/// An outline with an `xmlUrl` is a feed; anything else is a folder.
fn build_item(attrs: &[(String, String)], children: Vec<Item>) -> Item {
    if let Some(xml_url) = attr(attrs, "xmlUrl") {
        if !children.is_empty() {
            debug!(xml_url, "ignoring children of feed outline");
        }
        let title = attr(attrs, "title")
            .or_else(|| attr(attrs, "text").filter(|text| *text != xml_url))
            .map(str::to_string);
        return Item::Feed(Feed {
            title,
            xml_url: xml_url.to_string(),
            html_url: attr(attrs, "htmlUrl").map(str::to_string),
        });
    }

    let title = attr(attrs, "text")
        .or_else(|| attr(attrs, "title"))
        .unwrap_or_default()
        .to_string();
    Item::Folder(Folder { title, children })
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Decode XML entity references in a single pass.
fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let decoded = after
            .find(';')
            .and_then(|semi| decode_entity(&after[..semi]).map(|ch| (ch, semi)));
        match decoded {
            Some((ch, semi)) => {
                out.push(ch);
                rest = &after[semi + 1..];
            }
            None => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!-- OPML generated by a feed reader -->
<!DOCTYPE opml>
<opml version="1.1">
<head>
<title>My Feeds</title>
</head>
<body>
<outline text="Daring Fireball" title="Daring Fireball" type="rss" htmlUrl="https://daringfireball.net/" xmlUrl="https://daringfireball.net/feeds/main"/>
<outline text="Tech" title="Tech">
	<outline text="Ars" xmlUrl="https://arstechnica.com/feed/" />
	<outline text="Deep">
		<outline text="https://deep.example/rss" xmlUrl="https://deep.example/rss"/>
	</outline>
</outline>
</body>
</opml>
"#;

    #[test]
    fn test_parse_sample_document() {
        let doc = parse(SAMPLE.as_bytes()).expect("sample should parse");
        assert_eq!(doc.title.as_deref(), Some("My Feeds"));
        assert_eq!(doc.items.len(), 2);

        let feed = doc.items[0].as_feed().expect("first item is a feed");
        assert_eq!(feed.title.as_deref(), Some("Daring Fireball"));
        assert_eq!(feed.xml_url, "https://daringfireball.net/feeds/main");
        assert_eq!(feed.html_url.as_deref(), Some("https://daringfireball.net/"));

        let folder = doc.items[1].as_folder().expect("second item is a folder");
        assert_eq!(folder.title, "Tech");
        assert_eq!(folder.children.len(), 2);
        let deep = folder.children[1].as_folder().unwrap();
        assert_eq!(deep.title, "Deep");
        let untitled = deep.children[0].as_feed().unwrap();
        assert_eq!(untitled.title, None);
    }

    #[test]
    fn test_parse_decodes_entities() {
        let xml = r#"<opml version="1.1"><head><title>A &amp; B &#38; &#x43;</title></head>
<body><outline text="Q&amp;A &lt;live&gt;" xmlUrl="https://q.example/rss?a=1&amp;b=2"/></body></opml>"#;
        let doc = parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.title.as_deref(), Some("A & B & C"));
        let feed = doc.items[0].as_feed().unwrap();
        assert_eq!(feed.title.as_deref(), Some("Q&A <live>"));
        assert_eq!(feed.xml_url, "https://q.example/rss?a=1&b=2");
    }

    #[test]
    fn test_unescape_is_single_pass() {
        assert_eq!(unescape("&amp;lt;"), "&lt;");
        assert_eq!(unescape("fish & chips"), "fish & chips");
        assert_eq!(unescape("&bogus;"), "&bogus;");
    }

    #[test]
    fn test_parse_accepts_bom_cdata_and_single_quotes() {
        let xml = "\u{feff}<opml version='1.0'><head><title><![CDATA[R&D]]></title></head>\
                   <body><outline text='x' xmlUrl='https://x.example/feed'/></body></opml>";
        let doc = parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.title.as_deref(), Some("R&D"));
        assert_eq!(doc.items.len(), 1);
    }

    #[test]
    fn test_quoted_gt_does_not_end_tag() {
        let xml = r#"<opml><body><outline text="a > b" xmlUrl="https://a.example/"/></body></opml>"#;
        let doc = parse(xml.as_bytes()).unwrap();
        assert_eq!(doc.items[0].title(), "a > b");
    }

    #[test]
    fn test_empty_body() {
        let doc = parse(b"<opml version=\"1.1\"><head/><body/></opml>").unwrap();
        assert!(doc.items.is_empty());
        assert_eq!(doc.title, None);
    }

    #[test]
    fn test_rejects_non_opml() {
        assert!(matches!(
            parse(b"this is not an opml file"),
            Err(OpmlError::MissingRoot)
        ));
        assert!(matches!(
            parse(b"<html><body></body></html>"),
            Err(OpmlError::MissingRoot)
        ));
        assert!(matches!(parse(b""), Err(OpmlError::MissingRoot)));
    }

    #[test]
    fn test_rejects_missing_body() {
        assert!(matches!(
            parse(b"<opml><head><title>x</title></head></opml>"),
            Err(OpmlError::MissingBody)
        ));
    }

    #[test]
    fn test_rejects_truncated_document() {
        let truncated = &SAMPLE[..SAMPLE.len() / 2];
        let err = parse(truncated.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            OpmlError::UnexpectedEof(_) | OpmlError::UnterminatedTag { .. }
        ));
    }

    #[test]
    fn test_rejects_mismatched_tags() {
        let err = parse(b"<opml><body><outline text=\"a\"></body></opml>").unwrap_err();
        assert!(matches!(
            err,
            OpmlError::MismatchedTag { ref expected, ref found, .. }
                if expected == "outline" && found == "body"
        ));
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        assert!(matches!(
            parse(&[0x3c, 0xff, 0xfe]),
            Err(OpmlError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_rejects_unterminated_attribute() {
        let err = parse(b"<opml><body><outline text=\"oops /></body></opml>").unwrap_err();
        assert!(matches!(err, OpmlError::UnterminatedTag { .. }));
    }
}
