//! OPML serialization.

use crate::models::{Feed, Folder, Item};

/// Comment line written into every generated document.
pub const GENERATOR_COMMENT: &str = "<!-- OPML generated by opmlsync -->";

/// Wrap an already-serialized body in a complete OPML 1.1 document.
///
/// `body` is expected to be a sequence of `<outline>` lines at indent level 0,
/// each terminated by a newline.
pub fn document(title: &str, body: &str) -> String {
    let mut out = String::with_capacity(body.len() + 160);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(GENERATOR_COMMENT);
    out.push('\n');
    out.push_str("<opml version=\"1.1\">\n");
    out.push_str("<head>\n");
    out.push_str("<title>");
    out.push_str(&escape(title));
    out.push_str("</title>\n");
    out.push_str("</head>\n");
    out.push_str("<body>\n");
    out.push_str(body);
    out.push_str("</body>\n");
    out.push_str("</opml>\n");
    out
}

/// Serialize a forest of items, one tab of indentation per level.
pub fn outlines(items: &[Item], indent_level: usize) -> String {
    let mut out = String::new();
    for item in items {
        write_item(&mut out, item, indent_level);
    }
    out
}

fn write_item(out: &mut String, item: &Item, indent_level: usize) {
    match item {
        Item::Feed(feed) => write_feed(out, feed, indent_level),
        Item::Folder(folder) => write_folder(out, folder, indent_level),
    }
}

fn write_feed(out: &mut String, feed: &Feed, indent_level: usize) {
    push_indent(out, indent_level);
    out.push_str("<outline text=\"");
    out.push_str(&escape(feed.display_title()));
    out.push('"');
    if let Some(title) = &feed.title {
        out.push_str(" title=\"");
        out.push_str(&escape(title));
        out.push('"');
    }
    out.push_str(" description=\"\" type=\"rss\" version=\"RSS\" htmlUrl=\"");
    out.push_str(&escape(feed.html_url.as_deref().unwrap_or_default()));
    out.push_str("\" xmlUrl=\"");
    out.push_str(&escape(&feed.xml_url));
    out.push_str("\"/>\n");
}

fn write_folder(out: &mut String, folder: &Folder, indent_level: usize) {
    let title = escape(&folder.title);
    push_indent(out, indent_level);
    out.push_str("<outline text=\"");
    out.push_str(&title);
    out.push_str("\" title=\"");
    out.push_str(&title);
    out.push_str("\">\n");
    for child in &folder.children {
        write_item(out, child, indent_level + 1);
    }
    push_indent(out, indent_level);
    out.push_str("</outline>\n");
}

fn push_indent(out: &mut String, indent_level: usize) {
    for _ in 0..indent_level {
        out.push('\t');
    }
}

/// Escape the five XML special characters.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_special_characters() {
        assert_eq!(
            escape(r#"Tom & Jerry's <"Best">"#),
            "Tom &amp; Jerry&apos;s &lt;&quot;Best&quot;&gt;"
        );
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_document_layout() {
        let doc = document("Mine & Yours", "");
        assert!(doc.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n"));
        assert!(doc.contains("<opml version=\"1.1\">"));
        assert!(doc.contains("<title>Mine &amp; Yours</title>"));
        assert!(doc.ends_with("<body>\n</body>\n</opml>\n"));
    }

    #[test]
    fn test_folder_children_are_indented() {
        let items = vec![Item::Folder(Folder::new("Tech").with_children(vec![
            Feed::new("https://a.example/rss").with_title("A").into(),
        ]))];
        let body = outlines(&items, 0);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("<outline text=\"Tech\""));
        assert!(lines[1].starts_with("\t<outline text=\"A\" title=\"A\""));
        assert!(lines[1].ends_with("xmlUrl=\"https://a.example/rss\"/>"));
        assert_eq!(lines[2], "</outline>");
    }

    #[test]
    fn test_untitled_feed_uses_url_as_text() {
        let body = outlines(&[Feed::new("https://a.example/rss?x=1&y=2").into()], 1);
        assert!(body.starts_with("\t<outline text=\"https://a.example/rss?x=1&amp;y=2\" description"));
        assert!(!body.contains(" title="));
    }
}
