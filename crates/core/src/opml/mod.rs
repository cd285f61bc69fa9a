//! OPML document codec.
//!
//! Parsing is a pure function from bytes to an ordered forest of [`Item`]s;
//! serialization turns a title and a forest (or a pre-rendered body) back
//! into an OPML 1.1 document.

pub mod parser;
pub mod writer;

pub use parser::{parse, OpmlDocument};
pub use writer::{document, escape, outlines};

use crate::models::Item;

/// Serialize a complete document from a title and a forest of items.
pub fn serialize(title: &str, items: &[Item]) -> String {
    document(title, &outlines(items, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Feed, Folder};

    fn sample_forest() -> Vec<Item> {
        vec![
            Feed::new("https://a.example/rss")
                .with_title("Alpha & Omega")
                .with_html_url("https://a.example/")
                .into(),
            Feed::new("https://b.example/atom.xml").into(),
            Folder::new("Tech \"News\"")
                .with_children(vec![
                    Feed::new("https://c.example/feed").with_title("C").into(),
                    Folder::new("Empty").into(),
                ])
                .into(),
        ]
    }

    #[test]
    fn test_serialize_then_parse_is_identity() {
        let forest = sample_forest();
        let xml = serialize("Subscriptions <local>", &forest);
        let doc = parse(xml.as_bytes()).expect("generated document should parse");
        assert_eq!(doc.title.as_deref(), Some("Subscriptions <local>"));
        assert_eq!(doc.items, forest);
    }

    #[test]
    fn test_reserialize_is_byte_stable() {
        let first = serialize("Subs", &sample_forest());
        let reparsed = parse(first.as_bytes()).unwrap();
        let second = serialize("Subs", &reparsed.items);
        assert_eq!(first, second);
    }
}
