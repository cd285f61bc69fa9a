//! Item types shared by the OPML codec and the subscription model.
//!
//! A subscription list is an ordered forest: feeds are leaves, folders hold
//! further items.

use serde::{Deserialize, Serialize};

/// One node of a subscription forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Feed(Feed),
    Folder(Folder),
}

impl Item {
    /// The text shown for this item.
    pub fn title(&self) -> &str {
        match self {
            Self::Feed(feed) => feed.display_title(),
            Self::Folder(folder) => &folder.title,
        }
    }

    pub fn as_feed(&self) -> Option<&Feed> {
        match self {
            Self::Feed(feed) => Some(feed),
            Self::Folder(_) => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Self::Folder(folder) => Some(folder),
            Self::Feed(_) => None,
        }
    }

    /// Number of feeds in this subtree.
    pub fn feed_count(&self) -> usize {
        match self {
            Self::Feed(_) => 1,
            Self::Folder(folder) => folder.children.iter().map(Item::feed_count).sum(),
        }
    }
}

/// A single subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    /// User-visible name, if one was given.
    pub title: Option<String>,
    /// URL of the feed document. Identifies the feed within its container.
    pub xml_url: String,
    /// URL of the site the feed belongs to.
    pub html_url: Option<String>,
}

impl Feed {
    pub fn new(xml_url: impl Into<String>) -> Self {
        Self {
            title: None,
            xml_url: xml_url.into(),
            html_url: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_html_url(mut self, html_url: impl Into<String>) -> Self {
        self.html_url = Some(html_url.into());
        self
    }

    /// Title if present, otherwise the feed URL.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.xml_url)
    }
}

/// A named folder of items.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Folder {
    pub title: String,
    pub children: Vec<Item>,
}

impl Folder {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Item>) -> Self {
        self.children = children;
        self
    }

    /// Whether a feed with `xml_url` is a direct child of this folder.
    pub fn contains_feed(&self, xml_url: &str) -> bool {
        self.children
            .iter()
            .any(|item| item.as_feed().is_some_and(|f| f.xml_url == xml_url))
    }
}

impl From<Feed> for Item {
    fn from(feed: Feed) -> Self {
        Self::Feed(feed)
    }
}

impl From<Folder> for Item {
    fn from(folder: Folder) -> Self {
        Self::Folder(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_falls_back_to_url() {
        let feed = Feed::new("https://example.com/feed.xml");
        assert_eq!(feed.display_title(), "https://example.com/feed.xml");

        let feed = feed.with_title("Example");
        assert_eq!(feed.display_title(), "Example");
    }

    #[test]
    fn test_feed_count_recurses() {
        let tree: Item = Folder::new("News")
            .with_children(vec![
                Feed::new("https://a.example/rss").into(),
                Folder::new("Local")
                    .with_children(vec![Feed::new("https://b.example/rss").into()])
                    .into(),
            ])
            .into();
        assert_eq!(tree.feed_count(), 2);
        assert_eq!(tree.title(), "News");
    }
}
