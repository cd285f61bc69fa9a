//! The in-memory subscription list and the traits the sync engine uses to
//! talk to it.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::batch::BatchUpdate;
use crate::errors::ModelError;
use crate::models::{Feed, Folder, Item};
use crate::opml::writer;

/// Receives "the model's structure changed and needs persisting" signals.
pub trait DirtyObserver: Send + Sync {
    fn mark_dirty(&self);
}

/// What the sync engine needs from a subscription model.
pub trait SubscriptionModel: Send {
    /// Merge `items` into the model, at top level or inside `parent_folder`.
    fn load_items(&mut self, items: Vec<Item>, parent_folder: Option<&str>);

    /// Remove every feed that sits directly at top level.
    fn clear_top_level_feeds(&mut self);

    /// The model's items as `<outline>` lines at `indent_level`.
    fn serialized_form(&self, indent_level: usize) -> String;

    /// Name written into the document's `<title>`.
    fn display_name(&self) -> String;

    /// Whether the owning account has been removed.
    fn is_deleted(&self) -> bool;
}

/// Ordered forest of feeds and folders for one account.
pub struct SubscriptionList {
    display_name: String,
    items: Vec<Item>,
    deleted: bool,
    batch: Arc<BatchUpdate>,
    observer: Option<Arc<dyn DirtyObserver>>,
}

impl fmt::Debug for SubscriptionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionList")
            .field("display_name", &self.display_name)
            .field("items", &self.items)
            .field("deleted", &self.deleted)
            .finish_non_exhaustive()
    }
}

impl SubscriptionList {
    pub fn new(display_name: impl Into<String>, batch: Arc<BatchUpdate>) -> Self {
        Self {
            display_name: display_name.into(),
            items: Vec::new(),
            deleted: false,
            batch,
            observer: None,
        }
    }

    /// Install the observer notified on every structural change.
    pub fn set_dirty_observer(&mut self, observer: Arc<dyn DirtyObserver>) {
        self.observer = Some(observer);
    }

    pub fn batch(&self) -> &Arc<BatchUpdate> {
        &self.batch
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn top_level_feeds(&self) -> impl Iterator<Item = &Feed> {
        self.items.iter().filter_map(Item::as_feed)
    }

    pub fn folders(&self) -> impl Iterator<Item = &Folder> {
        self.items.iter().filter_map(Item::as_folder)
    }

    pub fn folder(&self, title: &str) -> Option<&Folder> {
        self.folders().find(|f| f.title == title)
    }

    /// Total feeds across all folders.
    pub fn feed_count(&self) -> usize {
        self.items.iter().map(Item::feed_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add a feed at top level or to an existing top-level folder.
    pub fn add_feed(&mut self, feed: Feed, folder: Option<&str>) -> Result<(), ModelError> {
        if self.deleted {
            return Err(ModelError::Deleted);
        }
        let container = match folder {
            Some(title) => {
                &mut self
                    .top_level_folder_mut(title)
                    .ok_or_else(|| ModelError::FolderNotFound(title.to_string()))?
                    .children
            }
            None => &mut self.items,
        };
        if contains_feed(container, &feed.xml_url) {
            return Err(ModelError::DuplicateFeed(feed.xml_url));
        }
        debug!(xml_url = %feed.xml_url, folder = ?folder, "adding feed");
        container.push(Item::Feed(feed));
        self.structure_changed();
        Ok(())
    }

    /// Remove a feed by URL. Returns whether anything was removed.
    pub fn remove_feed(&mut self, xml_url: &str, folder: Option<&str>) -> Result<bool, ModelError> {
        if self.deleted {
            return Err(ModelError::Deleted);
        }
        let container = match folder {
            Some(title) => {
                &mut self
                    .top_level_folder_mut(title)
                    .ok_or_else(|| ModelError::FolderNotFound(title.to_string()))?
                    .children
            }
            None => &mut self.items,
        };
        let before = container.len();
        container.retain(|item| item.as_feed().map_or(true, |f| f.xml_url != xml_url));
        let removed = container.len() != before;
        if removed {
            self.structure_changed();
        }
        Ok(removed)
    }

    /// Create an empty top-level folder. Returns `false` if it already exists.
    pub fn add_folder(&mut self, title: &str) -> Result<bool, ModelError> {
        if self.deleted {
            return Err(ModelError::Deleted);
        }
        if self.folder(title).is_some() {
            return Ok(false);
        }
        self.items.push(Folder::new(title).into());
        self.structure_changed();
        Ok(true)
    }

    /// Remove a top-level folder and everything in it.
    pub fn remove_folder(&mut self, title: &str) -> Result<bool, ModelError> {
        if self.deleted {
            return Err(ModelError::Deleted);
        }
        let before = self.items.len();
        self.items
            .retain(|item| item.as_folder().map_or(true, |f| f.title != title));
        let removed = self.items.len() != before;
        if removed {
            self.structure_changed();
        }
        Ok(removed)
    }

    pub fn set_display_name(&mut self, display_name: impl Into<String>) {
        self.display_name = display_name.into();
        self.structure_changed();
    }

    /// Flag the list as belonging to a removed account. Later saves are skipped.
    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    fn top_level_folder_mut(&mut self, title: &str) -> Option<&mut Folder> {
        self.items.iter_mut().find_map(|item| match item {
            Item::Folder(folder) if folder.title == title => Some(folder),
            _ => None,
        })
    }

    fn structure_changed(&self) {
        self.batch.post_change();
        if let Some(observer) = &self.observer {
            observer.mark_dirty();
        }
    }
}

impl SubscriptionModel for SubscriptionList {
    fn load_items(&mut self, items: Vec<Item>, parent_folder: Option<&str>) {
        if self.deleted {
            warn!(display_name = %self.display_name, "ignoring load into deleted subscription list");
            return;
        }
        let added = match parent_folder {
            Some(title) => merge_into_folder(&mut self.items, title, items),
            None => merge_into(&mut self.items, items),
        };
        debug!(added, parent_folder = ?parent_folder, "loaded items");
        if added > 0 {
            self.structure_changed();
        }
    }

    fn clear_top_level_feeds(&mut self) {
        let before = self.items.len();
        self.items.retain(|item| item.as_feed().is_none());
        let removed = before - self.items.len();
        if removed > 0 {
            debug!(removed, "cleared top-level feeds");
            self.structure_changed();
        }
    }

    fn serialized_form(&self, indent_level: usize) -> String {
        writer::outlines(&self.items, indent_level)
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

fn contains_feed(container: &[Item], xml_url: &str) -> bool {
    container
        .iter()
        .any(|item| item.as_feed().is_some_and(|f| f.xml_url == xml_url))
}

/// Merge `incoming` into `container`: folders merge by title, feeds already
/// present by URL are skipped. Returns the number of items added.
fn merge_into(container: &mut Vec<Item>, incoming: Vec<Item>) -> usize {
    let mut added = 0;
    for item in incoming {
        match item {
            Item::Feed(feed) => {
                if contains_feed(container, &feed.xml_url) {
                    debug!(xml_url = %feed.xml_url, "skipping duplicate feed");
                    continue;
                }
                container.push(Item::Feed(feed));
                added += 1;
            }
            Item::Folder(folder) => {
                added += merge_into_folder(container, &folder.title, folder.children);
            }
        }
    }
    added
}

fn merge_into_folder(container: &mut Vec<Item>, title: &str, incoming: Vec<Item>) -> usize {
    for item in container.iter_mut() {
        if let Item::Folder(folder) = item {
            if folder.title == title {
                return merge_into(&mut folder.children, incoming);
            }
        }
    }
    let mut folder = Folder::new(title);
    let added = merge_into(&mut folder.children, incoming);
    container.push(folder.into());
    added + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingObserver(AtomicUsize);

    impl DirtyObserver for CountingObserver {
        fn mark_dirty(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn list_with_observer() -> (SubscriptionList, Arc<CountingObserver>) {
        let mut list = SubscriptionList::new("Local", Arc::new(BatchUpdate::new()));
        let observer = Arc::new(CountingObserver::default());
        list.set_dirty_observer(observer.clone());
        (list, observer)
    }

    fn feed(url: &str) -> Item {
        Feed::new(url).into()
    }

    #[test]
    fn test_edits_mark_dirty() {
        let (mut list, observer) = list_with_observer();
        list.add_feed(Feed::new("https://a.example/rss"), None).unwrap();
        list.add_folder("Tech").unwrap();
        list.add_feed(Feed::new("https://b.example/rss"), Some("Tech")).unwrap();
        assert!(list.remove_feed("https://a.example/rss", None).unwrap());
        assert_eq!(observer.0.load(Ordering::SeqCst), 4);
        assert_eq!(list.feed_count(), 1);
    }

    #[test]
    fn test_add_feed_rejects_duplicates_and_missing_folder() {
        let (mut list, _) = list_with_observer();
        list.add_feed(Feed::new("https://a.example/rss"), None).unwrap();
        assert!(matches!(
            list.add_feed(Feed::new("https://a.example/rss"), None),
            Err(ModelError::DuplicateFeed(_))
        ));
        assert!(matches!(
            list.add_feed(Feed::new("https://b.example/rss"), Some("Nope")),
            Err(ModelError::FolderNotFound(_))
        ));
    }

    #[test]
    fn test_load_items_merges_folders_and_skips_duplicates() {
        let (mut list, _) = list_with_observer();
        list.load_items(
            vec![
                feed("https://a.example/rss"),
                Folder::new("Tech")
                    .with_children(vec![feed("https://b.example/rss")])
                    .into(),
            ],
            None,
        );
        list.load_items(
            vec![
                feed("https://a.example/rss"),
                Folder::new("Tech")
                    .with_children(vec![
                        feed("https://b.example/rss"),
                        feed("https://c.example/rss"),
                    ])
                    .into(),
            ],
            None,
        );
        assert_eq!(list.top_level_feeds().count(), 1);
        assert_eq!(list.folders().count(), 1);
        assert_eq!(list.folder("Tech").unwrap().children.len(), 2);
    }

    #[test]
    fn test_load_items_into_named_folder_creates_it() {
        let (mut list, _) = list_with_observer();
        list.load_items(vec![feed("https://a.example/rss")], Some("Imported"));
        let folder = list.folder("Imported").expect("folder created");
        assert_eq!(folder.children.len(), 1);
        assert_eq!(list.top_level_feeds().count(), 0);
    }

    #[test]
    fn test_clear_top_level_feeds_keeps_folders() {
        let (mut list, _) = list_with_observer();
        list.load_items(
            vec![
                feed("https://a.example/rss"),
                feed("https://b.example/rss"),
                Folder::new("Keep")
                    .with_children(vec![feed("https://c.example/rss")])
                    .into(),
            ],
            None,
        );
        list.clear_top_level_feeds();
        assert_eq!(list.top_level_feeds().count(), 0);
        assert!(list.folder("Keep").is_some());
    }

    #[test]
    fn test_noop_load_does_not_mark_dirty() {
        let (mut list, observer) = list_with_observer();
        list.load_items(vec![feed("https://a.example/rss")], None);
        let after_first = observer.0.load(Ordering::SeqCst);
        list.load_items(vec![feed("https://a.example/rss")], None);
        assert_eq!(observer.0.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn test_deleted_list_rejects_edits() {
        let (mut list, _) = list_with_observer();
        list.mark_deleted();
        assert!(list.is_deleted());
        assert!(matches!(
            list.add_feed(Feed::new("https://a.example/rss"), None),
            Err(ModelError::Deleted)
        ));
        list.load_items(vec![feed("https://a.example/rss")], None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_serialized_form_matches_writer() {
        let (mut list, _) = list_with_observer();
        list.load_items(vec![feed("https://a.example/rss")], None);
        assert_eq!(list.serialized_form(0), writer::outlines(list.items(), 0));
        assert!(list.serialized_form(2).starts_with("\t\t<outline"));
    }
}
