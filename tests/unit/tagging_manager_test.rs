//! Unit tests for the TaggingManager.

use std::sync::{Arc, Mutex};

use placestore::app::Places;
use placestore::managers::bookmark_manager::BookmarkManagerTrait;
use placestore::managers::tagging_manager::{normalize_tags, TaggingManagerTrait};
use placestore::services::observers::CallbackObserver;
use placestore::types::bookmark::{
    BookmarkInfo, BookmarkType, FetchOptions, FetchQuery, RemoveOptions, TagCount, TAGS_GUID, UNFILED_GUID,
};
use placestore::types::errors::{BookmarkError, NotificationError};
use placestore::types::notification::Notification;
use placestore::types::source::ChangeSource;

fn setup() -> Places {
    Places::open_in_memory().expect("Failed to open in-memory store")
}

fn record(places: &Places) -> Arc<Mutex<Vec<Notification>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    places.register_observer(Arc::new(CallbackObserver::new(
        "recorder",
        move |batch: &[Notification]| -> Result<(), NotificationError> {
            sink.lock().unwrap().extend_from_slice(batch);
            Ok(())
        },
    )));
    log
}

fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

fn tag_folders(places: &Places) -> Vec<String> {
    places
        .bookmarks()
        .fetch(&FetchQuery::Parent(TAGS_GUID.to_string()), &FetchOptions::default())
        .unwrap()
        .into_iter()
        .map(|f| f.title)
        .collect()
}

#[test]
fn test_tag_and_untag_bookmark() {
    let places = setup();
    let bm = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://example.com", "Example"))
        .unwrap();

    places
        .tags()
        .tag("https://example.com", &tags(&["news", "work"]), ChangeSource::Default)
        .unwrap();
    assert_eq!(places.tags().tags_for_url("https://example.com").unwrap(), vec!["news", "work"]);
    assert_eq!(tag_folders(&places), vec!["news", "work"]);

    let fetched = places
        .bookmarks()
        .fetch(&FetchQuery::Url("https://example.com".to_string()), &FetchOptions::default())
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].guid, bm.guid);
    assert_eq!(fetched[0].tags.as_deref(), Some(&tags(&["news", "work"])[..]));

    places
        .tags()
        .untag("https://example.com", Some(&tags(&["news"])), ChangeSource::Default)
        .unwrap();
    assert_eq!(places.tags().tags_for_url("https://example.com").unwrap(), vec!["work"]);
    assert_eq!(tag_folders(&places), vec!["work"]);
}

#[test]
fn test_tags_for_url_is_sorted_case_insensitively() {
    let places = setup();
    places
        .tags()
        .tag("https://example.com", &tags(&["zeta", "Alpha", "beta"]), ChangeSource::Default)
        .unwrap();
    assert_eq!(
        places.tags().tags_for_url("https://example.com").unwrap(),
        vec!["Alpha", "beta", "zeta"]
    );
}

#[test]
fn test_tag_folders_match_case_insensitively() {
    let places = setup();
    places.tags().tag("https://a.example", &tags(&["Rust"]), ChangeSource::Default).unwrap();
    places.tags().tag("https://b.example", &tags(&["rust"]), ChangeSource::Default).unwrap();

    assert_eq!(tag_folders(&places), vec!["Rust"]);
    assert_eq!(
        places.tags().all_tags().unwrap(),
        vec![TagCount {
            name: "Rust".to_string(),
            count: 2
        }]
    );
}

#[test]
fn test_duplicate_tags_in_one_call_are_collapsed() {
    assert_eq!(normalize_tags("op", &tags(&[" a ", "A", "b"])).unwrap(), vec!["a", "b"]);

    let places = setup();
    places
        .tags()
        .tag("https://example.com", &tags(&["a", "A"]), ChangeSource::Default)
        .unwrap();
    places.tags().tag("https://example.com", &tags(&["a"]), ChangeSource::Default).unwrap();
    assert_eq!(places.tags().all_tags().unwrap()[0].count, 1);
}

#[test]
fn test_fetch_tags_counts_urls() {
    let places = setup();
    places.tags().tag("https://a.example", &tags(&["x", "y"]), ChangeSource::Default).unwrap();
    places.tags().tag("https://b.example", &tags(&["x"]), ChangeSource::Default).unwrap();

    let counts = places.bookmarks().fetch_tags().unwrap();
    assert_eq!(
        counts,
        vec![
            TagCount {
                name: "x".to_string(),
                count: 2
            },
            TagCount {
                name: "y".to_string(),
                count: 1
            },
        ]
    );
}

#[test]
fn test_untag_all_removes_every_tag() {
    let places = setup();
    places.tags().tag("https://a.example", &tags(&["x", "y"]), ChangeSource::Default).unwrap();
    places.tags().tag("https://b.example", &tags(&["x"]), ChangeSource::Default).unwrap();

    places.tags().untag("https://a.example", None, ChangeSource::Default).unwrap();
    assert!(places.tags().tags_for_url("https://a.example").unwrap().is_empty());
    assert_eq!(tag_folders(&places), vec!["x"]);
}

#[test]
fn test_untag_unknown_url_is_silent() {
    let places = setup();
    let log = record(&places);
    places.tags().untag("https://nowhere.example", None, ChangeSource::Default).unwrap();
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_tagging_notifies_real_bookmarks() {
    let places = setup();
    let bm = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://example.com", "Example"))
        .unwrap();
    let log = record(&places);

    places.tags().tag("https://example.com", &tags(&["news"]), ChangeSource::Default).unwrap();

    let notes = log.lock().unwrap();
    // folder, entry, then the tags change on the real bookmark
    assert_eq!(notes.len(), 3);
    assert!(matches!(&notes[0], Notification::Added { item, title, .. }
        if item.item_type == BookmarkType::Folder && item.parent_guid == TAGS_GUID && title == "news"));
    assert!(matches!(&notes[1], Notification::Added { item, .. } if item.is_tagging));
    assert!(matches!(&notes[2], Notification::TagsChanged { item, tags, .. }
        if item.guid == bm.guid && tags == &vec!["news".to_string()]));
}

#[test]
fn test_invalid_input_is_rejected() {
    let places = setup();
    let t = places.tags();
    assert!(matches!(
        t.tag("not a url", &tags(&["x"]), ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        t.tag("https://a.example", &[], ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        t.tag("https://a.example", &tags(&["  "]), ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        t.tag("https://a.example", &["x".repeat(101)], ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    t.tag("https://a.example", &["x".repeat(100)], ChangeSource::Default).unwrap();
}

#[test]
fn test_renaming_tag_folder_notifies_tagged_bookmarks() {
    let places = setup();
    let bm = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://example.com", "Example"))
        .unwrap();
    places.tags().tag("https://example.com", &tags(&["old"]), ChangeSource::Default).unwrap();
    let folder = places
        .bookmarks()
        .fetch(&FetchQuery::Parent(TAGS_GUID.to_string()), &FetchOptions::default())
        .unwrap()
        .remove(0);
    let log = record(&places);

    places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(folder.guid.clone()),
            title: Some("new".to_string()),
            ..BookmarkInfo::default()
        })
        .unwrap();

    let notes = log.lock().unwrap();
    assert!(matches!(&notes[0], Notification::TitleChanged { title, .. } if title == "new"));
    assert!(notes.iter().any(|n| matches!(n, Notification::TagsChanged { item, tags, .. }
        if item.guid == bm.guid && tags == &vec!["new".to_string()])));
    assert_eq!(places.tags().tags_for_url("https://example.com").unwrap(), vec!["new"]);
}

#[test]
fn test_fetch_by_tags_requires_every_tag() {
    let places = setup();
    let both = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://both.example", "both"))
        .unwrap();
    places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://one.example", "one"))
        .unwrap();
    places.tags().tag("https://both.example", &tags(&["a", "b"]), ChangeSource::Default).unwrap();
    places.tags().tag("https://one.example", &tags(&["a"]), ChangeSource::Default).unwrap();

    let found = places
        .bookmarks()
        .fetch(&FetchQuery::Tags(tags(&["A", "b"])), &FetchOptions::default())
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].guid, both.guid);

    let any_a = places
        .bookmarks()
        .fetch(&FetchQuery::Tags(tags(&["a"])), &FetchOptions::default())
        .unwrap();
    assert_eq!(any_a.len(), 2);
}

#[test]
fn test_removing_last_bookmark_drops_its_tags() {
    let places = setup();
    let bm = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://example.com", "Example"))
        .unwrap();
    places.tags().tag("https://example.com", &tags(&["gone"]), ChangeSource::Default).unwrap();

    places.bookmarks().remove(&[bm.guid], &RemoveOptions::default()).unwrap();
    assert!(places.tags().tags_for_url("https://example.com").unwrap().is_empty());
    assert!(tag_folders(&places).is_empty());
}
