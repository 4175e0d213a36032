//! Unit tests for the BookmarkManager public API.
//!
//! These tests exercise insert, update, move, remove, reorder, erase and the
//! read queries through `BookmarkManagerTrait`, using an in-memory store.

use std::sync::{Arc, Mutex};

use placestore::app::Places;
use placestore::managers::bookmark_manager::BookmarkManagerTrait;
use placestore::managers::keyword_manager::KeywordManagerTrait;
use placestore::managers::tagging_manager::TaggingManagerTrait;
use placestore::services::observers::CallbackObserver;
use placestore::services::sync_tracker::SyncTrackerTrait;
use placestore::types::bookmark::{
    now_ms, BookmarkInfo, BookmarkItem, BookmarkType, FetchOptions, FetchQuery, RemoveOptions, ReorderOptions,
    SearchQuery, MENU_GUID, ROOT_GUID, TAGS_GUID, TOOLBAR_GUID, UNFILED_GUID,
};
use placestore::types::errors::{BookmarkError, NotificationError};
use placestore::types::keyword::{KeywordInsert, KeywordQuery};
use placestore::types::notification::Notification;
use placestore::types::source::ChangeSource;

/// Helper: a fresh in-memory store.
fn setup() -> Places {
    Places::open_in_memory().expect("Failed to open in-memory store")
}

/// Helper: collects every delivered notification.
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

fn children(places: &Places, parent: &str) -> Vec<BookmarkItem> {
    places
        .bookmarks()
        .fetch(&FetchQuery::Parent(parent.to_string()), &FetchOptions::default())
        .unwrap()
}

fn titles(items: &[BookmarkItem]) -> Vec<String> {
    items.iter().map(|i| i.title.clone()).collect()
}

fn insert_bookmark(places: &Places, parent: &str, url: &str, title: &str) -> BookmarkItem {
    places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(parent, url, title))
        .unwrap()
}

fn insert_folder(places: &Places, parent: &str, title: &str) -> BookmarkItem {
    places.bookmarks().insert(&BookmarkInfo::folder(parent, title)).unwrap()
}

// ─── Insert ───

#[test]
fn test_insert_folder_then_bookmark_inside_it() {
    let places = setup();
    let work = places
        .bookmarks()
        .insert(&BookmarkInfo::folder(TOOLBAR_GUID, "Work").at_index(0))
        .unwrap();
    places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(&work.guid, "https://example.com", "Example").at_index(0))
        .unwrap();

    let kids = children(&places, &work.guid);
    assert_eq!(kids.len(), 1);
    assert_eq!(kids[0].url.as_deref(), Some("https://example.com/"));
    assert_eq!(kids[0].index, 0);
    assert_eq!(kids[0].title, "Example");
}

#[test]
fn test_insert_defaults_and_sync_metadata() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://rust-lang.org", "Rust");
    assert_eq!(item.item_type, BookmarkType::Bookmark);
    assert_eq!(item.parent_guid, UNFILED_GUID);
    assert_eq!(item.guid.len(), 12);
    assert_eq!(item.date_added, item.last_modified);
    assert_eq!(item.sync_change_counter, 1);
}

#[test]
fn test_insert_index_is_clamped_to_append() {
    let places = setup();
    insert_bookmark(&places, UNFILED_GUID, "https://a.example", "A");
    insert_bookmark(&places, UNFILED_GUID, "https://b.example", "B");
    let late = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://c.example", "C").at_index(99))
        .unwrap();
    assert_eq!(late.index, 2);
}

#[test]
fn test_insert_in_the_middle_shifts_siblings() {
    let places = setup();
    insert_bookmark(&places, UNFILED_GUID, "https://a.example", "A");
    insert_bookmark(&places, UNFILED_GUID, "https://b.example", "B");
    places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(UNFILED_GUID, "https://c.example", "C").at_index(1))
        .unwrap();
    let kids = children(&places, UNFILED_GUID);
    assert_eq!(titles(&kids), vec!["A", "C", "B"]);
    assert_eq!(kids.iter().map(|k| k.index).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn test_insert_rejects_bad_input() {
    let places = setup();
    let bm = places.bookmarks();

    let into_root = bm.insert(&BookmarkInfo::folder(ROOT_GUID, "Nope"));
    assert!(matches!(into_root, Err(BookmarkError::Validation(_))));

    let no_url = bm.insert(&BookmarkInfo {
        parent_guid: Some(UNFILED_GUID.to_string()),
        ..BookmarkInfo::default()
    });
    assert!(matches!(no_url, Err(BookmarkError::Validation(_))));

    let bad_url = bm.insert(&BookmarkInfo::bookmark(UNFILED_GUID, "not a url", "x"));
    assert!(matches!(bad_url, Err(BookmarkError::Validation(_))));

    let separator_title = bm.insert(&BookmarkInfo {
        title: Some("x".to_string()),
        ..BookmarkInfo::separator(UNFILED_GUID)
    });
    assert!(matches!(separator_title, Err(BookmarkError::Validation(_))));
}

#[test]
fn test_insert_into_missing_parent_is_not_found() {
    let places = setup();
    let result = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark("abcdefghijkl", "https://example.com", "x"));
    assert!(matches!(result, Err(BookmarkError::NotFound(_))));
}

#[test]
fn test_insert_into_non_folder_is_rejected() {
    let places = setup();
    let bm = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "x");
    let result = places
        .bookmarks()
        .insert(&BookmarkInfo::bookmark(&bm.guid, "https://example.org", "y"));
    assert!(matches!(result, Err(BookmarkError::Validation(_))));
}

#[test]
fn test_insert_duplicate_guid_is_rejected() {
    let places = setup();
    places
        .bookmarks()
        .insert(&BookmarkInfo::folder(UNFILED_GUID, "One").with_guid("fixedguid___"))
        .unwrap();
    let again = places
        .bookmarks()
        .insert(&BookmarkInfo::folder(UNFILED_GUID, "Two").with_guid("fixedguid___"));
    assert!(matches!(again, Err(BookmarkError::Validation(_))));
}

#[test]
fn test_insert_refreshes_ancestors_and_notifies() {
    let places = setup();
    let log = record(&places);
    let folder = insert_folder(&places, TOOLBAR_GUID, "Work");
    let item = insert_bookmark(&places, &folder.guid, "https://example.com", "Example");

    for guid in [folder.guid.as_str(), TOOLBAR_GUID] {
        let ancestor = places.bookmarks().fetch_one(guid).unwrap().unwrap();
        assert!(ancestor.last_modified >= item.date_added);
    }

    let notes = log.lock().unwrap();
    assert_eq!(notes.len(), 2);
    match &notes[1] {
        Notification::Added { item: r, index, title, .. } => {
            assert_eq!(r.guid, item.guid);
            assert_eq!(r.parent_guid, folder.guid);
            assert_eq!(r.url.as_deref(), Some("https://example.com/"));
            assert!(!r.is_tagging);
            assert_eq!(*index, 0);
            assert_eq!(title, "Example");
        }
        other => panic!("unexpected notification {:?}", other),
    }
}

// ─── Update ───

#[test]
fn test_update_title_notifies() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "Old");
    let log = record(&places);

    let updated = places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(item.guid.clone()),
            title: Some("New".to_string()),
            ..BookmarkInfo::default()
        })
        .unwrap();
    assert_eq!(updated.title, "New");

    let notes = log.lock().unwrap();
    assert_eq!(notes.len(), 1);
    assert!(matches!(&notes[0], Notification::TitleChanged { title, .. } if title == "New"));
}

#[test]
fn test_update_with_same_values_is_silent() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "Same");
    let log = record(&places);

    let unchanged = places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(item.guid.clone()),
            title: Some("Same".to_string()),
            ..BookmarkInfo::default()
        })
        .unwrap();
    assert_eq!(unchanged.last_modified, item.last_modified);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_update_without_properties_is_rejected() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "x");
    let result = places.bookmarks().update(&BookmarkInfo {
        guid: Some(item.guid),
        ..BookmarkInfo::default()
    });
    match result {
        Err(BookmarkError::Validation(err)) => assert!(err.message.contains("Not enough properties")),
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[test]
fn test_update_cannot_change_type() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "x");
    let result = places.bookmarks().update(&BookmarkInfo {
        guid: Some(item.guid),
        item_type: Some(BookmarkType::Folder),
        title: Some("y".to_string()),
        ..BookmarkInfo::default()
    });
    assert!(matches!(result, Err(BookmarkError::Validation(_))));
}

#[test]
fn test_update_url_moves_keyword() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://old.example", "x");
    places
        .keywords()
        .insert(&KeywordInsert {
            keyword: "kw".to_string(),
            url: "https://old.example".to_string(),
            ..KeywordInsert::default()
        })
        .unwrap();
    let log = record(&places);

    places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(item.guid.clone()),
            url: Some("https://new.example".to_string()),
            ..BookmarkInfo::default()
        })
        .unwrap();

    let entries = places
        .keywords()
        .fetch(&KeywordQuery {
            keyword: Some("kw".to_string()),
            url: None,
        })
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].url, "https://new.example/");

    let notes = log.lock().unwrap();
    assert!(matches!(notes[0], Notification::UrlChanged { .. }));
    assert!(notes
        .iter()
        .any(|n| matches!(n, Notification::KeywordChanged { keyword, .. } if keyword == "kw")));
}

#[test]
fn test_update_url_drops_tags_of_orphaned_url() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://old.example", "x");
    places
        .tags()
        .tag("https://old.example", &["news".to_string()], ChangeSource::Default)
        .unwrap();

    places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(item.guid),
            url: Some("https://new.example".to_string()),
            ..BookmarkInfo::default()
        })
        .unwrap();
    assert!(places.tags().tags_for_url("https://old.example").unwrap().is_empty());
    assert!(places.bookmarks().fetch_tags().unwrap().is_empty());
}

#[test]
fn test_update_moves_to_other_folder() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "x");
    insert_bookmark(&places, UNFILED_GUID, "https://example.org", "y");
    let log = record(&places);

    let moved = places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(item.guid.clone()),
            parent_guid: Some(MENU_GUID.to_string()),
            index: Some(-1),
            ..BookmarkInfo::default()
        })
        .unwrap();
    assert_eq!(moved.parent_guid, MENU_GUID);
    assert_eq!(moved.index, 0);
    assert_eq!(children(&places, UNFILED_GUID)[0].index, 0);

    let notes = log.lock().unwrap();
    assert!(matches!(
        &notes[0],
        Notification::Moved { old_parent_guid, old_index: 0, index: 0, .. } if old_parent_guid == UNFILED_GUID
    ));
}

#[test]
fn test_update_rejects_cycles_and_roots() {
    let places = setup();
    let work = insert_folder(&places, UNFILED_GUID, "Work");
    let sub = insert_folder(&places, &work.guid, "Sub");

    let cycle = places.bookmarks().update(&BookmarkInfo {
        guid: Some(work.guid.clone()),
        parent_guid: Some(sub.guid.clone()),
        index: Some(0),
        ..BookmarkInfo::default()
    });
    assert!(matches!(cycle, Err(BookmarkError::Cycle(_))));

    let root = places.bookmarks().update(&BookmarkInfo {
        guid: Some(MENU_GUID.to_string()),
        parent_guid: Some(TOOLBAR_GUID.to_string()),
        index: Some(-1),
        ..BookmarkInfo::default()
    });
    assert!(matches!(root, Err(BookmarkError::ProtectedRoot(_))));
}

#[test]
fn test_update_index_within_same_folder() {
    let places = setup();
    let a = insert_bookmark(&places, UNFILED_GUID, "https://a.example", "A");
    insert_bookmark(&places, UNFILED_GUID, "https://b.example", "B");
    insert_bookmark(&places, UNFILED_GUID, "https://c.example", "C");

    places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(a.guid),
            index: Some(-1),
            ..BookmarkInfo::default()
        })
        .unwrap();
    assert_eq!(titles(&children(&places, UNFILED_GUID)), vec!["B", "C", "A"]);
}

// ─── Move ───

#[test]
fn test_move_folder_into_its_descendant_is_a_cycle() {
    let places = setup();
    let work = insert_folder(&places, TOOLBAR_GUID, "Work");
    let sub = insert_folder(&places, &work.guid, "Sub");
    let before = children(&places, TOOLBAR_GUID);

    let result = places
        .bookmarks()
        .move_to_folder(&[work.guid.clone()], Some(&sub.guid), -1, ChangeSource::Default);
    assert!(matches!(result, Err(BookmarkError::Cycle(_))));
    assert_eq!(children(&places, TOOLBAR_GUID), before);
    assert_eq!(children(&places, &work.guid).len(), 1);
}

#[test]
fn test_move_across_folders() {
    let places = setup();
    let a = insert_bookmark(&places, UNFILED_GUID, "https://a.example", "A");
    insert_bookmark(&places, UNFILED_GUID, "https://b.example", "B");
    let log = record(&places);

    let moved = places
        .bookmarks()
        .move_to_folder(&[a.guid.clone()], Some(TOOLBAR_GUID), -1, ChangeSource::Default)
        .unwrap();
    assert_eq!(moved[0].parent_guid, TOOLBAR_GUID);
    assert_eq!(moved[0].index, 0);
    assert_eq!(titles(&children(&places, UNFILED_GUID)), vec!["B"]);
    assert_eq!(children(&places, UNFILED_GUID)[0].index, 0);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn test_move_without_parent_reorders_in_place() {
    let places = setup();
    insert_bookmark(&places, UNFILED_GUID, "https://a.example", "A");
    insert_bookmark(&places, UNFILED_GUID, "https://b.example", "B");
    let c = insert_bookmark(&places, UNFILED_GUID, "https://c.example", "C");

    places
        .bookmarks()
        .move_to_folder(&[c.guid], None, 0, ChangeSource::Default)
        .unwrap();
    assert_eq!(titles(&children(&places, UNFILED_GUID)), vec!["C", "A", "B"]);
}

#[test]
fn test_move_rejects_bad_targets() {
    let places = setup();
    let a = insert_bookmark(&places, UNFILED_GUID, "https://a.example", "A");
    let b = insert_bookmark(&places, MENU_GUID, "https://b.example", "B");
    let bm = places.bookmarks();

    assert!(matches!(
        bm.move_to_folder(&[a.guid.clone()], Some(ROOT_GUID), -1, ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        bm.move_to_folder(&[a.guid.clone()], Some(TAGS_GUID), -1, ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        bm.move_to_folder(&[MENU_GUID.to_string()], Some(TOOLBAR_GUID), -1, ChangeSource::Default),
        Err(BookmarkError::ProtectedRoot(_))
    ));
    assert!(matches!(
        bm.move_to_folder(&[a.guid.clone(), b.guid.clone()], None, 0, ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        bm.move_to_folder(&[], Some(MENU_GUID), -1, ChangeSource::Default),
        Err(BookmarkError::Validation(_))
    ));
}

// ─── Remove ───

#[test]
fn test_remove_folder_with_contents() {
    let places = setup();
    let keep = insert_bookmark(&places, UNFILED_GUID, "https://keep.example", "Keep");
    let folder = insert_folder(&places, UNFILED_GUID, "Gone");
    let inner = insert_bookmark(&places, &folder.guid, "https://inner.example", "Inner");
    insert_bookmark(&places, UNFILED_GUID, "https://last.example", "Last");
    let log = record(&places);

    places
        .bookmarks()
        .remove(&[folder.guid.clone()], &RemoveOptions::default())
        .unwrap();

    assert!(places.bookmarks().fetch_one(&inner.guid).unwrap().is_none());
    let kids = children(&places, UNFILED_GUID);
    assert_eq!(titles(&kids), vec!["Keep", "Last"]);
    assert_eq!(kids.iter().map(|k| k.index).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(kids[0].guid, keep.guid);

    let notes = log.lock().unwrap();
    assert_eq!(notes.len(), 2);
    assert!(matches!(
        &notes[0],
        Notification::Removed { item, is_descendant_removal: true, .. } if item.guid == inner.guid
    ));
    assert!(matches!(
        &notes[1],
        Notification::Removed { item, index: 1, is_descendant_removal: false, .. } if item.guid == folder.guid
    ));
}

#[test]
fn test_remove_guards() {
    let places = setup();
    let folder = insert_folder(&places, UNFILED_GUID, "Full");
    insert_bookmark(&places, &folder.guid, "https://example.com", "x");
    let bm = places.bookmarks();

    assert!(matches!(
        bm.remove(&[MENU_GUID.to_string()], &RemoveOptions::default()),
        Err(BookmarkError::ProtectedRoot(_))
    ));
    assert!(matches!(
        bm.remove(
            &[folder.guid.clone()],
            &RemoveOptions {
                prevent_removal_of_non_empty_folders: true,
                ..RemoveOptions::default()
            }
        ),
        Err(BookmarkError::FolderNotEmpty(_))
    ));
    assert!(matches!(
        bm.remove(&["abcdefghijkl".to_string()], &RemoveOptions::default()),
        Err(BookmarkError::NotFound(_))
    ));
    assert_eq!(children(&places, &folder.guid).len(), 1);
}

#[test]
fn test_remove_last_bookmark_drops_keyword() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "x");
    places
        .keywords()
        .insert(&KeywordInsert {
            keyword: "ex".to_string(),
            url: "https://example.com".to_string(),
            ..KeywordInsert::default()
        })
        .unwrap();

    places.bookmarks().remove(&[item.guid], &RemoveOptions::default()).unwrap();
    let entries = places
        .keywords()
        .fetch(&KeywordQuery {
            keyword: Some("ex".to_string()),
            url: None,
        })
        .unwrap();
    assert!(entries.is_empty());
}

// ─── Reorder ───

#[test]
fn test_reorder_puts_listed_children_first() {
    let places = setup();
    let work = insert_folder(&places, TOOLBAR_GUID, "Work");
    let a = insert_bookmark(&places, &work.guid, "https://a.example", "A");
    insert_bookmark(&places, &work.guid, "https://b.example", "B");
    let c = insert_bookmark(&places, &work.guid, "https://c.example", "C");

    places
        .bookmarks()
        .reorder(&work.guid, &[c.guid, a.guid], &ReorderOptions::default())
        .unwrap();
    let kids = children(&places, &work.guid);
    assert_eq!(titles(&kids), vec!["C", "A", "B"]);
    assert_eq!(kids.iter().map(|k| k.index).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn test_reorder_with_current_order_does_nothing() {
    let places = setup();
    let work = insert_folder(&places, TOOLBAR_GUID, "Work");
    insert_bookmark(&places, &work.guid, "https://a.example", "A");
    insert_bookmark(&places, &work.guid, "https://b.example", "B");
    let before = places.bookmarks().fetch_one(&work.guid).unwrap().unwrap();
    let order: Vec<String> = children(&places, &work.guid).into_iter().map(|k| k.guid).collect();
    let log = record(&places);

    places
        .bookmarks()
        .reorder(&work.guid, &order, &ReorderOptions::default())
        .unwrap();
    assert!(log.lock().unwrap().is_empty());
    let after = places.bookmarks().fetch_one(&work.guid).unwrap().unwrap();
    assert_eq!(after.last_modified, before.last_modified);
    assert_eq!(after.sync_change_counter, before.sync_change_counter);
}

#[test]
fn test_reorder_rejects_empty_list() {
    let places = setup();
    let result = places
        .bookmarks()
        .reorder(UNFILED_GUID, &[], &ReorderOptions::default());
    assert!(matches!(result, Err(BookmarkError::Validation(_))));
}

#[test]
fn test_reorder_stamps_moved_children() {
    let places = setup();
    let work = insert_folder(&places, TOOLBAR_GUID, "Work");
    let a = insert_bookmark(&places, &work.guid, "https://a.example", "A");
    let b = insert_bookmark(&places, &work.guid, "https://b.example", "B");
    let c = insert_bookmark(&places, &work.guid, "https://c.example", "C");
    let stamp = now_ms() + 60_000;

    places
        .bookmarks()
        .reorder(
            &work.guid,
            &[b.guid.clone(), a.guid.clone()],
            &ReorderOptions {
                last_modified: Some(stamp),
                ..ReorderOptions::default()
            },
        )
        .unwrap();

    let fetch = |guid: &str| places.bookmarks().fetch_one(guid).unwrap().unwrap();
    assert_eq!(fetch(&a.guid).last_modified, stamp);
    assert_eq!(fetch(&b.guid).last_modified, stamp);
    // C kept its position.
    assert_eq!(fetch(&c.guid).last_modified, c.last_modified);
    assert_eq!(fetch(&work.guid).last_modified, stamp);
}

// ─── Erase ───

#[test]
fn test_erase_everything_keeps_roots() {
    let places = setup();
    let folder = insert_folder(&places, MENU_GUID, "Folder");
    insert_bookmark(&places, &folder.guid, "https://example.com", "x");
    insert_bookmark(&places, TOOLBAR_GUID, "https://example.org", "y");
    places
        .tags()
        .tag("https://example.org", &["t".to_string()], ChangeSource::Default)
        .unwrap();
    places
        .keywords()
        .insert(&KeywordInsert {
            keyword: "k".to_string(),
            url: "https://example.org".to_string(),
            ..KeywordInsert::default()
        })
        .unwrap();

    places.bookmarks().erase_everything(ChangeSource::Default).unwrap();

    for root in [MENU_GUID, TOOLBAR_GUID, UNFILED_GUID, TAGS_GUID] {
        assert!(children(&places, root).is_empty(), "{} not empty", root);
    }
    assert_eq!(children(&places, ROOT_GUID).len(), 5);
    assert!(places.bookmarks().fetch_tags().unwrap().is_empty());
    let keywords = places
        .keywords()
        .fetch(&KeywordQuery {
            keyword: Some("k".to_string()),
            url: None,
        })
        .unwrap();
    assert!(keywords.is_empty());
}

// ─── Fetch & search ───

#[test]
fn test_fetch_variants() {
    let places = setup();
    let folder = insert_folder(&places, MENU_GUID, "Folder");
    let a = insert_bookmark(&places, &folder.guid, "https://a.example", "A");
    let b = insert_bookmark(&places, &folder.guid, "https://b.example", "B");
    let bm = places.bookmarks();
    let plain = FetchOptions::default();

    let last = bm
        .fetch(
            &FetchQuery::Position {
                parent_guid: folder.guid.clone(),
                index: -1,
            },
            &plain,
        )
        .unwrap();
    assert_eq!(last[0].guid, b.guid);

    let by_prefix = bm.fetch(&FetchQuery::GuidPrefix(a.guid[..6].to_string()), &plain).unwrap();
    assert!(by_prefix.iter().any(|i| i.guid == a.guid));

    let by_url = bm.fetch(&FetchQuery::Url("https://a.example".to_string()), &plain).unwrap();
    assert_eq!(by_url.len(), 1);
    assert_eq!(by_url[0].tags, Some(Vec::new()));

    let detailed = bm
        .fetch(
            &FetchQuery::Guid(a.guid.clone()),
            &FetchOptions {
                include_path: true,
                include_item_ids: true,
                ..FetchOptions::default()
            },
        )
        .unwrap();
    let path = detailed[0].path.clone().unwrap();
    assert_eq!(path.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(), vec!["menu", "Folder"]);
    assert!(detailed[0].item_id.is_some());
    assert!(detailed[0].parent_id.is_some());

    let folder_item = bm.fetch_one(&folder.guid).unwrap().unwrap();
    assert_eq!(folder_item.child_count, Some(2));
}

#[test]
fn test_fetch_missing_and_invalid() {
    let places = setup();
    let bm = places.bookmarks();
    assert!(bm.fetch_one("abcdefghijkl").unwrap().is_none());
    assert!(bm
        .fetch(&FetchQuery::Parent("abcdefghijkl".to_string()), &FetchOptions::default())
        .unwrap()
        .is_empty());
    assert!(matches!(
        bm.fetch(&FetchQuery::Guid("short".to_string()), &FetchOptions::default()),
        Err(BookmarkError::Validation(_))
    ));
    assert!(matches!(
        bm.fetch(&FetchQuery::Tags(Vec::new()), &FetchOptions::default()),
        Err(BookmarkError::Validation(_))
    ));
}

#[test]
fn test_get_recent_and_search() {
    let places = setup();
    let bm = places.bookmarks();
    bm.insert(&BookmarkInfo {
        date_added: Some(1_000),
        ..BookmarkInfo::bookmark(UNFILED_GUID, "https://old.example", "Old Rust")
    })
    .unwrap();
    let newest = bm
        .insert(&BookmarkInfo {
            date_added: Some(2_000),
            ..BookmarkInfo::bookmark(UNFILED_GUID, "https://new.example", "New")
        })
        .unwrap();

    let recent = bm.get_recent(1).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].guid, newest.guid);
    assert!(matches!(bm.get_recent(0), Err(BookmarkError::Validation(_))));

    let hits = bm
        .search(&SearchQuery {
            query: Some("rust".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    assert_eq!(titles(&hits), vec!["Old Rust"]);

    let by_url = bm
        .search(&SearchQuery {
            url: Some("https://new.example".to_string()),
            ..SearchQuery::default()
        })
        .unwrap();
    assert_eq!(by_url.len(), 1);

    assert!(matches!(bm.search(&SearchQuery::default()), Err(BookmarkError::Validation(_))));
}

#[test]
fn test_closed_store_refuses_operations() {
    let places = setup();
    places.close();
    assert!(places.is_closed());
    assert!(matches!(
        places.bookmarks().insert(&BookmarkInfo::folder(UNFILED_GUID, "x")),
        Err(BookmarkError::ShuttingDown)
    ));
    assert!(matches!(places.bookmarks().fetch_one(MENU_GUID), Err(BookmarkError::ShuttingDown)));
}

// ─── Ancestor freshness ───

fn assert_fresh(places: &Places, guids: &[&str], since: i64) {
    for guid in guids {
        let folder = places.bookmarks().fetch_one(guid).unwrap().unwrap();
        assert!(folder.last_modified >= since, "{} went stale", guid);
        assert!(folder.last_modified >= folder.date_added, "{} modified before added", guid);
    }
}

#[test]
fn test_old_date_added_never_moves_ancestors_backwards() {
    let places = setup();
    let folder = insert_folder(&places, TOOLBAR_GUID, "Work");
    let toolbar = places.bookmarks().fetch_one(TOOLBAR_GUID).unwrap().unwrap();

    let old = places
        .bookmarks()
        .insert(&BookmarkInfo {
            date_added: Some(1_000),
            ..BookmarkInfo::bookmark(&folder.guid, "https://example.com", "Old")
        })
        .unwrap();
    assert_eq!(old.date_added, 1_000);

    let after = places.bookmarks().fetch_one(&folder.guid).unwrap().unwrap();
    assert_eq!(after.last_modified, folder.last_modified);
    assert_fresh(&places, &[&folder.guid, TOOLBAR_GUID], toolbar.last_modified);
}

#[test]
fn test_update_with_old_last_modified_keeps_parent_fresh() {
    let places = setup();
    let folder = insert_folder(&places, MENU_GUID, "Work");
    let item = places
        .bookmarks()
        .insert(&BookmarkInfo {
            date_added: Some(1_000),
            ..BookmarkInfo::bookmark(&folder.guid, "https://example.com", "x")
        })
        .unwrap();

    places
        .bookmarks()
        .update(&BookmarkInfo {
            guid: Some(item.guid.clone()),
            title: Some("renamed".to_string()),
            last_modified: Some(2_000),
            ..BookmarkInfo::default()
        })
        .unwrap();
    assert_fresh(&places, &[&folder.guid, MENU_GUID], folder.last_modified);
}

#[test]
fn test_ancestors_stay_fresh_after_remove_and_move() {
    let places = setup();
    let outer = insert_folder(&places, MENU_GUID, "Outer");
    let inner = insert_folder(&places, &outer.guid, "Inner");
    let other = insert_folder(&places, TOOLBAR_GUID, "Other");
    let a = insert_bookmark(&places, &inner.guid, "https://a.example", "A");
    let b = insert_bookmark(&places, &inner.guid, "https://b.example", "B");

    let before_move = now_ms();
    places
        .bookmarks()
        .move_to_folder(&[a.guid.clone()], Some(&other.guid), -1, ChangeSource::Default)
        .unwrap();
    assert_fresh(&places, &[&inner.guid, &outer.guid, MENU_GUID], before_move);
    assert_fresh(&places, &[&other.guid, TOOLBAR_GUID], before_move);

    let before_remove = now_ms();
    places
        .bookmarks()
        .remove(&[b.guid.clone()], &RemoveOptions::default())
        .unwrap();
    assert_fresh(&places, &[&inner.guid, &outer.guid, MENU_GUID], before_remove);
}

#[test]
fn test_moving_an_old_item_keeps_target_fresh() {
    let places = setup();
    let target = insert_folder(&places, UNFILED_GUID, "Target");
    let old = places
        .bookmarks()
        .insert(&BookmarkInfo {
            date_added: Some(1_000),
            ..BookmarkInfo::bookmark(MENU_GUID, "https://example.com", "Old")
        })
        .unwrap();

    places
        .bookmarks()
        .move_to_folder(&[old.guid], Some(&target.guid), 0, ChangeSource::Default)
        .unwrap();
    assert_fresh(&places, &[&target.guid, UNFILED_GUID], target.last_modified);
}

// ─── Rollback ───

#[test]
fn test_failed_mutation_leaves_store_untouched() {
    let places = setup();
    let item = insert_bookmark(&places, UNFILED_GUID, "https://example.com", "Example");
    places
        .keywords()
        .insert(&KeywordInsert {
            keyword: "ex".to_string(),
            url: "https://example.com".to_string(),
            ..KeywordInsert::default()
        })
        .unwrap();
    let changes = places.sync().pull_changes().unwrap();
    places.sync().acknowledge(&changes).unwrap();

    // Dropping the orphaned keyword fails late in the removal, after the row
    // is gone and its tombstone is written.
    places
        .database()
        .writer()
        .execute_batch(
            "CREATE TRIGGER keep_keywords BEFORE DELETE ON keywords
             BEGIN SELECT RAISE(ABORT, 'keywords are locked'); END;",
        )
        .unwrap();
    let log = record(&places);

    let result = places
        .bookmarks()
        .remove(&[item.guid.clone()], &RemoveOptions::default());
    assert!(matches!(result, Err(BookmarkError::TransactionFailure(_))), "{:?}", result);

    let still = places.bookmarks().fetch_one(&item.guid).unwrap().unwrap();
    assert_eq!(still.index, 0);
    assert!(places.sync().tombstones().unwrap().is_empty());
    assert_eq!(places.keyword_cache().get("ex").map(|e| e.url), Some("https://example.com/".to_string()));
    let stored = places
        .keywords()
        .fetch(&KeywordQuery {
            keyword: Some("ex".to_string()),
            url: None,
        })
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert!(log.lock().unwrap().is_empty());
}
