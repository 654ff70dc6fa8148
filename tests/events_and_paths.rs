//! Write notifications (ticket ABA defense) and path round trips.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use treestore::events::writes;
use treestore::{registry, Storage, StoreError, TypeCode};

fn counter() -> (Arc<AtomicUsize>, treestore::events::Handler) {
    let hits = Arc::new(AtomicUsize::new(0));
    let sink = hits.clone();
    let handler: treestore::events::Handler = Arc::new(move |_event| {
        sink.fetch_add(1, Ordering::SeqCst);
    });
    (hits, handler)
}

#[test]
fn subscribe_fires_on_writes_until_disposed() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write("f", 0i32).unwrap();

    // Subscribe after the field exists so the handle tracks the live
    // incarnation.
    let root = storage.root().unwrap();
    let (hits, handler) = counter();
    let sub = root.subscribe("f", handler).unwrap();

    let mut root = storage.root().unwrap();
    root.write("f", 1i32).unwrap();
    root.write("f", 2i32).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    sub.dispose();
    root.write("f", 3i32).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn version_ticket_defeats_aba() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write("f", 0i32).unwrap();
    let root = storage.root().unwrap();
    let container = registry().get(root.id()).unwrap();

    let (hits, handler) = counter();
    let sub = root.subscribe("f", handler).unwrap();

    let stale = writes().field_version(&container, "f");
    let current = writes().bump_field_version(&container, "f");
    assert_ne!(stale, current);

    writes().notify(&container, "f", TypeCode::Int32, Some(stale));
    assert_eq!(hits.load(Ordering::SeqCst), 0, "stale ticket delivered");

    writes().notify(&container, "f", TypeCode::Int32, Some(current));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    sub.dispose();
}

#[test]
fn structural_delete_notifies_with_unknown_kind() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write("doomed", 1i32).unwrap();

    let root = storage.root().unwrap();
    let seen: Arc<parking_lot::Mutex<Vec<TypeCode>>> =
        Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = root
        .subscribe(
            "doomed",
            Arc::new(move |event: &treestore::WriteEvent| {
                sink.lock().push(event.kind);
            }),
        )
        .unwrap();

    let mut root = storage.root().unwrap();
    root.delete("doomed").unwrap();
    assert_eq!(seen.lock().as_slice(), &[TypeCode::Unknown]);
    sub.dispose();
}

#[test]
fn pool_reuse_does_not_leak_subscriptions() {
    let mut storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write("f", 1i32).unwrap();

    let (hits, handler) = counter();
    let sub = storage.root().unwrap().subscribe("f", handler).unwrap();
    storage.dispose().unwrap();

    // A new tree may reuse the pooled shell and even the recycled id;
    // the old subscription must stay silent.
    let storage2 = Storage::new().unwrap();
    let mut root2 = storage2.root().unwrap();
    root2.write("f", 9i32).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    sub.dispose();
}

#[test]
fn write_read_path_round_trips() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();

    root.write_path("a.b.c", -42i64).unwrap();
    assert_eq!(root.read_path::<i64>("a.b.c").unwrap(), -42);

    root.write_string_path("a.label", "deep").unwrap();
    assert_eq!(root.read_string_path("a.label").unwrap(), "deep");

    root.write_array_path("a.b.nums", &[1u16, 2, 3]).unwrap();
    assert_eq!(root.read_array_path::<u16>("a.b.nums").unwrap(), vec![1, 2, 3]);

    root.write_path("squad[2].hp", 15i32).unwrap();
    assert_eq!(root.read_path::<i32>("squad[2].hp").unwrap(), 15);

    // Unfilled sibling slots stayed null.
    let squad = storage.root().unwrap().get_ref_array("squad").unwrap();
    assert!(squad.object_at_no_allocate(0).unwrap().is_none());
    assert!(squad.object_at_no_allocate(1).unwrap().is_none());
}

#[test]
fn read_path_never_creates() {
    let storage = Storage::new().unwrap();
    let root = storage.root().unwrap();
    let err = root.read_path::<i32>("missing.leaf").unwrap_err();
    assert!(err.is_not_found());
    assert!(!storage.root().unwrap().exists("missing").unwrap());
}

#[test]
fn malformed_paths_surface_as_such() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    for bad in ["", "a..b", "a[", "a[x]", "a b"] {
        let err = root.write_path(bad, 1i32).unwrap_err();
        assert!(
            matches!(err, StoreError::MalformedPath(_)),
            "{bad:?} gave {err:?}"
        );
    }
}

#[test]
fn leaf_array_elements_via_path() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write_path("scores[4]", 99i32).unwrap();
    assert_eq!(root.read_path::<i32>("scores[4]").unwrap(), 99);
    assert_eq!(root.read_path::<i32>("scores[0]").unwrap(), 0);
    assert_eq!(
        storage
            .root()
            .unwrap()
            .field_info("scores")
            .unwrap()
            .element_count(),
        5
    );
}
