//! Registry accounting across a whole storage lifecycle. Kept in its own
//! binary (single test) so no other test's allocations interleave.

use treestore::{registry, Storage};

#[test]
fn disposal_returns_registry_to_baseline() {
    let baseline = registry().len();

    let mut storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    for i in 0..8 {
        root.write_path(&format!("row{i}.col.value"), i as i64).unwrap();
    }
    assert_eq!(registry().len(), baseline + 1 + 8 * 2);

    storage.dispose().unwrap();
    assert_eq!(registry().len(), baseline);

    // A second tree reuses pooled ids and shells without leaking.
    // Three containers: the root plus the auto-created `a` and `b`.
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write_path("a.b.c", 1i32).unwrap();
    assert_eq!(registry().len(), baseline + 3);
    drop(storage);
    assert_eq!(registry().len(), baseline);
}
