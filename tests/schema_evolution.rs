//! Rescheme and override behavior through the public surface.

use treestore::{LayoutEdit, ObjectBuilder, Storage, StoreError, TypeCode};

#[test]
fn rescheme_add_remove_preserves_survivors() {
    let layout = ObjectBuilder::with_name("t")
        .set_scalar::<i32>("a")
        .set_scalar::<i32>("b")
        .build_layout()
        .unwrap();
    let storage = Storage::with_layout(&layout).unwrap();
    let mut root = storage.root().unwrap();
    root.write("a", 7i32).unwrap();
    root.write("b", 9i32).unwrap();

    let id = root.id();
    root.rescheme(
        LayoutEdit::new()
            .remove("b")
            .add_scalar("c", TypeCode::Int32),
    )
    .unwrap();

    assert_eq!(root.id(), id);
    assert_eq!(root.read::<i32>("a").unwrap(), 7);
    assert_eq!(root.read::<i32>("c").unwrap(), 0);
    assert!(root.read::<i32>("b").unwrap_err().is_not_found());
}

#[test]
fn override_retypes_array_in_place() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write_array("values", &[1i32, 2, 3]).unwrap();
    assert_eq!(root.field_info("values").unwrap().code, TypeCode::Int32);

    let mut values = root.get_array("values").unwrap();
    values.override_with(&[3.5f32, 4.5]).unwrap();

    let root = storage.root().unwrap();
    assert_eq!(root.read_array::<f32>("values").unwrap(), vec![3.5, 4.5]);
    let info = root.field_info("values").unwrap();
    assert_eq!(info.code, TypeCode::Float32);
    assert_eq!(info.element_count(), 2);
}

#[test]
fn stale_handles_fail_after_foreign_rescheme() {
    let storage = Storage::new().unwrap();
    let mut writer = storage.root().unwrap();
    writer.write("x", 1i32).unwrap();

    let bystander = storage.root().unwrap();
    writer.write("y", 2i32).unwrap(); // adds a field: rescheme

    // The handle that performed the write moved with the container...
    assert_eq!(writer.read::<i32>("y").unwrap(), 2);
    // ...the one captured before the rescheme did not.
    assert!(matches!(
        bystander.read::<i32>("x").unwrap_err(),
        StoreError::StaleHandle { .. }
    ));
    assert!(!bystander.is_alive());
}

#[test]
fn rename_keeps_value_and_identity() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write("speed", 88.0f64).unwrap();
    root.rename("speed", "velocity").unwrap();
    assert_eq!(root.read::<f64>("velocity").unwrap(), 88.0);
    assert!(!root.exists("speed").unwrap());
}

#[test]
fn delete_tears_down_referenced_subtree() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write_path("enemy.hp", 40i32).unwrap();
    let enemy = root.try_get_object("enemy").unwrap().unwrap();
    let cell = treestore::registry().get(enemy.id()).unwrap();

    root.delete("enemy").unwrap();
    assert!(cell.is_disposed());
    assert!(!root.exists("enemy").unwrap());
}

#[test]
fn move_field_transfers_subtree_ownership() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write_path("bag.coins", 30i32).unwrap();

    let bag = root.try_get_object("bag").unwrap().unwrap();
    let bag_cell = treestore::registry().get(bag.id()).unwrap();

    // Move the whole `bag` reference under a new name on a sibling.
    let mut vault = root
        .get_object("vault", Some(&treestore::ContainerLayout::empty("vault")))
        .unwrap();
    let mut root = storage.root().unwrap();
    root.move_field("bag", &mut vault, "stash").unwrap();

    // The subtree survived the move and is reachable at its new anchor.
    assert!(!bag_cell.is_disposed());
    assert!(!storage.root().unwrap().exists("bag").unwrap());
    let stash = vault.try_get_object("stash").unwrap().unwrap();
    assert_eq!(stash.read::<i32>("coins").unwrap(), 30);
}

#[test]
fn string_growth_reschemes_transparently() {
    let storage = Storage::new().unwrap();
    let mut root = storage.root().unwrap();
    root.write_string("title", "Hi").unwrap();
    assert_eq!(root.field_info("title").unwrap().element_count(), 2);

    root.write_string("title", "A much longer title").unwrap();
    assert_eq!(root.read_string("title").unwrap(), "A much longer title");

    root.write_string("title", "tiny").unwrap();
    assert_eq!(root.read_string("title").unwrap(), "tiny");
    assert_eq!(root.field_info("title").unwrap().element_count(), 4);
}

#[test]
fn widening_write_and_read_round_trips() {
    let layout = ObjectBuilder::with_name("w")
        .set_scalar::<i64>("big")
        .set_scalar::<f64>("wide")
        .build_layout()
        .unwrap();
    let storage = Storage::with_layout(&layout).unwrap();
    let mut root = storage.root().unwrap();

    // Int32 value into an Int64 field, Float32 into Float64: implicit.
    root.write("big", -7i32).unwrap();
    root.write("wide", 1.5f32).unwrap();
    assert_eq!(root.read::<i64>("big").unwrap(), -7);
    assert_eq!(root.read::<f64>("wide").unwrap(), 1.5);

    // And the reverse direction refuses implicitly.
    let err = root.write("big", 1.5f64).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { .. }));
}
