//! Typed array handles and per-field handles.

use treestore::{registry, ContainerLayout, ObjectBuilder, Storage, StoreError, TypeCode};

fn storage_with_arrays() -> Storage {
    let layout = ObjectBuilder::with_name("root")
        .set_array::<i32>("nums", 4)
        .set_string("title", 5)
        .set_ref_array("kids", 3)
        .build_layout()
        .unwrap();
    Storage::with_layout(&layout).unwrap()
}

#[test]
fn value_array_get_set() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let nums = root.get_array("nums").unwrap();

    assert_eq!(nums.len().unwrap(), 4);
    assert_eq!(nums.code(), TypeCode::Int32);
    assert!(!nums.is_ref());

    nums.set(0, 10i32).unwrap();
    nums.set(3, -7i32).unwrap();
    assert_eq!(nums.get::<i32>(0).unwrap(), 10);
    assert_eq!(nums.to_vec::<i32>().unwrap(), vec![10, 0, 0, -7]);

    assert!(matches!(
        nums.get::<i32>(4).unwrap_err(),
        StoreError::IndexOutOfRange { index: 4, len: 4 }
    ));
}

#[test]
fn copy_from_respects_resize_flag() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let mut nums = root.get_array("nums").unwrap();

    let err = nums.copy_from(&[1i32, 2], false).unwrap_err();
    assert!(matches!(err, StoreError::IndexOutOfRange { .. }));

    nums.copy_from(&[1i32, 2], true).unwrap();
    assert_eq!(nums.len().unwrap(), 2);
    assert_eq!(nums.to_vec::<i32>().unwrap(), vec![1, 2]);
}

#[test]
fn resize_preserves_overlap() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let mut nums = root.get_array("nums").unwrap();
    nums.copy_from(&[5i32, 6, 7, 8], false).unwrap();

    nums.resize(6).unwrap();
    assert_eq!(nums.to_vec::<i32>().unwrap(), vec![5, 6, 7, 8, 0, 0]);
    nums.resize(2).unwrap();
    assert_eq!(nums.to_vec::<i32>().unwrap(), vec![5, 6]);
}

#[test]
fn char16_array_reads_and_writes_text() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let mut title = root.get_array("title").unwrap();
    assert_eq!(title.code(), TypeCode::Char16);

    title.write_str("épée").unwrap();
    assert_eq!(title.as_string().unwrap(), "épée");
    assert_eq!(title.len().unwrap(), 4);
}

#[test]
fn wrong_reference_nature_is_rejected() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    assert!(matches!(
        root.get_ref_array("nums").unwrap_err(),
        StoreError::TypeMismatch { .. }
    ));
    assert!(matches!(
        root.get_array("kids").unwrap_err(),
        StoreError::TypeMismatch { .. }
    ));
    // Scalars are not arrays at all.
    let mut root = storage.root().unwrap();
    root.write("solo", 1i32).unwrap();
    assert!(root.get_array("solo").is_err());
}

#[test]
fn ref_array_lifecycle() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let kids = root.get_ref_array("kids").unwrap();
    let shape = ObjectBuilder::with_name("kid")
        .set_scalar_default::<i32>("n", 1)
        .build_layout()
        .unwrap();

    // Null slots refuse without a layout and fill with one.
    assert!(kids.object_at(0, None).unwrap_err().is_not_found());
    let kid = kids.object_at(0, Some(&shape)).unwrap();
    assert_eq!(kid.read::<i32>("n").unwrap(), 1);
    assert_eq!(kids.id_at(0).unwrap(), kid.id());

    // Repeated access returns the same child, not a fresh one.
    let again = kids.object_at(0, Some(&shape)).unwrap();
    assert_eq!(again.id(), kid.id());

    let cell = registry().get(kid.id()).unwrap();
    kids.clear_at(0).unwrap();
    assert!(cell.is_disposed());
    assert!(kids.object_at_no_allocate(0).unwrap().is_none());
}

#[test]
fn clear_all_tears_down_every_slot() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let kids = root.get_ref_array("kids").unwrap();
    let shape = ContainerLayout::empty("kid");

    let cells: Vec<_> = (0..3)
        .map(|i| {
            let child = kids.object_at(i, Some(&shape)).unwrap();
            registry().get(child.id()).unwrap()
        })
        .collect();

    kids.clear_all().unwrap();
    for cell in cells {
        assert!(cell.is_disposed());
    }
    for i in 0..3 {
        assert!(kids.object_at_no_allocate(i).unwrap().is_none());
    }
}

#[test]
fn field_handles_read_and_write() {
    let storage = storage_with_arrays();
    let mut root = storage.root().unwrap();
    root.write("hp", 12i32).unwrap();

    let root = storage.root().unwrap();
    let field = root.field("hp").unwrap();
    assert_eq!(field.name().unwrap(), "hp");
    assert_eq!(field.read::<i32>().unwrap(), 12);
    field.write(99i32).unwrap();
    assert_eq!(field.read::<i32>().unwrap(), 99);
    assert_eq!(field.info().unwrap().code, TypeCode::Int32);

    assert!(root.field("missing").unwrap_err().is_not_found());
}

#[test]
fn override_with_changes_kind_and_length() {
    let storage = storage_with_arrays();
    let root = storage.root().unwrap();
    let mut nums = root.get_array("nums").unwrap();
    nums.override_with(&[1.5f64, 2.5, 3.5]).unwrap();

    assert_eq!(nums.code(), TypeCode::Float64);
    assert_eq!(nums.to_vec::<f64>().unwrap(), vec![1.5, 2.5, 3.5]);
    let info = storage.root().unwrap().field_info("nums").unwrap();
    assert_eq!(info.code, TypeCode::Float64);
    assert_eq!(info.element_count(), 3);
}
