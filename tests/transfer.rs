mod util;
use util::*;

use dpf_client::file_transfer::{download_dir, download_file, list_server_dir, server_tmp_dir, upload_dir, upload_file};
use dpf_client::prelude::*;
use dpf_client::progress::{ProgressRecord, ProgressRecorder};
use proptest::prelude::*;
use rand::Rng;
use std::fs;

#[test]
fn chunked_upload_reports_progress_per_chunk() {
    // 64-byte chunks hold 16 ints
    let (_engine, srv) = engine_with_chunks(64, 10);
    let ids: Vec<i32> = (1..=1000).collect();
    let s = Scoping::new(Some(Location::Nodal), Some(&srv)).unwrap();
    let mut rec = ProgressRecorder::new();
    {
        let mut opts = TransferOptions::new().with_progress(&mut rec);
        s.set_ids_with(&ids, &mut opts).unwrap();
    }
    assert_eq!(rec.records.first(), Some(&ProgressRecord::Start(Some(1000))));
    assert_eq!(rec.updates(), 63);
    assert_eq!(rec.last(), Some(1000));
    assert!(rec.finished());
    assert_eq!(s.ids().unwrap(), ids);
}

#[test]
fn chunked_download_reports_progress_per_chunk() {
    let (_engine, srv) = engine_with_chunks(64, 10);
    let values: Vec<f64> = (0..100).map(f64::from).collect();
    let ids: Vec<i32> = (1..=100).collect();
    let f = scalar_field(&srv, &ids, &values);
    let mut rec = ProgressRecorder::new();
    let got = {
        let mut opts = TransferOptions::new().with_progress(&mut rec);
        f.data_with(&mut opts).unwrap()
    };
    assert_eq!(got, values);
    // 64-byte chunks hold 8 doubles
    assert_eq!(rec.updates(), 13);
    assert_eq!(rec.last(), Some(100));
    assert!(rec.finished());
}

#[test]
fn small_transfers_stay_silent() {
    let (_engine, srv) = engine_with_chunks(64, 10);
    let s = Scoping::new(None, Some(&srv)).unwrap();
    let mut rec = ProgressRecorder::new();
    {
        let mut opts = TransferOptions::new().with_progress(&mut rec);
        s.set_ids_with(&[1, 2, 3], &mut opts).unwrap();
    }
    assert!(rec.records.is_empty());
}

#[test]
fn empty_arrays_transfer() {
    let (_engine, srv) = engine_with_chunks(64, 0);
    let s = Scoping::new(None, Some(&srv)).unwrap();
    s.set_ids(&[]).unwrap();
    assert!(s.ids().unwrap().is_empty());
    let f = Field::scalar(0, Location::Nodal, Some(&srv)).unwrap();
    f.set_data(&[]).unwrap();
    assert!(f.data().unwrap().is_empty());
}

#[test]
fn cancelled_upload_leaves_object_unchanged() {
    let (_engine, srv) = engine_with_chunks(64, 10);
    let s = scoping(&srv, &[1, 2, 3]);
    let token = CancelToken::new();
    token.cancel();
    let ids: Vec<i32> = (1..=500).collect();
    let err = s
        .set_ids_with(&ids, &mut TransferOptions::new().with_cancel(token))
        .unwrap_err();
    assert!(err.is_cancelled(), "{err}");
    assert_eq!(s.ids().unwrap(), vec![1, 2, 3]);
}

#[test]
fn cancelled_download_returns_nothing_and_connection_recovers() {
    let (_engine, srv) = engine_with_chunks(64, 10);
    let ids: Vec<i32> = (1..=500).collect();
    let s = scoping(&srv, &ids);
    let token = CancelToken::new();
    token.cancel();
    let err = s
        .ids_with(&mut TransferOptions::new().with_cancel(token))
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(s.size().unwrap(), 500);
    assert_eq!(s.ids().unwrap(), ids);
}

#[test]
fn string_field_keeps_empty_strings() {
    let (_engine, srv) = engine_with_chunks(16, 0);
    let f = StringField::new(3, Location::Nodal, Some(&srv)).unwrap();
    f.set_scoping(&scoping(&srv, &[10, 20, 30])).unwrap();
    f.set_data(&["alpha", "a much longer value than one chunk", ""]).unwrap();
    assert_eq!(
        f.data().unwrap(),
        vec!["alpha".to_string(), "a much longer value than one chunk".to_string(), String::new()]
    );
    assert_eq!(f.entity_data_by_id(30).unwrap(), vec![String::new()]);
    assert_eq!(f.entity_data(0).unwrap(), vec!["alpha".to_string()]);
}

#[test]
fn custom_type_field_carries_opaque_records() {
    let (_engine, srv) = engine_with_chunks(40, 0);
    let mut rng = rand::thread_rng();
    let values: Vec<[f32; 3]> = (0..4).map(|_| [rng.r#gen(), rng.r#gen(), rng.r#gen()]).collect();

    let f = CustomTypeField::new::<[f32; 3]>(4, Location::Nodal, Some(&srv)).unwrap();
    f.set_scoping(&scoping(&srv, &[1, 2, 3, 4])).unwrap();
    f.set_data(&values).unwrap();
    assert_eq!(f.unitary_size().unwrap(), 12);
    assert_eq!(f.data::<[f32; 3]>().unwrap(), values);
    assert_eq!(f.entity_data::<[f32; 3]>(2).unwrap(), vec![values[2]]);
    assert_eq!(f.data_bytes().unwrap().len(), 48);
    assert!(matches!(f.data::<u64>(), Err(DpfError::TypeMismatch(_))));
    assert!(matches!(f.set_data_bytes(&[0u8; 13]), Err(DpfError::InvalidArgument(_))));
}

#[test]
fn file_upload_then_download_is_byte_exact() {
    let (_engine, srv) = engine_with_chunks(256, 0);
    let dir = tempfile::tempdir().unwrap();
    let mut bytes = vec![0u8; 3000];
    rand::thread_rng().fill(&mut bytes[..]);
    let local = dir.path().join("model.rst");
    fs::write(&local, &bytes).unwrap();

    let remote = upload_file(&local, "inputs/model.rst", true, Some(&srv)).unwrap();
    let tmp = server_tmp_dir(Some(&srv)).unwrap();
    assert!(remote.starts_with(&tmp));
    assert!(remote.ends_with("inputs/model.rst"));

    let back = dir.path().join("out").join("model.rst");
    download_file(&remote, &back, Some(&srv)).unwrap();
    assert_eq!(fs::read(&back).unwrap(), bytes);
}

#[test]
fn directories_keep_their_layout() {
    let (_engine, srv) = engine_and_server();
    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("sub")).unwrap();
    fs::write(src.path().join("a.txt"), b"first").unwrap();
    fs::write(src.path().join("sub").join("b.txt"), b"second").unwrap();

    let uploaded = upload_dir(src.path(), "/results", false, Some(&srv)).unwrap();
    assert_eq!(uploaded, vec!["/results/a.txt", "/results/sub/b.txt"]);
    assert_eq!(list_server_dir("/results", Some(&srv)).unwrap(), vec!["a.txt", "sub/b.txt"]);

    let dst = tempfile::tempdir().unwrap();
    let files = download_dir("/results", dst.path(), Some(&srv)).unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(fs::read(dst.path().join("sub").join("b.txt")).unwrap(), b"second");
}

#[test]
fn missing_server_file_is_not_found() {
    let (_engine, srv) = engine_and_server();
    let dir = tempfile::tempdir().unwrap();
    let err = download_file("/nowhere/x.rst", &dir.path().join("x.rst"), Some(&srv)).unwrap_err();
    assert!(err.is_not_found(), "{err}");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn index_and_id_lookups_are_inverse(ids in proptest::collection::btree_set(any::<i32>(), 1..200)) {
        let (_engine, srv) = engine_with_chunks(128, usize::MAX);
        let ids: Vec<i32> = ids.into_iter().rev().collect();
        let s = scoping(&srv, &ids);
        prop_assert_eq!(s.size().unwrap(), ids.len());
        for (i, id) in ids.iter().enumerate().step_by(17) {
            prop_assert_eq!(s.id_by_index(i).unwrap(), *id);
            prop_assert_eq!(s.index_by_id(*id).unwrap(), i as i32);
        }
    }
}

#[test]
fn fixed_width_fields_need_complete_data() {
    let (_engine, srv) = engine_and_server();
    let f = Field::vector(2, 3, Location::Nodal, Some(&srv)).unwrap();
    f.set_scoping(&scoping(&srv, &[10, 20])).unwrap();
    f.set_data(&[1.0, 2.0, 3.0]).unwrap();
    assert!(f.data_pointer().unwrap().is_none());
    assert!(matches!(f.entity_data(1), Err(DpfError::InvariantViolation(_))));

    f.set_data(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    assert_eq!(f.data().unwrap().len(), f.size().unwrap() * f.n_components().unwrap());
    assert_eq!(f.entity_data(1).unwrap(), vec![4.0, 5.0, 6.0]);
    assert_eq!(f.entity_data_by_id(10).unwrap(), vec![1.0, 2.0, 3.0]);
}
