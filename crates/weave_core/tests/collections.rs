//! Collection CRUD, index lookups and transaction atomicity.

use proptest::prelude::*;
use std::collections::BTreeMap;
use weave_core::{CoreError, Id, KeyRange, Record, StorageError, Value, MAX_SAFE_ID};
use weave_testkit::prelude::*;

#[test]
fn put_assigns_ids_and_round_trips() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();

    let ada = record!({"name": "Ada", "age": 36, "active": true, "tags": ["math", "engines"]});
    let ids = db
        .write_txn(|txn| users.put_all(txn, vec![ada.clone(), record!({"name": "Bob"})]))
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert_ne!(ids[0], ids[1]);

    let stored = db.read_txn(|txn| users.get(txn, ids[0])).unwrap().unwrap();
    let mut expected = ada;
    expected.id = Some(ids[0]);
    assert_eq!(stored, expected);
}

#[test]
fn put_with_id_replaces_record() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();

    db.write_txn(|txn| users.put_all(txn, vec![record!({"id": 7, "name": "old", "age": 1})]))
        .unwrap();
    db.write_txn(|txn| users.put_all(txn, vec![record!({"id": 7, "name": "new"})]))
        .unwrap();

    let stored = db.read_txn(|txn| users.get(txn, 7)).unwrap().unwrap();
    assert_eq!(stored.get("name"), Some(&Value::from("new")));
    assert!(stored.get("age").is_none());

    // The old index entry is gone with the old record.
    let by_age = db
        .read_txn(|txn| users.get_all_by_index(txn, "age", &[Value::Integer(1)]))
        .unwrap();
    assert_eq!(by_age, vec![None]);

    // Auto-increment continues past explicit ids.
    let ids = db
        .write_txn(|txn| users.put_all(txn, vec![record!({"name": "next"})]))
        .unwrap();
    assert!(ids[0] > 7);
}

#[test]
fn null_and_bool_values_survive_storage() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();
    let ids = db
        .write_txn(|txn| {
            users.put_all(
                txn,
                vec![record!({"name": null, "active": false}), record!({"active": true})],
            )
        })
        .unwrap();

    let records = db.read_txn(|txn| users.get_all(txn, &ids)).unwrap();
    let first = records[0].as_ref().unwrap();
    assert_eq!(first.get("name"), Some(&Value::Null));
    assert_eq!(first.get("active"), Some(&Value::Bool(false)));
    assert_eq!(
        records[1].as_ref().unwrap().get("active"),
        Some(&Value::Bool(true))
    );
}

#[test]
fn get_all_keeps_input_order() {
    let (db, ids) = scenarios::populated_users(3);
    let users = db.collection("users").unwrap();

    let records = db
        .read_txn(|txn| users.get_all(txn, &[ids[2], 999, ids[0]]))
        .unwrap();
    let names: Vec<Option<&Value>> = records
        .iter()
        .map(|r| r.as_ref().and_then(|r| r.get("name")))
        .collect();
    assert_eq!(
        names,
        vec![Some(&Value::from("user2")), None, Some(&Value::from("user0"))]
    );
}

#[test]
fn get_all_by_index_keeps_input_order() {
    let (db, _) = scenarios::populated_users(3);
    let users = db.collection("users").unwrap();

    let keys = [Value::from("user2"), Value::from("nobody"), Value::from("user0")];
    let records = db
        .read_txn(|txn| users.get_all_by_index(txn, "name", &keys))
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].as_ref().unwrap().get("age"), Some(&Value::Integer(22)));
    assert!(records[1].is_none());
    assert_eq!(records[2].as_ref().unwrap().get("age"), Some(&Value::Integer(20)));
}

#[test]
fn get_all_by_index_on_multi_entry_index() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();
    db.write_txn(|txn| {
        users.put_all(txn, vec![record!({"name": "Ada", "tags": ["math", "engines"]})])
    })
    .unwrap();

    let records = db
        .read_txn(|txn| users.get_all_by_index(txn, "tags", &[Value::from("engines")]))
        .unwrap();
    assert_eq!(
        records[0].as_ref().unwrap().get("name"),
        Some(&Value::from("Ada"))
    );
}

#[test]
fn unknown_index_is_an_error() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();
    let err = db
        .read_txn(|txn| users.get_all_by_index(txn, "shoe_size", &[Value::Integer(1)]))
        .unwrap_err();
    assert!(matches!(err, CoreError::IndexNotFound { .. }));
}

#[test]
fn delete_all_by_index_counts_each_record_once() {
    let (db, ids) = scenarios::populated_users(4);
    let users = db.collection("users").unwrap();

    let deleted = db
        .write_txn(|txn| {
            users.delete_all_by_index(
                txn,
                "age",
                &[Value::Integer(20), Value::Integer(21), Value::Integer(20)],
            )
        })
        .unwrap();
    assert_eq!(deleted, 2);

    let remaining = db.read_txn(|txn| users.get_all(txn, &ids)).unwrap();
    assert!(remaining[0].is_none());
    assert!(remaining[1].is_none());
    assert!(remaining[2].is_some());
    assert!(remaining[3].is_some());
}

#[test]
fn unique_conflict_aborts_whole_transaction() {
    let db = TestInstance::new();
    let posts = db.collection("posts").unwrap();
    let users = db.collection("users").unwrap();

    let err = db
        .write_txn(|txn| {
            users.put_all(txn, vec![record!({"name": "Ada"})])?;
            posts.put_all(
                txn,
                vec![record!({"title": "same"}), record!({"title": "same"})],
            )
        })
        .unwrap_err();
    assert!(err.is_constraint());

    let counts = db
        .read_txn(|txn| Ok((users.query().build()?.count(txn)?, posts.query().build()?.count(txn)?)))
        .unwrap();
    assert_eq!(counts, (0, 0));
}

#[test]
fn ids_that_would_collide_as_keys_are_rejected() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();

    // 2^53 and 2^53 + 1 map to the same float key.
    let err = db
        .write_txn(|txn| {
            users.put_all(
                txn,
                vec![Record::with_id(MAX_SAFE_ID + 1), Record::with_id(MAX_SAFE_ID + 2)],
            )
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Storage(StorageError::InvalidKey { .. })
    ));
    let err = db
        .write_txn(|txn| users.put_all(txn, vec![Record::with_id(1), Record::with_id(-MAX_SAFE_ID - 1)]))
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Storage(StorageError::InvalidKey { .. })
    ));
    let count = db
        .read_txn(|txn| users.query().build()?.count(txn))
        .unwrap();
    assert_eq!(count, 0);

    let ids = db
        .write_txn(|txn| {
            users.put_all(
                txn,
                vec![Record::with_id(MAX_SAFE_ID), Record::with_id(MAX_SAFE_ID - 1)],
            )
        })
        .unwrap();
    assert_eq!(ids, vec![MAX_SAFE_ID, MAX_SAFE_ID - 1]);
    let stored = db
        .read_txn(|txn| users.get_all(txn, &ids))
        .unwrap();
    assert!(stored.iter().all(Option::is_some));
}

#[test]
fn failed_operation_leaves_transaction_unusable() {
    let db = TestInstance::new();
    let posts = db.collection("posts").unwrap();
    db.write_txn(|txn| posts.put_all(txn, vec![record!({"title": "taken"})]))
        .unwrap();

    let txn = db.begin_txn(true).unwrap();
    assert!(posts.put_all(&txn, vec![record!({"title": "taken"})]).is_err());
    assert!(!txn.is_active());
    assert!(matches!(
        txn.commit(),
        Err(CoreError::TransactionAborted { .. })
    ));
}

#[test]
fn aborted_transaction_discards_writes() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();

    let txn = db.begin_txn(true).unwrap();
    let ids = users.put_all(&txn, vec![record!({"name": "ghost"})]).unwrap();
    txn.abort();
    txn.abort();

    assert!(db.read_txn(|txn| users.get(txn, ids[0])).unwrap().is_none());
}

#[test]
fn read_transactions_reject_writes() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();
    let result = db.read_txn(|txn| users.put_all(txn, vec![record!({"name": "x"})]));
    assert!(result.is_err());
}

#[test]
fn clear_empties_collection() {
    let (db, _) = scenarios::populated_users(5);
    let users = db.collection("users").unwrap();
    db.write_txn(|txn| users.clear(txn)).unwrap();

    let count = db
        .read_txn(|txn| users.query().build()?.count(txn))
        .unwrap();
    assert_eq!(count, 0);
    let by_name = db
        .read_txn(|txn| users.get_all_by_index(txn, "name", &[Value::from("user1")]))
        .unwrap();
    assert_eq!(by_name, vec![None]);
}

#[test]
fn closed_instance_rejects_transactions() {
    let db = TestInstance::new();
    db.close(false).unwrap();
    assert!(db.is_closed());
    assert!(matches!(db.begin_txn(false), Err(CoreError::InstanceClosed)));
}

#[test]
fn close_with_delete_removes_database() {
    let db = TestInstance::new();
    assert_eq!(db.env.database_names(), vec![db.name().to_string()]);
    db.close(true).unwrap();
    assert!(db.env.database_names().is_empty());
}

fn apply(model: &mut BTreeMap<Id, Record>, op: &CollectionOperation) {
    match op {
        CollectionOperation::Put { id, record } => {
            let mut record = record.clone();
            record.id = Some(*id);
            model.insert(*id, record);
        }
        CollectionOperation::Delete { id } => {
            model.remove(id);
        }
        CollectionOperation::Clear => model.clear(),
    }
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn collection_matches_model(ops in operation_sequence_strategy(1, 40)) {
        let db = TestInstance::new();
        let users = db.collection("users").unwrap();
        let mut model = BTreeMap::new();

        for op in &ops {
            db.write_txn(|txn| match op {
                CollectionOperation::Put { id, record } => {
                    let mut record = record.clone();
                    record.id = Some(*id);
                    users.put_all(txn, vec![record]).map(|_| ())
                }
                CollectionOperation::Delete { id } => users.delete_all(txn, &[*id]),
                CollectionOperation::Clear => users.clear(txn),
            })
            .unwrap();
            apply(&mut model, op);
        }

        let stored = db
            .read_txn(|txn| users.query().build()?.find_all(txn))
            .unwrap();
        let expected: Vec<Record> = model.into_values().collect();
        prop_assert_eq!(stored, expected);
    }

    #[test]
    fn id_range_query_matches_model(ops in operation_sequence_strategy(1, 30), low in 1i64..64, span in 0i64..32) {
        let db = TestInstance::new();
        let users = db.collection("users").unwrap();
        let mut model = BTreeMap::new();
        for op in &ops {
            if let CollectionOperation::Put { id, record } = op {
                let mut record = record.clone();
                record.id = Some(*id);
                db.write_txn(|txn| users.put_all(txn, vec![record])).unwrap();
                apply(&mut model, op);
            }
        }

        let range = KeyRange::bound(low.into(), (low + span).into(), false, false);
        let ids: Vec<Id> = db
            .read_txn(|txn| users.query().id_range(range).build()?.find_all(txn))
            .unwrap()
            .iter()
            .filter_map(|r| r.id)
            .collect();
        let expected: Vec<Id> = model.range(low..=low + span).map(|(id, _)| *id).collect();
        prop_assert_eq!(ids, expected);
    }
}
