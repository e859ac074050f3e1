//! Links between records and their cleanup on delete.

use weave_core::{CoreError, Id};
use weave_testkit::prelude::*;

/// Three users and two posts by the first user. Returns `(users, posts)`.
fn linked(db: &TestInstance) -> (Vec<Id>, Vec<Id>) {
    let users = db.collection("users").unwrap();
    let posts = db.collection("posts").unwrap();
    db.write_txn(|txn| {
        let user_ids = users.put_all(
            txn,
            vec![
                record!({"name": "Ada"}),
                record!({"name": "Bob"}),
                record!({"name": "Cy"}),
            ],
        )?;
        let post_ids = posts.put_all(
            txn,
            vec![record!({"title": "one"}), record!({"title": "two"})],
        )?;
        let author = posts.link("author")?;
        for &post in &post_ids {
            author.update(txn, false, post, &[user_ids[0]], &[])?;
        }
        let friends = users.link("friends")?;
        friends.update(txn, false, user_ids[0], &[user_ids[1], user_ids[2]], &[])?;
        Ok((user_ids, post_ids))
    })
    .unwrap()
}

#[test]
fn load_follows_both_directions() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();

    let (forward, backward) = db
        .read_txn(|txn| Ok((author.load(txn, posts[0], false)?, author.load(txn, users[0], true)?)))
        .unwrap();
    assert_eq!(forward, vec![users[0]]);
    assert_eq!(backward, posts);
}

#[test]
fn update_from_target_side() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();

    db.write_txn(|txn| author.update(txn, true, users[1], &[posts[1]], &[]))
        .unwrap();
    let authors = db
        .read_txn(|txn| author.load(txn, posts[1], false))
        .unwrap();
    assert_eq!(authors, vec![users[0], users[1]]);

    db.write_txn(|txn| author.update(txn, true, users[0], &[], &[posts[1]]))
        .unwrap();
    let authors = db
        .read_txn(|txn| author.load(txn, posts[1], false))
        .unwrap();
    assert_eq!(authors, vec![users[1]]);
}

#[test]
fn duplicate_pair_is_a_constraint_error() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();

    let err = db
        .write_txn(|txn| author.update(txn, false, posts[0], &[users[0]], &[]))
        .unwrap_err();
    assert!(err.is_constraint());
}

#[test]
fn removing_missing_pair_is_a_no_op() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();

    db.write_txn(|txn| author.update(txn, false, posts[0], &[], &[users[2]]))
        .unwrap();
    let authors = db
        .read_txn(|txn| author.load(txn, posts[0], false))
        .unwrap();
    assert_eq!(authors, vec![users[0]]);
}

#[test]
fn clear_removes_one_side() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();

    db.write_txn(|txn| author.clear(txn, users[0], true)).unwrap();
    let (first, second) = db
        .read_txn(|txn| Ok((author.load(txn, posts[0], false)?, author.load(txn, posts[1], false)?)))
        .unwrap();
    assert!(first.is_empty());
    assert!(second.is_empty());
}

#[test]
fn deleting_a_target_removes_incoming_pairs() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let user_collection = db.collection("users").unwrap();
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();

    db.write_txn(|txn| user_collection.delete_all(txn, &[users[0]]))
        .unwrap();
    let authors = db
        .read_txn(|txn| author.load(txn, posts[0], false))
        .unwrap();
    assert!(authors.is_empty());
    let backward = db
        .read_txn(|txn| author.load(txn, users[0], true))
        .unwrap();
    assert!(backward.is_empty());
}

#[test]
fn deleting_a_source_removes_outgoing_pairs() {
    let db = TestInstance::new();
    let (users, posts) = linked(&db);
    let post_collection = db.collection("posts").unwrap();
    let author = post_collection.link("author").unwrap().clone();

    db.write_txn(|txn| post_collection.delete_all(txn, &[posts[0]]))
        .unwrap();
    let written = db
        .read_txn(|txn| author.load(txn, users[0], true))
        .unwrap();
    assert_eq!(written, vec![posts[1]]);

    let friends = db.collection("users").unwrap().link("friends").unwrap().clone();
    db.write_txn(|txn| db.collection("users")?.delete_all(txn, &[users[0]]))
        .unwrap();
    let remaining = db
        .read_txn(|txn| friends.load(txn, users[0], false))
        .unwrap();
    assert!(remaining.is_empty());
}

#[test]
fn clearing_a_target_collection_clears_incoming_links() {
    let db = TestInstance::new();
    let (_, posts) = linked(&db);
    let post_collection = db.collection("posts").unwrap();
    let author = post_collection.link("author").unwrap().clone();

    db.write_txn(|txn| db.collection("users")?.clear(txn)).unwrap();
    let authors = db
        .read_txn(|txn| author.load(txn, posts[0], false))
        .unwrap();
    assert!(authors.is_empty());
}

#[test]
fn repeated_clear_empties_own_and_incoming_link_stores() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();
    let friends = users.link("friends").unwrap().clone();
    let author = db.collection("posts").unwrap().link("author").unwrap().clone();
    assert_eq!(friends.store_name(), "_users_users_friends");
    assert_eq!(author.store_name(), "_posts_users_author");

    let assert_unlinked = |user_ids: &[Id], post_ids: &[Id]| {
        db.read_txn(|txn| {
            for &user in user_ids {
                assert!(friends.load(txn, user, false)?.is_empty());
                assert!(friends.load(txn, user, true)?.is_empty());
                assert!(author.load(txn, user, true)?.is_empty());
            }
            for &post in post_ids {
                assert!(author.load(txn, post, false)?.is_empty());
            }
            Ok(())
        })
        .unwrap();
    };

    let (first, posts) = linked(&db);
    db.write_txn(|txn| users.clear(txn)).unwrap();
    assert_unlinked(&first, &posts);

    // Link fresh users to the surviving posts and clear again.
    let second = db
        .write_txn(|txn| {
            let ids = users.put_all(txn, vec![record!({"name": "Di"}), record!({"name": "Ed"})])?;
            friends.update(txn, false, ids[0], &[ids[1]], &[])?;
            friends.update(txn, false, ids[1], &[ids[0]], &[])?;
            author.update(txn, true, ids[1], &posts, &[])?;
            Ok(ids)
        })
        .unwrap();
    assert_eq!(
        db.read_txn(|txn| author.load(txn, second[1], true)).unwrap(),
        posts
    );
    db.write_txn(|txn| users.clear(txn)).unwrap();
    db.write_txn(|txn| users.clear(txn)).unwrap();
    assert_unlinked(&second, &posts);
    assert_unlinked(&first, &posts);
}

#[test]
fn unknown_link_is_an_error() {
    let db = TestInstance::new();
    let users = db.collection("users").unwrap();
    assert!(matches!(
        users.link("enemies"),
        Err(CoreError::LinkNotFound { .. })
    ));
    assert_eq!(users.links().len(), 1);
    assert_eq!(users.links()[0].target(), "users");
}
