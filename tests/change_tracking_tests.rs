// ============================================================================
// Change tracking through the session facade
// ============================================================================

mod common;

use common::{fresh_engine, fresh_session};
use rustormdb::{EntityState, OrmError, Session, Value};

#[tokio::test]
async fn test_add_save_assigns_generated_key() {
    let mut session = fresh_session("ct_add_save").await;
    let user = session.add("User", &[("name", "John".into())]).unwrap();
    assert_eq!(session.state(user).unwrap(), EntityState::Added);
    assert_eq!(session.key(user).unwrap(), Value::Null);

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(report.total(), 1);
    assert_eq!(session.state(user).unwrap(), EntityState::Unchanged);
    assert_eq!(session.key(user).unwrap(), Value::Integer(1));
}

#[tokio::test]
async fn test_saving_twice_is_a_no_op() {
    let mut session = fresh_session("ct_save_twice").await;
    session.add("User", &[("name", "John".into())]).unwrap();
    session.save_changes().await.unwrap();

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.total(), 0);
}

#[tokio::test]
async fn test_loaded_then_modified_updates_only_changed_columns() {
    let (model, engine) = fresh_engine("ct_modify").await;
    let mut seed = Session::with_engine(model.clone(), engine.clone());
    seed.add(
        "User",
        &[("name", "John".into()), ("long_description", "old".into())],
    )
    .unwrap();
    seed.save_changes().await.unwrap();

    let mut session = Session::with_engine(model.clone(), engine);
    let user = session.find("User", 1).await.unwrap().unwrap();
    assert_eq!(session.state(user).unwrap(), EntityState::Unchanged);

    session.set(user, "long_description", "new").unwrap();
    assert_eq!(session.state(user).unwrap(), EntityState::Modified);

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(session.state(user).unwrap(), EntityState::Unchanged);

    // A separate session sees the new description and the unchanged name.
    let mut verify = common::sibling_session(model, "ct_modify");
    let reloaded = verify.find("User", 1).await.unwrap().unwrap();
    assert_eq!(verify.get(reloaded, "name").unwrap(), Value::from("John"));
    assert_eq!(
        verify.get(reloaded, "long_description").unwrap(),
        Value::from("new")
    );
}

#[tokio::test]
async fn test_reverted_value_saves_nothing() {
    let mut session = fresh_session("ct_revert").await;
    session.add("User", &[("name", "John".into())]).unwrap();
    session.save_changes().await.unwrap();

    let user = session.find("User", 1).await.unwrap().unwrap();
    session.set(user, "name", "Oliver").unwrap();
    session.set(user, "name", "John").unwrap();

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.total(), 0);
}

#[tokio::test]
async fn test_add_then_delete_never_touches_the_engine() {
    let mut session = fresh_session("ct_add_delete").await;
    let user = session.add("User", &[("name", "John".into())]).unwrap();
    session.mark_deleted(user).unwrap();

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.total(), 0);
    assert_eq!(session.query("User").count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_saved_row_removes_it() {
    let mut session = fresh_session("ct_delete").await;
    session.add("User", &[("name", "John".into())]).unwrap();
    session.save_changes().await.unwrap();

    let user = session.find("User", 1).await.unwrap().unwrap();
    session.mark_deleted(user).unwrap();
    assert_eq!(session.state(user).unwrap(), EntityState::Deleted);

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(session.state(user).is_err());
    assert_eq!(session.find("User", 1).await.unwrap(), None);
}

#[tokio::test]
async fn test_find_consults_the_identity_map_first() {
    let mut session = fresh_session("ct_identity").await;
    session.add("User", &[("name", "John".into())]).unwrap();
    session.save_changes().await.unwrap();

    let first = session.find("User", 1).await.unwrap().unwrap();
    session.set(first, "long_description", "pending edit").unwrap();

    // The second load returns the same handle with in-session values intact.
    let second = session.find("User", 1).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(
        session.get(second, "long_description").unwrap(),
        Value::from("pending edit")
    );
}

#[tokio::test]
async fn test_reference_backfills_generated_principal_key() {
    let mut session = fresh_session("ct_reference").await;
    let folder = session.add("Folder", &[("name", "inbox".into())]).unwrap();
    let user = session.add("User", &[("name", "John".into())]).unwrap();
    session.set_reference(folder, "owner", user).unwrap();

    let report = session.save_changes().await.unwrap();
    assert_eq!(report.inserted, 2);
    // The user's generated key landed in the folder's foreign key.
    assert_eq!(session.get(folder, "owner_id").unwrap(), session.key(user).unwrap());
}

#[tokio::test]
async fn test_rebinding_a_saved_dependent_updates_the_foreign_key() {
    let mut session = fresh_session("ct_rebind").await;
    let alice = session.add("User", &[("name", "Alice".into())]).unwrap();
    let bob = session.add("User", &[("name", "Bob".into())]).unwrap();
    let folder = session.add("Folder", &[("name", "inbox".into())]).unwrap();
    session.set_reference(folder, "owner", alice).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(session.get(folder, "owner_id").unwrap(), Value::Integer(1));

    // Rebinding the persisted folder saves as a foreign-key update.
    session.set_reference(folder, "owner", bob).unwrap();
    let report = session.save_changes().await.unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(session.get(folder, "owner_id").unwrap(), Value::Integer(2));

    let mut verify = common::sibling_session(session.model().clone(), "ct_rebind");
    let reloaded = verify.find("Folder", 1).await.unwrap().unwrap();
    assert_eq!(verify.get(reloaded, "owner_id").unwrap(), Value::Integer(2));
}

#[tokio::test]
async fn test_set_rejects_type_mismatch_and_key_mutation() {
    let mut session = fresh_session("ct_set_rules").await;
    session.add("User", &[("name", "John".into())]).unwrap();
    session.save_changes().await.unwrap();
    let user = session.find("User", 1).await.unwrap().unwrap();

    assert!(matches!(
        session.set(user, "name", 42),
        Err(OrmError::TypeMismatch(_))
    ));
    assert!(matches!(
        session.set(user, "id", 2),
        Err(OrmError::Execution(_))
    ));
}
