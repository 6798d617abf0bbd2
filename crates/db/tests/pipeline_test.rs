//! Custom stages, hooks and transactions around the standard pipeline

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use elif_db::callbacks::standard::{BEFORE_CREATE, BEFORE_QUERY, CREATE, QUERY};
use elif_db::{Callback, Cond, EventError, ModelError, Scope};
use serde_json::json;

type Tracker = Arc<Mutex<Vec<String>>>;

fn tracker() -> Tracker {
    Arc::new(Mutex::new(Vec::new()))
}

fn record(tracker: &Tracker, entry: &str) {
    tracker.lock().unwrap().push(entry.to_string());
}

#[tokio::test]
async fn test_custom_stages_run_in_constraint_order() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let calls = tracker();

    let create = db.callbacks().create();
    let c = calls.clone();
    create
        .before(CREATE)
        .register_fn("audit:stamp", move |scope: &mut Scope| {
            record(&c, "stamp");
            for rec in scope.records.iter_mut() {
                rec.insert("LastName".to_string(), json!("Stamped"));
            }
        })
        .unwrap();
    let c = calls.clone();
    create
        .after(BEFORE_CREATE)
        .before("audit:stamp")
        .register_fn("audit:check", move |_scope: &mut Scope| record(&c, "check"))
        .unwrap();

    let members = db.model("Member").unwrap();
    members.insert_one(&member("Ann", "A", 20)).await.unwrap();
    assert_eq!(*calls.lock().unwrap(), vec!["check", "stamp"]);

    let ann = members.find(Cond::new().eq("FirstName", "Ann")).one().await.unwrap();
    assert_eq!(ann["LastName"], json!("Stamped"));
}

#[tokio::test]
async fn test_cycle_is_rejected_at_registration() {
    let (db, _store) = memory_db().await;
    let query = db.callbacks().query();
    let before = query.names();

    query.before("b").register_fn("a", |_s: &mut Scope| {}).unwrap();
    let err = query
        .before("a")
        .register_fn("b", |_s: &mut Scope| {})
        .unwrap_err();
    assert!(matches!(err, ModelError::Pipeline(_)));

    let mut expected = before;
    expected.push("a".to_string());
    assert_eq!(query.names(), expected);
}

struct Halt;

#[async_trait]
impl Callback for Halt {
    async fn call(&self, scope: &mut Scope) {
        scope.skip();
    }
}

#[tokio::test]
async fn test_skip_short_circuits_remaining_stages() {
    let (db, store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    db.callbacks()
        .query()
        .before(QUERY)
        .register("halt", Halt)
        .unwrap();

    let rows = db.model("Member").unwrap().find_all().all().await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(store.find_calls("member"), 0);
}

#[tokio::test]
async fn test_matching_predicate_selects_data_sources() {
    let (db, store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    db.callbacks()
        .query()
        .matching(|source| source.name == "elsewhere")
        .after(BEFORE_QUERY)
        .register("halt", Halt)
        .unwrap();

    db.model("Member").unwrap().find_all().all().await.unwrap();
    assert_eq!(store.find_calls("member"), 1);
}

#[tokio::test]
async fn test_hooks_fire_around_operations() {
    let (db, _store) = memory_db().await;
    let calls = tracker();

    // registered before the metadata exists
    let c = calls.clone();
    db.register_middleware("Mem*:before*", move |scope: &mut Scope| {
        record(&c, &format!("before {}", scope.action));
        Ok(())
    })
    .unwrap();
    db.register_record::<Member>(SOURCE).unwrap();

    let c = calls.clone();
    db.register_middleware("Member:afterSave", move |_scope: &mut Scope| {
        record(&c, "after save");
        Ok(())
    })
    .unwrap();

    let members = db.model("Member").unwrap();
    members.insert_one(&member("Ann", "A", 20)).await.unwrap();
    members
        .find(Cond::new().eq("FirstName", "Ann"))
        .update_one(&json!({"Age": 21}))
        .await
        .unwrap();
    members.find_all().count().await.unwrap();

    assert_eq!(
        *calls.lock().unwrap(),
        vec![
            "before insert_one",
            "before insert_one",
            "after save",
            "before update_one",
            "before update_one",
            "after save",
            "before query_count",
        ]
    );
}

#[tokio::test]
async fn test_hook_field_gates() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let calls = tracker();

    let c = calls.clone();
    db.register_middleware("Member:beforeUpdate:Age,LastName", move |_s: &mut Scope| {
        record(&c, "both");
        Ok(())
    })
    .unwrap();
    let c = calls.clone();
    db.register_middleware("Member:beforeUpdate:Age|LastName", move |_s: &mut Scope| {
        record(&c, "either");
        Ok(())
    })
    .unwrap();

    let members = db.model("Member").unwrap();
    members.insert_one(&member("Ann", "A", 20)).await.unwrap();
    let ann = || members.find(Cond::new().eq("FirstName", "Ann"));
    ann().update_one(&json!({"Age": 21})).await.unwrap();
    ann()
        .update_one(&json!({"Age": 22, "LastName": "B"}))
        .await
        .unwrap();
    ann().update_one(&json!({"FirstName": "Anna"})).await.unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["either", "both", "either"]);
}

#[tokio::test]
async fn test_hook_error_rejects_and_rolls_back() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    db.register_middleware("Member:afterCreate", |scope: &mut Scope| {
        let too_young = scope
            .records
            .iter()
            .any(|r| r.get("Age").and_then(|a| a.as_i64()).unwrap_or(0) < 18);
        if too_young {
            return Err(EventError::validation("members must be adults"));
        }
        Ok(())
    })
    .unwrap();

    let members = db.model("Member").unwrap();
    let err = members.insert_one(&member("Kid", "K", 9)).await.unwrap_err();
    // the insert ran before the after-hook rejected it, then rolled back
    assert!(matches!(err, ModelError::Event(_)));
    assert_eq!(err.affected(), 0);
    assert!(err.to_string().contains("members must be adults"));
    assert_eq!(members.find_all().count().await.unwrap(), 0);

    members.insert_one(&member("Ann", "A", 30)).await.unwrap();
    assert_eq!(members.find_all().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_with_transaction_commits_and_rolls_back() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();

    db.with_transaction(SOURCE, |tx| async move {
        let members = tx.model("Member")?;
        members.insert_one(&member("Ann", "A", 20)).await?;
        members.insert_one(&member("Bob", "B", 30)).await?;
        assert_eq!(members.find_all().count().await?, 2);
        Ok::<_, ModelError>(())
    })
    .await
    .unwrap();
    let members = db.model("Member").unwrap();
    assert_eq!(members.find_all().count().await.unwrap(), 2);

    let result: Result<(), ModelError> = db
        .with_transaction(SOURCE, |tx| async move {
            tx.model("Member")?
                .insert_one(&member("Cid", "C", 40))
                .await?;
            Err::<(), _>(ModelError::Query("abort".to_string()))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(members.find_all().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_uncommitted_session_is_isolated() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let session = db.start_transaction(SOURCE).await.unwrap();

    session
        .model("Member")
        .unwrap()
        .insert_one(&member("Ann", "A", 20))
        .await
        .unwrap();
    let outside = db.model("Member").unwrap();
    assert_eq!(outside.find_all().count().await.unwrap(), 0);

    session.commit().await.unwrap();
    assert_eq!(outside.find_all().count().await.unwrap(), 1);
    assert!(matches!(
        session.commit().await,
        Err(ModelError::Transaction(_))
    ));
}

struct Stall;

#[async_trait]
impl Callback for Stall {
    async fn call(&self, scope: &mut Scope) {
        let result = scope
            .run("stall", async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;
        if let Err(err) = result {
            scope.add_error(err);
        }
    }
}

#[tokio::test]
async fn test_deadline_surfaces_timeout() {
    let (db, store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    db.callbacks()
        .query()
        .before(QUERY)
        .register("stall", Stall)
        .unwrap();

    let result = db
        .model("Member")
        .unwrap()
        .find_all()
        .timeout(Duration::from_millis(20))
        .all()
        .await;
    assert!(matches!(result, Err(ModelError::Timeout(_))));
    assert_eq!(store.find_calls("member"), 0);
}
