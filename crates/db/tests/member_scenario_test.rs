//! End-to-end operations on the in-memory adapter

mod common;

use common::*;
use elif_db::{Cond, LogicDeleteRule, ModelError};
use serde_json::json;

#[tokio::test]
async fn test_member_crud_scenario() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let members = db.model("Member").unwrap();

    let ids = members
        .insert_many(&[
            member("Eason", "Lin", 30),
            member("Daniel", "Wu", 25),
            member("Mia", "Chen", 41),
        ])
        .await
        .unwrap();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);

    let mut eason = Member::default();
    members
        .find(Cond::new().eq("FirstName", "Eason"))
        .one_into(&mut eason)
        .await
        .unwrap();
    assert_eq!(eason.id, 1);
    assert_eq!(eason.last_name, "Lin");

    let mut all: Vec<Member> = Vec::new();
    members.find_all().all_into(&mut all).await.unwrap();
    assert_eq!(all.len(), 3);

    let daniel = || members.find(Cond::new().eq("FirstName", "Daniel"));
    assert_eq!(daniel().update_one(&json!({"Age": 26})).await.unwrap(), 1);
    assert_eq!(daniel().one().await.unwrap()["Age"], json!(26));

    assert_eq!(daniel().delete_one().await.unwrap(), 1);
    assert_eq!(daniel().count().await.unwrap(), 0);
    assert!(matches!(daniel().one().await, Err(ModelError::NotFound(_))));
    assert!(daniel().all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_logic_delete_scenario() {
    let (db, store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    db.register_logic_delete_rule(
        "Member",
        LogicDeleteRule::new(Cond::new().exists("DeletedAt", false))
            .set("DeletedAt", "$now")
            .unwrap(),
    );
    let members = db.model("Member").unwrap();
    members
        .insert_many(&[member("Eason", "Lin", 30), member("Daniel", "Wu", 25)])
        .await
        .unwrap();

    let eason = || members.find(Cond::new().eq("FirstName", "Eason"));
    assert_eq!(eason().delete_one().await.unwrap(), 1);

    // the document is still stored, only marked
    let stored = store.documents("member");
    assert_eq!(stored.len(), 2);
    assert!(stored[0]["deleted_at"].as_i64().unwrap() > 0);

    assert!(matches!(eason().one().await, Err(ModelError::NotFound(_))));
    assert_eq!(members.find_all().count().await.unwrap(), 1);

    let mut hidden = Member::default();
    eason().unscoped().one_into(&mut hidden).await.unwrap();
    assert!(hidden.deleted_at.is_some());
    assert_eq!(members.find_all().unscoped().count().await.unwrap(), 2);

    // a marked record is not marked again
    assert_eq!(eason().delete_one().await.unwrap(), 0);

    assert_eq!(eason().unscoped().delete_many().await.unwrap(), 1);
    assert_eq!(store.documents("member").len(), 1);
}

#[tokio::test]
async fn test_query_builders() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let members = db.model("Member").unwrap();
    members
        .insert_many(&[
            member("Ann", "A", 20),
            member("Bob", "B", 35),
            member("Cid", "C", 28),
            member("Dee", "D", 51),
            member("Eve", "E", 44),
        ])
        .await
        .unwrap();

    let oldest: Vec<String> = members
        .find_all()
        .order_by("-Age")
        .paginate(1, 2)
        .all()
        .await
        .unwrap()
        .iter()
        .map(|m| m["FirstName"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(oldest, vec!["Dee", "Eve"]);

    let either = members
        .find(Cond::new().eq("FirstName", "Ann"))
        .or(Cond::new().gt("Age", 40))
        .count()
        .await
        .unwrap();
    assert_eq!(either, 3);

    let narrowed = members
        .find(Cond::new().gte("Age", 28))
        .and(Cond::new().prefix("LastName", "C"))
        .all()
        .await
        .unwrap();
    assert_eq!(narrowed.len(), 1);

    let projected = members
        .find(Cond::new().eq("FirstName", "Bob"))
        .project(["FirstName"])
        .one()
        .await
        .unwrap();
    assert_eq!(projected["FirstName"], json!("Bob"));
    assert!(projected.contains_key("ID"));
    assert!(!projected.contains_key("LastName"));

    let beyond = members
        .find_all()
        .paginate(u64::MAX, u64::MAX)
        .all()
        .await
        .unwrap();
    assert!(beyond.is_empty());

    assert_eq!(members.find_all().total_pages(2).await.unwrap(), 3);
    assert!(members.find_all().total_pages(0).await.is_err());

    let young = members
        .find(Cond::new().is_in("FirstName", ["Ann", "Cid", "Zed"]))
        .update_many(&json!({"LastName": "Young"}))
        .await
        .unwrap();
    assert_eq!(young, 2);
}

#[tokio::test]
async fn test_cursor_streams_in_batches() {
    let (db, store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let members = db.model("Member").unwrap();
    let batch: Vec<Member> = (1..=5).map(|i| member(&format!("M{}", i), "X", i)).collect();
    members.insert_many(&batch).await.unwrap();
    store.reset_stats();

    // cursor batch size is 2 in the testing preset
    let mut cursor = members.find_all().order_by("Age").cursor();
    let mut ages = Vec::new();
    while let Some(m) = cursor.next_into::<Member>().await.unwrap() {
        ages.push(m.age);
    }
    assert_eq!(ages, vec![1, 2, 3, 4, 5]);
    assert_eq!(store.find_calls("member"), 3);

    let mut limited = members.find_all().order_by("Age").skip(1).limit(3).cursor();
    let mut seen = Vec::new();
    while let Some(doc) = limited.next().await.unwrap() {
        seen.push(doc["Age"].as_i64().unwrap());
    }
    assert_eq!(seen, vec![2, 3, 4]);
}

#[tokio::test]
async fn test_translation_errors_stop_before_backend() {
    let (db, store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let members = db.model("Member").unwrap();

    let result = members
        .find(Cond::new().with("FirstName ??", "x"))
        .all()
        .await;
    assert!(matches!(result, Err(ModelError::Query(_))));
    let result = members
        .find(Cond::new().regexp("FirstName", "/(/"))
        .all()
        .await;
    assert!(matches!(result, Err(ModelError::Query(_))));
    assert_eq!(store.find_calls("member"), 0);
}

#[tokio::test]
async fn test_failed_insert_rolls_back_whole_batch() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let members = db.model("Member").unwrap();
    let mut first = member("A", "A", 1);
    first.id = 7;
    let mut clash = member("B", "B", 2);
    clash.id = 7;

    let err = members
        .insert_many(&[first, clash])
        .await
        .unwrap_err();
    // the owned transaction rolled back, so nothing was affected
    assert!(matches!(err, ModelError::Database(_)));
    assert_eq!(err.affected(), 0);
    assert!(err.to_string().starts_with("Database error: "));
    assert_eq!(members.find_all().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_partial_insert_in_session_keeps_affected() {
    let (db, _store) = memory_db().await;
    db.register_record::<Member>(SOURCE).unwrap();
    let mut first = member("A", "A", 1);
    first.id = 7;
    let mut clash = member("B", "B", 2);
    clash.id = 7;

    let session = db.start_transaction(SOURCE).await.unwrap();
    let err = session
        .model("Member")
        .unwrap()
        .insert_many(&[first, clash])
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::Mutation { affected: 1, .. }));
    assert!(err.to_string().starts_with("Database error: "));

    // the caller decides: the first record is kept on commit
    session.commit().await.unwrap();
    assert_eq!(db.model("Member").unwrap().find_all().count().await.unwrap(), 1);
}
