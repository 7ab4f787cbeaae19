/// Document lifecycle tests
///
/// Save, remove and junction links against the scripted driver; every
/// statement the session sends is checked.
/// Run with: cargo test --test persist_tests

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{MockDriver, returning_ids, rows, unique_violation};
use docrel::{Field, Hook, OrmError, Registry, Schema, Value};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn registry() -> Arc<Registry> {
    let mut tagged = Schema::new()
        .field("label", Field::string())
        .field("height", Field::integer());
    tagged.pre(Hook::Save, |doc, _| {
        Box::pin(async move {
            if doc.value("label").is_none() {
                doc.set("label", "auto")?;
            }
            Ok(())
        })
    });
    tagged.post(Hook::Save, |_, _| {
        Box::pin(async move { Err(OrmError::usage("post hook failure")) })
    });

    Registry::builder()
        .model("Box", Schema::new().field("height", Field::integer().required()))
        .model("Tagged", tagged)
        .model("Widget", Schema::new().field("height", Field::integer()))
        .discriminator("Widget", "Gadget", Schema::new().field("weight", Field::integer()))
        .model(
            "Point",
            Schema::new()
                .field("line", Field::reference("Line"))
                .field("x", Field::integer())
                .field("y", Field::integer()),
        )
        .model("Line", Schema::new().field("points", Field::embedded("Point")))
        .model(
            "Student",
            Schema::new().field("name", Field::string()).field("courses", Field::many("Course")),
        )
        .model(
            "Course",
            Schema::new().field("title", Field::string()).field("students", Field::many("Student")),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_create_then_find_by_id() {
    let ids = returning_ids();
    let driver = MockDriver::with_responder(move |sql, params| {
        if sql.starts_with("SELECT \"box\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["box.id", "box.height"],
                vec![vec![Value::Integer(1), Value::Integer(5)]],
            )));
        }
        ids(sql, params)
    });
    let session = driver.session(registry());
    let boxes = session.model("Box").unwrap();

    let created = boxes.create(&json!({"height": 5})).await.unwrap();
    assert_eq!(created.id(), Some(1));
    assert!(!created.is_new());
    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "INSERT INTO \"box\" (\"height\") VALUES ($1) RETURNING \"id\"", "COMMIT"]
    );
    assert_eq!(driver.calls()[1].1, vec![Value::Integer(5)]);

    let found = boxes.find_by_id(1).await.unwrap().unwrap();
    assert_eq!(found.to_object(), json!({"id": 1, "height": 5}));
    assert!(!found.is_modified("height"));
    let (select, params) = driver.calls().last().cloned().unwrap();
    assert_eq!(
        select,
        "SELECT \"box\".\"id\" AS \"c0\", \"box\".\"height\" AS \"c1\" FROM \"box\" \
         WHERE \"box\".\"id\" = $1 ORDER BY \"box\".\"id\" ASC LIMIT 1"
    );
    assert_eq!(params, vec![Value::Integer(1)]);
}

#[tokio::test]
async fn test_missing_required_field_writes_nothing() {
    let driver = MockDriver::with_responder(returning_ids());
    let session = driver.session(registry());

    let err = session.model("Box").unwrap().create(&json!({})).await.unwrap_err();
    match err {
        OrmError::Validation(validation) => assert!(validation.has_field("height")),
        other => panic!("expected validation error, got {other:?}"),
    }
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn test_unique_violation_becomes_conflict_and_rolls_back() {
    let driver = MockDriver::with_responder(|sql, _| {
        sql.starts_with("INSERT INTO \"box\"")
            .then(|| Err(unique_violation("box_height_unique")))
    });
    let session = driver.session(registry());
    let mut doc = session.model("Box").unwrap().new_document(&json!({"height": 5})).unwrap();

    let err = doc.save(&session).await.unwrap_err();
    assert!(matches!(
        err,
        OrmError::Conflict { constraint: Some(ref name), .. } if name == "box_height_unique"
    ));
    assert_eq!(driver.statements().last().map(String::as_str), Some("ROLLBACK"));
    assert!(doc.is_new());
    assert_eq!(doc.id(), None);
}

#[tokio::test]
async fn test_embedded_items_saved_with_back_reference() {
    let driver = MockDriver::with_responder(returning_ids());
    let registry = registry();
    let session = driver.session(registry.clone());

    let mut line = registry
        .create("Line", &json!({"points": [{"x": 1, "y": 2}, {"x": 3, "y": 4}]}))
        .unwrap();
    line.save(&session).await.unwrap();

    assert_eq!(
        driver.statements(),
        vec![
            "BEGIN",
            "INSERT INTO \"line\" DEFAULT VALUES RETURNING \"id\"",
            "INSERT INTO \"point\" (\"line\", \"x\", \"y\") VALUES ($1, $2, $3) RETURNING \"id\"",
            "INSERT INTO \"point\" (\"line\", \"x\", \"y\") VALUES ($1, $2, $3) RETURNING \"id\"",
            "COMMIT",
        ]
    );
    let inserts = driver.matching("INSERT INTO \"point\"");
    assert_eq!(inserts[0].1, vec![Value::Integer(1), Value::Integer(1), Value::Integer(2)]);
    assert_eq!(inserts[1].1, vec![Value::Integer(1), Value::Integer(3), Value::Integer(4)]);

    let points = line.list("points").unwrap();
    assert_eq!(points.ids(), vec![2, 3]);
    assert!(points.iter().all(|p| p.value("line") == Some(Value::Integer(1))));
    assert!(!line.is_modified("points"));
}

#[tokio::test]
async fn test_descendant_writes_every_lineage_table() {
    let driver = MockDriver::with_responder(returning_ids());
    let session = driver.session(registry());

    let mut gadget = session
        .model("Gadget")
        .unwrap()
        .create(&json!({"height": 1, "weight": 2}))
        .await
        .unwrap();
    assert_eq!(
        driver.statements(),
        vec![
            "BEGIN",
            "INSERT INTO \"widget\" (\"height\", \"type\") VALUES ($1, $2) RETURNING \"id\"",
            "INSERT INTO \"gadget\" (\"id\", \"type\", \"weight\") VALUES ($1, $2, $3)",
            "COMMIT",
        ]
    );
    let calls = driver.calls();
    assert_eq!(calls[1].1, vec![Value::Integer(1), Value::Text("Gadget".into())]);
    assert_eq!(
        calls[2].1,
        vec![Value::Integer(1), Value::Text("Gadget".into()), Value::Integer(2)]
    );

    // only the changed column of the owning table is written
    driver.clear();
    gadget.set("weight", 5).unwrap();
    assert!(gadget.is_modified("weight"));
    gadget.save(&session).await.unwrap();
    assert_eq!(
        driver.statements(),
        vec!["BEGIN", "UPDATE \"gadget\" SET \"weight\" = $1 WHERE \"gadget\".\"id\" = $2", "COMMIT"]
    );
    assert_eq!(driver.calls()[1].1, vec![Value::Integer(5), Value::Integer(1)]);
    assert!(!gadget.is_modified("weight"));

    driver.clear();
    gadget.save(&session).await.unwrap();
    assert_eq!(driver.statements(), vec!["BEGIN", "COMMIT"]);
}

#[tokio::test]
async fn test_invalid_assignment_keeps_previous_value() {
    let registry = registry();
    let mut doc = registry.create("Box", &json!({"height": 5})).unwrap();
    doc.set("height", "abc").unwrap();
    assert_eq!(doc.value("height"), Some(Value::Integer(5)));
    doc.set("height", "7").unwrap();
    assert_eq!(doc.value("height"), Some(Value::Integer(7)));
}

#[tokio::test]
async fn test_remove_deletes_root_row() {
    let driver = MockDriver::with_responder(returning_ids());
    let session = driver.session(registry());

    let mut unsaved = session.model("Gadget").unwrap().new_document(&json!({"weight": 1})).unwrap();
    unsaved.remove(&session).await.unwrap();
    assert!(driver.statements().is_empty());

    let mut gadget = session.model("Gadget").unwrap().create(&json!({"weight": 1})).await.unwrap();
    driver.clear();
    gadget.remove(&session).await.unwrap();
    assert_eq!(driver.statements(), vec!["DELETE FROM \"widget\" WHERE \"widget\".\"id\" = $1"]);
    assert_eq!(driver.calls()[0].1, vec![Value::Integer(1)]);
    assert!(gadget.is_new());
}

fn audited_registry(removed: Arc<AtomicUsize>) -> Arc<Registry> {
    let mut audited = Schema::new().field("locked", Field::boolean());
    audited.pre(Hook::Remove, |doc, _| {
        Box::pin(async move {
            if doc.value("locked") == Some(Value::Boolean(true)) {
                return Err(OrmError::usage("document is locked"));
            }
            Ok(())
        })
    });
    audited.post(Hook::Remove, move |doc, _| {
        let removed = removed.clone();
        Box::pin(async move {
            removed.fetch_add(1, Ordering::SeqCst);
            assert!(doc.is_new());
            Err(OrmError::usage("post hook failure"))
        })
    });
    Registry::builder().model("Audited", audited).build().unwrap()
}

#[tokio::test]
async fn test_remove_hooks_wrap_the_delete() {
    let removed = Arc::new(AtomicUsize::new(0));
    let driver = MockDriver::with_responder(returning_ids());
    let session = driver.session(audited_registry(removed.clone()));
    let audited = session.model("Audited").unwrap();

    let mut open = assert_ok!(audited.create(&json!({"locked": false})).await);
    let mut locked = assert_ok!(audited.create(&json!({"locked": true})).await);
    driver.clear();

    // a failing post hook is logged, the removal still succeeds
    assert_ok!(open.remove(&session).await);
    assert_eq!(driver.statements(), vec!["DELETE FROM \"audited\" WHERE \"audited\".\"id\" = $1"]);
    assert_eq!(driver.calls()[0].1, vec![Value::Integer(1)]);
    assert_eq!(removed.load(Ordering::SeqCst), 1);
    driver.clear();

    let err = assert_err!(locked.remove(&session).await);
    assert!(matches!(err, OrmError::Usage(_)));
    assert!(driver.statements().is_empty());
    assert!(!locked.is_new());
    assert_eq!(removed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hooks_run_around_save() {
    let driver = MockDriver::with_responder(returning_ids());
    let session = driver.session(registry());

    // the failing post hook is logged, the save still succeeds
    let tagged = session.model("Tagged").unwrap().create(&json!({"height": 2})).await.unwrap();
    assert_eq!(tagged.value("label"), Some(Value::Text("auto".into())));
    assert_eq!(
        driver.statements()[1],
        "INSERT INTO \"tagged\" (\"height\", \"label\") VALUES ($1, $2) RETURNING \"id\""
    );
}

#[tokio::test]
async fn test_associate_is_idempotent() {
    let junction_inserts = Arc::new(AtomicUsize::new(0));
    let counter = junction_inserts.clone();
    let ids = returning_ids();
    let driver = MockDriver::with_responder(move |sql, params| {
        if sql.starts_with("INSERT INTO \"course_student\"") {
            // the second link of the same pair hits the primary key
            if counter.fetch_add(1, Ordering::SeqCst) > 0 {
                return Some(Err(unique_violation("course_student_pkey")));
            }
            return None;
        }
        ids(sql, params)
    });
    let session = driver.session(registry());
    let mut student = session.model("Student").unwrap().create(&json!({"name": "Ada"})).await.unwrap();
    let course = session.model("Course").unwrap().create(&json!({"title": "Logic"})).await.unwrap();
    driver.clear();

    student.associate("courses", &course, &session).await.unwrap();
    student.associate("courses", &course, &session).await.unwrap();

    let links = driver.matching("INSERT INTO \"course_student\"");
    assert_eq!(links.len(), 2);
    assert_eq!(
        links[0].0,
        "INSERT INTO \"course_student\" (\"student\", \"course\") VALUES ($1, $2) ON CONFLICT DO NOTHING"
    );
    assert_eq!(links[0].1, vec![Value::Integer(1), Value::Integer(2)]);
    assert_eq!(student.list("courses").unwrap().ids(), vec![2]);
    assert!(!student.is_modified("courses"));

    student.dissociate("courses", &course, &session).await.unwrap();
    assert_eq!(
        driver.statements().last().unwrap(),
        "DELETE FROM \"course_student\" WHERE (\"course_student\".\"student\" = $1 AND \"course_student\".\"course\" = $2)"
    );
    assert!(student.list("courses").unwrap().is_empty());
}

#[tokio::test]
async fn test_associate_requires_saved_documents() {
    let driver = MockDriver::new();
    let registry = registry();
    let session = driver.session(registry.clone());
    let mut student = registry.create("Student", &json!({"name": "Ada"})).unwrap();
    let course = registry.create("Course", &json!({"title": "Logic"})).unwrap();

    let err = student.associate("courses", &course, &session).await.unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));
    let err = student.associate("name", &course, &session).await.unwrap_err();
    assert!(matches!(err, OrmError::InvalidRelation { .. } | OrmError::Usage(_)));
    assert!(driver.statements().is_empty());
}
