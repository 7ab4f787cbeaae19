/// Query builder and model statics
///
/// Statement shapes, row reification across inheritance tables and the
/// follow-up fetches of populated collections.
/// Run with: cargo test --test query_tests

mod common;

use std::sync::Arc;

use common::{MockDriver, rows};
use docrel::{Direction, Field, OrmError, Registry, Schema, Value};
use serde_json::json;
use tokio_test::assert_ok;

fn registry() -> Arc<Registry> {
    Registry::builder()
        .model("Box", Schema::new().field("height", Field::integer()).field("label", Field::string()))
        .model("Widget", Schema::new().field("height", Field::integer()))
        .discriminator("Widget", "Gadget", Schema::new().field("weight", Field::integer()))
        .model(
            "Student",
            Schema::new().field("name", Field::string()).field("courses", Field::many("Course")),
        )
        .model(
            "Course",
            Schema::new().field("title", Field::string()).field("students", Field::many("Student")),
        )
        .model(
            "Point",
            Schema::new()
                .field("line", Field::reference("Line"))
                .field("x", Field::integer())
                .field("y", Field::integer()),
        )
        .model("Line", Schema::new().field("points", Field::embedded("Point")))
        .model(
            "Author",
            Schema::new().field("name", Field::string()).field("books", Field::many("Book")),
        )
        .model(
            "Book",
            Schema::new().field("title", Field::string()).field("author", Field::reference("Author")),
        )
        .build()
        .unwrap()
}

#[test]
fn test_base_query_left_joins_descendants() {
    let driver = MockDriver::new();
    let session = driver.session(registry());
    let (sql, params) = session.model("Widget").unwrap().find(&json!({})).unwrap().to_sql();
    assert_eq!(
        sql,
        "SELECT \"widget\".\"id\" AS \"c0\", \"widget\".\"height\" AS \"c1\", \
         \"widget\".\"type\" AS \"c2\", \"gadget\".\"type\" AS \"c3\", \
         \"gadget\".\"weight\" AS \"c4\" FROM \"widget\" \
         LEFT JOIN \"gadget\" ON \"gadget\".\"id\" = \"widget\".\"id\" ORDER BY \"widget\".\"id\" ASC"
    );
    assert!(params.is_empty());
}

#[test]
fn test_descendant_query_joins_ancestors() {
    let driver = MockDriver::new();
    let session = driver.session(registry());
    let (sql, _) = session.model("Gadget").unwrap().query().unwrap().to_sql();
    assert!(sql.starts_with("SELECT \"gadget\".\"id\" AS \"c0\""));
    assert!(sql.contains("INNER JOIN \"widget\" ON \"widget\".\"id\" = \"gadget\".\"id\""));
    assert!(sql.contains("\"widget\".\"height\" AS \"c"));
}

#[test]
fn test_filter_operators_and_paging() {
    let driver = MockDriver::new();
    let session = driver.session(registry());
    let boxes = session.model("Box").unwrap();

    let (sql, params) = boxes
        .find(&json!({"height": {"$gt": "3", "$lte": 10}, "label": ["a", "b"]}))
        .unwrap()
        .sort("-height")
        .unwrap()
        .skip(5)
        .limit(10)
        .to_sql();
    assert!(sql.contains("\"box\".\"height\" > $1"), "{sql}");
    assert!(sql.contains("\"box\".\"height\" <= $2"), "{sql}");
    assert!(sql.contains("\"box\".\"label\" IN ($3, $4)"), "{sql}");
    assert!(sql.ends_with("ORDER BY \"box\".\"height\" DESC LIMIT 10 OFFSET 5"), "{sql}");
    assert_eq!(
        params,
        vec![
            Value::Integer(3),
            Value::Integer(10),
            Value::Text("a".into()),
            Value::Text("b".into())
        ]
    );

    let (sql, params) = boxes
        .find(&json!({"$or": [{"height": null}, {"label": {"$like": "x%"}}]}))
        .unwrap()
        .sort_by("label", Direction::Asc)
        .unwrap()
        .to_sql();
    assert!(sql.contains("WHERE (\"box\".\"height\" IS NULL OR \"box\".\"label\" LIKE $1)"), "{sql}");
    assert_eq!(params, vec![Value::Text("x%".into())]);
}

#[test]
fn test_unknown_filter_field_is_rejected() {
    let driver = MockDriver::new();
    let session = driver.session(registry());
    let err = session.model("Box").unwrap().find(&json!({"depth": 1})).unwrap_err();
    assert!(matches!(err, OrmError::UnknownField { ref field, .. } if field == "depth"));
    let err = session.model("Box").unwrap().find(&json!({"height": {"$near": 1}})).unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));
}

#[tokio::test]
async fn test_rows_reified_as_concrete_type() {
    let driver = MockDriver::with_responder(|sql, _| {
        sql.starts_with("SELECT \"widget\".\"id\"").then(|| {
            Ok(rows(
                &["widget.id", "widget.height", "widget.type", "gadget.type", "gadget.weight"],
                vec![
                    vec![
                        Value::Integer(1),
                        Value::Integer(4),
                        Value::Text("Widget".into()),
                        Value::Null,
                        Value::Null,
                    ],
                    vec![
                        Value::Integer(2),
                        Value::Integer(1),
                        Value::Text("Gadget".into()),
                        Value::Text("Gadget".into()),
                        Value::Integer(2),
                    ],
                ],
            ))
        })
    });
    let session = driver.session(registry());

    let widgets = session.model("Widget").unwrap().find(&json!({})).unwrap().execute().await.unwrap();
    assert_eq!(widgets.len(), 2);
    assert_eq!(widgets[0].entity_name(), "Widget");
    assert_eq!(widgets[0].value("weight"), None);
    assert_eq!(widgets[1].entity_name(), "Gadget");
    assert!(widgets[1].is_instance_of("Widget"));
    assert_eq!(widgets[1].value("weight"), Some(Value::Integer(2)));
    assert_eq!(widgets[1].value("height"), Some(Value::Integer(1)));
    assert!(!widgets[1].has_changes());
}

#[tokio::test]
async fn test_populate_many_to_many_through_junction() {
    let driver = MockDriver::with_responder(|sql, _| {
        if sql.starts_with("SELECT \"course\".\"id\"") {
            return Some(Ok(rows(
                &["course.id", "course.title"],
                vec![vec![Value::Integer(7), Value::Text("Logic".into())]],
            )));
        }
        if sql.starts_with("SELECT \"course_student\".\"course\", \"course_student\".\"student\"") {
            // a duplicated link must not duplicate the student
            return Some(Ok(rows(
                &["course", "student"],
                vec![
                    vec![Value::Integer(7), Value::Integer(1)],
                    vec![Value::Integer(7), Value::Integer(1)],
                ],
            )));
        }
        if sql.starts_with("SELECT \"student\".\"id\"") {
            return Some(Ok(rows(
                &["student.id", "student.name"],
                vec![vec![Value::Integer(1), Value::Text("Ada".into())]],
            )));
        }
        None
    });
    let session = driver.session(registry());

    let courses = session
        .model("Course")
        .unwrap()
        .find(&json!({}))
        .unwrap()
        .populate("students")
        .unwrap()
        .execute()
        .await
        .unwrap();
    assert_eq!(courses.len(), 1);
    let students = courses[0].list("students").unwrap();
    assert_eq!(students.ids(), vec![1]);
    assert_eq!(students.get(0).unwrap().value("name"), Some(Value::Text("Ada".into())));
    assert!(!courses[0].is_modified("students"));

    let student_select = driver
        .statements()
        .into_iter()
        .find(|sql| sql.starts_with("SELECT \"student\".\"id\""))
        .unwrap();
    assert!(student_select.contains(
        "WHERE \"student\".\"id\" IN (SELECT \"course_student\".\"student\" FROM \"course_student\" \
         WHERE \"course_student\".\"course\" IN ($1))"
    ));
}

#[tokio::test]
async fn test_count_uses_scalar() {
    let driver = MockDriver::with_responder(|sql, _| {
        sql.starts_with("SELECT COUNT(*)")
            .then(|| Ok(rows(&["count"], vec![vec![Value::Integer(3)]])))
    });
    let session = driver.session(registry());
    let count = session.model("Box").unwrap().count(&json!({"height": {"$gte": 2}})).await.unwrap();
    assert_eq!(count, 3);
    assert_eq!(
        driver.statements(),
        vec!["SELECT COUNT(*) AS \"count\" FROM \"box\" WHERE \"box\".\"height\" >= $1"]
    );
}

#[tokio::test]
async fn test_bulk_update_targets_matching_ids() {
    let driver = MockDriver::with_responder(|sql, _| {
        sql.starts_with("SELECT \"gadget\".\"id\" FROM")
            .then(|| Ok(rows(&["id"], vec![vec![Value::Integer(1)], vec![Value::Integer(2)]])))
    });
    let session = driver.session(registry());

    let updated = session
        .model("Gadget")
        .unwrap()
        .update(&json!({"weight": {"$gt": 1}}), &json!({"height": "9", "weight": 3}))
        .await
        .unwrap();
    assert_eq!(updated, 1);
    let statements = driver.statements();
    assert_eq!(statements.first().map(String::as_str), Some("BEGIN"));
    assert_eq!(statements.last().map(String::as_str), Some("COMMIT"));
    assert!(statements.contains(&"UPDATE \"gadget\" SET \"weight\" = $1 WHERE \"gadget\".\"id\" IN ($2, $3)".to_string()));
    assert!(statements.contains(&"UPDATE \"widget\" SET \"height\" = $1 WHERE \"widget\".\"id\" IN ($2, $3)".to_string()));
    let widget_update = driver.matching("UPDATE \"widget\"");
    assert_eq!(widget_update[0].1, vec![Value::Integer(9), Value::Integer(1), Value::Integer(2)]);

    let err = session
        .model("Gadget")
        .unwrap()
        .update(&json!({}), &json!({"type": "Widget"}))
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::Usage(_)));
}

#[tokio::test]
async fn test_remove_requires_filter_and_deletes_from_root() {
    let driver = MockDriver::with_responder(|sql, _| {
        sql.starts_with("DELETE").then(|| Ok(rows(&["count"], vec![vec![Value::Integer(2)]])))
    });
    let session = driver.session(registry());
    let gadgets = session.model("Gadget").unwrap();

    assert!(matches!(gadgets.remove(&json!({})).await, Err(OrmError::Usage(_))));
    assert!(driver.statements().is_empty());

    let removed = gadgets.remove(&json!({"weight": 2})).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(
        driver.statements(),
        vec![
            "DELETE FROM \"widget\" WHERE \"widget\".\"id\" IN (SELECT \"gadget\".\"id\" FROM \"gadget\" \
             INNER JOIN \"widget\" ON \"widget\".\"id\" = \"gadget\".\"id\" WHERE \"gadget\".\"weight\" = $1)"
        ]
    );
}

#[tokio::test]
async fn test_embedded_items_load_with_their_owners() {
    let driver = MockDriver::with_responder(|sql, _| {
        if sql.starts_with("SELECT \"line\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["c0"],
                vec![vec![Value::Integer(1)], vec![Value::Integer(2)]],
            )));
        }
        if sql.starts_with("SELECT \"point\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["c0", "c1", "c2", "c3"],
                vec![vec![Value::Integer(5), Value::Integer(1), Value::Integer(3), Value::Integer(4)]],
            )));
        }
        None
    });
    let session = driver.session(registry());

    let lines = assert_ok!(session.model("Line").unwrap().find(&json!({})).unwrap().execute().await);
    assert_eq!(
        driver.statements(),
        vec![
            "SELECT \"line\".\"id\" AS \"c0\" FROM \"line\" ORDER BY \"line\".\"id\" ASC",
            "SELECT \"point\".\"id\" AS \"c0\", \"point\".\"line\" AS \"c1\", \"point\".\"x\" AS \"c2\", \
             \"point\".\"y\" AS \"c3\" FROM \"point\" WHERE \"point\".\"line\" IN ($1, $2) ORDER BY \"point\".\"id\" ASC",
        ]
    );
    assert_eq!(driver.calls()[1].1, vec![Value::Integer(1), Value::Integer(2)]);

    let first = lines[0].list("points").unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first.get(0).unwrap().value("x"), Some(Value::Integer(3)));
    let second = lines[1].list("points").unwrap();
    assert!(second.is_empty());
    assert!(!lines[1].has_changes());
}

#[tokio::test]
async fn test_reference_to_flat_entity_is_joined() {
    let driver = MockDriver::with_responder(|sql, _| {
        sql.starts_with("SELECT \"book\".\"id\" AS \"c0\"").then(|| {
            Ok(rows(
                &["c0", "c1", "c2", "c3", "c4"],
                vec![
                    vec![
                        Value::Integer(1),
                        Value::Integer(9),
                        Value::Text("Dune".into()),
                        Value::Integer(9),
                        Value::Text("Herbert".into()),
                    ],
                    vec![Value::Integer(2), Value::Null, Value::Text("Anon".into()), Value::Null, Value::Null],
                ],
            ))
        })
    });
    let session = driver.session(registry());

    let books = assert_ok!(
        session
            .model("Book")
            .unwrap()
            .find(&json!({}))
            .unwrap()
            .populate("author")
            .unwrap()
            .execute()
            .await
    );
    assert_eq!(
        driver.statements(),
        vec![
            "SELECT \"book\".\"id\" AS \"c0\", \"book\".\"author\" AS \"c1\", \"book\".\"title\" AS \"c2\", \
             \"author__author\".\"id\" AS \"c3\", \"author__author\".\"name\" AS \"c4\" FROM \"book\" \
             LEFT JOIN \"author\" AS \"author__author\" ON \"author__author\".\"id\" = \"book\".\"author\" \
             ORDER BY \"book\".\"id\" ASC"
        ]
    );

    let author = books[0].document("author").unwrap();
    assert_eq!(author.id(), Some(9));
    assert_eq!(author.value("name"), Some(Value::Text("Herbert".into())));
    assert!(!books[0].is_modified("author"));
    assert!(books[1].document("author").is_none());
    assert_eq!(books[1].value("title"), Some(Value::Text("Anon".into())));
}

#[tokio::test]
async fn test_one_to_many_loads_by_back_reference() {
    let driver = MockDriver::with_responder(|sql, _| {
        if sql.starts_with("SELECT \"author\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["c0", "c1"],
                vec![
                    vec![Value::Integer(9), Value::Text("Herbert".into())],
                    vec![Value::Integer(10), Value::Text("Nobody".into())],
                ],
            )));
        }
        if sql.starts_with("SELECT \"book\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["c0", "c1", "c2"],
                vec![
                    vec![Value::Integer(1), Value::Integer(9), Value::Text("Dune".into())],
                    vec![Value::Integer(3), Value::Integer(9), Value::Text("Messiah".into())],
                ],
            )));
        }
        None
    });
    let session = driver.session(registry());

    let authors = assert_ok!(
        session
            .model("Author")
            .unwrap()
            .find(&json!({}))
            .unwrap()
            .populate("books")
            .unwrap()
            .execute()
            .await
    );
    assert_eq!(
        driver.statements()[1],
        "SELECT \"book\".\"id\" AS \"c0\", \"book\".\"author\" AS \"c1\", \"book\".\"title\" AS \"c2\" \
         FROM \"book\" WHERE \"book\".\"author\" IN ($1, $2) ORDER BY \"book\".\"id\" ASC"
    );
    assert_eq!(driver.calls()[1].1, vec![Value::Integer(9), Value::Integer(10)]);

    let written = authors[0].list("books").unwrap();
    assert_eq!(written.ids(), vec![1, 3]);
    assert!(authors[1].list("books").unwrap().is_empty());
    assert!(!authors[0].is_modified("books"));
}

#[tokio::test]
async fn test_populate_loaded_document() {
    let driver = MockDriver::with_responder(|sql, _| {
        if sql.starts_with("SELECT \"book\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["c0", "c1", "c2"],
                vec![vec![Value::Integer(1), Value::Integer(9), Value::Text("Dune".into())]],
            )));
        }
        if sql.starts_with("SELECT \"author\".\"id\" AS \"c0\"") {
            return Some(Ok(rows(
                &["c0", "c1"],
                vec![vec![Value::Integer(9), Value::Text("Herbert".into())]],
            )));
        }
        None
    });
    let session = driver.session(registry());

    let mut book = assert_ok!(session.model("Book").unwrap().find_by_id(1).await).unwrap();
    assert!(book.document("author").is_none());
    assert_eq!(book.value("author"), Some(Value::Integer(9)));
    driver.clear();

    assert_ok!(book.populate("author", &session).await);
    assert_eq!(
        driver.statements(),
        vec![
            "SELECT \"author\".\"id\" AS \"c0\", \"author\".\"name\" AS \"c1\" FROM \"author\" \
             WHERE \"author\".\"id\" IN ($1) ORDER BY \"author\".\"id\" ASC"
        ]
    );
    assert_eq!(driver.calls()[0].1, vec![Value::Integer(9)]);
    let author = book.document("author").unwrap();
    assert_eq!(author.value("name"), Some(Value::Text("Herbert".into())));
    assert!(!book.has_changes());
}

#[test]
fn test_unknown_entity() {
    let driver = MockDriver::new();
    let session = driver.session(registry());
    assert!(matches!(session.model("Nope"), Err(OrmError::UnknownEntity(_))));
}
