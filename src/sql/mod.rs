//! Statement AST rendered to parameterized Postgres SQL.

mod ast;
mod render;

pub use ast::{
    ColumnRef, CompareOp, Condition, Delete, Insert, Join, JoinKind, OrderBy, Select, SelectItem, Statement,
    TableRef, Update,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    #[test]
    fn test_select_with_joins_and_params() {
        let mut select = Select::from(TableRef::new("gadget"));
        select
            .aliased_column(ColumnRef::new("gadget", "id"))
            .aliased_column(ColumnRef::new("widget", "height"))
            .join(
                JoinKind::Inner,
                TableRef::new("widget"),
                Condition::ColumnsEqual(ColumnRef::new("widget", "id"), ColumnRef::new("gadget", "id")),
            )
            .filter(Condition::compare(ColumnRef::new("widget", "height"), CompareOp::Gt, 3))
            .filter(Condition::any(vec![
                Condition::eq(ColumnRef::new("gadget", "weight"), 2),
                Condition::is_null(ColumnRef::new("gadget", "weight")),
            ]));
        select.order_by.push(OrderBy {
            column: ColumnRef::new("widget", "height"),
            descending: true,
        });
        select.limit = Some(10);
        select.offset = Some(5);

        assert_eq!(
            select.sources(),
            vec![("gadget".to_string(), "id".to_string()), ("widget".to_string(), "height".to_string())]
        );
        let (sql, params) = Statement::Select(select).to_sql();
        assert_eq!(
            sql,
            "SELECT \"gadget\".\"id\" AS \"c0\", \"widget\".\"height\" AS \"c1\" \
             FROM \"gadget\" INNER JOIN \"widget\" ON \"widget\".\"id\" = \"gadget\".\"id\" \
             WHERE \"widget\".\"height\" > $1 AND (\"gadget\".\"weight\" = $2 OR \"gadget\".\"weight\" IS NULL) \
             ORDER BY \"widget\".\"height\" DESC LIMIT 10 OFFSET 5"
        );
        assert_eq!(params, vec![Value::Integer(3), Value::Integer(2)]);
    }

    #[test]
    fn test_count_drops_order_and_limit() {
        let mut select = Select::from(TableRef::new("widget"));
        select.count = true;
        select.limit = Some(1);
        let (sql, _) = Statement::Select(select).to_sql();
        assert_eq!(sql, "SELECT COUNT(*) AS \"count\" FROM \"widget\"");
    }

    #[test]
    fn test_empty_in_list() {
        let mut select = Select::from(TableRef::new("point"));
        select.filter(Condition::is_in(ColumnRef::new("point", "line"), vec![]));
        let (sql, params) = Statement::Select(select).to_sql();
        assert_eq!(sql, "SELECT * FROM \"point\" WHERE FALSE");
        assert!(params.is_empty());
    }

    #[test]
    fn test_delete_with_subquery_shares_numbering() {
        let mut ids = Select::from(TableRef::new("gadget"));
        ids.column(ColumnRef::new("gadget", "id"))
            .filter(Condition::eq(ColumnRef::new("gadget", "weight"), 2));
        let delete = Delete {
            table: "widget".into(),
            selection: Some(Condition::InSelect {
                column: ColumnRef::new("widget", "id"),
                select: Box::new(ids),
                negated: false,
            }),
        };
        let (sql, params) = Statement::Delete(delete).to_sql();
        assert_eq!(
            sql,
            "DELETE FROM \"widget\" WHERE \"widget\".\"id\" IN (SELECT \"gadget\".\"id\" FROM \"gadget\" WHERE \"gadget\".\"weight\" = $1)"
        );
        assert_eq!(params, vec![Value::Integer(2)]);
    }

    #[test]
    fn test_insert_variants() {
        let insert = Insert {
            table: "course_student".into(),
            columns: vec!["course".into(), "student".into()],
            values: vec![Value::Integer(1), Value::Integer(2)],
            returning: None,
            ignore_conflicts: true,
        };
        assert_eq!(
            Statement::Insert(insert).to_sql().0,
            "INSERT INTO \"course_student\" (\"course\", \"student\") VALUES ($1, $2) ON CONFLICT DO NOTHING"
        );

        let empty = Insert {
            table: "widget".into(),
            columns: vec![],
            values: vec![],
            returning: Some("id".into()),
            ignore_conflicts: false,
        };
        assert_eq!(
            Statement::Insert(empty).to_sql().0,
            "INSERT INTO \"widget\" DEFAULT VALUES RETURNING \"id\""
        );
    }
}
