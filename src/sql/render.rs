use crate::core::Value;
use crate::core::naming::{qualified, quote_ident};

use super::ast::{ColumnRef, Condition, Delete, Insert, JoinKind, Select, Statement, TableRef, Update};

/// Numbered parameters collected while rendering.
#[derive(Default)]
struct Params {
    values: Vec<Value>,
}

impl Params {
    fn bind(&mut self, value: &Value) -> String {
        self.values.push(value.clone());
        format!("${}", self.values.len())
    }
}

impl Statement {
    /// SQL text with `$n` placeholders and the values bound to them.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Params::default();
        let sql = match self {
            Self::Select(select) => render_select(select, &mut params),
            Self::Insert(insert) => render_insert(insert, &mut params),
            Self::Update(update) => render_update(update, &mut params),
            Self::Delete(delete) => render_delete(delete, &mut params),
        };
        (sql, params.values)
    }
}

fn column(column: &ColumnRef) -> String {
    qualified(&column.source, &column.column)
}

fn table(table: &TableRef) -> String {
    match &table.alias {
        Some(alias) => format!("{} AS {}", quote_ident(&table.name), quote_ident(alias)),
        None => quote_ident(&table.name),
    }
}

fn render_select(select: &Select, params: &mut Params) -> String {
    let projection = if select.count {
        "COUNT(*) AS \"count\"".to_string()
    } else if select.projection.is_empty() {
        "*".to_string()
    } else {
        select
            .projection
            .iter()
            .enumerate()
            .map(|(index, item)| {
                if item.labeled {
                    format!("{} AS {}", column(&item.column), quote_ident(&Select::label(index)))
                } else {
                    column(&item.column)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, table(&select.from));
    for join in &select.joins {
        let keyword = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        };
        sql.push_str(&format!(
            " {} {} ON {}",
            keyword,
            table(&join.table),
            render_condition(&join.on, params)
        ));
    }
    if !select.selection.is_empty() {
        let clauses: Vec<String> = select
            .selection
            .iter()
            .map(|condition| render_condition(condition, params))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if !select.count {
        if !select.order_by.is_empty() {
            let order: Vec<String> = select
                .order_by
                .iter()
                .map(|o| format!("{} {}", column(&o.column), if o.descending { "DESC" } else { "ASC" }))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }
        if let Some(limit) = select.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = select.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
    }
    sql
}

fn render_condition(condition: &Condition, params: &mut Params) -> String {
    match condition {
        Condition::Compare { column: c, op, value } => {
            format!("{} {} {}", column(c), op.as_sql(), params.bind(value))
        }
        Condition::In { column: c, values, negated } => {
            if values.is_empty() {
                return if *negated { "TRUE" } else { "FALSE" }.to_string();
            }
            let placeholders: Vec<String> = values.iter().map(|v| params.bind(v)).collect();
            format!(
                "{} {}IN ({})",
                column(c),
                if *negated { "NOT " } else { "" },
                placeholders.join(", ")
            )
        }
        Condition::InSelect { column: c, select, negated } => format!(
            "{} {}IN ({})",
            column(c),
            if *negated { "NOT " } else { "" },
            render_select(select, params)
        ),
        Condition::Null { column: c, negated } => {
            format!("{} IS {}NULL", column(c), if *negated { "NOT " } else { "" })
        }
        Condition::Like { column: c, pattern } => {
            format!("{} LIKE {}", column(c), params.bind(&Value::Text(pattern.clone())))
        }
        Condition::ColumnsEqual(left, right) => format!("{} = {}", column(left), column(right)),
        Condition::And(conditions) => join_conditions(conditions, " AND ", "TRUE", params),
        Condition::Or(conditions) => join_conditions(conditions, " OR ", "FALSE", params),
    }
}

fn join_conditions(conditions: &[Condition], separator: &str, empty: &str, params: &mut Params) -> String {
    match conditions {
        [] => empty.to_string(),
        [single] => render_condition(single, params),
        many => {
            let parts: Vec<String> = many.iter().map(|c| render_condition(c, params)).collect();
            format!("({})", parts.join(separator))
        }
    }
}

fn render_insert(insert: &Insert, params: &mut Params) -> String {
    let mut sql = if insert.columns.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&insert.table))
    } else {
        let columns: Vec<String> = insert.columns.iter().map(|c| quote_ident(c)).collect();
        let values: Vec<String> = insert.values.iter().map(|v| params.bind(v)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&insert.table),
            columns.join(", "),
            values.join(", ")
        )
    };
    if insert.ignore_conflicts {
        sql.push_str(" ON CONFLICT DO NOTHING");
    }
    if let Some(returning) = &insert.returning {
        sql.push_str(&format!(" RETURNING {}", quote_ident(returning)));
    }
    sql
}

fn render_update(update: &Update, params: &mut Params) -> String {
    let assignments: Vec<String> = update
        .assignments
        .iter()
        .map(|(c, v)| format!("{} = {}", quote_ident(c), params.bind(v)))
        .collect();
    let mut sql = format!("UPDATE {} SET {}", quote_ident(&update.table), assignments.join(", "));
    if let Some(selection) = &update.selection {
        sql.push_str(" WHERE ");
        sql.push_str(&render_condition(selection, params));
    }
    sql
}

fn render_delete(delete: &Delete, params: &mut Params) -> String {
    let mut sql = format!("DELETE FROM {}", quote_ident(&delete.table));
    if let Some(selection) = &delete.selection {
        sql.push_str(" WHERE ");
        sql.push_str(&render_condition(selection, params));
    }
    sql
}
