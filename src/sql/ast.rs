use crate::core::Value;

/// Column addressed through the table name or join alias it is read from.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub source: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(source: &str, column: &str) -> Self {
        Self {
            source: source.to_string(),
            column: column.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// Predicate tree of a WHERE clause or join condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare {
        column: ColumnRef,
        op: CompareOp,
        value: Value,
    },
    In {
        column: ColumnRef,
        values: Vec<Value>,
        negated: bool,
    },
    InSelect {
        column: ColumnRef,
        select: Box<Select>,
        negated: bool,
    },
    Null {
        column: ColumnRef,
        negated: bool,
    },
    Like {
        column: ColumnRef,
        pattern: String,
    },
    ColumnsEqual(ColumnRef, ColumnRef),
    And(Vec<Condition>),
    Or(Vec<Condition>),
}

impl Condition {
    pub fn compare(column: ColumnRef, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column,
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: ColumnRef, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn is_in(column: ColumnRef, values: Vec<Value>) -> Self {
        Self::In {
            column,
            values,
            negated: false,
        }
    }

    pub fn is_null(column: ColumnRef) -> Self {
        Self::Null { column, negated: false }
    }

    pub fn not_null(column: ColumnRef) -> Self {
        Self::Null { column, negated: true }
    }

    /// Conjunction, collapsing a single operand.
    pub fn all(mut conditions: Vec<Condition>) -> Self {
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Self::And(conditions)
        }
    }

    /// Disjunction, collapsing a single operand.
    pub fn any(mut conditions: Vec<Condition>) -> Self {
        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Self::Or(conditions)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: Some(alias.to_string()),
        }
    }

    /// Name columns are qualified with.
    pub fn source(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub column: ColumnRef,
    /// Rendered under its positional label, see [`Select::label`].
    pub labeled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: ColumnRef,
    pub descending: bool,
}

/// SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub projection: Vec<SelectItem>,
    /// Replaces the projection with `COUNT(*)`.
    pub count: bool,
    pub selection: Vec<Condition>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    pub fn from(table: TableRef) -> Self {
        Self {
            from: table,
            joins: Vec::new(),
            projection: Vec::new(),
            count: false,
            selection: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn column(&mut self, column: ColumnRef) -> &mut Self {
        self.projection.push(SelectItem { column, labeled: false });
        self
    }

    /// Selects `column` under a positional label so long table and column
    /// names never reach the identifier length limit.
    pub fn aliased_column(&mut self, column: ColumnRef) -> &mut Self {
        self.projection.push(SelectItem { column, labeled: true });
        self
    }

    /// Output label of the projected item at `index`.
    pub fn label(index: usize) -> String {
        format!("c{}", index)
    }

    /// `(source, column)` read by each projected item, in output order.
    pub fn sources(&self) -> Vec<(String, String)> {
        self.projection
            .iter()
            .map(|item| (item.column.source.clone(), item.column.column.clone()))
            .collect()
    }

    pub fn join(&mut self, kind: JoinKind, table: TableRef, on: Condition) -> &mut Self {
        self.joins.push(Join { kind, table, on });
        self
    }

    pub fn filter(&mut self, condition: Condition) -> &mut Self {
        self.selection.push(condition);
        self
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.from.source() == source || self.joins.iter().any(|join| join.table.source() == source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
    pub returning: Option<String>,
    /// Appends `ON CONFLICT DO NOTHING`.
    pub ignore_conflicts: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub selection: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub table: String,
    pub selection: Option<Condition>,
}

/// Root statement type.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}
