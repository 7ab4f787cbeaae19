use std::collections::HashMap;
use std::fmt;

use crate::core::Value;

pub type Row = Vec<Value>;

/// Column values of one row grouped by source: the value read from
/// `("widget", "height")` lands in `records["widget"]["height"]`.
pub type Records = HashMap<String, HashMap<String, Value>>;

/// Rows returned by the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Value of `column` in row `row`.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(index))
    }

    /// First column of the first row, the shape of `RETURNING id` and `COUNT(*)`.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }

    /// Values of `column` across all rows.
    pub fn column_values(&self, column: &str) -> Vec<Value> {
        match self.column_index(column) {
            Some(index) => self
                .rows
                .iter()
                .filter_map(|row| row.get(index).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Groups each row by source, pairing the `n`th value with `sources[n]`.
    ///
    /// Output labels are ignored, so positional aliases and duplicate
    /// column names are both fine.
    pub fn records(&self, sources: &[(String, String)]) -> Vec<Records> {
        self.rows
            .iter()
            .map(|row| {
                let mut records: Records = HashMap::new();
                for ((source, column), value) in sources.iter().zip(row) {
                    records
                        .entry(source.clone())
                        .or_default()
                        .insert(column.clone(), value.clone());
                }
                records
            })
            .collect()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() {
            return writeln!(f, "Empty result set");
        }

        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.len()).collect();
        for row in &self.rows {
            for (i, value) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(i) {
                    *width = (*width).max(value.to_string().len());
                }
            }
        }

        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(col, width)| format!("{:width$}", col, width = width))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;

        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", separator.join("-+-"))?;

        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(val, width)| format!("{:width$}", val.to_string(), width = width))
                .collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }
        write!(f, "\n{} row(s)", self.rows.len())
    }
}
