//! Row query builder
//!
//! A small, backend-neutral description of a table read/update/delete:
//! equality filters, ordering and a row window.

use serde_json::Value;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Asc => "asc",
            Order::Desc => "desc",
        }
    }
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Column equals value
    Eq(String, Value),
    /// Column equals one of the values
    In(String, Vec<Value>),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }

    /// Evaluates the filter against a JSON row.
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, expected) => actual == expected,
            Filter::In(_, options) => options.iter().any(|option| option == actual),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<(String, Order)>,
    /// `(offset, count)` window over the ordered rows
    pub range: Option<(usize, usize)>,
}

impl Query {
    /// Starts a query selecting every column of `table`.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            range: None,
        }
    }

    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn is_in<V: Into<Value>>(mut self, column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn order(mut self, column: impl Into<String>, direction: Order) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    /// Limits the result to rows `from..=to`.
    pub fn range(mut self, from: usize, to: usize) -> Self {
        self.range = Some((from, to.max(from) - from + 1));
        self
    }

    /// Keeps the first `count` rows; zero keeps none.
    pub fn limit(mut self, count: usize) -> Self {
        self.range = Some((0, count));
        self
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|filter| filter.matches(row))
    }
}
