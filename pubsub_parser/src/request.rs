//! Parsed request types for the PubSubSQL command language.
//!
//! The parser produces one [`Request`] per command. Requests are plain data;
//! the table engine interprets them.

use std::fmt;

/// A single equality predicate, the only WHERE form accepted.
///
/// `None` in an `Option<Filter>` position matches every row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// A column with its assigned or inserted value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnValue {
    pub column: String,
    pub value: String,
}

impl ColumnValue {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Target of an UNSUBSCRIBE statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsubscribeTarget {
    /// Remove all subscriptions on the table whose filter equals the given
    /// filter.
    Table {
        table: String,
        filter: Option<Filter>,
    },
    /// Remove the one subscription with this id, whichever table holds it.
    PubSubId(u64),
}

/// A parsed statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Insert {
        table: String,
        column_values: Vec<ColumnValue>,
    },
    Select {
        table: String,
        filter: Option<Filter>,
    },
    Update {
        table: String,
        column_values: Vec<ColumnValue>,
        filter: Option<Filter>,
    },
    Delete {
        table: String,
        filter: Option<Filter>,
    },
    Subscribe {
        table: String,
        filter: Option<Filter>,
    },
    Unsubscribe { target: UnsubscribeTarget },
    Key { table: String, column: String },
    Tag { table: String, column: String },
}

impl Request {
    /// Returns the table this request addresses, if it names one.
    ///
    /// UNSUBSCRIBE by pubsubid addresses no particular table; the dispatcher
    /// fans it out instead.
    pub fn table(&self) -> Option<&str> {
        match self {
            Request::Insert { table, .. }
            | Request::Select { table, .. }
            | Request::Update { table, .. }
            | Request::Delete { table, .. }
            | Request::Subscribe { table, .. }
            | Request::Key { table, .. }
            | Request::Tag { table, .. } => Some(table),
            Request::Unsubscribe { target } => match target {
                UnsubscribeTarget::Table { table, .. } => Some(table),
                UnsubscribeTarget::PubSubId(_) => None,
            },
        }
    }
}

/// Quotes a value for the canonical statement form.
fn quoted(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn write_filter(f: &mut fmt::Formatter<'_>, filter: &Option<Filter>) -> fmt::Result {
    if let Some(filter) = filter {
        write!(f, " where {} = {}", filter.column, quoted(&filter.value))?;
    }
    Ok(())
}

/// The canonical statement form: parsing the displayed text yields an equal
/// request.
impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::Insert {
                table,
                column_values,
            } => {
                write!(f, "insert into {} (", table)?;
                for (i, cv) in column_values.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&cv.column)?;
                }
                f.write_str(") values (")?;
                for (i, cv) in column_values.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&quoted(&cv.value))?;
                }
                f.write_str(")")
            },
            Request::Select { table, filter } => {
                write!(f, "select * from {}", table)?;
                write_filter(f, filter)
            },
            Request::Update {
                table,
                column_values,
                filter,
            } => {
                write!(f, "update {} set ", table)?;
                for (i, cv) in column_values.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} = {}", cv.column, quoted(&cv.value))?;
                }
                write_filter(f, filter)
            },
            Request::Delete { table, filter } => {
                write!(f, "delete from {}", table)?;
                write_filter(f, filter)
            },
            Request::Subscribe { table, filter } => {
                write!(f, "subscribe * from {}", table)?;
                write_filter(f, filter)
            },
            Request::Unsubscribe { target } => match target {
                UnsubscribeTarget::Table { table, filter } => {
                    write!(f, "unsubscribe from {}", table)?;
                    write_filter(f, filter)
                },
                UnsubscribeTarget::PubSubId(id) => {
                    write!(f, "unsubscribe from {}", id)
                },
            },
            Request::Key { table, column } => write!(f, "key {} {}", table, column),
            Request::Tag { table, column } => write!(f, "tag {} {}", table, column),
        }
    }
}
