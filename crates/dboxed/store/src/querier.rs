//! Generic row queries built from a column/value [`Filter`].
//!
//! Column names always come from code; values are bound as parameters.

use dboxed_types::ids::EntityId;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};

use crate::entity::{Entity, Record};
use crate::error::StorageResult;

/// Value compared against a column
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Int(i64),
    Null,
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for SqlValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u16> for SqlValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Int(i64::from(value))
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

#[derive(Debug, Clone)]
enum Condition {
    Eq(&'static str, SqlValue),
    Gt(&'static str, SqlValue),
    IsNull(&'static str),
    IsNotNull(&'static str),
}

/// Conjunction of column conditions plus an optional ordering
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
    order_by: Option<&'static str>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `column = value`; a null value becomes `column IS NULL`.
    pub fn eq(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        let condition = match value.into() {
            SqlValue::Null => Condition::IsNull(column),
            value => Condition::Eq(column, value),
        };
        self.conditions.push(condition);
        self
    }

    pub fn id<I: EntityId>(self, column: &'static str, id: I) -> Self {
        self.eq(column, id.to_db())
    }

    pub fn gt(mut self, column: &'static str, value: impl Into<SqlValue>) -> Self {
        self.conditions.push(Condition::Gt(column, value.into()));
        self
    }

    pub fn is_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNull(column));
        self
    }

    pub fn is_not_null(mut self, column: &'static str) -> Self {
        self.conditions.push(Condition::IsNotNull(column));
        self
    }

    /// Only rows that are not soft-deleted
    pub fn live(self) -> Self {
        self.is_null("deleted_at")
    }

    pub fn order_by(mut self, column: &'static str) -> Self {
        self.order_by = Some(column);
        self
    }

    pub(crate) fn push_where(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        for (i, condition) in self.conditions.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            match condition {
                Condition::Eq(column, value) => {
                    qb.push(*column).push(" = ");
                    push_value(qb, value);
                }
                Condition::Gt(column, value) => {
                    qb.push(*column).push(" > ");
                    push_value(qb, value);
                }
                Condition::IsNull(column) => {
                    qb.push(*column).push(" IS NULL");
                }
                Condition::IsNotNull(column) => {
                    qb.push(*column).push(" IS NOT NULL");
                }
            }
        }
    }

    fn push_order(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if let Some(column) = self.order_by {
            qb.push(" ORDER BY ").push(column);
        }
    }
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &SqlValue) {
    match value {
        SqlValue::Text(text) => {
            qb.push_bind(text.clone());
        }
        SqlValue::Int(int) => {
            qb.push_bind(*int);
        }
        SqlValue::Null => {
            qb.push("NULL");
        }
    }
}

/// Fetch the first row matching the filter.
pub async fn find_one<R: Record>(
    conn: &mut SqliteConnection,
    filter: &Filter,
) -> StorageResult<Option<R>> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", R::TABLE));
    filter.push_where(&mut qb);
    filter.push_order(&mut qb);
    qb.push(" LIMIT 1");

    let row = qb.build().fetch_optional(&mut *conn).await?;
    row.as_ref().map(R::from_row).transpose()
}

/// Fetch every row matching the filter.
pub async fn find_all<R: Record>(
    conn: &mut SqliteConnection,
    filter: &Filter,
) -> StorageResult<Vec<R>> {
    let mut qb = QueryBuilder::new(format!("SELECT * FROM {}", R::TABLE));
    filter.push_where(&mut qb);
    filter.push_order(&mut qb);

    let rows = qb.build().fetch_all(&mut *conn).await?;
    rows.iter().map(R::from_row).collect()
}

pub async fn count<R: Record>(conn: &mut SqliteConnection, filter: &Filter) -> StorageResult<i64> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", R::TABLE));
    filter.push_where(&mut qb);

    let count = qb.build_query_scalar::<i64>().fetch_one(&mut *conn).await?;
    Ok(count)
}

/// Delete every row matching the filter, returning how many went away.
pub async fn delete_where<R: Record>(
    conn: &mut SqliteConnection,
    filter: &Filter,
) -> StorageResult<u64> {
    let mut qb = QueryBuilder::new(format!("DELETE FROM {}", R::TABLE));
    filter.push_where(&mut qb);

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Fetch an entity by id, soft-deleted or not.
pub async fn get_by_id<E: Entity>(
    conn: &mut SqliteConnection,
    id: E::Id,
) -> StorageResult<Option<E>> {
    find_one(conn, &Filter::new().id("id", id)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filter: &Filter) -> String {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT * FROM t");
        filter.push_where(&mut qb);
        filter.push_order(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn test_empty_filter_has_no_where() {
        assert_eq!(render(&Filter::new()), "SELECT * FROM t");
    }

    #[test]
    fn test_filter_renders_conditions() {
        let filter = Filter::new()
            .eq("name", "web")
            .eq("network_id", None::<String>)
            .gt("change_seq", 5i64)
            .live()
            .order_by("change_seq");
        assert_eq!(
            render(&filter),
            "SELECT * FROM t WHERE name = ? AND network_id IS NULL AND change_seq > ? AND deleted_at IS NULL ORDER BY change_seq"
        );
    }
}
