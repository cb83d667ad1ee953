use crate::core::{DbError, Result, Row};
use crate::metadata::EntityMapping;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Ordering and paging for `find_with`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub order_by: Vec<(String, Order)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, property: impl Into<String>, order: Order) -> Self {
        self.order_by.push((property.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    fn sort_columns(&self, mapping: &EntityMapping) -> Result<Vec<(usize, Order)>> {
        self.order_by
            .iter()
            .map(|(property, order)| {
                mapping
                    .column_index(property)
                    .map(|idx| (idx, *order))
                    .ok_or_else(|| {
                        DbError::ValidationError(format!(
                            "Cannot order '{}' by '{}'",
                            mapping.name(),
                            property
                        ))
                    })
            })
            .collect()
    }

    /// Check the ordering against the entity before any row is read.
    pub fn validate(&self, mapping: &EntityMapping) -> Result<()> {
        self.sort_columns(mapping).map(|_| ())
    }

    /// Sort (stable, NULLs first when ascending), then skip and take.
    pub fn apply<'r>(&self, mapping: &EntityMapping, mut rows: Vec<&'r Row>) -> Result<Vec<&'r Row>> {
        let columns = self.sort_columns(mapping)?;
        if !columns.is_empty() {
            rows.sort_by(|a, b| {
                columns
                    .iter()
                    .map(|(idx, order)| match order {
                        Order::Asc => a[*idx].cmp(&b[*idx]),
                        Order::Desc => b[*idx].cmp(&a[*idx]),
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        Ok(rows
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .collect())
    }

    pub(crate) fn render_suffix(&self, mapping: &EntityMapping, alias: &str) -> String {
        let mut suffix = String::new();
        if let Ok(columns) = self.sort_columns(mapping)
            && !columns.is_empty()
        {
            let parts: Vec<String> = columns
                .iter()
                .map(|(idx, order)| {
                    let name = &mapping.schema().schema().columns()[*idx].name;
                    let dir = if *order == Order::Asc { "asc" } else { "desc" };
                    format!("{}.\"{}\" {}", alias, name, dir)
                })
                .collect();
            suffix.push_str(&format!(" order by {}", parts.join(", ")));
        }
        if let Some(limit) = self.limit {
            suffix.push_str(&format!(" limit {}", limit));
        }
        if let Some(offset) = self.offset {
            suffix.push_str(&format!(" offset {}", offset));
        }
        suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};
    use crate::metadata::{EntityMetadata, MetadataRegistry};

    #[test]
    fn test_sort_and_page() {
        let registry =
            MetadataRegistry::build(vec![EntityMetadata::new("Book").nullable_property("pages", DataType::Integer)])
                .unwrap();
        let mapping = registry.entity("Book").unwrap();
        let rows: Vec<Row> = vec![
            vec![Value::Integer(1), Value::Integer(300)],
            vec![Value::Integer(2), Value::Null],
            vec![Value::Integer(3), Value::Integer(120)],
        ];
        let refs: Vec<&Row> = rows.iter().collect();

        let sorted = FindOptions::new()
            .order_by("pages", Order::Desc)
            .apply(&mapping, refs.clone())
            .unwrap();
        let ids: Vec<&Value> = sorted.iter().map(|r| &r[0]).collect();
        assert_eq!(ids, vec![&Value::Integer(1), &Value::Integer(3), &Value::Integer(2)]);

        let page = FindOptions::new()
            .order_by("id", Order::Asc)
            .offset(1)
            .limit(1)
            .apply(&mapping, refs.clone())
            .unwrap();
        assert_eq!(page[0][0], Value::Integer(2));

        assert!(FindOptions::new().order_by("title", Order::Asc).apply(&mapping, refs).is_err());
    }
}
