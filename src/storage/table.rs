use crate::core::{Column, DbError, Result, Row, Schema, Value};
use std::collections::BTreeMap;

/// A single in-memory table.
///
/// Rows live under a monotonically increasing row id. The primary key (if
/// the schema declares one) and every composite unique constraint are backed
/// by ordered indexes so that key lookups and uniqueness checks do not scan.
#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<usize, Row>,
    next_row_id: usize,
    primary_index: BTreeMap<Value, usize>,
    unique_indexes: Vec<BTreeMap<Vec<Value>, usize>>,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        let unique_indexes = vec![BTreeMap::new(); schema.schema().unique_constraints().len()];
        Self {
            schema,
            rows: BTreeMap::new(),
            next_row_id: 0,
            primary_index: BTreeMap::new(),
            unique_indexes,
        }
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn insert(&mut self, row: Row) -> Result<usize> {
        self.validate_row(&row)?;
        self.check_uniqueness(&row, None)?;

        let id = self.next_row_id;
        self.next_row_id += 1;

        self.update_indexes(id, &row);
        self.rows.insert(id, row);

        Ok(id)
    }

    /// Replace the row identified by `key`. The new row may not change the key.
    pub fn update_by_key(&mut self, key: &Value, new_row: Row) -> Result<bool> {
        self.validate_row(&new_row)?;
        let Some(&id) = self.primary_index.get(key) else {
            return Ok(false);
        };

        if let Some(pk_idx) = self.schema.schema().primary_key_index()
            && &new_row[pk_idx] != key
        {
            return Err(DbError::ConstraintViolation(format!(
                "Primary key of '{}' row {} cannot change",
                self.name(),
                key
            )));
        }
        self.check_uniqueness(&new_row, Some(id))?;

        if let Some(old) = self.rows.remove(&id) {
            self.remove_from_indexes(&old);
        }
        self.update_indexes(id, &new_row);
        self.rows.insert(id, new_row);
        Ok(true)
    }

    pub fn delete_by_key(&mut self, key: &Value) -> bool {
        let Some(id) = self.primary_index.get(key).copied() else {
            return false;
        };
        self.delete_row_id(id)
    }

    /// Delete every row whose columns equal the given values.
    pub fn delete_matching(&mut self, predicate: &[(usize, Value)]) -> usize {
        let ids: Vec<usize> = self
            .rows
            .iter()
            .filter(|(_, row)| predicate.iter().all(|(idx, value)| &row[*idx] == value))
            .map(|(id, _)| *id)
            .collect();

        ids.into_iter().filter(|id| self.delete_row_id(*id)).count()
    }

    pub fn get_by_key(&self, key: &Value) -> Option<&Row> {
        self.primary_index.get(key).and_then(|id| self.rows.get(id))
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.primary_index.contains_key(key)
    }

    /// Look up a row through the `constraint`-th composite unique index.
    pub fn find_unique(&self, constraint: usize, values: &[Value]) -> Option<&Row> {
        self.unique_indexes
            .get(constraint)
            .and_then(|index| index.get(values))
            .and_then(|id| self.rows.get(id))
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.rows.values()
    }

    pub fn scan(&self) -> Vec<Row> {
        self.rows.values().cloned().collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn delete_row_id(&mut self, id: usize) -> bool {
        match self.rows.remove(&id) {
            Some(row) => {
                self.remove_from_indexes(&row);
                true
            }
            None => false,
        }
    }

    fn check_uniqueness(&self, row: &Row, ignore_id: Option<usize>) -> Result<()> {
        if let Some(pk_idx) = self.schema.schema().primary_key_index()
            && let Some(existing) = self.primary_index.get(&row[pk_idx])
            && Some(*existing) != ignore_id
        {
            return Err(DbError::ConstraintViolation(format!(
                "Unique constraint violation: primary key {} already exists in '{}'",
                row[pk_idx],
                self.name()
            )));
        }

        for (constraint, columns) in self.schema.schema().unique_constraints().iter().enumerate() {
            let values: Vec<Value> = columns.iter().map(|idx| row[*idx].clone()).collect();
            // SQL semantics: NULLs never collide
            if values.iter().any(Value::is_null) {
                continue;
            }
            if let Some(existing) = self.unique_indexes[constraint].get(&values)
                && Some(*existing) != ignore_id
            {
                let names: Vec<&str> = columns
                    .iter()
                    .map(|idx| self.schema.schema().columns()[*idx].name.as_str())
                    .collect();
                return Err(DbError::ConstraintViolation(format!(
                    "Unique constraint violation: ({}) already contains ({}) in '{}'",
                    names.join(", "),
                    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
                    self.name()
                )));
            }
        }
        Ok(())
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        let columns = self.schema.schema().columns();
        if row.len() != columns.len() {
            return Err(DbError::StorageError(format!(
                "Expected {} columns for '{}', got {}",
                columns.len(),
                self.name(),
                row.len()
            )));
        }
        for (column, value) in columns.iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }

    fn update_indexes(&mut self, id: usize, row: &Row) {
        if let Some(pk_idx) = self.schema.schema().primary_key_index() {
            self.primary_index.insert(row[pk_idx].clone(), id);
        }
        for (constraint, columns) in self.schema.schema().unique_constraints().iter().enumerate() {
            let values: Vec<Value> = columns.iter().map(|idx| row[*idx].clone()).collect();
            if values.iter().any(Value::is_null) {
                continue;
            }
            self.unique_indexes[constraint].insert(values, id);
        }
    }

    fn remove_from_indexes(&mut self, row: &Row) {
        if let Some(pk_idx) = self.schema.schema().primary_key_index() {
            self.primary_index.remove(&row[pk_idx]);
        }
        for (constraint, columns) in self.schema.schema().unique_constraints().iter().enumerate() {
            let values: Vec<Value> = columns.iter().map(|idx| row[*idx].clone()).collect();
            self.unique_indexes[constraint].remove(&values);
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: Schema,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::new(columns),
        }
    }

    pub fn from_schema(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn schema(&self) -> &Schema { &self.schema }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;

    fn users() -> Table {
        Table::new(TableSchema::new(
            "user",
            vec![
                Column::new("id", DataType::Integer).primary_key(),
                Column::new("name", DataType::Text).not_null(),
            ],
        ))
    }

    fn links() -> Table {
        let schema = Schema::new(vec![
            Column::new("user_id", DataType::Integer).not_null(),
            Column::new("label_id", DataType::Integer).not_null(),
        ])
        .with_unique(&["user_id", "label_id"])
        .unwrap();
        Table::new(TableSchema::from_schema("user_labels", schema))
    }

    #[test]
    fn test_primary_key_uniqueness() {
        let mut table = users();
        table.insert(vec![Value::Integer(1), Value::from("a")]).unwrap();
        let err = table.insert(vec![Value::Integer(1), Value::from("b")]);
        assert!(matches!(err, Err(DbError::ConstraintViolation(_))));
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_update_and_delete_by_key() {
        let mut table = users();
        table.insert(vec![Value::Integer(1), Value::from("a")]).unwrap();

        assert!(table.update_by_key(&Value::Integer(1), vec![Value::Integer(1), Value::from("z")]).unwrap());
        assert_eq!(table.get_by_key(&Value::Integer(1)).unwrap()[1], Value::from("z"));

        let err = table.update_by_key(&Value::Integer(1), vec![Value::Integer(2), Value::from("z")]);
        assert!(err.is_err());

        assert!(table.delete_by_key(&Value::Integer(1)));
        assert!(!table.delete_by_key(&Value::Integer(1)));
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_composite_unique_constraint() {
        let mut table = links();
        table.insert(vec![Value::Integer(1), Value::Integer(1)]).unwrap();
        table.insert(vec![Value::Integer(1), Value::Integer(2)]).unwrap();
        assert!(table.insert(vec![Value::Integer(1), Value::Integer(2)]).is_err());

        assert!(table.find_unique(0, &[Value::Integer(1), Value::Integer(2)]).is_some());
        assert_eq!(table.delete_matching(&[(0, Value::Integer(1))]), 2);
        assert!(table.find_unique(0, &[Value::Integer(1), Value::Integer(2)]).is_none());
    }

    #[test]
    fn test_not_null_enforced() {
        let mut table = users();
        let err = table.insert(vec![Value::Integer(1), Value::Null]);
        assert!(matches!(err, Err(DbError::ConstraintViolation(_))));
    }
}
