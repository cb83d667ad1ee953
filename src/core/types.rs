use super::{DbError, Result, DataType, Value};

pub type Row = Vec<Value>;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> Result<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(DbError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(DbError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
    /// Composite unique constraints, as column index lists.
    unique: Vec<Vec<usize>>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            unique: Vec::new(),
        }
    }

    pub fn with_unique(mut self, column_names: &[&str]) -> Result<Self> {
        let mut indexes = Vec::with_capacity(column_names.len());
        for name in column_names {
            let idx = self.find_column_index(name).ok_or_else(|| {
                DbError::StorageError(format!("Unique constraint references unknown column '{}'", name))
            })?;
            indexes.push(idx);
        }
        self.unique.push(indexes);
        Ok(self)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn unique_constraints(&self) -> &[Vec<usize>] {
        &self.unique
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|col| col.primary_key)
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_key_is_not_null() {
        let col = Column::new("id", DataType::Integer).primary_key();
        assert!(col.validate(&Value::Null).is_err());
        assert!(col.validate(&Value::Integer(1)).is_ok());
    }

    #[test]
    fn test_unique_constraint_resolves_columns() {
        let schema = Schema::new(vec![
            Column::new("a_id", DataType::Integer),
            Column::new("b_id", DataType::Integer),
        ])
        .with_unique(&["a_id", "b_id"])
        .unwrap();
        assert_eq!(schema.unique_constraints(), &[vec![0, 1]]);

        let err = Schema::new(vec![]).with_unique(&["missing"]);
        assert!(err.is_err());
    }
}
