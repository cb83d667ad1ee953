//! Default naming strategy: entity and property names are snake-cased into
//! table and column names.

use crate::core::{DbError, Result};
use convert_case::{Case, Casing};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(DbError::ValidationError(format!(
            "Invalid {} name '{}'",
            kind, name
        )))
    }
}

/// `UserLabel` -> `user_label`
pub fn table_name(entity: &str) -> String {
    entity.to_case(Case::Snake)
}

/// `createdAt` -> `created_at`
pub fn column_name(property: &str) -> String {
    property.to_case(Case::Snake)
}

/// Column of an inline embedded field: `schedule` + `startDate` -> `schedule_start_date`
pub fn embedded_column_name(property: &str, field: &str) -> String {
    format!("{}_{}", column_name(property), column_name(field))
}

/// Join table of an owning many-to-many relation: `user` + `labels` -> `user_labels`
pub fn join_table_name(owner_table: &str, relation: &str) -> String {
    format!("{}_{}", owner_table, column_name(relation))
}

/// Foreign-key column pointing at `table`'s primary key: `user_label` + `id` -> `user_label_id`
pub fn join_column_name(table: &str, primary_key: &str) -> String {
    format!("{}_{}", table, column_name(primary_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        assert_eq!(table_name("UserLabel"), "user_label");
        assert_eq!(table_name("User"), "user");
        assert_eq!(join_table_name("user", "labels"), "user_labels");
        assert_eq!(join_column_name("user_label", "id"), "user_label_id");
        assert_eq!(embedded_column_name("schedule", "startDate"), "schedule_start_date");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("entity", "UserLabel").is_ok());
        assert!(validate_identifier("entity", "_x1").is_ok());
        assert!(validate_identifier("entity", "1abc").is_err());
        assert!(validate_identifier("entity", "drop table").is_err());
        assert!(validate_identifier("entity", "").is_err());
    }
}
