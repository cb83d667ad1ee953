pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, Result};
pub use types::{Column, Row, Schema};
pub use value::{DataType, Value, DATE_FORMAT};
