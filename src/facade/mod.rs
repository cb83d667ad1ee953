pub mod orm;
pub mod schema;

pub use orm::Orm;
pub use schema::SchemaGenerator;
