pub mod memory;
pub mod table;

pub use memory::{InMemoryStorage, ReadView};
pub use table::{Table, TableSchema};
