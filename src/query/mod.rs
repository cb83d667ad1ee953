//! Filters over entities, compiled against metadata and evaluated over a
//! consistent read view of the table store.

pub mod compile;
pub mod existence;
pub mod filter;
pub mod options;
mod render;

pub use compile::CompiledFilter;
pub use existence::RelationExistencePredicate;
pub use filter::{CollectionOperator, Condition, Filter, FilterNode};
pub use options::{FindOptions, Order};
