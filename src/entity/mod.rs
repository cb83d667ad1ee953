//! Entity handles and their lifecycle.

pub mod data;
pub mod fields;
pub mod handle;
pub mod key;
pub mod state;

pub use data::EntityData;
pub use fields::EntityFields;
pub(crate) use fields::ResolvedFields;
pub use handle::EntityRef;
pub use key::EntityKey;
pub use state::EntityState;
