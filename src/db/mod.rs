pub mod filters;
pub mod store;

pub use filters::MovieFilter;
pub use store::{Store, EMBEDDING_DIM};
