pub mod error;
mod entry;
mod key;
mod root;
mod store;

pub use crate::entry::{CacheEntry, Lookup};
pub use crate::key::validate as validate_key;
pub use crate::root::CacheRoot;
pub use crate::store::{CacheStore, Staging};
