//! Public types for the Muninn API.

mod entry;
mod mutation;
mod operation;

pub use entry::{CacheEntry, EntryAction, QueryInfo};
pub use mutation::{MutationDescriptor, MutationOptions};
pub use operation::{QueryOperation, WriteOperation};
