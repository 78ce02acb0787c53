pub mod hash;

pub use hash::{ExtendibleHashIndex, HashIndexError};
