mod bucket_page;
mod codec;
mod directory_page;

pub use bucket_page::{bucket_array_size, BucketPage};
pub use codec::{KeyCodec, ValueCodec};
pub use directory_page::{DirectoryPage, IntegrityViolation, DIRECTORY_ARRAY_SIZE, MAX_GLOBAL_DEPTH};
