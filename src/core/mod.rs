// Core modules implementing field decoding, content types, storage, and error modeling.
pub mod codec;
pub mod error;
pub mod schema;
pub mod store;
pub mod value;
