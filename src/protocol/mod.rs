//! Memcached wire codecs used by the backends (text and binary)

pub mod binary;
pub mod command;
pub mod parser;
pub mod reply;
pub mod request;

pub use command::{Direction, MAX_KEY_LENGTH, StoreKind, is_valid_key, is_valid_key_length};
pub use parser::{ParseResult, parse};
pub use reply::Reply;
pub use request::RequestWriter;
