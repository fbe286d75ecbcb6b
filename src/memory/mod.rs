pub mod backend;
pub mod cache;
pub mod codec;
pub mod flush;
pub mod key;
pub mod legacy;
pub mod types;

pub use cache::CacheStore;
pub use key::ContextKey;
pub use types::{ChatKind, Message, Role};
