pub mod forget;
pub mod import;
pub mod inspect;
pub mod keys;
pub mod stats;
