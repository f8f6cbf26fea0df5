pub mod async_store;
pub mod hook;
pub mod store;
pub mod validator;

pub use async_store::AsyncFactStore;
pub use hook::{AsyncHook, Change, Hook};
pub use store::FactStore;
pub use validator::{TypedValidator, Validator};
