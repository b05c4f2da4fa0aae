pub mod error;
pub mod headers;

pub use error::{ErrorKind, Result, VaultError};
pub use headers::RequestHeaders;
