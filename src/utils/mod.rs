pub mod error;

pub use error::{FailureKind, RegistryError};
