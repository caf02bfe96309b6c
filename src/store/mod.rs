pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ErrorClass, RepositoryError, RepositoryResult};
pub use memory::{Capabilities, Defects, InMemoryRepository};
pub use traits::*;
