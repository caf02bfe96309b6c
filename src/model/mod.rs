pub mod common;
pub mod instance;
pub mod search;
pub mod typedef;

pub use common::*;
pub use instance::*;
pub use search::*;
pub use typedef::*;
