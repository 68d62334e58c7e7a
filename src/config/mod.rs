pub mod manager;
pub mod models;
pub mod validation;

pub use manager::*;
pub use models::*;
pub use validation::*;
