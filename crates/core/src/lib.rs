pub mod config;
pub mod error;
pub mod paths;
pub mod product;

pub use config::Config;
pub use error::{Error, Result};
pub use paths::Paths;
pub use product::{InMemoryProductRegistry, ProductContext, ProductRegistry};
