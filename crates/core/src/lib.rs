pub mod chaos;
pub mod config;
pub mod error;
pub mod ids;
pub mod model;
pub mod retry;
pub mod time;
pub mod topology;

pub use error::{MeshError, Result};
