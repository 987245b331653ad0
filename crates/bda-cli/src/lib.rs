pub mod analyze;
pub mod cli;
pub mod doctor;
pub mod export;
pub mod inputs;

pub use cli::*;
