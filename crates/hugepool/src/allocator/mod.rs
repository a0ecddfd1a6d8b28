pub mod passthrough;

pub use passthrough::Passthrough;
