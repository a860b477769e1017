pub mod error;
pub mod generate;
pub mod proxy;
pub mod render;
pub mod share;
