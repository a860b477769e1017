//! Request-scoped domain types shared by the render service and the web proxy.

pub mod error;
pub mod render;
