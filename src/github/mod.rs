mod client;
pub use client::*;

mod models;
pub use models::*;
