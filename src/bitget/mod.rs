pub mod client;
pub mod models;
pub mod rate_limit;

pub use client::BitgetSession;
