//! Network plumbing.

mod client;

pub use client::HttpClient;
