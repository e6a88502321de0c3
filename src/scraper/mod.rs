mod client;
mod parse;

pub use client::SourceClient;
