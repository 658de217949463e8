pub mod backoff;
pub mod cookies;
pub mod dead_letter;
pub mod discovery;
pub mod fetcher;
pub mod identity;
pub mod normalize;
pub mod plus_api;
pub mod progress;
