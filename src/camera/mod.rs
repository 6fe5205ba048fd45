pub mod fetcher;
pub mod kv;

pub use fetcher::{ConfigFetcher, Credentials, DEFAULT_REQUEST_TIMEOUT};
