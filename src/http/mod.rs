//! Rate-limit-aware HTTP plumbing shared by the forge ingester and the
//! embedding/LLM clients that need raw exchange capture.

pub mod client;
pub mod paginate;

pub use client::{redact_headers, ExchangeSink, HttpClient, JsonRequest, RawRecord};
pub use paginate::{extract_page_info, paginate_connection, PageInfo};
