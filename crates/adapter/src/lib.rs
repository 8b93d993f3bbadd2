//! Provider adapter contract (§4.7): the trait every LLM provider
//! implements, plus a mock and a thin HTTP reference adapter. Vendor-specific
//! wire protocols are out of scope — callers bring their own `ProviderAdapter`
//! for providers not covered here.

mod client;
mod types;

pub use client::{HttpAdapter, MockAdapter, ProviderAdapter};
pub use types::{AdapterError, AdapterRequest, ClassifiedError};
