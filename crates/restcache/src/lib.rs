//! A client-side cache for ReST calls.
//!
//! Responses are stored on disk keyed by the canonical request identity. Concurrent identical
//! requests are coalesced into a single network call, and cached entries are refreshed in the
//! background once they are more than half-expired.
//!
//! The entry point is [`RestClient`](rest::RestClient):
//!
//! ```no_run
//! # async fn example(client: restcache::rest::RestClient) -> Result<(), Box<dyn std::error::Error>> {
//! let request = client.request("https://example.com/api?b=2&a=1").build()?;
//! let response = client.get_response_and_check(&request).await?;
//! println!("{}", response.content_as_string()?);
//! # Ok(())
//! # }
//! ```

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod error;
pub mod logging;
pub mod response;
pub mod rest;
pub mod status;
pub mod transport;
pub mod utils;
