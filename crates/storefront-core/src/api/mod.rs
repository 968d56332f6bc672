//! REST side of the vendor client.
//!
//! - `transport`: the `HttpTransport` seam and its reqwest implementation
//! - `pipeline`: authentication, refresh-before-send, body decryption and
//!   the single 401 retry applied to every request
//! - `client`: `VendorApi`, typed wrappers over the storefront endpoints
//!
//! Authenticated calls carry a JWT bearer token managed by
//! [`crate::auth::TokenManager`].

pub mod client;
pub mod error;
pub mod pipeline;
pub mod transport;

pub use client::{ImageUpload, VendorApi};
pub use error::ApiError;
pub use pipeline::{ApiRequest, ApiResponse, RequestPipeline};
pub use transport::{FormPart, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody, TransportError};
