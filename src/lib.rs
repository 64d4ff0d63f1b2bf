//! Streamed HTTP response compression with incremental flushing.
//!
//! A producer writes a response body piece by piece through a
//! [`ChunkedResponse`]. The first flush negotiates compression against the
//! response headers and the client's `Accept-Encoding`; from then on every
//! [`ChunkedResponse::flush_chunk`] pushes a sync-flushed piece of a gzip or
//! deflate stream to the [`Transport`], so the client can start decoding
//! and rendering before the body is complete. The stream is terminated
//! exactly once, either explicitly or when the response is dropped.
//!
//! # Example
//!
//! ```ignore
//! use chunked_compression::{ChunkedResponse, CompressionConfig, RequestContext};
//! use std::io::Write;
//!
//! let mut response = ChunkedResponse::new(
//!     transport,
//!     RequestContext::from_request(&request),
//!     CompressionConfig::new(),
//! );
//! write!(response, "<html><head>...</head>")?;
//! response.flush_chunk()?; // the client can render the head already
//! write!(response, "<body>...</body></html>")?;
//! response.finish()?;
//! ```
//!
//! # Compression Rules
//!
//! The response is **not** compressed when:
//! - `Content-Encoding` is already set to anything but `identity`
//! - `Content-Length` is set, or a sendfile header (`X-Sendfile`,
//!   `X-Accel-Redirect`) hands the body to the server
//! - `Content-Type` is not in the compressible allow-list (text, JSON,
//!   XML variants, SVG, JavaScript, octet-stream)
//! - the client accepts neither `gzip` nor `deflate`
//! - the response head was sent before negotiation ran
//!
//! # Response Modifications
//!
//! When compression is applied:
//! - `Content-Encoding` is set to the codec used
//! - `Accept-Ranges` is removed
//!
//! Whenever negotiation looks at the client, `Vary` gains
//! `Accept-Encoding`, except for legacy browsers (`MSIE`) that end up
//! without compression.

#![deny(missing_docs)]

mod capture;
mod codec;
mod compressor;
mod config;
mod error;
mod negotiate;
mod response;
mod transport;

pub use capture::{CaptureBuffer, Intercept};
pub use codec::Codec;
pub use compression_core::Level;
pub use compressor::{FlushMode, StreamCompressor, StreamState};
pub use config::{CompressionConfig, DEFAULT_BUFFER_LIMIT};
pub use error::Error;
pub use negotiate::{Decision, Negotiation, SkipReason, decide};
pub use response::ChunkedResponse;
pub use transport::{ChunkBody, MemoryTransport, RequestContext, Transport};
