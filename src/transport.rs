use crate::error::Error;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response};
use http_body::{Body, Frame};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The host side of a response: header sink and byte sink.
///
/// Implementations own the wire framing. Once [`Transport::flush`] pushes
/// bytes out, the host is expected to frame them (e.g. as an HTTP chunk) on
/// its own.
pub trait Transport {
    /// Headers committed so far.
    fn headers(&self) -> &HeaderMap;

    /// Returns whether the response head has already been sent.
    fn headers_sent(&self) -> bool;

    /// Sets a header, replacing any previous value.
    ///
    /// Returns [`Error::LateHeaderMutation`] once headers are sent.
    fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error>;

    /// Adds a header value without removing existing ones.
    fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error>;

    /// Removes a header.
    fn remove_header(&mut self, name: &HeaderName) -> Result<(), Error>;

    /// Queues body bytes, committing the response head first if needed.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Pushes queued bytes to the client immediately.
    fn flush(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn headers(&self) -> &HeaderMap {
        (**self).headers()
    }

    fn headers_sent(&self) -> bool {
        (**self).headers_sent()
    }

    fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        (**self).insert_header(name, value)
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        (**self).append_header(name, value)
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), Error> {
        (**self).remove_header(name)
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_bytes(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Client capability signals taken from the inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    accept_encoding: Option<String>,
    user_agent: Option<String>,
}

impl RequestContext {
    /// Creates a context from raw header values.
    pub fn new(accept_encoding: Option<&str>, user_agent: Option<&str>) -> Self {
        Self {
            accept_encoding: accept_encoding.map(str::to_owned),
            user_agent: user_agent.map(str::to_owned),
        }
    }

    /// Extracts the capability headers from a request.
    ///
    /// Accept-Encoding sent over several field lines is joined into one
    /// comma-separated list. Lines that are not valid UTF-8 are skipped.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let accept_encoding: Vec<&str> = req
            .headers()
            .get_all(http::header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let user_agent = req
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok());

        Self {
            accept_encoding: (!accept_encoding.is_empty()).then(|| accept_encoding.join(", ")),
            user_agent: user_agent.map(str::to_owned),
        }
    }

    /// The Accept-Encoding value, if the client sent one.
    pub fn accept_encoding(&self) -> Option<&str> {
        self.accept_encoding.as_deref()
    }

    /// The User-Agent value, if the client sent one.
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }
}

/// A transport that records everything in memory.
///
/// Every [`Transport::flush`] closes the current chunk, so `chunks()` shows
/// exactly what a chunked-transfer host would put on the wire. Useful for
/// tests and for hosts that hand a finished [`Response`] to another layer.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    headers: HeaderMap,
    headers_sent: bool,
    pending: Vec<u8>,
    chunks: Vec<Bytes>,
}

impl MemoryTransport {
    /// Creates an empty transport with no headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a transport with headers already set upstream.
    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            headers,
            ..Self::default()
        }
    }

    /// Chunks released by flushes, in order.
    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Bytes written but not yet flushed.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// All body bytes written so far, flushed or not.
    pub fn body(&self) -> Vec<u8> {
        let mut body: Vec<u8> = self.chunks.iter().flat_map(|c| c.iter().copied()).collect();
        body.extend_from_slice(&self.pending);
        body
    }

    /// Converts the recorded exchange into a response.
    ///
    /// Unflushed bytes become a final chunk.
    pub fn into_response(mut self) -> Response<ChunkBody> {
        if !self.pending.is_empty() {
            self.chunks.push(Bytes::from(std::mem::take(&mut self.pending)));
        }

        let mut response = Response::new(ChunkBody::new(self.chunks));
        *response.headers_mut() = self.headers;
        response
    }

    fn check_open(&self, name: &HeaderName) -> Result<(), Error> {
        if self.headers_sent {
            Err(Error::late_header(name.clone()))
        } else {
            Ok(())
        }
    }
}

impl Transport for MemoryTransport {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    fn insert_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        self.check_open(&name)?;
        self.headers.insert(name, value);
        Ok(())
    }

    fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        self.check_open(&name)?;
        self.headers.append(name, value);
        Ok(())
    }

    fn remove_header(&mut self, name: &HeaderName) -> Result<(), Error> {
        self.check_open(name)?;
        self.headers.remove(name);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.headers_sent = true;
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.headers_sent = true;
        if !self.pending.is_empty() {
            self.chunks.push(Bytes::from(std::mem::take(&mut self.pending)));
        }
        Ok(())
    }
}

/// A response body yielding pre-recorded chunks one frame at a time.
#[derive(Debug, Default)]
pub struct ChunkBody {
    chunks: VecDeque<Bytes>,
}

impl ChunkBody {
    /// Creates a body from chunks in emission order.
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
    {
        Self {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
        }
    }
}

impl Body for ChunkBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.chunks.pop_front().map(|chunk| Ok(Frame::data(chunk))))
    }

    fn is_end_stream(&self) -> bool {
        self.chunks.is_empty()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        let len = self.chunks.iter().map(|c| c.len() as u64).sum();
        http_body::SizeHint::with_exact(len)
    }
}
