use crate::capture::{CaptureBuffer, Intercept};
use crate::compressor::{FlushMode, StreamCompressor};
use crate::config::CompressionConfig;
use crate::error::Error;
use crate::negotiate::{self, Decision, Negotiation, SkipReason};
use crate::transport::{RequestContext, Transport};
use http::{HeaderName, HeaderValue};
use std::io;
use tracing::{debug, error, trace, warn};

/// Where a response is in its compression lifecycle.
#[derive(Debug)]
enum Stage {
    /// Negotiation has not run; output is held back.
    Uninitialized,
    /// Output is captured and compressed through the stream.
    Active(StreamCompressor),
    /// Output passes through untouched.
    Inactive,
    /// The stream is terminated. Every later operation is a no-op.
    Finalized,
}

/// A streamed response body with on-the-fly compression.
///
/// The producer writes body bytes through this type only, either with
/// [`ChunkedResponse::write_body`] or through [`io::Write`]. Nothing reaches
/// the transport until negotiation has run, which happens lazily on the
/// first flush so that headers can still be set up to that point.
///
/// Each [`ChunkedResponse::flush_chunk`] sends everything written so far as
/// an independently decodable piece of the compressed stream. The stream is
/// terminated exactly once, by [`ChunkedResponse::end_flush`] or, failing
/// that, when the response is dropped, including while unwinding from a
/// panic in the producer.
#[derive(Debug)]
pub struct ChunkedResponse<T: Transport> {
    transport: T,
    request: RequestContext,
    config: CompressionConfig,
    capture: CaptureBuffer,
    stage: Stage,
    negotiation: Option<Negotiation>,
}

impl<T: Transport> ChunkedResponse<T> {
    /// Wraps a transport for one response.
    pub fn new(transport: T, request: RequestContext, config: CompressionConfig) -> Self {
        let mut response = Self {
            transport,
            request,
            config,
            capture: CaptureBuffer::new(),
            stage: Stage::Uninitialized,
            negotiation: None,
        };

        if !response.config.enabled {
            response.capture.detach();
            response.stage = Stage::Inactive;
            response.negotiation = Some(Negotiation::skipped(SkipReason::Disabled));
        }
        response
    }

    /// The transport this response writes to.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The negotiation outcome, once negotiation has run.
    pub fn negotiation(&self) -> Option<&Negotiation> {
        self.negotiation.as_ref()
    }

    /// The chosen compression, once negotiation has run.
    pub fn decision(&self) -> Option<Decision> {
        self.negotiation.map(|n| n.decision())
    }

    /// Returns whether the stream has been terminated.
    pub fn is_finalized(&self) -> bool {
        matches!(self.stage, Stage::Finalized)
    }

    /// Sets a response header, replacing earlier values.
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        self.transport.insert_header(name, value)
    }

    /// Adds a response header value.
    pub fn append_header(&mut self, name: HeaderName, value: HeaderValue) -> Result<(), Error> {
        self.transport.append_header(name, value)
    }

    /// Runs negotiation now instead of waiting for the first flush.
    pub fn negotiate(&mut self) -> Result<Decision, Error> {
        self.start()?;
        Ok(self.decision().unwrap_or(Decision::None))
    }

    /// Disables compression for this response.
    ///
    /// Only possible before negotiation has run, in which case held output
    /// is released unmodified and `true` is returned. Afterwards this
    /// reports whether compression is already off.
    pub fn stop(&mut self) -> Result<bool, Error> {
        if matches!(self.stage, Stage::Uninitialized) {
            self.begin(Negotiation::skipped(SkipReason::Stopped))?;
            return Ok(true);
        }
        Ok(self.decision().is_none_or(|d| d == Decision::None))
    }

    /// Writes body bytes.
    ///
    /// Bytes written after the stream was finalized are discarded.
    pub fn write_body(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if self.is_finalized() {
            warn!(len = bytes.len(), "discarding body bytes written after finalization");
            return Ok(());
        }

        match self.capture.intercept(bytes) {
            Intercept::Emit(bytes) => self.transport.write_bytes(&bytes)?,
            Intercept::Deferred if self.capture.len() >= self.config.buffer_limit => {
                self.start()?;
                if let Stage::Active(compressor) = &mut self.stage {
                    let segment = self.capture.take_and_reset();
                    let output = compressor.add(&segment, FlushMode::Accumulate)?;
                    if !output.is_empty() {
                        self.transport.write_bytes(&output)?;
                    }
                }
            }
            Intercept::Deferred => {}
        }
        Ok(())
    }

    /// Sends everything written so far to the client.
    ///
    /// With compression active the current segment is compressed with a
    /// sync flush, so the client can decode it before the body ends.
    pub fn flush_chunk(&mut self) -> Result<(), Error> {
        self.start()?;

        match &mut self.stage {
            Stage::Active(compressor) => {
                let segment = self.capture.take_and_reset();
                let output = compressor.add(&segment, FlushMode::SyncFlush)?;
                trace!(input = segment.len(), output = output.len(), "flushing compressed chunk");
                self.transport.write_bytes(&output)?;
                self.transport.flush()?;
            }
            Stage::Inactive => self.transport.flush()?,
            Stage::Finalized | Stage::Uninitialized => {}
        }
        Ok(())
    }

    /// Terminates the stream: compresses the last segment, writes the
    /// trailer and releases the compressor.
    ///
    /// Only the first call does anything.
    pub fn end_flush(&mut self) -> Result<(), Error> {
        if self.is_finalized() {
            return Ok(());
        }
        self.start()?;

        match std::mem::replace(&mut self.stage, Stage::Finalized) {
            Stage::Active(mut compressor) => {
                let segment = self.capture.take_and_reset();
                let output = compressor.add(&segment, FlushMode::Finish)?;
                trace!(input = segment.len(), output = output.len(), "flushing final chunk");
                self.transport.write_bytes(&output)?;
                self.transport.flush()?;
            }
            Stage::Inactive => self.transport.flush()?,
            Stage::Finalized | Stage::Uninitialized => {}
        }
        Ok(())
    }

    /// Finalizes the response and returns the first error, if any.
    pub fn finish(mut self) -> Result<(), Error> {
        self.end_flush()
    }

    /// Negotiates if that has not happened yet.
    fn start(&mut self) -> Result<(), Error> {
        if !matches!(self.stage, Stage::Uninitialized) {
            return Ok(());
        }

        let negotiation = if self.transport.headers_sent() {
            debug!("response head already sent, compression skipped");
            Negotiation::skipped(SkipReason::HeadersSent)
        } else {
            negotiate::decide(self.transport.headers(), &self.request, &self.config)
        };
        self.begin(negotiation)
    }

    fn begin(&mut self, negotiation: Negotiation) -> Result<(), Error> {
        negotiation.apply(&mut self.transport);
        self.negotiation = Some(negotiation);

        match negotiation.decision().codec() {
            Some(codec) => {
                self.capture.attach();
                self.stage = Stage::Active(StreamCompressor::open(codec, self.config.level));
            }
            None => {
                self.stage = Stage::Inactive;
                let held = self.capture.detach();
                if !held.is_empty() {
                    self.transport.write_bytes(&held)?;
                }
            }
        }
        Ok(())
    }
}

impl<T: Transport> io::Write for ChunkedResponse<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_body(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.flush_chunk()?)
    }
}

impl<T: Transport> Drop for ChunkedResponse<T> {
    fn drop(&mut self) {
        if self.is_finalized() {
            return;
        }
        if std::thread::panicking() {
            debug!("finalizing response while unwinding");
        }
        if let Err(e) = self.end_flush() {
            error!(error = %e, "failed to finalize response");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use http::HeaderMap;
    use http::header;
    use std::io::{Read, Write};

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn inflate(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        flate2::read::ZlibDecoder::new(data)
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    fn transport_with<I>(pairs: I) -> MemoryTransport
    where
        I: IntoIterator<Item = (&'static str, &'static str)>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(name, HeaderValue::from_static(value));
        }
        MemoryTransport::with_headers(headers)
    }

    fn respond<T: Transport>(transport: T, accept: &str) -> ChunkedResponse<T> {
        ChunkedResponse::new(
            transport,
            RequestContext::new(Some(accept), Some("Mozilla/5.0")),
            CompressionConfig::new(),
        )
    }

    #[test]
    fn test_two_segments_with_automatic_end() {
        let mut transport = transport_with([("content-type", "text/plain")]);
        {
            let mut response = respond(&mut transport, "gzip, deflate");
            response.write_body(&[b'A'; 1000]).unwrap();
            response.flush_chunk().unwrap();
            response.write_body(&[b'B'; 1000]).unwrap();
        }

        assert_eq!(transport.chunks().len(), 2);
        let decoded = gunzip(&transport.body());
        assert_eq!(decoded.len(), 2000);
        assert!(decoded[..1000].iter().all(|&b| b == b'A'));
        assert!(decoded[1000..].iter().all(|&b| b == b'B'));
    }

    #[test]
    fn test_content_encoding_set_before_body() {
        let mut transport = transport_with([("content-type", "application/json")]);
        let mut response = respond(&mut transport, "gzip");

        response.write_body(br#"{"items": []}"#).unwrap();
        assert!(!response.transport().headers_sent());
        assert!(response.transport().body().is_empty());

        response.flush_chunk().unwrap();
        assert_eq!(response.decision(), Some(Decision::Gzip));
        // MemoryTransport refuses headers once bytes are written, so the
        // header being present proves it went out first.
        assert_eq!(
            response.transport().headers().get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert_eq!(
            response.transport().headers().get(header::VARY).unwrap(),
            "accept-encoding"
        );
        response.finish().unwrap();

        assert_eq!(gunzip(&transport.body()), br#"{"items": []}"#);
    }

    #[test]
    fn test_round_trip_many_flushes() {
        let mut transport = MemoryTransport::new();
        let mut expected = Vec::new();
        {
            let mut response = respond(&mut transport, "deflate");
            for i in 0..20 {
                let line = format!("line {i}: some streamed html <li>item {i}</li>\n");
                response.write_body(line.as_bytes()).unwrap();
                expected.extend_from_slice(line.as_bytes());
                if i % 3 == 0 {
                    response.flush_chunk().unwrap();
                }
            }
            response.end_flush().unwrap();
        }

        assert_eq!(
            transport.headers().get(header::CONTENT_ENCODING).unwrap(),
            "deflate"
        );
        assert_eq!(inflate(&transport.body()), expected);
    }

    #[test]
    fn test_only_automatic_end_gives_complete_stream() {
        let mut transport = MemoryTransport::new();
        {
            let mut response = respond(&mut transport, "gzip");
            response.write_body(b"never flushed by the producer").unwrap();
        }

        assert_eq!(transport.chunks().len(), 1);
        assert_eq!(gunzip(&transport.body()), b"never flushed by the producer");
    }

    #[test]
    fn test_end_flush_is_idempotent() {
        let mut transport = MemoryTransport::new();
        let mut response = respond(&mut transport, "gzip");
        response.write_body(b"payload").unwrap();
        response.end_flush().unwrap();
        let emitted = response.transport().body();

        response.end_flush().unwrap();
        response.flush_chunk().unwrap();
        assert!(response.is_finalized());
        assert_eq!(response.transport().body(), emitted);

        drop(response);
        assert_eq!(transport.body(), emitted);
        assert_eq!(gunzip(&emitted), b"payload");
    }

    #[test]
    fn test_finalizes_when_producer_panics() {
        let mut transport = MemoryTransport::new();
        let fail = true;
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut response = respond(&mut transport, "gzip");
            response.write_body(b"partial page ").unwrap();
            response.flush_chunk().unwrap();
            response.write_body(b"then a crash").unwrap();
            if fail {
                panic!("producer failed");
            }
        }));

        assert!(result.is_err());
        assert_eq!(gunzip(&transport.body()), b"partial page then a crash");
    }

    #[test]
    fn test_uncompressible_passes_through() {
        let mut transport = transport_with([("content-type", "image/png")]);
        {
            let mut response = respond(&mut transport, "gzip, deflate");
            response.write_body(b"\x89PNG").unwrap();
            response.flush_chunk().unwrap();
            assert_eq!(response.decision(), Some(Decision::None));

            // Detached: later bytes reach the transport without a flush.
            response.write_body(b"rest").unwrap();
            assert_eq!(response.transport().pending(), b"rest");
        }

        assert!(transport.headers().get(header::CONTENT_ENCODING).is_none());
        assert!(transport.headers().get(header::VARY).is_none());
        assert_eq!(transport.body(), b"\x89PNGrest");
    }

    #[test]
    fn test_content_length_disables_compression() {
        let mut transport = transport_with([("content-length", "5")]);
        {
            let mut response = respond(&mut transport, "gzip");
            response.write_body(b"hello").unwrap();
        }

        assert!(transport.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(transport.body(), b"hello");
    }

    #[test]
    fn test_stop_before_negotiation() {
        let mut transport = MemoryTransport::new();
        {
            let mut response = respond(&mut transport, "gzip");
            response.write_body(b"held ").unwrap();
            assert!(response.stop().unwrap());
            assert_eq!(
                response.negotiation().unwrap().skip_reason(),
                Some(SkipReason::Stopped)
            );
            response.write_body(b"plain").unwrap();
        }

        assert!(transport.headers().is_empty());
        assert_eq!(transport.body(), b"held plain");
    }

    #[test]
    fn test_stop_after_negotiation() {
        let mut transport = MemoryTransport::new();
        let mut response = respond(&mut transport, "gzip");
        assert_eq!(response.negotiate().unwrap(), Decision::Gzip);
        assert!(!response.stop().unwrap());
        assert_eq!(response.decision(), Some(Decision::Gzip));
    }

    #[test]
    fn test_late_headers_skip_compression() {
        let mut transport = MemoryTransport::new();
        transport.write_bytes(b"head already out").unwrap();
        {
            let mut response = respond(&mut transport, "gzip");
            response.write_body(b" and body").unwrap();
            response.flush_chunk().unwrap();
            assert_eq!(
                response.negotiation().unwrap().skip_reason(),
                Some(SkipReason::HeadersSent)
            );
        }

        assert!(transport.headers().is_empty());
        assert_eq!(transport.body(), b"head already out and body");
    }

    #[test]
    fn test_writes_after_finalization_are_discarded() {
        let mut transport = MemoryTransport::new();
        {
            let mut response = respond(&mut transport, "gzip");
            response.write_body(b"body").unwrap();
            response.end_flush().unwrap();
            response.write_body(b"trailing junk").unwrap();
        }

        assert_eq!(gunzip(&transport.body()), b"body");
    }

    #[test]
    fn test_buffer_limit_feeds_compressor_early() {
        let mut transport = MemoryTransport::new();
        let input: Vec<u8> = (0..4096u32).map(|i| (i.wrapping_mul(2654435761) >> 24) as u8).collect();
        {
            let mut response = ChunkedResponse::new(
                &mut transport,
                RequestContext::new(Some("gzip"), None),
                CompressionConfig::new().buffer_limit(1024),
            );
            response.write_body(&input).unwrap();

            // The limit forced negotiation and compression without a flush.
            assert_eq!(response.decision(), Some(Decision::Gzip));
            assert!(response.transport().chunks().is_empty());
            assert!(!response.transport().pending().is_empty());
        }

        assert_eq!(gunzip(&transport.body()), input);
    }

    #[test]
    fn test_disabled_config_writes_through() {
        let mut transport = MemoryTransport::new();
        {
            let mut response = ChunkedResponse::new(
                &mut transport,
                RequestContext::new(Some("gzip"), None),
                CompressionConfig::new().enabled(false),
            );
            response.write_body(b"cli output").unwrap();
            assert_eq!(response.transport().pending(), b"cli output");
        }

        assert!(transport.headers().is_empty());
        assert_eq!(transport.chunks().len(), 1);
    }

    #[test]
    fn test_io_write_flushes_chunks() {
        let mut transport = transport_with([("content-type", "text/html")]);
        {
            let mut response = respond(&mut transport, "gzip");
            write!(response, "<html><body>").unwrap();
            response.flush().unwrap();
            writeln!(response, "<p>rendered later</p></body></html>").unwrap();
        }

        assert_eq!(transport.chunks().len(), 2);
        assert_eq!(
            gunzip(&transport.body()),
            b"<html><body><p>rendered later</p></body></html>\n"
        );
    }

    #[test]
    fn test_producer_headers_seen_by_negotiation() {
        let mut transport = MemoryTransport::new();
        {
            let mut response = respond(&mut transport, "gzip");
            response
                .set_header(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))
                .unwrap();
            response.write_body(b"jpeg bytes").unwrap();
        }

        assert!(transport.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(transport.body(), b"jpeg bytes");
    }
}
