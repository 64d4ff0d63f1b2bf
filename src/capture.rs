use bytes::{Bytes, BytesMut};

/// What the host should do with a chunk the producer just wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intercept {
    /// Send these bytes to the transport as-is.
    Emit(Bytes),
    /// The bytes were captured and will leave with a later flush.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureMode {
    /// Negotiation has not run, everything is held back.
    Holding,
    /// Compression is active, the segment waits for the next flush.
    Capturing,
    /// Compression is inactive, bytes flow straight through.
    Detached,
}

/// Intercepts every body byte of a response.
///
/// Until it is attached or detached, the buffer holds output back so that
/// headers can still change. Once attached it accumulates the current
/// segment; once detached it is a plain passthrough.
#[derive(Debug)]
pub struct CaptureBuffer {
    segment: BytesMut,
    mode: CaptureMode,
}

impl CaptureBuffer {
    /// Creates a buffer in the holding mode.
    pub fn new() -> Self {
        Self {
            segment: BytesMut::new(),
            mode: CaptureMode::Holding,
        }
    }

    /// Routes a produced chunk.
    pub fn intercept(&mut self, chunk: &[u8]) -> Intercept {
        match self.mode {
            CaptureMode::Detached => Intercept::Emit(Bytes::copy_from_slice(chunk)),
            CaptureMode::Holding | CaptureMode::Capturing => {
                self.segment.extend_from_slice(chunk);
                Intercept::Deferred
            }
        }
    }

    /// Returns the current segment and starts an empty one.
    pub fn take_and_reset(&mut self) -> Bytes {
        self.segment.split().freeze()
    }

    /// Starts capturing segments for compression. Held bytes stay in the
    /// current segment.
    pub fn attach(&mut self) {
        self.mode = CaptureMode::Capturing;
    }

    /// Stops intercepting and returns whatever was held, which the caller
    /// must emit before any later output.
    pub fn detach(&mut self) -> Bytes {
        self.mode = CaptureMode::Detached;
        self.take_and_reset()
    }

    /// Returns whether the buffer passes bytes straight through.
    pub fn is_detached(&self) -> bool {
        self.mode == CaptureMode::Detached
    }

    /// Size of the current segment.
    pub fn len(&self) -> usize {
        self.segment.len()
    }

    /// Returns whether the current segment is empty.
    pub fn is_empty(&self) -> bool {
        self.segment.is_empty()
    }
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new()
    }
}
