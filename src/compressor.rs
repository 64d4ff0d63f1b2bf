use crate::codec::Codec;
use crate::error::Error;
use bytes::{Bytes, BytesMut};
use compression_codecs::EncodeV2;
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::fmt;
use std::io;
use tracing::{debug, trace};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// How far [`StreamCompressor::add`] pushes the compressed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Feed the compression window, emitting output only when the encoder
    /// chooses to.
    Accumulate,
    /// Emit every pending byte up to a byte-aligned boundary a streaming
    /// decoder can consume, keeping the window for later segments.
    SyncFlush,
    /// Emit everything, write the trailer and close the stream.
    Finish,
}

/// Lifecycle of a compression stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Opened, nothing fed yet.
    Idle,
    /// At least one `add` has run.
    Active,
    /// The trailer has been written. Terminal.
    Finalized,
}

/// A single incremental compression stream for one response.
pub struct StreamCompressor {
    codec: Codec,
    encoder: Box<dyn EncodeV2 + Send>,
    output_buffer: Vec<u8>,
    state: StreamState,
    total_in: u64,
    total_out: u64,
}

impl StreamCompressor {
    /// Opens a stream for `codec` at the given level.
    pub fn open(codec: Codec, level: Level) -> Self {
        Self {
            codec,
            encoder: codec.encoder(level),
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
            state: StreamState::Idle,
            total_in: 0,
            total_out: 0,
        }
    }

    /// The codec this stream produces.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Uncompressed bytes consumed so far.
    pub fn total_in(&self) -> u64 {
        self.total_in
    }

    /// Compressed bytes produced so far.
    pub fn total_out(&self) -> u64 {
        self.total_out
    }

    /// Compresses `input` and returns whatever output `mode` releases.
    ///
    /// Fails with [`Error::StreamClosed`] once a `Finish` has run.
    pub fn add(&mut self, input: &[u8], mode: FlushMode) -> Result<Bytes, Error> {
        if self.state == StreamState::Finalized {
            return Err(Error::StreamClosed);
        }
        self.state = StreamState::Active;

        let mut all_output = BytesMut::new();
        let result = self
            .encode(input, &mut all_output)
            .and_then(|()| match mode {
                FlushMode::Accumulate => Ok(()),
                FlushMode::SyncFlush => self.drain(&mut all_output, false),
                FlushMode::Finish => self.drain(&mut all_output, true),
            });

        if mode == FlushMode::Finish {
            // The handle is spent even when the trailer could not be written.
            self.state = StreamState::Finalized;
        }
        result?;

        self.total_in += input.len() as u64;
        self.total_out += all_output.len() as u64;
        trace!(
            codec = self.codec.content_encoding(),
            ?mode,
            input = input.len(),
            output = all_output.len(),
            "compressed segment"
        );
        if self.state == StreamState::Finalized {
            debug!(
                codec = self.codec.content_encoding(),
                total_in = self.total_in,
                total_out = self.total_out,
                "compression stream finished"
            );
        }

        Ok(all_output.freeze())
    }

    /// Feeds `input` into the encoder until all of it is consumed.
    fn encode(&mut self, input: &[u8], all_output: &mut BytesMut) -> Result<(), Error> {
        if input.is_empty() {
            return Ok(());
        }

        let mut input_buf = PartialBuffer::new(input);
        loop {
            let consumed_before = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder
                .encode(&mut input_buf, &mut output)
                .map_err(Error::compression)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }

            if input_buf.written_len() >= input.len() {
                return Ok(());
            }

            if written == 0 && input_buf.written_len() == consumed_before {
                return Err(Error::compression(io::Error::other(
                    "encoder stalled before consuming its input",
                )));
            }
        }
    }

    /// Runs the encoder's flush or finish step until it reports completion.
    fn drain(&mut self, all_output: &mut BytesMut, finish: bool) -> Result<(), Error> {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            let done = if finish {
                self.encoder.finish(&mut output)
            } else {
                self.encoder.flush(&mut output)
            }
            .map_err(Error::compression)?;

            let written = output.written_len();
            if written > 0 {
                all_output.extend_from_slice(&self.output_buffer[..written]);
            }
            if done {
                return Ok(());
            }
        }
    }
}

impl fmt::Debug for StreamCompressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamCompressor")
            .field("codec", &self.codec)
            .field("state", &self.state)
            .field("total_in", &self.total_in)
            .field("total_out", &self.total_out)
            .finish_non_exhaustive()
    }
}
