use http::HeaderName;
use std::io;
use thiserror::Error;

/// Errors raised while compressing or emitting a response body.
#[derive(Debug, Error)]
pub enum Error {
    /// A compression operation was attempted after the stream was finished.
    ///
    /// This is a bug in the caller's state handling, never an expected
    /// runtime condition.
    #[error("compression stream already finished")]
    StreamClosed,

    /// A header was set after the transport committed the response head.
    #[error("header {name} set after headers were sent")]
    LateHeaderMutation {
        /// Name of the rejected header.
        name: HeaderName,
    },

    /// The compression primitive reported a failure.
    #[error("compression error: {source}")]
    Compression {
        /// Underlying encoder error.
        #[source]
        source: io::Error,
    },

    /// The transport failed to write or flush bytes.
    #[error("io error: {source}")]
    Io {
        /// Underlying transport error.
        #[from]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn late_header(name: HeaderName) -> Self {
        Self::LateHeaderMutation { name }
    }

    pub(crate) fn compression<E: Into<io::Error>>(e: E) -> Self {
        Self::Compression { source: e.into() }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io { source } | Error::Compression { source } => source,
            other => io::Error::other(other),
        }
    }
}
