use crate::codec::Codec;
use crate::config::CompressionConfig;
use crate::error::Error;
use crate::transport::{RequestContext, Transport};
use http::header::{self, HeaderMap, HeaderValue};
use tracing::debug;

/// The compression chosen for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The body is sent unmodified.
    None,
    /// The body is gzip-compressed.
    Gzip,
    /// The body is zlib/deflate-compressed.
    Deflate,
}

impl Decision {
    /// The codec to compress with, if any.
    pub fn codec(self) -> Option<Codec> {
        match self {
            Decision::None => None,
            Decision::Gzip => Some(Codec::Gzip),
            Decision::Deflate => Some(Codec::Deflate),
        }
    }
}

impl From<Option<Codec>> for Decision {
    fn from(codec: Option<Codec>) -> Self {
        match codec {
            None => Decision::None,
            Some(Codec::Gzip) => Decision::Gzip,
            Some(Codec::Deflate) => Decision::Deflate,
        }
    }
}

/// Why negotiation stood down before looking at the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Compression is switched off in the configuration.
    Disabled,
    /// The producer stopped compression before negotiation ran.
    Stopped,
    /// Something upstream already encoded the body.
    ContentEncoding,
    /// The body size is already committed.
    ContentLength,
    /// The body is sent out of band and never passes through here.
    Sendfile,
    /// The media type is not worth compressing.
    ContentType,
    /// The response head was sent before negotiation could run.
    HeadersSent,
}

/// Outcome of negotiating one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiation {
    decision: Decision,
    skipped: Option<SkipReason>,
    vary: bool,
}

impl Negotiation {
    pub(crate) fn skipped(reason: SkipReason) -> Self {
        Self {
            decision: Decision::None,
            skipped: Some(reason),
            vary: false,
        }
    }

    /// The chosen compression.
    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// Set when the response headers ruled compression out.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        self.skipped
    }

    /// Returns whether `Vary: Accept-Encoding` is emitted.
    pub fn emits_vary(&self) -> bool {
        self.vary
    }

    /// Writes the negotiation headers through the transport.
    ///
    /// Headers the transport refuses because the head is already sent are
    /// dropped.
    pub(crate) fn apply<T: Transport>(&self, transport: &mut T) {
        if let Some(codec) = self.decision.codec() {
            tolerate_late(transport.insert_header(
                header::CONTENT_ENCODING,
                HeaderValue::from_static(codec.content_encoding()),
            ));

            // Ranges over the compressed representation can't be served.
            if transport.headers().contains_key(header::ACCEPT_RANGES) {
                tolerate_late(transport.remove_header(&header::ACCEPT_RANGES));
            }
        }

        if self.vary && !has_vary_accept_encoding(transport.headers()) {
            tolerate_late(transport.append_header(
                header::VARY,
                HeaderValue::from_static("accept-encoding"),
            ));
        }
    }
}

/// Decides whether and how to compress a response.
///
/// Rules, first match wins:
/// - a `Content-Encoding` other than `identity` means the body is already encoded
/// - a `Content-Length` or a sendfile header means the body is committed elsewhere
/// - a `Content-Type` outside the allow-list is not compressed
/// - otherwise the client's Accept-Encoding picks gzip, then deflate
pub fn decide(
    headers: &HeaderMap,
    request: &RequestContext,
    config: &CompressionConfig,
) -> Negotiation {
    if let Some(reason) = skip_reason(headers, config) {
        debug!(?reason, "compression negotiation skipped");
        return Negotiation::skipped(reason);
    }

    let codec = request.accept_encoding().and_then(Codec::from_accept_encoding);
    let legacy_agent = request
        .user_agent()
        .is_some_and(|ua| config.is_legacy_agent(ua));

    let negotiation = Negotiation {
        decision: codec.into(),
        skipped: None,
        vary: codec.is_some() || !legacy_agent,
    };
    debug!(
        decision = ?negotiation.decision,
        vary = negotiation.vary,
        "compression negotiated"
    );
    negotiation
}

fn skip_reason(headers: &HeaderMap, config: &CompressionConfig) -> Option<SkipReason> {
    if !config.enabled {
        return Some(SkipReason::Disabled);
    }
    if has_content_encoding(headers) {
        return Some(SkipReason::ContentEncoding);
    }
    if headers.contains_key(header::CONTENT_LENGTH) {
        return Some(SkipReason::ContentLength);
    }
    if config
        .sendfile_headers
        .iter()
        .any(|name| headers.contains_key(name))
    {
        return Some(SkipReason::Sendfile);
    }
    if is_uncompressible_content_type(headers, config) {
        return Some(SkipReason::ContentType);
    }
    None
}

fn tolerate_late(result: Result<(), Error>) {
    if let Err(e) = result {
        debug!(error = %e, "dropping header set after response head");
    }
}

/// Checks for a Content-Encoding other than `identity`.
fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers.get_all(header::CONTENT_ENCODING).iter().any(|value| {
        value.to_str().map_or(true, |v| {
            let v = v.trim();
            !v.is_empty() && !v.eq_ignore_ascii_case("identity")
        })
    })
}

/// Checks if Accept-Encoding (or `*`) is already part of Vary.
fn has_vary_accept_encoding(headers: &HeaderMap) -> bool {
    headers.get_all(header::VARY).iter().any(|vary| {
        vary.to_str().is_ok_and(|vary_str| {
            vary_str.split(',').any(|v| {
                let v = v.trim();
                v == "*" || v.eq_ignore_ascii_case("accept-encoding")
            })
        })
    })
}

/// Checks the parsed Content-Type against the allow-list.
///
/// A missing Content-Type does not disqualify the response.
fn is_uncompressible_content_type(headers: &HeaderMap, config: &CompressionConfig) -> bool {
    let Some(content_type) = headers.get(header::CONTENT_TYPE) else {
        return false;
    };

    match content_type
        .to_str()
        .ok()
        .and_then(|ct| ct.trim().parse::<mime::Mime>().ok())
    {
        Some(mime) => !config.is_compressible(&mime.essence_str().to_ascii_lowercase()),
        None => true,
    }
}
