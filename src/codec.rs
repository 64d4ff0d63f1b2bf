use compression_codecs::{EncodeV2, gzip::GzipEncoder, zlib::ZlibEncoder};
use compression_core::Level;

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Gzip compression.
    Gzip,
    /// HTTP `deflate`, i.e. a zlib-wrapped deflate stream.
    Deflate,
}

impl Codec {
    /// Returns the Content-Encoding header value for this codec.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Deflate => "deflate",
        }
    }

    /// Creates a new incremental encoder for this codec.
    pub(crate) fn encoder(&self, level: Level) -> Box<dyn EncodeV2 + Send> {
        match self {
            Codec::Gzip => Box::new(GzipEncoder::new(level.into())),
            Codec::Deflate => Box::new(ZlibEncoder::new(level.into())),
        }
    }

    /// Picks a codec from the client's Accept-Encoding value.
    ///
    /// Gzip wins whenever the client accepts it, deflate is the fallback.
    /// Quality values only matter when they are not positive (`q=0`, or an
    /// unparsable number such as `nan`), which refuses the encoding outright.
    pub fn from_accept_encoding(header: &str) -> Option<Codec> {
        let mut gzip = false;
        let mut deflate = false;

        for part in header.split(',') {
            let (encoding, quality) = parse_encoding_with_quality(part.trim());
            // A zero or NaN quality refuses the encoding outright, even when it is listed.
            if quality.is_nan() || quality <= 0.0 {
                continue;
            }

            if encoding.eq_ignore_ascii_case("gzip") || encoding.eq_ignore_ascii_case("x-gzip") {
                gzip = true;
            } else if encoding.eq_ignore_ascii_case("deflate") {
                deflate = true;
            }
        }

        if gzip {
            Some(Codec::Gzip)
        } else if deflate {
            Some(Codec::Deflate)
        } else {
            None
        }
    }
}

/// Parses an encoding entry like "gzip" or "deflate;q=0.8" into (encoding, quality).
fn parse_encoding_with_quality(s: &str) -> (&str, f32) {
    let mut parts = s.splitn(2, ';');
    let encoding = parts.next().unwrap_or("").trim();

    let quality = parts
        .next()
        .and_then(|q| {
            let q = q.trim();
            if q.starts_with("q=") || q.starts_with("Q=") {
                q[2..].trim().parse::<f32>().ok()
            } else {
                None
            }
        })
        .unwrap_or(1.0);

    (encoding, quality)
}
