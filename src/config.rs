use compression_core::Level;
use http::HeaderName;

/// Default size at which a captured segment is handed to the compressor.
pub const DEFAULT_BUFFER_LIMIT: usize = 64 * 1024;

const DEFAULT_COMPRESSIBLE_TYPES: &[&str] = &[
    "text/",
    "application/json",
    "application/xml",
    "application/rss+xml",
    "application/atom+xml",
    "application/xrds+xml",
    "application/javascript",
    "image/svg+xml",
    "application/octet-stream",
];

const DEFAULT_LEGACY_USER_AGENTS: &[&str] = &["MSIE"];

const DEFAULT_SENDFILE_HEADERS: &[&str] = &["x-sendfile", "x-accel-redirect", "x-lighttpd-send-file"];

/// Settings shared by every response compressed with it.
///
/// Built with chained setters, starting from [`CompressionConfig::new`].
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub(crate) enabled: bool,
    pub(crate) level: Level,
    pub(crate) compressible_types: Vec<String>,
    pub(crate) legacy_user_agents: Vec<String>,
    pub(crate) sendfile_headers: Vec<HeaderName>,
    pub(crate) buffer_limit: usize,
}

impl CompressionConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            enabled: true,
            level: Level::Default,
            compressible_types: DEFAULT_COMPRESSIBLE_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
            legacy_user_agents: DEFAULT_LEGACY_USER_AGENTS
                .iter()
                .map(|ua| ua.to_string())
                .collect(),
            sendfile_headers: DEFAULT_SENDFILE_HEADERS
                .iter()
                .copied()
                .map(HeaderName::from_static)
                .collect(),
            buffer_limit: DEFAULT_BUFFER_LIMIT,
        }
    }

    /// Turns compression on or off for every response.
    ///
    /// Hosts running outside an HTTP request (batch jobs, CLI runs) switch
    /// it off so output is written untouched.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the compression level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Replaces the list of compressible media types.
    ///
    /// Every entry is a prefix of the media type essence: `text/` covers
    /// the whole family and `application/json` also covers
    /// `application/json-seq`.
    pub fn compressible_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compressible_types = types
            .into_iter()
            .map(|t| t.into().to_ascii_lowercase())
            .collect();
        self
    }

    /// Replaces the user-agent fragments that never receive `Vary` on
    /// uncompressed responses.
    pub fn legacy_user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legacy_user_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the headers signalling that the body is sent out of band.
    pub fn sendfile_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = HeaderName>,
    {
        self.sendfile_headers = headers.into_iter().collect();
        self
    }

    /// Sets the captured size at which bytes are fed to the compressor
    /// ahead of the next flush.
    pub fn buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit.max(1);
        self
    }

    /// Returns whether `essence` (e.g. `text/html`) is in the allow-list.
    pub(crate) fn is_compressible(&self, essence: &str) -> bool {
        self.compressible_types
            .iter()
            .any(|allowed| essence.starts_with(allowed.as_str()))
    }

    /// Returns whether the user agent belongs to the legacy class.
    pub(crate) fn is_legacy_agent(&self, user_agent: &str) -> bool {
        self.legacy_user_agents
            .iter()
            .any(|fragment| user_agent.contains(fragment.as_str()))
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self::new()
    }
}
