//! Absolute locations, anchors, cache keys and visitability.

use std::fmt;
use tr_core::DriveError;
use tr_core::DriveResult;
use url::Url;

/// Path extensions that never name an HTML document.
const UNVISITABLE_EXTENSIONS: &[&str] = &[
    "7z", "aac", "apk", "avi", "bmp", "bz2", "css", "csv", "deb", "dmg", "doc", "docx", "exe",
    "gif", "gz", "heic", "heif", "ico", "iso", "jpeg", "jpg", "js", "json", "m4a", "mkv", "mov",
    "mp3", "mp4", "mpeg", "mpg", "msi", "ogg", "ogv", "pdf", "pkg", "png", "ppt", "pptx", "rar",
    "rtf", "svg", "tar", "tif", "tiff", "txt", "wav", "webm", "webp", "wma", "wmv", "xls", "xlsx",
    "xml", "zip",
];

/// Normalized absolute URL used for navigation, caching and history.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Location {
    url: Url,
}

impl Location {
    pub fn parse(input: &str) -> DriveResult<Self> {
        let url = Url::parse(input.trim()).map_err(|error| {
            DriveError::new(
                "net.url.invalid",
                format!("failed to parse URL `{input}`: {error}"),
            )
        })?;
        Self::from_url(url)
    }

    pub fn from_url(url: Url) -> DriveResult<Self> {
        if url.cannot_be_a_base() {
            return Err(DriveError::new(
                "net.url.invalid_base",
                format!("URL `{url}` cannot be used for navigation"),
            ));
        }
        Ok(Self { url })
    }

    /// Resolves `href` against this location.
    pub fn join(&self, href: &str) -> DriveResult<Self> {
        let url = self.url.join(href.trim()).map_err(|error| {
            DriveError::new(
                "net.url.invalid",
                format!("failed to resolve `{href}` against `{}`: {error}", self.url),
            )
        })?;
        Self::from_url(url)
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// Fragment without the leading `#`, percent-decoded; `None` when absent
    /// or empty.
    pub fn anchor(&self) -> Option<String> {
        let fragment = self.url.fragment().filter(|fragment| !fragment.is_empty())?;
        Some(percent_decode(fragment))
    }

    pub fn without_anchor(&self) -> Self {
        let mut url = self.url.clone();
        url.set_fragment(None);
        Self { url }
    }

    pub fn with_anchor(&self, anchor: Option<&str>) -> Self {
        let mut url = self.url.clone();
        url.set_fragment(anchor);
        Self { url }
    }

    /// Key shared by every spelling of the same page: no anchor and no
    /// trailing slash on non-root paths.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        let path = url.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = path.trim_end_matches('/').to_owned();
            url.set_path(if trimmed.is_empty() { "/" } else { &trimmed });
        }
        url.into()
    }

    /// True when both locations name the same document, ignoring anchors.
    pub fn same_page_as(&self, other: &Location) -> bool {
        self.without_anchor() == other.without_anchor()
    }

    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    pub fn is_same_origin(&self, other: &Location) -> bool {
        self.url.origin() == other.url.origin()
    }

    /// Lowercased extension of the last path segment, if any.
    pub fn extension(&self) -> Option<String> {
        let last = self.url.path_segments()?.next_back()?;
        let (stem, extension) = last.rsplit_once('.')?;
        if stem.is_empty() || extension.is_empty() {
            return None;
        }
        Some(extension.to_ascii_lowercase())
    }

    pub fn is_html(&self) -> bool {
        self.extension()
            .is_none_or(|extension| !UNVISITABLE_EXTENSIONS.contains(&extension.as_str()))
    }

    /// True when this location lives under `root` (same origin, path prefix).
    pub fn is_prefixed_by(&self, root: &Location) -> bool {
        if !self.is_same_origin(root) {
            return false;
        }
        let mut prefix = root.path().to_owned();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        let path = self.path();
        path == prefix.trim_end_matches('/') || path.starts_with(&prefix)
    }

    pub fn is_visitable(&self, root: &Location) -> bool {
        matches!(self.scheme(), "http" | "https") && self.is_prefixed_by(root) && self.is_html()
    }

    /// Copy with the query replaced by `pairs`, as a GET form submission does.
    pub fn with_query_pairs(&self, pairs: &[(String, String)]) -> Self {
        let mut url = self.url.clone();
        url.set_query(None);
        if !pairs.is_empty() {
            let mut query = url.query_pairs_mut();
            for (name, value) in pairs {
                query.append_pair(name, value);
            }
        }
        Self { url }
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn port_or_default(&self) -> Option<u16> {
        self.url.port_or_known_default()
    }

    /// Path plus query, the request target sent on the wire.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_owned(),
        }
    }

    pub fn authority(&self) -> String {
        let host = self.host().unwrap_or_default();
        match self.url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_owned(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({})", self.as_str())
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0_usize;
    while idx < bytes.len() {
        if bytes[idx] == b'%' && idx + 2 < bytes.len() {
            let pair = std::str::from_utf8(&bytes[idx + 1..idx + 3]).ok();
            if let Some(value) = pair.and_then(|hex| u8::from_str_radix(hex, 16).ok()) {
                out.push(value);
                idx += 3;
                continue;
            }
        }
        out.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
