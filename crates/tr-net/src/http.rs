//! Fetch request and response types.

use crate::location::Location;
use encoding_rs::Encoding;
use encoding_rs::UTF_8;
use tr_core::DriveError;
use tr_core::DriveResult;
use tr_core::fresh_uid;

pub const REQUEST_ID_HEADER: &str = "X-Turbo-Request-Id";
pub const FRAME_HEADER: &str = "Turbo-Frame";
pub const PURPOSE_HEADER: &str = "X-Sec-Purpose";
pub const HTML_ACCEPT: &str = "text/html, application/xhtml+xml";
pub const STREAM_CONTENT_TYPE: &str = "text/vnd.turbo-stream.html";

/// Methods a link or form can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl FetchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Case-insensitive; `None` for anything a form cannot submit.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "patch" => Some(Self::Patch),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Safe methods do not mutate server state.
    pub fn is_safe(self) -> bool {
        matches!(self, Self::Get)
    }
}

/// Single HTTP header with validated wire-safe name/value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: &str, value: &str) -> DriveResult<Self> {
        if name.is_empty() || !name.bytes().all(is_token_char) {
            return Err(DriveError::new(
                "net.http.header_name_invalid",
                format!("invalid HTTP header name `{name}`"),
            ));
        }

        if value.bytes().any(|byte| matches!(byte, b'\r' | b'\n' | 0)) {
            return Err(DriveError::new(
                "net.http.header_value_invalid",
                format!("invalid characters found in HTTP header `{name}`"),
            ));
        }

        Ok(Self {
            name: name.to_owned(),
            value: value.to_owned(),
        })
    }
}

/// What a request is for; decides default headers and logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPurpose {
    Visit,
    FormSubmission,
    Frame(String),
    Prefetch,
}

/// Outgoing request tagged with a correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub id: String,
    pub method: FetchMethod,
    pub location: Location,
    pub purpose: FetchPurpose,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl FetchRequest {
    pub fn new(method: FetchMethod, location: Location, purpose: FetchPurpose) -> Self {
        let id = fresh_uid();
        let mut headers = vec![
            Header {
                name: "Accept".to_owned(),
                value: HTML_ACCEPT.to_owned(),
            },
            Header {
                name: REQUEST_ID_HEADER.to_owned(),
                value: id.clone(),
            },
        ];
        match &purpose {
            FetchPurpose::Frame(frame_id) => headers.push(Header {
                name: FRAME_HEADER.to_owned(),
                value: frame_id.clone(),
            }),
            FetchPurpose::Prefetch => headers.push(Header {
                name: PURPOSE_HEADER.to_owned(),
                value: "prefetch".to_owned(),
            }),
            FetchPurpose::Visit | FetchPurpose::FormSubmission => {}
        }

        Self {
            id,
            method,
            location: location.without_anchor(),
            purpose,
            headers,
            body: Vec::new(),
        }
    }

    pub fn get(location: Location, purpose: FetchPurpose) -> Self {
        Self::new(FetchMethod::Get, location, purpose)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// Replaces any existing header of the same name.
    pub fn set_header(&mut self, name: &str, value: &str) -> DriveResult<()> {
        let header = Header::new(name, value)?;
        self.headers
            .retain(|existing| !existing.name.eq_ignore_ascii_case(name));
        self.headers.push(header);
        Ok(())
    }

    /// Adds `text/vnd.turbo-stream.html` in front of the HTML types.
    pub fn accept_streams(&mut self) -> DriveResult<()> {
        let accept = format!("{STREAM_CONTENT_TYPE}, {HTML_ACCEPT}");
        self.set_header("Accept", &accept)
    }

    pub fn set_body(&mut self, content_type: &str, body: Vec<u8>) -> DriveResult<()> {
        if self.method.is_safe() {
            return Err(DriveError::new(
                "net.http.body_disallowed",
                format!("{} requests must not include a body", self.method.as_str()),
            ));
        }
        self.set_header("Content-Type", content_type)?;
        self.body = body;
        Ok(())
    }

    pub fn is_frame_request(&self) -> bool {
        matches!(self.purpose, FetchPurpose::Frame(_))
    }
}

/// HTTP status code wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct HttpStatusCode(u16);

impl HttpStatusCode {
    pub fn new(code: u16) -> DriveResult<Self> {
        if (100..=599).contains(&code) {
            return Ok(Self(code));
        }

        Err(DriveError::new(
            "net.http.status_invalid",
            format!("status code must be 100-599, got `{code}`"),
        ))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn is_success(self) -> bool {
        (200..=299).contains(&self.0)
    }

    pub fn is_redirection(self) -> bool {
        (300..=399).contains(&self.0)
    }

    pub fn is_client_error(self) -> bool {
        (400..=499).contains(&self.0)
    }

    pub fn is_server_error(self) -> bool {
        (500..=599).contains(&self.0)
    }
}

/// Response after redirects, tied back to its request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub request_id: String,
    pub status: HttpStatusCode,
    /// Final location after any redirects.
    pub location: Location,
    pub redirected: bool,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// Convenience constructor used by scripted backends and delegates.
    pub fn html(request_id: &str, location: Location, status: u16, body: &str) -> DriveResult<Self> {
        Ok(Self {
            request_id: request_id.to_owned(),
            status: HttpStatusCode::new(status)?,
            location,
            redirected: false,
            headers: vec![Header::new("Content-Type", "text/html; charset=utf-8")?],
            body: body.as_bytes().to_vec(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(name))
            .map(|header| header.value.as_str())
    }

    /// 2xx and 3xx count as success; 3xx only reaches here when redirects
    /// were not followed.
    pub fn succeeded(&self) -> bool {
        self.status.is_success() || self.status.is_redirection()
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    pub fn client_error(&self) -> bool {
        self.status.is_client_error()
    }

    pub fn server_error(&self) -> bool {
        self.status.is_server_error()
    }

    /// Media type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        let value = self.header("Content-Type")?;
        let media = value.split(';').next().unwrap_or_default().trim();
        Some(media.to_ascii_lowercase())
    }

    pub fn is_html(&self) -> bool {
        matches!(
            self.media_type().as_deref(),
            Some("text/html") | Some("application/xhtml+xml")
        )
    }

    pub fn is_stream(&self) -> bool {
        self.media_type().as_deref() == Some(STREAM_CONTENT_TYPE)
    }

    /// Body decoded with the declared charset, or a BOM, or UTF-8.
    pub fn text(&self) -> String {
        let declared = self
            .header("Content-Type")
            .and_then(charset_parameter)
            .and_then(|label| Encoding::for_label(label.as_bytes()))
            .unwrap_or(UTF_8);
        let (decoded, _, _) = declared.decode(&self.body);
        decoded.into_owned()
    }
}

/// Body encodings a form can declare through `enctype`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormEncoding {
    UrlEncoded,
    Multipart,
    TextPlain,
}

impl FormEncoding {
    /// Unknown values fall back to URL encoding, as browsers do.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "multipart/form-data" => Self::Multipart,
            "text/plain" => Self::TextPlain,
            _ => Self::UrlEncoded,
        }
    }

    /// Serializes `pairs`, returning the content type and body bytes.
    pub fn encode(self, pairs: &[(String, String)]) -> (String, Vec<u8>) {
        match self {
            Self::UrlEncoded => (
                "application/x-www-form-urlencoded".to_owned(),
                url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish()
                    .into_bytes(),
            ),
            Self::TextPlain => {
                let mut body = String::new();
                for (name, value) in pairs {
                    body.push_str(name);
                    body.push('=');
                    body.push_str(value);
                    body.push_str("\r\n");
                }
                ("text/plain;charset=UTF-8".to_owned(), body.into_bytes())
            }
            Self::Multipart => {
                let boundary = format!("----trellis-{}", fresh_uid().replace('-', ""));
                let mut body = String::new();
                for (name, value) in pairs {
                    body.push_str("--");
                    body.push_str(&boundary);
                    body.push_str("\r\nContent-Disposition: form-data; name=\"");
                    body.push_str(&name.replace('"', "%22"));
                    body.push_str("\"\r\n\r\n");
                    body.push_str(value);
                    body.push_str("\r\n");
                }
                body.push_str("--");
                body.push_str(&boundary);
                body.push_str("--\r\n");
                (
                    format!("multipart/form-data; boundary={boundary}"),
                    body.into_bytes(),
                )
            }
        }
    }
}

fn charset_parameter(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|parameter| {
        let (key, value) = parameter.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("charset") {
            return None;
        }
        Some(value.trim().trim_matches('"').to_owned())
    })
}

fn is_token_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || matches!(
            byte,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

#[cfg(test)]
mod tests {
    use super::FetchMethod;
    use super::FetchPurpose;
    use super::FormEncoding;
    use super::FetchRequest;
    use super::FetchResponse;
    use super::Header;
    use super::HttpStatusCode;
    use crate::location::Location;

    fn location(input: &str) -> Location {
        match Location::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn requests_carry_correlation_and_purpose_headers() {
        let request = FetchRequest::get(
            location("https://example.com/inbox#top"),
            FetchPurpose::Frame("inbox".to_owned()),
        );
        assert_eq!(request.header("x-turbo-request-id"), Some(request.id.as_str()));
        assert_eq!(request.header("Turbo-Frame"), Some("inbox"));
        assert_eq!(request.location.as_str(), "https://example.com/inbox");

        let prefetch = FetchRequest::get(location("https://example.com/"), FetchPurpose::Prefetch);
        assert_eq!(prefetch.header("X-Sec-Purpose"), Some("prefetch"));
        assert_ne!(prefetch.id, request.id);
    }

    #[test]
    fn safe_requests_reject_bodies() {
        let mut get = FetchRequest::get(location("https://example.com/"), FetchPurpose::Visit);
        assert!(get.set_body("text/plain", b"x".to_vec()).is_err());

        let mut post = FetchRequest::new(
            FetchMethod::Post,
            location("https://example.com/messages"),
            FetchPurpose::FormSubmission,
        );
        assert!(post.set_body("text/plain", b"x".to_vec()).is_ok());
        assert!(!FetchMethod::Post.is_safe());
        assert_eq!(FetchMethod::parse("PaTcH"), Some(FetchMethod::Patch));
    }

    #[test]
    fn form_encodings_serialize_pairs() {
        let pairs = vec![
            ("q".to_owned(), "a b&c".to_owned()),
            ("page".to_owned(), "2".to_owned()),
        ];
        let (content_type, body) = FormEncoding::parse("").encode(&pairs);
        assert_eq!(content_type, "application/x-www-form-urlencoded");
        assert_eq!(body, b"q=a+b%26c&page=2".to_vec());

        let (content_type, body) = FormEncoding::parse("MULTIPART/FORM-DATA").encode(&pairs);
        let boundary = match content_type.split_once("boundary=") {
            Some((_, boundary)) => boundary.to_owned(),
            None => panic!("missing boundary in {content_type}"),
        };
        let body = String::from_utf8_lossy(&body).into_owned();
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains("name=\"q\"\r\n\r\na b&c\r\n"));
        assert!(body.ends_with(&format!("--{boundary}--\r\n")));
    }

    #[test]
    fn header_values_reject_line_breaks() {
        assert!(Header::new("X-Test", "a\r\nb").is_err());
        assert!(Header::new("Bad Name", "a").is_err());
    }

    #[test]
    fn response_classification_and_charset() {
        let response = FetchResponse {
            request_id: "r".to_owned(),
            status: match HttpStatusCode::new(422) {
                Ok(code) => code,
                Err(error) => panic!("{error}"),
            },
            location: location("https://example.com/"),
            redirected: false,
            headers: vec![Header {
                name: "content-type".to_owned(),
                value: "text/html; charset=ISO-8859-1".to_owned(),
            }],
            body: vec![b'c', b'a', b'f', 0xe9],
        };
        assert!(response.failed());
        assert!(response.client_error());
        assert!(response.is_html());
        assert!(!response.is_stream());
        assert_eq!(response.text(), "café");
    }
}
