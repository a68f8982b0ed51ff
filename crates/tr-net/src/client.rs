//! Blocking HTTP/1.1 client used by the threaded backend.

use crate::http::FetchMethod;
use crate::http::FetchRequest;
use crate::http::FetchResponse;
use crate::http::Header;
use crate::http::HttpStatusCode;
use crate::location::Location;
use crate::tls::connect_tls;
use brotli::Decompressor;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use std::io::Cursor;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tr_core::DriveError;
use tr_core::DriveResult;

const MAX_RESPONSE_HEAD_BYTES: usize = 128 * 1024;
const MAX_CHUNK_LINE_BYTES: usize = 8 * 1024;
const DEFAULT_USER_AGENT: &str = concat!("trellis/", env!("CARGO_PKG_VERSION"));

/// Trait-object-safe stream for plain and TLS connections.
pub trait IoStream: Read + Write + Send {}
impl<T> IoStream for T where T: Read + Write + Send {}

pub type BoxedIoStream = Box<dyn IoStream>;

/// Timeouts, redirect limit and identification for outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_redirects: u8,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            max_redirects: 10,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> DriveResult<()> {
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(DriveError::new(
                "config.client.timeout_invalid",
                "connect and read timeouts must be greater than zero",
            ));
        }
        if self.user_agent.trim().is_empty() {
            return Err(DriveError::new(
                "config.client.user_agent_empty",
                "user agent must not be empty",
            ));
        }
        Header::new("User-Agent", &self.user_agent)?;
        Ok(())
    }
}

/// Executes one request at a time, following redirects.
#[derive(Debug, Clone)]
pub struct HttpClient {
    config: ClientConfig,
}

impl HttpClient {
    pub fn new(config: ClientConfig) -> DriveResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn execute(&self, request: &FetchRequest) -> DriveResult<FetchResponse> {
        let mut method = request.method;
        let mut location = request.location.clone();
        let mut body = request.body.clone();
        let mut headers = request.headers.clone();
        let mut redirected = false;

        for _ in 0..=self.config.max_redirects {
            let raw = self.exchange(method, &location, &headers, &body)?;

            let redirect_target = if raw.status.is_redirection() {
                header_value(&raw.headers, "location")
            } else {
                None
            };
            let Some(target) = redirect_target else {
                return Ok(FetchResponse {
                    request_id: request.id.clone(),
                    status: raw.status,
                    location,
                    redirected,
                    headers: raw.headers,
                    body: raw.body,
                });
            };

            let next = location.join(&target)?;
            log::debug!(
                target: "trellis::net",
                "{} {} redirected ({}) to {}",
                method.as_str(),
                location,
                raw.status.as_u16(),
                next
            );

            // 303, and 301/302 after a non-GET, continue as a body-less GET.
            let code = raw.status.as_u16();
            if code == 303 || (matches!(code, 301 | 302) && method != FetchMethod::Get) {
                method = FetchMethod::Get;
                body.clear();
                headers.retain(|header| {
                    !header.name.eq_ignore_ascii_case("content-type")
                        && !header.name.eq_ignore_ascii_case("content-length")
                });
            }
            location = next.without_anchor();
            redirected = true;
        }

        Err(DriveError::new(
            "net.fetch.too_many_redirects",
            format!(
                "exceeded {} redirects starting at {}",
                self.config.max_redirects, request.location
            ),
        ))
    }

    fn exchange(
        &self,
        method: FetchMethod,
        location: &Location,
        headers: &[Header],
        body: &[u8],
    ) -> DriveResult<RawResponse> {
        let mut stream = self.open_stream(location)?;
        write_request(&mut *stream, method, location, headers, body, &self.config)?;
        read_response(&mut *stream)
    }

    fn open_stream(&self, location: &Location) -> DriveResult<BoxedIoStream> {
        let host = location.host().ok_or_else(|| {
            DriveError::new(
                "net.url.host_missing",
                format!("URL `{location}` has no host"),
            )
        })?;
        let port = location.port_or_default().ok_or_else(|| {
            DriveError::new(
                "net.url.port_missing",
                format!("unable to determine effective port for `{location}`"),
            )
        })?;

        let query = format!("{host}:{port}");
        let addresses: Vec<SocketAddr> = query
            .to_socket_addrs()
            .map_err(|error| {
                DriveError::new(
                    "net.fetch.network_failure",
                    format!("failed to resolve `{query}`: {error}"),
                )
            })?
            .collect();

        let stream = connect_first_available(&addresses, self.config.connect_timeout)?;
        stream
            .set_read_timeout(Some(self.config.read_timeout))
            .and_then(|_| stream.set_write_timeout(Some(self.config.read_timeout)))
            .and_then(|_| stream.set_nodelay(true))
            .map_err(|error| {
                DriveError::new(
                    "net.fetch.network_failure",
                    format!("failed to configure socket for `{query}`: {error}"),
                )
            })?;

        match location.scheme() {
            "https" => connect_tls(stream, host),
            "http" => Ok(Box::new(stream)),
            other => Err(DriveError::new(
                "net.url.scheme_unsupported",
                format!("unsupported scheme `{other}`"),
            )),
        }
    }
}

fn connect_first_available(addresses: &[SocketAddr], timeout: Duration) -> DriveResult<TcpStream> {
    let mut last_error: Option<DriveError> = None;

    for address in addresses {
        match TcpStream::connect_timeout(address, timeout) {
            Ok(stream) => return Ok(stream),
            Err(error) => {
                last_error = Some(io_error(
                    error,
                    &format!("failed to connect to `{address}`"),
                ));
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        DriveError::new(
            "net.fetch.network_failure",
            "no addresses available to open a connection",
        )
    }))
}

/// Maps socket errors onto the fetch taxonomy: timeouts vs. everything else.
fn io_error(error: std::io::Error, context: &str) -> DriveError {
    let code = match error.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => "net.fetch.timeout",
        _ => "net.fetch.network_failure",
    };
    DriveError::new(code, format!("{context}: {error}"))
}

fn write_request(
    stream: &mut dyn Write,
    method: FetchMethod,
    location: &Location,
    headers: &[Header],
    body: &[u8],
    config: &ClientConfig,
) -> DriveResult<()> {
    let mut encoded = Vec::new();
    encoded.extend_from_slice(method.as_str().as_bytes());
    encoded.push(b' ');
    encoded.extend_from_slice(location.path_and_query().as_bytes());
    encoded.extend_from_slice(b" HTTP/1.1\r\n");

    let mut push = |name: &str, value: &str| {
        encoded.extend_from_slice(name.as_bytes());
        encoded.extend_from_slice(b": ");
        encoded.extend_from_slice(value.as_bytes());
        encoded.extend_from_slice(b"\r\n");
    };
    push("Host", &location.authority());
    push("User-Agent", &config.user_agent);
    push("Accept-Encoding", "gzip, deflate, br");
    push("Connection", "close");
    for header in headers {
        push(&header.name, &header.value);
    }
    if !body.is_empty() || !method.is_safe() {
        push("Content-Length", &body.len().to_string());
    }
    encoded.extend_from_slice(b"\r\n");
    encoded.extend_from_slice(body);

    stream
        .write_all(&encoded)
        .and_then(|_| stream.flush())
        .map_err(|error| io_error(error, "failed to write HTTP request"))
}

struct RawResponse {
    status: HttpStatusCode,
    headers: Vec<Header>,
    body: Vec<u8>,
}

fn read_response(stream: &mut dyn Read) -> DriveResult<RawResponse> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }
        let read = stream
            .read(&mut chunk)
            .map_err(|error| io_error(error, "failed while reading HTTP response head"))?;
        if read == 0 {
            return Err(DriveError::new(
                "net.fetch.network_failure",
                "unexpected EOF before response head completed",
            ));
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > MAX_RESPONSE_HEAD_BYTES {
            return Err(DriveError::new(
                "net.http.head_too_large",
                format!("HTTP response head exceeds {MAX_RESPONSE_HEAD_BYTES} bytes"),
            ));
        }
    };

    let head_text = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let mut body = buffer[header_end..].to_vec();

    let mut lines = head_text.split("\r\n");
    let status = parse_status_line(lines.next().unwrap_or_default())?;
    let mut headers = Vec::new();
    for line in lines.filter(|line| !line.is_empty()) {
        let (name, value) = line.split_once(':').ok_or_else(|| {
            DriveError::new(
                "net.http.header_invalid",
                format!("invalid HTTP header line `{line}`"),
            )
        })?;
        headers.push(Header::new(name.trim(), value.trim())?);
    }

    let code = status.as_u16();
    let has_no_body = (100..200).contains(&code) || code == 204 || code == 304;
    if has_no_body {
        return Ok(RawResponse {
            status,
            headers,
            body: Vec::new(),
        });
    }
    if header_contains(&headers, "transfer-encoding", "chunked") {
        body = read_chunked_body(stream, body)?;
    } else if let Some(length) = parse_content_length(&headers)? {
        if body.len() < length {
            let mut rest = vec![0_u8; length - body.len()];
            stream
                .read_exact(&mut rest)
                .map_err(|error| io_error(error, "failed to read HTTP body bytes"))?;
            body.extend_from_slice(&rest);
        } else {
            body.truncate(length);
        }
    } else {
        stream
            .read_to_end(&mut body)
            .map_err(|error| io_error(error, "failed while draining HTTP body"))?;
    }

    let body = decode_content_encoding(&headers, body)?;
    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

fn read_chunked_body(stream: &mut dyn Read, prefetched: Vec<u8>) -> DriveResult<Vec<u8>> {
    let mut reader = Cursor::new(prefetched).chain(stream);
    let mut decoded = Vec::new();

    loop {
        let size_line = read_crlf_line(&mut reader)?;
        if size_line.is_empty() {
            continue;
        }

        let size_token = size_line.split(';').next().unwrap_or_default().trim();
        let chunk_size = usize::from_str_radix(size_token, 16).map_err(|error| {
            DriveError::new(
                "net.http.chunk_size_invalid",
                format!("invalid chunk size `{size_token}`: {error}"),
            )
        })?;

        if chunk_size == 0 {
            // Trailers end with an empty line.
            while !read_crlf_line(&mut reader)?.is_empty() {}
            break;
        }

        let start = decoded.len();
        decoded.resize(start + chunk_size, 0);
        reader
            .read_exact(&mut decoded[start..])
            .map_err(|error| io_error(error, "failed while reading chunked body"))?;

        let mut terminator = [0_u8; 2];
        reader
            .read_exact(&mut terminator)
            .map_err(|error| io_error(error, "failed while reading chunk terminator"))?;
        if terminator != *b"\r\n" {
            return Err(DriveError::new(
                "net.http.chunk_terminator_invalid",
                "chunk data is missing trailing CRLF",
            ));
        }
    }

    Ok(decoded)
}

fn read_crlf_line(reader: &mut dyn Read) -> DriveResult<String> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0_u8; 1];
        reader
            .read_exact(&mut byte)
            .map_err(|error| io_error(error, "failed while reading chunked transfer line"))?;
        line.push(byte[0]);

        if line.len() > MAX_CHUNK_LINE_BYTES {
            return Err(DriveError::new(
                "net.http.chunk_line_too_large",
                format!("chunk metadata line exceeds {MAX_CHUNK_LINE_BYTES} bytes"),
            ));
        }
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|idx| idx + 4)
}

fn parse_status_line(line: &str) -> DriveResult<HttpStatusCode> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(DriveError::new(
            "net.http.status_line_invalid",
            format!("malformed status line `{line}`"),
        ));
    }
    let code_text = parts.next().unwrap_or_default();
    let code = code_text.parse::<u16>().map_err(|error| {
        DriveError::new(
            "net.http.status_line_invalid",
            format!("invalid status code `{code_text}`: {error}"),
        )
    })?;
    HttpStatusCode::new(code)
}

fn parse_content_length(headers: &[Header]) -> DriveResult<Option<usize>> {
    let Some(value) = header_value(headers, "content-length") else {
        return Ok(None);
    };
    value.trim().parse::<usize>().map(Some).map_err(|error| {
        DriveError::new(
            "net.http.content_length_invalid",
            format!("invalid Content-Length `{value}`: {error}"),
        )
    })
}

fn header_value(headers: &[Header], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.clone())
}

fn header_contains(headers: &[Header], name: &str, value: &str) -> bool {
    headers.iter().any(|header| {
        header.name.eq_ignore_ascii_case(name)
            && header
                .value
                .split(',')
                .any(|token| token.trim().eq_ignore_ascii_case(value))
    })
}

fn decode_content_encoding(headers: &[Header], body: Vec<u8>) -> DriveResult<Vec<u8>> {
    let encodings: Vec<String> = headers
        .iter()
        .filter(|header| header.name.eq_ignore_ascii_case("content-encoding"))
        .flat_map(|header| header.value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect();

    let mut decoded = body;
    for encoding in encodings.iter().rev() {
        decoded = match encoding.as_str() {
            "identity" => decoded,
            "gzip" | "x-gzip" => read_all(GzDecoder::new(Cursor::new(decoded)), "gzip")?,
            "deflate" => decode_deflate(decoded)?,
            "br" => read_all(Decompressor::new(Cursor::new(decoded), 4096), "brotli")?,
            _ => {
                return Err(DriveError::new(
                    "net.http.content_encoding_unsupported",
                    format!("unsupported content encoding `{encoding}`"),
                ));
            }
        };
    }
    Ok(decoded)
}

fn decode_deflate(body: Vec<u8>) -> DriveResult<Vec<u8>> {
    {
        let mut zlib = ZlibDecoder::new(body.as_slice());
        let mut out = Vec::new();
        if zlib.read_to_end(&mut out).is_ok() {
            return Ok(out);
        }
    }
    read_all(DeflateDecoder::new(Cursor::new(body)), "deflate")
}

fn read_all(mut reader: impl Read, label: &str) -> DriveResult<Vec<u8>> {
    let mut out = Vec::new();
    reader.read_to_end(&mut out).map_err(|error| {
        DriveError::new(
            "net.http.decode_failed",
            format!("{label} decode failed: {error}"),
        )
    })?;
    Ok(out)
}
