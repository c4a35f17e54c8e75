use log::debug;
use std::fmt;
use std::io::{self, Read};

use super::http_status::HttpStatus;

/// Largest request head (request line plus headers) accepted from a client.
pub const MAX_HEAD_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    /// Percent-decoded path, always starting with `/`.
    pub path: String,
    pub query: Option<String>,
}

#[derive(Debug)]
pub enum RequestError {
    /// The peer closed the connection without sending anything.
    Closed,
    Io(io::Error),
    TooLarge,
    Malformed(&'static str),
}

impl RequestError {
    /// Status to answer with, if the connection is still worth answering.
    pub fn status(&self) -> Option<HttpStatus> {
        match self {
            Self::Closed | Self::Io(_) => None,
            Self::TooLarge => Some(HttpStatus::RequestHeaderFieldsTooLarge),
            Self::Malformed(_) => Some(HttpStatus::BadRequest),
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed before a request was sent"),
            Self::Io(e) => write!(f, "failed to read request: {}", e),
            Self::TooLarge => write!(f, "request head exceeds {} bytes", MAX_HEAD_SIZE),
            Self::Malformed(reason) => write!(f, "malformed request: {}", reason),
        }
    }
}

impl Request {
    /// Reads bytes until the end of the request head and parses it. The body,
    /// if any, is left unread.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, RequestError> {
        let mut buffer = vec![0u8; MAX_HEAD_SIZE];
        let mut request_len = 0;

        loop {
            if request_len == buffer.len() {
                return Err(RequestError::TooLarge);
            }

            match reader.read(&mut buffer[request_len..]) {
                Ok(0) if request_len == 0 => return Err(RequestError::Closed),
                Ok(0) => break,
                Ok(n) => {
                    request_len += n;
                    if contains_double_newline(&buffer[..request_len]) {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(RequestError::Io(e)),
            }
        }

        debug!("Full request head received ({} bytes)", request_len);
        Self::parse(&buffer[..request_len])
    }

    pub fn parse(head: &[u8]) -> Result<Self, RequestError> {
        let request_str = String::from_utf8_lossy(head);
        let first_line = request_str
            .lines()
            .next()
            .ok_or(RequestError::Malformed("empty request"))?;

        let parts: Vec<&str> = first_line.split_whitespace().collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(RequestError::Malformed("bad request line"));
        }
        if parts.len() == 3 && !parts[2].starts_with("HTTP/") {
            return Err(RequestError::Malformed("unknown protocol version"));
        }

        let target = parts[1];
        let target = target.split_once('#').map_or(target, |(before, _)| before);
        let (raw_path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };

        if !raw_path.starts_with('/') {
            return Err(RequestError::Malformed("request target is not an absolute path"));
        }

        let path = percent_decode(raw_path)?;
        if path.contains('\0') {
            return Err(RequestError::Malformed("NUL byte in path"));
        }

        Ok(Self {
            method: parts[0].to_string(),
            path,
            query,
        })
    }

    pub fn is_head(&self) -> bool {
        self.method == "HEAD"
    }
}

fn percent_decode(input: &str) -> Result<String, RequestError> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hi = bytes.get(i + 1).copied().and_then(hex_value);
            let lo = bytes.get(i + 2).copied().and_then(hex_value);
            match (hi, lo) {
                (Some(hi), Some(lo)) => decoded.push(hi << 4 | lo),
                _ => return Err(RequestError::Malformed("invalid percent escape")),
            }
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).map_err(|_| RequestError::Malformed("path is not valid UTF-8"))
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

fn contains_double_newline(buffer: &[u8]) -> bool {
    buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.windows(2).any(|w| w == b"\n\n")
}
