use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::fs::{self, File, Metadata};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::http_status::HttpStatus;
use super::listing;
use super::request::Request;

const INDEX_FILE: &str = "index.html";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Maps request paths onto files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticResponder {
    root: PathBuf,
}

pub enum Body {
    Empty,
    Bytes(Vec<u8>),
    File(File),
}

pub struct Response {
    pub status: HttpStatus,
    headers: Vec<(&'static str, String)>,
    body: Body,
    head_only: bool,
}

impl Response {
    fn new(status: HttpStatus) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Empty,
            head_only: false,
        }
    }

    fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    fn with_bytes(self, content_type: &str, bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        let mut response = self
            .with_header("Content-Type", content_type)
            .with_header("Content-Length", len.to_string());
        response.body = Body::Bytes(bytes);
        response
    }

    pub fn error(status: HttpStatus) -> Self {
        let body = format!(
            "<html><body><h1>{} {}</h1></body></html>",
            status.code(),
            status.text()
        );
        Self::new(status).with_bytes("text/html", body.into_bytes())
    }

    fn redirect(location: String) -> Self {
        Self::new(HttpStatus::MovedPermanently)
            .with_header("Location", location)
            .with_header("Content-Length", "0")
    }

    fn from_io_error(path: &Path, e: &io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound | ErrorKind::NotADirectory => {
                info!("File not found: {:?}", path);
                Self::error(HttpStatus::NotFound)
            }
            ErrorKind::PermissionDenied => {
                warn!("Permission denied for {:?}", path);
                Self::error(HttpStatus::Forbidden)
            }
            _ => {
                error!("Error accessing {:?}: {}", path, e);
                Self::error(HttpStatus::InternalServerError)
            }
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Writes the status line, headers and (unless this answers a HEAD) the
    /// body. Returns the number of body bytes sent.
    pub fn write_to<W: Write>(self, stream: W) -> io::Result<u64> {
        let mut writer = BufWriter::new(stream);

        let mut head = self.status.as_response_line();
        for (name, value) in &self.headers {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("Connection: close\r\n\r\n");
        writer.write_all(head.as_bytes())?;

        let sent = match self.body {
            _ if self.head_only => 0,
            Body::Empty => 0,
            Body::Bytes(bytes) => {
                writer.write_all(&bytes)?;
                bytes.len() as u64
            }
            Body::File(mut file) => io::copy(&mut file, &mut writer)?,
        };

        writer.flush()?;
        Ok(sent)
    }
}

impl StaticResponder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn respond(&self, request: &Request) -> Response {
        debug!("Resolving {} {}", request.method, request.path);

        let mut response = match request.method.as_str() {
            "GET" | "HEAD" => self.resolve(request),
            method => {
                warn!("Unsupported method: {}", method);
                Response::error(HttpStatus::MethodNotAllowed).with_header("Allow", "GET, HEAD")
            }
        };
        response.head_only = request.is_head();
        response
    }

    fn resolve(&self, request: &Request) -> Response {
        let path = request.path.as_str();
        let with_query = |location: String| match &request.query {
            Some(query) => format!("{}?{}", location, query),
            None => location,
        };

        let Some(segments) = clean_segments(path) else {
            warn!("Path traversal attempt: {}", path);
            return Response::error(HttpStatus::Forbidden);
        };

        if path.ends_with("/index.html") {
            return Response::redirect(with_query("./".to_string()));
        }

        let file_path = segments.iter().fold(self.root.clone(), |p, s| p.join(s));
        let metadata = match fs::metadata(&file_path) {
            Ok(meta) => meta,
            Err(e) => return Response::from_io_error(&file_path, &e),
        };

        let trailing_slash = path.ends_with('/');
        if metadata.is_dir() {
            if !trailing_slash {
                return Response::redirect(with_query(redirect_target(path, &segments, true)));
            }
            return self.serve_directory(&file_path);
        }

        if trailing_slash {
            return Response::redirect(with_query(redirect_target(path, &segments, false)));
        }

        serve_file(&file_path, &metadata)
    }

    fn serve_directory(&self, dir: &Path) -> Response {
        let index_path = dir.join(INDEX_FILE);
        if let Ok(meta) = fs::metadata(&index_path) {
            if meta.is_file() {
                return serve_file(&index_path, &meta);
            }
        }

        match listing::render(dir) {
            Ok(html) => {
                info!("Listing directory {:?}", dir);
                Response::new(HttpStatus::Ok).with_bytes(HTML_CONTENT_TYPE, html.into_bytes())
            }
            Err(e) => Response::from_io_error(dir, &e),
        }
    }
}

fn serve_file(file_path: &Path, metadata: &Metadata) -> Response {
    let file = match File::open(file_path) {
        Ok(file) => file,
        Err(e) => return Response::from_io_error(file_path, &e),
    };

    let mut response = Response::new(HttpStatus::Ok)
        .with_header("Content-Type", content_type(file_path))
        .with_header("Content-Length", metadata.len().to_string());
    if let Ok(modified) = metadata.modified() {
        response = response.with_header("Last-Modified", http_date(modified.into()));
    }

    info!("Serving file {:?} ({} bytes)", file_path, metadata.len());
    response.body = Body::File(file);
    response
}

/// Lexically resolves `.` and `..`. `None` when the path climbs above the root.
fn clean_segments(path: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            s => segments.push(s),
        }
    }
    Some(segments)
}

/// `Location` for the slash-fixing redirects. Relative to the request when
/// its path is already clean, otherwise the absolute cleaned path.
fn redirect_target(path: &str, segments: &[&str], is_dir: bool) -> String {
    let encoded: Vec<String> = segments.iter().map(|s| listing::encode_href(s)).collect();
    let cleaned = format!("/{}", encoded.join("/"));
    let last = encoded.last().map(String::as_str).unwrap_or("");

    let is_clean = path.trim_end_matches('/') == format!("/{}", segments.join("/"));
    match (is_clean, is_dir) {
        (true, true) => format!("{}/", last),
        (true, false) => format!("../{}", last),
        (false, true) if segments.is_empty() => "/".to_string(),
        (false, true) => format!("{}/", cleaned),
        (false, false) => cleaned,
    }
}

fn content_type(file_path: &Path) -> String {
    let mime = mime_guess::from_path(file_path).first_or_octet_stream();
    if mime.type_() == mime_guess::mime::TEXT && mime.get_param("charset").is_none() {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.to_string()
    }
}

fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, StaticResponder) {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), "hello world").unwrap();
        fs::write(dir.path().join("style.css"), "body {}").unwrap();
        fs::create_dir(dir.path().join("site")).unwrap();
        fs::write(dir.path().join("site").join("index.html"), "<h1>site</h1>").unwrap();
        fs::create_dir(dir.path().join("bare")).unwrap();
        fs::write(dir.path().join("bare").join("data.bin"), [0u8, 1, 2]).unwrap();
        let responder = StaticResponder::new(dir.path());
        (dir, responder)
    }

    fn get(responder: &StaticResponder, target: &str) -> Response {
        let raw = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target);
        responder.respond(&Request::parse(raw.as_bytes()).unwrap())
    }

    fn body_of(response: Response) -> String {
        let mut out = Vec::new();
        response.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let (_, body) = text.split_once("\r\n\r\n").unwrap();
        body.to_string()
    }

    #[test]
    fn serves_file_contents_with_inferred_type() {
        let (_dir, responder) = fixture();
        let response = get(&responder, "/hello.txt");
        assert_eq!(response.status, HttpStatus::Ok);
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.header("Content-Length"), Some("11"));
        assert!(response.header("Last-Modified").unwrap().ends_with(" GMT"));
        assert_eq!(body_of(response), "hello world");

        let css = get(&responder, "/style.css");
        assert_eq!(css.header("Content-Type"), Some("text/css; charset=utf-8"));
    }

    #[test]
    fn unknown_extension_falls_back_to_octet_stream() {
        let (_dir, responder) = fixture();
        let response = get(&responder, "/bare/data.bin");
        assert_eq!(response.header("Content-Type"), Some("application/octet-stream"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let (_dir, responder) = fixture();
        assert_eq!(get(&responder, "/missing.txt").status, HttpStatus::NotFound);
        assert_eq!(get(&responder, "/hello.txt/child").status, HttpStatus::NotFound);
    }

    #[test]
    fn directory_serves_index_file() {
        let (_dir, responder) = fixture();
        let response = get(&responder, "/site/");
        assert_eq!(response.status, HttpStatus::Ok);
        assert_eq!(body_of(response), "<h1>site</h1>");
    }

    #[test]
    fn directory_without_index_is_listed() {
        let (_dir, responder) = fixture();
        let response = get(&responder, "/");
        assert_eq!(response.header("Content-Type"), Some(HTML_CONTENT_TYPE));
        let body = body_of(response);
        assert!(body.contains("<a href=\"hello.txt\">hello.txt</a>"));
        assert!(body.contains("<a href=\"site/\">site/</a>"));
    }

    #[test]
    fn redirects_follow_trailing_slash_conventions() {
        let (_dir, responder) = fixture();

        let dir = get(&responder, "/site?x=1");
        assert_eq!(dir.status, HttpStatus::MovedPermanently);
        assert_eq!(dir.header("Location"), Some("site/?x=1"));

        let index = get(&responder, "/site/index.html");
        assert_eq!(index.header("Location"), Some("./"));

        let file = get(&responder, "/hello.txt/");
        assert_eq!(file.header("Location"), Some("../hello.txt"));
    }

    #[test]
    fn redirects_from_dotted_paths_use_the_cleaned_location() {
        let (_dir, responder) = fixture();

        let root = get(&responder, "/site/..");
        assert_eq!(root.status, HttpStatus::MovedPermanently);
        assert_eq!(root.header("Location"), Some("/"));

        let dir = get(&responder, "/bare/../site");
        assert_eq!(dir.header("Location"), Some("/site/"));

        let file = get(&responder, "/site/../hello.txt/");
        assert_eq!(file.header("Location"), Some("/hello.txt"));

        fs::create_dir(responder.root().join("my dir")).unwrap();
        let spaced = get(&responder, "/./my%20dir");
        assert_eq!(spaced.header("Location"), Some("/my%20dir/"));
    }

    #[test]
    fn traversal_above_root_is_forbidden() {
        let (_dir, responder) = fixture();
        assert_eq!(get(&responder, "/../etc/passwd").status, HttpStatus::Forbidden);
        assert_eq!(get(&responder, "/site/../../x").status, HttpStatus::Forbidden);
        assert_eq!(get(&responder, "/%2e%2e/secret").status, HttpStatus::Forbidden);
        assert_eq!(get(&responder, "/site/../hello.txt").status, HttpStatus::Ok);
    }

    #[test]
    fn head_sends_headers_only() {
        let (_dir, responder) = fixture();
        let raw = b"HEAD /hello.txt HTTP/1.1\r\n\r\n";
        let response = responder.respond(&Request::parse(raw).unwrap());
        assert_eq!(response.header("Content-Length"), Some("11"));
        assert_eq!(body_of(response), "");
    }

    #[test]
    fn other_methods_are_not_allowed() {
        let (_dir, responder) = fixture();
        let raw = b"POST /hello.txt HTTP/1.1\r\n\r\n";
        let response = responder.respond(&Request::parse(raw).unwrap());
        assert_eq!(response.status, HttpStatus::MethodNotAllowed);
        assert_eq!(response.header("Allow"), Some("GET, HEAD"));
    }

    #[test]
    fn error_pages_are_small_html_documents() {
        let response = Response::error(HttpStatus::NotFound);
        assert_eq!(body_of(response), "<html><body><h1>404 Not Found</h1></body></html>");
    }

    #[test]
    fn clean_segments_resolves_dots() {
        assert_eq!(clean_segments("/a/./b/../c/"), Some(vec!["a", "c"]));
        assert_eq!(clean_segments("/"), Some(vec![]));
        assert_eq!(clean_segments("/.."), None);
    }

    #[test]
    fn http_date_uses_imf_fixdate() {
        let time = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        assert_eq!(http_date(time), "Wed, 21 Oct 2015 07:28:00 GMT");
    }
}
