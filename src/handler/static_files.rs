//! Static file serving module
//!
//! The core of the server: resolves request paths against the root
//! directory, guards against traversal, and serves file bytes, index
//! files, or directory listings.

use crate::config::AppState;
use crate::handler::listing;
use crate::handler::router::RequestContext;
use crate::http::{self, cache, mime, range::RangeParseResult};
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;
use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// Outcome of resolving a request path against the root directory
#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    /// A regular file
    File(PathBuf),
    /// A directory, requested with a trailing slash
    Directory(PathBuf),
    /// A directory requested without a trailing slash; client should be
    /// redirected so relative links in listings resolve correctly
    RedirectToSlash,
    /// Nothing exists at the resolved path
    NotFound,
    /// Normalization or symlink resolution escaped the root
    Forbidden,
    /// The path exists but could not be inspected
    Unreadable,
}

/// Serve a request path from the configured root
pub async fn serve(ctx: &RequestContext<'_>, state: &AppState) -> Response<Full<Bytes>> {
    match resolve_path(&state.root, ctx.path) {
        Resolved::File(path) => serve_file(ctx, &path).await,
        Resolved::Directory(path) => serve_directory(ctx, state, &path).await,
        Resolved::RedirectToSlash => http::build_dir_redirect_response(&format!("{}/", ctx.path)),
        Resolved::NotFound => http::build_404_response(),
        Resolved::Forbidden => {
            logger::log_warning(&format!("Path traversal attempt blocked: {}", ctx.path));
            http::build_403_response()
        }
        Resolved::Unreadable => http::build_500_response(),
    }
}

/// Resolve a raw request path to a filesystem location under `root`.
///
/// The path is percent-decoded and lexically normalized before any
/// filesystem access; a path that would escape the root is rejected
/// without touching the disk. Canonicalization afterwards catches
/// symlinks pointing outside the root.
fn resolve_path(root: &Path, raw_path: &str) -> Resolved {
    let decoded = percent_decode_str(raw_path).decode_utf8_lossy();
    let wants_dir = decoded.ends_with('/');

    let Some(relative) = normalize(&decoded) else {
        return Resolved::Forbidden;
    };

    let joined = root.join(&relative);

    // Symlink guard: the canonical path must still be under the root
    let canonical = match joined.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Resolved::NotFound,
        Err(e) => {
            logger::log_error(&format!(
                "Failed to resolve '{}': {e}",
                joined.display()
            ));
            return Resolved::Unreadable;
        }
    };
    if !canonical.starts_with(root) {
        return Resolved::Forbidden;
    }

    if canonical.is_dir() {
        if wants_dir {
            Resolved::Directory(canonical)
        } else {
            Resolved::RedirectToSlash
        }
    } else if canonical.is_file() {
        Resolved::File(canonical)
    } else {
        Resolved::NotFound
    }
}

/// Lexically normalize a decoded request path into a relative path.
///
/// `.` segments are dropped and `..` segments pop the previous one;
/// returns None when a `..` would climb above the root.
fn normalize(path: &str) -> Option<PathBuf> {
    let mut segments: Vec<&std::ffi::OsStr> = Vec::new();

    for component in Path::new(path).components() {
        match component {
            Component::Normal(seg) => segments.push(seg),
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return None;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    Some(segments.iter().collect())
}

/// Serve a regular file with conditional and range request support
async fn serve_file(ctx: &RequestContext<'_>, path: &Path) -> Response<Full<Bytes>> {
    let mtime = match fs::metadata(path).await {
        Ok(meta) => meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        Err(e) => return read_failure(path, &e),
    };
    let content = match fs::read(path).await {
        Ok(c) => c,
        Err(e) => return read_failure(path, &e),
    };

    let etag = cache::generate_etag(&content);
    let last_modified = cache::format_http_date(mtime);

    // RFC 7232: a present If-None-Match decides alone; If-Modified-Since
    // is only consulted when the client sent no ETag
    let not_modified = match ctx.if_none_match.as_deref() {
        Some(client_etag) => cache::check_etag_match(Some(client_etag), &etag),
        None => cache::check_not_modified(ctx.if_modified_since.as_deref(), mtime),
    };
    if not_modified {
        return http::build_304_response(&etag, &last_modified);
    }

    let content_type = mime::get_content_type(path.extension().and_then(|e| e.to_str()));
    let total_size = content.len();

    match http::parse_range_header(ctx.range_header.as_deref(), total_size) {
        RangeParseResult::Valid(range) => {
            let start = range.start;
            let end = range.end_position(total_size);
            let body = if ctx.is_head {
                Bytes::new()
            } else {
                Bytes::from(content[start..=end].to_vec())
            };
            http::response::build_partial_response(
                body,
                content_type,
                &etag,
                &last_modified,
                start,
                end,
                total_size,
                ctx.is_head,
            )
        }
        RangeParseResult::NotSatisfiable => http::build_416_response(total_size),
        RangeParseResult::None => http::response::build_file_response(
            Bytes::from(content),
            content_type,
            &etag,
            &last_modified,
            ctx.is_head,
        ),
    }
}

/// Serve a directory: the first present index file, or a generated
/// listing of its immediate entries
async fn serve_directory(
    ctx: &RequestContext<'_>,
    state: &AppState,
    dir: &Path,
) -> Response<Full<Bytes>> {
    for index_file in &state.config.site.index_files {
        let candidate = dir.join(index_file);
        if candidate.is_file() {
            return serve_file(ctx, &candidate).await;
        }
    }

    match read_entries(dir).await {
        Ok(entries) => {
            let html = listing::render(ctx.path, &entries);
            http::build_html_response(html, ctx.is_head)
        }
        Err(e) => read_failure(dir, &e),
    }
}

/// Collect a directory's immediate entries, directories first, sorted
async fn read_entries(dir: &Path) -> io::Result<Vec<listing::Entry>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    let mut reader = fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if is_dir {
            dirs.push(listing::Entry { name, is_dir: true });
        } else {
            files.push(listing::Entry {
                name,
                is_dir: false,
            });
        }
    }

    dirs.sort_by(|a, b| a.name.cmp(&b.name));
    files.sort_by(|a, b| a.name.cmp(&b.name));
    dirs.extend(files);
    Ok(dirs)
}

/// Map a filesystem error to 404 (missing) or 500 (unreadable)
fn read_failure(path: &Path, err: &io::Error) -> Response<Full<Bytes>> {
    if err.kind() == io::ErrorKind::NotFound {
        return http::build_404_response();
    }
    logger::log_error(&format!("Failed to read '{}': {err}", path.display()));
    http::build_500_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs as stdfs;

    /// Build a unique temp root populated via the given closure
    fn temp_root(name: &str, populate: impl Fn(&Path)) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fileserver_test_{name}"));
        let _ = stdfs::remove_dir_all(&dir);
        stdfs::create_dir_all(&dir).expect("create temp root");
        populate(&dir);
        dir.canonicalize().expect("canonical temp root")
    }

    fn test_state(root: &Path) -> AppState {
        let mut cfg = Config::load_from("nonexistent-config").expect("defaults should load");
        cfg.site.root = root.to_str().expect("utf-8 root").to_string();
        AppState::new(cfg).expect("state should build")
    }

    fn ctx(path: &str) -> RequestContext<'_> {
        RequestContext {
            path,
            is_head: false,
            if_none_match: None,
            if_modified_since: None,
            range_header: None,
        }
    }

    async fn body_bytes(resp: &Response<Full<Bytes>>) -> Vec<u8> {
        use http_body_util::BodyExt;
        resp.body()
            .clone()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn test_normalize_plain_path() {
        assert_eq!(normalize("/img/logo.png"), Some(PathBuf::from("img/logo.png")));
        assert_eq!(normalize("/"), Some(PathBuf::new()));
    }

    #[test]
    fn test_normalize_collapses_dot_segments() {
        assert_eq!(normalize("/a/./b"), Some(PathBuf::from("a/b")));
        assert_eq!(normalize("/a/b/../c"), Some(PathBuf::from("a/c")));
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert_eq!(normalize("/../etc/passwd"), None);
        assert_eq!(normalize("/../../etc/passwd"), None);
        assert_eq!(normalize("/a/../../etc"), None);
    }

    #[test]
    fn test_resolve_file_and_missing() {
        let root = temp_root("resolve", |dir| {
            stdfs::write(dir.join("hello.txt"), b"hi").expect("write file");
        });

        match resolve_path(&root, "/hello.txt") {
            Resolved::File(p) => assert!(p.ends_with("hello.txt")),
            other => panic!("expected File, got {other:?}"),
        }
        assert_eq!(resolve_path(&root, "/nope.txt"), Resolved::NotFound);
        assert_eq!(resolve_path(&root, "/../../etc/passwd"), Resolved::Forbidden);
        // Percent-encoded traversal is decoded before the check
        assert_eq!(
            resolve_path(&root, "/%2e%2e/%2e%2e/etc/passwd"),
            Resolved::Forbidden
        );
    }

    #[test]
    fn test_resolve_directory_redirect() {
        let root = temp_root("redirect", |dir| {
            stdfs::create_dir_all(dir.join("img")).expect("create subdir");
        });
        assert_eq!(resolve_path(&root, "/img"), Resolved::RedirectToSlash);
        match resolve_path(&root, "/img/") {
            Resolved::Directory(p) => assert!(p.ends_with("img")),
            other => panic!("expected Directory, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_serve_file_bytes() {
        let root = temp_root("serve_file", |dir| {
            stdfs::write(dir.join("data.txt"), b"exact bytes").expect("write file");
        });
        let state = test_state(&root);

        let resp = serve(&ctx("/data.txt"), &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Type"], "text/plain; charset=utf-8");
        assert_eq!(resp.headers()["Content-Length"], "11");
        assert_eq!(body_bytes(&resp).await, b"exact bytes");
    }

    #[tokio::test]
    async fn test_serve_index_file() {
        let root = temp_root("serve_index", |dir| {
            stdfs::write(dir.join("index.html"), b"hello").expect("write index");
        });
        let state = test_state(&root);

        let resp = serve(&ctx("/"), &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Type"], "text/html; charset=utf-8");
        assert_eq!(body_bytes(&resp).await, b"hello");
    }

    #[tokio::test]
    async fn test_serve_listing_without_index() {
        let root = temp_root("serve_listing", |dir| {
            stdfs::write(dir.join("a.txt"), b"a").expect("write a");
            stdfs::create_dir_all(dir.join("sub")).expect("create sub");
        });
        let state = test_state(&root);

        let resp = serve(&ctx("/"), &state).await;
        assert_eq!(resp.status(), 200);
        let body = String::from_utf8(body_bytes(&resp).await).expect("utf-8 listing");
        assert!(body.contains("a.txt"));
        assert!(body.contains("sub/"));
    }

    #[tokio::test]
    async fn test_serve_404() {
        let root = temp_root("serve_404", |_| {});
        let state = test_state(&root);
        let resp = serve(&ctx("/nope.txt"), &state).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_serve_traversal_rejected() {
        let root = temp_root("serve_traversal", |_| {});
        let state = test_state(&root);
        let resp = serve(&ctx("/../../etc/passwd"), &state).await;
        assert_eq!(resp.status(), 403);
        let body = body_bytes(&resp).await;
        assert!(!body.windows(5).any(|w| w == b"root:"));
    }

    #[tokio::test]
    async fn test_conditional_if_none_match() {
        let root = temp_root("conditional", |dir| {
            stdfs::write(dir.join("page.html"), b"cached").expect("write file");
        });
        let state = test_state(&root);

        let first = serve(&ctx("/page.html"), &state).await;
        let etag = first.headers()["ETag"].to_str().expect("etag").to_string();

        let mut second_ctx = ctx("/page.html");
        second_ctx.if_none_match = Some(etag);
        let second = serve(&second_ctx, &state).await;
        assert_eq!(second.status(), 304);
        assert!(body_bytes(&second).await.is_empty());
    }

    #[tokio::test]
    async fn test_conditional_if_modified_since() {
        let root = temp_root("if_modified", |dir| {
            stdfs::write(dir.join("page.html"), b"cached").expect("write file");
        });
        let state = test_state(&root);

        let first = serve(&ctx("/page.html"), &state).await;
        let last_modified = first.headers()["Last-Modified"]
            .to_str()
            .expect("last-modified")
            .to_string();

        let mut second_ctx = ctx("/page.html");
        second_ctx.if_modified_since = Some(last_modified);
        let second = serve(&second_ctx, &state).await;
        assert_eq!(second.status(), 304);
    }

    #[tokio::test]
    async fn test_range_request() {
        let root = temp_root("range", |dir| {
            stdfs::write(dir.join("data.bin"), b"0123456789").expect("write file");
        });
        let state = test_state(&root);

        let mut range_ctx = ctx("/data.bin");
        range_ctx.range_header = Some("bytes=0-4".to_string());
        let resp = serve(&range_ctx, &state).await;
        assert_eq!(resp.status(), 206);
        assert_eq!(resp.headers()["Content-Range"], "bytes 0-4/10");
        assert_eq!(body_bytes(&resp).await, b"01234");
    }

    #[tokio::test]
    async fn test_suffix_range_on_empty_file() {
        let root = temp_root("empty_range", |dir| {
            stdfs::write(dir.join("empty.txt"), b"").expect("write file");
        });
        let state = test_state(&root);

        let mut range_ctx = ctx("/empty.txt");
        range_ctx.range_header = Some("bytes=-5".to_string());
        let resp = serve(&range_ctx, &state).await;
        assert_eq!(resp.status(), 416);
        assert_eq!(resp.headers()["Content-Range"], "bytes */0");

        let mut range_ctx = ctx("/empty.txt");
        range_ctx.range_header = Some("bytes=0-4".to_string());
        let resp = serve(&range_ctx, &state).await;
        assert_eq!(resp.status(), 416);

        // Without a Range header the empty file is served normally
        let resp = serve(&ctx("/empty.txt"), &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Length"], "0");
    }

    #[tokio::test]
    async fn test_stale_etag_overrides_if_modified_since() {
        let root = temp_root("stale_etag", |dir| {
            stdfs::write(dir.join("page.html"), b"fresh content").expect("write file");
        });
        let state = test_state(&root);

        let first = serve(&ctx("/page.html"), &state).await;
        let last_modified = first.headers()["Last-Modified"]
            .to_str()
            .expect("last-modified")
            .to_string();

        // A non-matching ETag means the client's copy is stale, even if
        // the mtime has not advanced past its If-Modified-Since date
        let mut stale_ctx = ctx("/page.html");
        stale_ctx.if_none_match = Some("\"stale\"".to_string());
        stale_ctx.if_modified_since = Some(last_modified);
        let resp = serve(&stale_ctx, &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body_bytes(&resp).await, b"fresh content");
    }

    #[tokio::test]
    async fn test_head_request_empty_body() {
        let root = temp_root("head", |dir| {
            stdfs::write(dir.join("data.txt"), b"payload").expect("write file");
        });
        let state = test_state(&root);

        let mut head_ctx = ctx("/data.txt");
        head_ctx.is_head = true;
        let resp = serve(&head_ctx, &state).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["Content-Length"], "7");
        assert!(body_bytes(&resp).await.is_empty());
    }
}
