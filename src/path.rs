//! Translation of caller-supplied targets into paths on a connection.
//!
//! A target is either an `ftp://` URI or a bare path. URIs must point at the
//! same server as the connection they are used with; everything is checked
//! here, before any command goes out.

use percent_encoding::percent_decode_str;
use url::Url;

use super::types::{FtpError, Result};

/// Port assumed for `ftp://` URIs that do not name one.
pub const DEFAULT_PORT: u16 = 21;

/// Resolves `target` against a connection to `host:port`.
///
/// - no target means the root directory
/// - a string without a scheme is a bare path and is returned unchanged
/// - a URI must use the `ftp` scheme; when it names a host, host and port
///   (21 when omitted) must match the connection
pub fn resolve(target: Option<&str>, host: &str, port: u16) -> Result<String> {
    let target = match target.map(str::trim) {
        None | Some("") => return Ok("/".to_string()),
        Some(target) => target,
    };

    let uri = match Url::parse(target) {
        Ok(uri) => uri,
        Err(url::ParseError::RelativeUrlWithoutBase) => return Ok(target.to_string()),
        Err(err) => {
            return Err(FtpError::InvalidArgument(format!(
                "Invalid target {}: {}",
                target, err
            )))
        }
    };

    if !uri.scheme().eq_ignore_ascii_case("ftp") {
        return Err(FtpError::InvalidArgument(
            "Only scheme ftp is supported".to_string(),
        ));
    }

    if let Some(uri_host) = uri.host_str() {
        let uri_host = uri_host.trim_start_matches('[').trim_end_matches(']');
        let conn_host = host.trim_start_matches('[').trim_end_matches(']');
        if !uri_host.eq_ignore_ascii_case(conn_host) {
            return Err(FtpError::InvalidArgument(format!(
                "The host of the URI does not match the current connection: {} != {}",
                uri_host, host
            )));
        }
        let uri_port = uri.port().unwrap_or(DEFAULT_PORT);
        if uri_port != port {
            return Err(FtpError::InvalidArgument(format!(
                "The port of the URI does not match the current connection: {} != {}",
                uri_port, port
            )));
        }
    }

    let path = percent_decode_str(uri.path())
        .decode_utf8()
        .map_err(|err| FtpError::InvalidArgument(format!("Invalid path in {}: {}", target, err)))?;
    if path.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(path.into_owned())
    }
}

/// Joins a listed name onto the directory it was listed from, collapsing
/// runs of slashes and forcing a leading one.
pub fn child_path(parent: &str, name: &str) -> String {
    normalize(&format!("{}/{}", parent, name))
}

/// Collapses runs of `/` and makes the path absolute.
pub fn normalize(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for c in path.chars() {
        if c == '/' && normalized.ends_with('/') {
            continue;
        }
        normalized.push(c);
    }
    if !normalized.starts_with('/') {
        normalized.insert(0, '/');
    }
    normalized
}

/// The last path segment.
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Directory targets end with a separator.
pub fn is_directory(path: &str) -> bool {
    path.ends_with('/')
}
