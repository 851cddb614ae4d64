//! Request URL to output path resolution
//!
//! Maps a request URL onto a path inside the build output, honouring the
//! public path the build is served under. Public paths may be absolute
//! URLs (`http://cdn.local/assets/`), absolute paths (`/assets/`) or empty.

use crate::compiler::CompilerDescriptor;
use percent_encoding::percent_decode_str;

/// Host and path components of a URL-like string
///
/// Parsing is non-destructive: nothing is resolved against a base, dot
/// segments are kept and percent-escapes stay encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    /// Lowercased host without port or credentials
    pub hostname: Option<String>,
    pub pathname: String,
    /// Pathname followed by the query string, if any
    pub path: String,
}

impl UrlParts {
    /// Split `input` into host and path.
    ///
    /// A leading `//` only introduces a host after a scheme, or anywhere
    /// when `slashes_denote_host` is set.
    pub fn parse(input: &str, slashes_denote_host: bool) -> Self {
        let input = normalize_separators(input.trim());
        let mut rest = input.as_str();

        let scheme = scheme_of(rest);
        if let Some(scheme) = scheme {
            rest = &rest[scheme.len() + 1..];
        }

        let mut hostname = None;
        if rest.starts_with("//") && (scheme.is_some() || slashes_denote_host) {
            let authority_end = rest[2..]
                .find(['/', '?', '#'])
                .map_or(rest.len(), |idx| idx + 2);
            hostname = host_of(&rest[2..authority_end]);
            rest = &rest[authority_end..];
        }

        let rest = rest.split('#').next().unwrap_or_default();
        let (pathname, query) = match rest.split_once('?') {
            Some((pathname, query)) => (pathname, Some(query)),
            None => (rest, None),
        };

        let pathname = if pathname.is_empty() && scheme.is_some() && hostname.is_some() {
            "/".to_string()
        } else {
            pathname.to_string()
        };
        let path = match query {
            Some(query) => format!("{pathname}?{query}"),
            None => pathname.clone(),
        };

        Self {
            hostname,
            pathname,
            path,
        }
    }
}

/// Backslashes before the query or fragment count as slashes
fn normalize_separators(input: &str) -> String {
    let split = input.find(['?', '#']).unwrap_or(input.len());
    let (head, tail) = input.split_at(split);
    format!("{}{tail}", head.replace('\\', "/"))
}

fn scheme_of(input: &str) -> Option<&str> {
    let colon = input.find(':')?;
    let scheme = &input[..colon];
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some(scheme)
}

fn host_of(authority: &str) -> Option<String> {
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    let host = if let Some(bracketed) = host_port.strip_prefix('[') {
        bracketed.split(']').next().unwrap_or_default()
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
            _ => host_port,
        }
    };

    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Pick the public path and output path that serve `url`
///
/// Composite builds take the first configuration whose public path is a
/// literal prefix of `url` and fall back to the top-level pair otherwise.
fn select_paths<'a>(
    public_path: Option<&'a str>,
    compiler: &'a CompilerDescriptor,
    url: &str,
) -> (Option<&'a str>, &'a str) {
    match compiler {
        CompilerDescriptor::Single(config) => (
            public_path.or(config.public_path.as_deref()),
            config.output_path.as_str(),
        ),
        CompilerDescriptor::Composite {
            output_path,
            configs,
        } => configs
            .iter()
            .find_map(|config| {
                let prefix = config.public_path.as_deref()?;
                url.starts_with(prefix)
                    .then_some((Some(prefix), config.output_path.as_str()))
            })
            .unwrap_or((public_path, output_path.as_str())),
    }
}

/// Join a path segment onto a base, collapsing repeated slashes that do
/// not follow a `:` (so `http://` survives)
fn join_url(base: &str, segment: &str) -> String {
    let joined = format!("{base}/{segment}");
    let mut out = String::with_capacity(joined.len());
    let mut anchor: Option<char> = None;

    for c in joined.chars() {
        if c == '/' {
            if out.ends_with('/') {
                if anchor.is_some_and(|a| a != ':' && !a.is_whitespace()) {
                    continue;
                }
            } else {
                anchor = out.chars().last();
            }
        }
        out.push(c);
    }
    out
}

/// Resolve `url` to a path in the build output
///
/// Returns `None` when the URL is not served by this build: another host,
/// outside the public path, or a bare path where the public path requires
/// a host-qualified URL. A URL addressing the public path itself resolves
/// to the output directory.
pub fn resolve(
    public_path: Option<&str>,
    compiler: &CompilerDescriptor,
    url: &str,
) -> Option<String> {
    let (public_path, output_path) = select_paths(public_path, compiler, url);
    let public_path = public_path.filter(|p| !p.is_empty());

    let local_prefix = UrlParts::parse(public_path.unwrap_or("/"), true);
    let url_parts = UrlParts::parse(url, false);

    if let (Some(local_host), Some(url_host)) = (&local_prefix.hostname, &url_parts.hostname) {
        if local_host != url_host {
            return None;
        }
    }

    if let Some(prefix) = public_path {
        if local_prefix.hostname == url_parts.hostname && !url.starts_with(prefix) {
            return None;
        }
    }

    let filename = url_parts
        .pathname
        .strip_prefix(local_prefix.pathname.as_str());

    if url_parts.hostname.is_none()
        && local_prefix.hostname.is_some()
        && !url.starts_with(&local_prefix.path)
    {
        return None;
    }

    let uri = match filename.filter(|f| !f.is_empty()) {
        Some(filename) => {
            let base = output_path.strip_suffix('/').unwrap_or(output_path);
            join_url(base, filename)
        }
        None => output_path.to_string(),
    };

    Some(percent_decode_str(&uri).decode_utf8_lossy().into_owned())
}
