//! Path classification and target URL resolution.
//!
//! An inbound path is mapped onto one of the two upstream origins by its
//! leading segments. Everything after the origin (path and query) is carried
//! over unchanged, apart from the mount prefix and the `path` override
//! parameter used by hosting layers that rewrite every request to `/`.

use crate::config::ProxyConfig;
use axum::http::Uri;
use std::fmt;
use url::{form_urlencoded, Url};

/// Query parameter carrying the real path when the inbound path is `/`.
pub const PATH_OVERRIDE_PARAM: &str = "path";

/// Body of the response for paths outside both families.
pub const USAGE_TEXT: &str = "OK: use /3/... or /4/... for API, /t/p/... for images";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Api,
    Image,
}

impl TargetKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Image => "image",
        }
    }

    /// Image clients often cannot follow redirects themselves, so image
    /// fetches are resolved to their final payload. API redirects are relayed.
    #[must_use]
    pub fn follows_redirects(self) -> bool {
        matches!(self, Self::Image)
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved upstream URL and the family it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: TargetKind,
    pub url: Url,
}

struct PathFamily {
    kind: TargetKind,
    prefixes: &'static [&'static str],
}

// Checked in order.
const FAMILIES: &[PathFamily] = &[
    PathFamily {
        kind: TargetKind::Api,
        prefixes: &["/3/", "/4/"],
    },
    PathFamily {
        kind: TargetKind::Image,
        prefixes: &["/t/p/"],
    },
];

#[must_use]
pub fn classify(path: &str) -> Option<TargetKind> {
    FAMILIES
        .iter()
        .find(|family| family.prefixes.iter().any(|p| path.starts_with(p)))
        .map(|family| family.kind)
}

#[derive(Debug, Clone)]
pub struct TargetResolver {
    mount_prefix: String,
    api_origin: String,
    image_origin: String,
}

impl TargetResolver {
    /// Origins must already be bare (no trailing slash); see `ProxyConfig::validate`.
    pub fn new(
        mount_prefix: impl Into<String>,
        api_origin: impl Into<String>,
        image_origin: impl Into<String>,
    ) -> Self {
        Self {
            mount_prefix: mount_prefix.into(),
            api_origin: api_origin.into(),
            image_origin: image_origin.into(),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.mount_prefix.clone(),
            config.upstream.api_origin.clone(),
            config.upstream.image_origin.clone(),
        )
    }

    #[must_use]
    pub fn origin(&self, kind: TargetKind) -> &str {
        match kind {
            TargetKind::Api => &self.api_origin,
            TargetKind::Image => &self.image_origin,
        }
    }

    /// Resolve the upstream target for an inbound request URI.
    ///
    /// `None` means the path belongs to neither family; callers answer with
    /// [`USAGE_TEXT`]. An override that yields an unparseable URL is treated
    /// the same way.
    pub fn resolve(&self, uri: &Uri) -> Option<Target> {
        let path = self.strip_mount_prefix(uri.path());
        let query = uri.query().filter(|q| !q.is_empty());

        let (path, query) = match query {
            Some(q) if path.is_empty() || path == "/" => match take_path_override(q) {
                Some((path, rest)) => (path, rest),
                None => (path.to_string(), Some(q.to_string())),
            },
            _ => (path.to_string(), query.map(str::to_string)),
        };

        let kind = classify(&path)?;

        let mut target = format!("{}{}", self.origin(kind), path);
        if let Some(q) = query {
            target.push('?');
            target.push_str(&q);
        }

        match Url::parse(&target) {
            Ok(url) => Some(Target { kind, url }),
            Err(e) => {
                tracing::debug!(target_url = %target, error = %e, "Unparseable target, treating as unrecognized");
                None
            }
        }
    }

    fn strip_mount_prefix<'a>(&self, path: &'a str) -> &'a str {
        if self.mount_prefix.is_empty() {
            return path;
        }
        path.strip_prefix(self.mount_prefix.as_str()).unwrap_or(path)
    }
}

/// Pull a non-empty `path` parameter out of `query`, returning the effective
/// path and the query without any `path` pairs.
fn take_path_override(query: &str) -> Option<(String, Option<String>)> {
    let value = form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| *k == PATH_OVERRIDE_PARAM)
        .map(|(_, v)| v.into_owned())?;

    if value.is_empty() {
        return None;
    }

    let path = if value.starts_with('/') {
        value
    } else {
        format!("/{}", value)
    };

    let rest = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(
            form_urlencoded::parse(query.as_bytes()).filter(|(k, _)| *k != PATH_OVERRIDE_PARAM),
        )
        .finish();

    Some((path, (!rest.is_empty()).then_some(rest)))
}
