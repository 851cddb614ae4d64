//! Build output middleware
//!
//! Serves files from the in-memory build output: resolve the request URL to
//! an output path, wait for the build when needed, then answer with the
//! file (or the requested byte range of it).

use crate::compiler::{BuildStats, Compiler};
use crate::config::{LoggingConfig, MiddlewareConfig};
use crate::error::{DevServeError, Result};
use crate::fs::set_fs;
use crate::gate::{self, Context, GateOptions};
use crate::http::{self, mime, range};
use crate::logger::{self, AccessLogEntry};
use crate::resolver;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE, RANGE};
use hyper::{Method, Request, Response, StatusCode};
use regex::Regex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

/// Validated middleware options
#[derive(Debug, Clone)]
pub struct MiddlewareOptions {
    pub public_path: Option<String>,
    pub index: String,
    pub headers: HeaderMap,
    pub mime_types: HashMap<String, String>,
    pub methods: Vec<Method>,
    pub access_log: bool,
    pub access_log_format: String,
}

impl Default for MiddlewareOptions {
    fn default() -> Self {
        Self {
            public_path: None,
            index: "index.html".to_string(),
            headers: HeaderMap::new(),
            mime_types: HashMap::new(),
            methods: vec![Method::GET, Method::HEAD],
            access_log: false,
            access_log_format: "combined".to_string(),
        }
    }
}

impl MiddlewareOptions {
    /// Validate the `[middleware]` section; bad header names, header values
    /// or methods are configuration errors
    pub fn from_config(config: &MiddlewareConfig, logging: &LoggingConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| DevServeError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| DevServeError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                    .map_err(|e| DevServeError::Config(format!("invalid method '{m}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            public_path: config.public_path.clone(),
            index: config.index.clone(),
            headers,
            mime_types: config
                .mime_types
                .iter()
                .map(|(ext, ty)| (ext.trim_start_matches('.').to_ascii_lowercase(), ty.clone()))
                .collect(),
            methods,
            access_log: logging.access_log,
            access_log_format: logging.access_log_format.clone(),
        })
    }
}

/// Gate options from the `[middleware]` section
pub fn gate_options_from_config(config: &MiddlewareConfig) -> Result<GateOptions> {
    let filename = config
        .filename
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| DevServeError::Config(format!("invalid filename pattern: {e}")))?;
    Ok(GateOptions {
        lazy: config.lazy,
        filename,
    })
}

/// Serves the output of one build pipeline
pub struct Middleware {
    context: Context,
    options: MiddlewareOptions,
}

impl Middleware {
    /// Install the in-memory filesystem on `compiler` and, unless lazy,
    /// start the first build
    pub fn new(
        compiler: Arc<dyn Compiler>,
        options: MiddlewareOptions,
        gate_options: GateOptions,
    ) -> Result<Self> {
        let fs = set_fs(compiler.as_ref())?;
        let lazy = gate_options.lazy;
        let context = Context::new(gate_options, fs, compiler);
        if !lazy {
            context.rebuild();
        }
        Ok(Self { context, options })
    }

    pub const fn context(&self) -> &Context {
        &self.context
    }

    pub const fn options(&self) -> &MiddlewareOptions {
        &self.options
    }

    /// Output path `url` maps to, or `None` if this build does not serve it
    pub fn get_filename_from_url(&self, url: &str) -> Option<String> {
        resolver::resolve(
            self.options.public_path.as_deref(),
            self.context.compiler.descriptor(),
            url,
        )
    }

    /// Run `callback` once the current build has finished
    pub fn wait_until_valid<F>(&self, callback: F)
    where
        F: FnOnce(Option<&BuildStats>) + Send + 'static,
    {
        self.context.pending.ready(callback, None);
    }

    /// Force a rebuild and run `callback` when it has finished
    pub fn invalidate<F>(&self, callback: F)
    where
        F: FnOnce(Option<&BuildStats>) + Send + 'static,
    {
        if self.context.pending.is_finished() {
            self.context.rebuild();
        }
        self.context.pending.ready(callback, None);
    }

    /// Stop the build pipeline
    pub fn close(&self) {
        self.context.compiler.close();
    }

    /// Handle one HTTP request
    pub async fn handle<B>(&self, req: Request<B>, peer: Option<SocketAddr>) -> Response<Full<Bytes>> {
        let started = Instant::now();
        let mut entry = self.options.access_log.then(|| access_entry(&req, peer));

        let response = self.respond(&req).await;

        if let Some(entry) = entry.as_mut() {
            entry.status = response.status().as_u16();
            entry.body_bytes = response
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            logger::log_access(entry, &self.options.access_log_format);
        }
        response
    }

    async fn respond<B>(&self, req: &Request<B>) -> Response<Full<Bytes>> {
        if !self.options.methods.contains(req.method()) {
            let allow: Vec<&str> = self.options.methods.iter().map(Method::as_str).collect();
            return http::build_405_response(&allow.join(", "));
        }

        let url = req.uri().to_string();
        let Some(filename) = self.get_filename_from_url(&url) else {
            return http::build_404_response();
        };

        let (tx, rx) = oneshot::channel();
        gate::handle_request(
            &self.context,
            &filename,
            move |_| {
                let _ = tx.send(());
            },
            Some(&url),
        );
        if rx.await.is_err() {
            logger::log_error(&format!("Build completion dropped for {url}"));
            return http::build_500_response();
        }

        let range_header = req.headers().get(RANGE).and_then(|v| v.to_str().ok());
        self.process_request(filename, range_header, req.method() == Method::HEAD)
    }

    /// Answer from the build output once the gate has let the request through
    fn process_request(
        &self,
        mut filename: String,
        range_header: Option<&str>,
        is_head: bool,
    ) -> Response<Full<Bytes>> {
        let fs = &self.context.fs;
        if fs.stat(&filename).is_directory() && !self.options.index.is_empty() {
            filename = format!("{}/{}", filename.trim_end_matches('/'), self.options.index);
        }
        if !fs.stat(&filename).is_file() {
            return http::build_404_response();
        }
        let content = match fs.read_file(&filename) {
            Ok(content) => content,
            Err(e) => {
                logger::log_error(&format!("Failed to read {filename}: {e}"));
                return http::build_404_response();
            }
        };

        let mut head = Response::new(());
        let content_type = mime::content_type_for(&filename, &self.options.mime_types);
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            head.headers_mut().insert(CONTENT_TYPE, value);
        }
        for (name, value) in &self.options.headers {
            head.headers_mut().insert(name.clone(), value.clone());
        }

        let mut body = range::serve(content, range_header, &mut head);
        if head.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            body = Bytes::new();
        }
        head.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
        if is_head {
            body = Bytes::new();
        }

        head.map(|()| Full::new(body))
    }
}

fn access_entry<B>(req: &Request<B>, peer: Option<SocketAddr>) -> AccessLogEntry {
    let header = |name: HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    let mut entry = AccessLogEntry::new(
        peer.map(|addr| addr.ip().to_string()),
        req.method().to_string(),
        req.uri().to_string(),
    );
    entry.http_version = format!("{:?}", req.version())
        .trim_start_matches("HTTP/")
        .to_string();
    entry.referer = header(hyper::header::REFERER);
    entry.user_agent = header(hyper::header::USER_AGENT);
    entry
}
