//! Request gating
//!
//! Decides whether a request can be answered from the current build output
//! or has to wait for the build in flight. Waiting never blocks: the
//! completion is queued on the pending-build state and runs when the build
//! reports that it is done.

use crate::compiler::{BuildStats, Compiler};
use crate::fs::SharedFs;
use crate::logger;
use regex::Regex;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

/// Lower-hex run long enough to be a content hash
pub static HASHED_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[0-9a-f]{10,}").expect("hash pattern is valid"));

type ReadyCallback = Box<dyn FnOnce(Option<&BuildStats>) + Send>;

struct BuildState {
    finished: bool,
    stats: Option<Arc<BuildStats>>,
    callbacks: Vec<ReadyCallback>,
}

/// Shared build status plus the completions waiting on it
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct PendingBuild {
    state: Arc<Mutex<BuildState>>,
}

impl Default for PendingBuild {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingBuild {
    /// State for a build that has not finished yet
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BuildState {
                finished: false,
                stats: None,
                callbacks: Vec::new(),
            })),
        }
    }

    /// State that counts as finished before any build has run
    pub fn new_finished() -> Self {
        let pending = Self::new();
        pending.lock().finished = true;
        pending
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BuildState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Stats of the most recent finished build
    pub fn stats(&self) -> Option<Arc<BuildStats>> {
        self.lock().stats.clone()
    }

    /// Number of completions waiting for the build
    pub fn waiting(&self) -> usize {
        self.lock().callbacks.len()
    }

    /// A (re)build started
    pub fn invalidate(&self) {
        let was_finished = {
            let mut state = self.lock();
            std::mem::replace(&mut state.finished, false)
        };
        if was_finished {
            logger::log_build_invalid();
        }
    }

    /// A build completed: store its stats and run every queued completion
    /// once, in the order they were queued
    pub fn finish(&self, stats: BuildStats) {
        let stats = Arc::new(stats);
        let callbacks = {
            let mut state = self.lock();
            state.finished = true;
            state.stats = Some(Arc::clone(&stats));
            std::mem::take(&mut state.callbacks)
        };

        logger::log_build_done(&stats);

        // Lock is released here so a completion may call back into the state
        for callback in callbacks {
            callback(Some(&stats));
        }
    }

    /// Run `callback` now if the build is finished, otherwise queue it
    ///
    /// The wait is logged with `request_url`, or with the callback's type
    /// name when there is no request.
    pub fn ready<F>(&self, callback: F, request_url: Option<&str>)
    where
        F: FnOnce(Option<&BuildStats>) + Send + 'static,
    {
        let mut state = self.lock();
        if state.finished {
            let stats = state.stats.clone();
            drop(state);
            callback(stats.as_deref());
            return;
        }

        state.callbacks.push(Box::new(callback));
        drop(state);
        logger::log_wait_until_finished(request_url.unwrap_or(std::any::type_name::<F>()));
    }
}

/// Completion that does nothing
pub const fn noop(_: Option<&BuildStats>) {}

/// Gate options
#[derive(Debug, Clone, Default)]
pub struct GateOptions {
    /// Build on demand instead of continuously
    pub lazy: bool,
    /// Only filenames matching this trigger a lazy rebuild; `None` matches all
    pub filename: Option<Regex>,
}

/// Everything a request needs to consult: options, filesystem, build
/// pipeline and the pending-build state
pub struct Context {
    pub options: GateOptions,
    pub fs: SharedFs,
    pub compiler: Arc<dyn Compiler>,
    pub pending: PendingBuild,
}

impl Context {
    pub fn new(options: GateOptions, fs: SharedFs, compiler: Arc<dyn Compiler>) -> Self {
        let pending = if options.lazy {
            PendingBuild::new_finished()
        } else {
            PendingBuild::new()
        };
        Self {
            options,
            fs,
            compiler,
            pending,
        }
    }

    /// Ask the build pipeline for a new build
    pub fn rebuild(&self) {
        self.compiler.rebuild(self.pending.clone());
    }

    fn wants_lazy_rebuild(&self, filename: &str) -> bool {
        self.options.lazy
            && self
                .options
                .filename
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(filename))
    }
}

/// Gate a request for `filename`, running `on_ready` when it may be served
///
/// Hashed filenames that already exist are served immediately even while a
/// build is running; they never change once written.
pub fn handle_request<F>(ctx: &Context, filename: &str, on_ready: F, request_url: Option<&str>)
where
    F: FnOnce(Option<&BuildStats>) + Send + 'static,
{
    if ctx.wants_lazy_rebuild(filename) {
        ctx.rebuild();
    }

    if HASHED_FILENAME.is_match(filename) && ctx.fs.stat(filename).is_file() {
        let stats = ctx.pending.stats();
        on_ready(stats.as_deref());
        return;
    }

    ctx.pending.ready(on_ready, request_url);
}
