//! Build pipeline capability
//!
//! The middleware never compiles anything itself. It only needs to know
//! where a build writes (`CompilerDescriptor`), how to swap in the
//! in-memory filesystem, and how to ask for a rebuild. `DirectoryCompiler`
//! is the stand-in pipeline used by the binary: it mirrors source
//! directories into the in-memory filesystem.

use crate::config::BuildConfig;
use crate::error::FsError;
use crate::fs::{normalize, SharedFs};
use crate::gate::PendingBuild;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Output location of one build configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputConfig {
    pub output_path: String,
    pub public_path: Option<String>,
}

impl OutputConfig {
    pub fn new(output_path: impl Into<String>, public_path: Option<&str>) -> Self {
        Self {
            output_path: output_path.into(),
            public_path: public_path.map(String::from),
        }
    }
}

/// Shape of the build: one configuration, or several served side by side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompilerDescriptor {
    Single(OutputConfig),
    Composite {
        /// Used when no configuration's public path prefixes the request
        output_path: String,
        configs: Vec<OutputConfig>,
    },
}

impl CompilerDescriptor {
    /// Top-level output path
    pub fn output_path(&self) -> &str {
        match self {
            Self::Single(config) => &config.output_path,
            Self::Composite { output_path, .. } => output_path,
        }
    }
}

/// Outcome of one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub hash: String,
    pub duration: Duration,
    pub assets: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl BuildStats {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Build pipeline as seen by the middleware
pub trait Compiler: Send + Sync {
    fn descriptor(&self) -> &CompilerDescriptor;

    /// Filesystem the build currently writes to, if it is an in-memory one
    fn output_file_system(&self) -> Option<SharedFs>;

    fn set_output_file_system(&self, fs: SharedFs);

    /// Fire-and-forget. Implementations report progress through `pending`:
    /// `invalidate()` when a build starts, `finish()` when it is done.
    fn rebuild(&self, pending: PendingBuild);

    /// Stop starting new builds
    fn close(&self);
}

/// One source directory mirrored to one output location
#[derive(Debug, Clone)]
pub struct BuildTarget {
    pub name: String,
    pub source_dir: PathBuf,
    pub output: OutputConfig,
}

/// Copies source directories into the in-memory filesystem
pub struct DirectoryCompiler {
    descriptor: CompilerDescriptor,
    inner: Arc<Inner>,
}

struct Inner {
    targets: Vec<BuildTarget>,
    fs: Mutex<Option<SharedFs>>,
    running: AtomicBool,
    rerun: AtomicBool,
    closed: AtomicBool,
}

impl DirectoryCompiler {
    pub fn new(descriptor: CompilerDescriptor, targets: Vec<BuildTarget>) -> Self {
        Self {
            descriptor,
            inner: Arc::new(Inner {
                targets,
                fs: Mutex::new(None),
                running: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Build a compiler from the `[build]` section.
    /// A non-empty `configs` list makes the descriptor composite.
    pub fn from_config(config: &BuildConfig) -> Self {
        if config.configs.is_empty() {
            let output = OutputConfig::new(&config.output_path, config.public_path.as_deref());
            let targets = config
                .source_dir
                .iter()
                .map(|dir| BuildTarget {
                    name: "main".to_string(),
                    source_dir: PathBuf::from(dir),
                    output: output.clone(),
                })
                .collect();
            return Self::new(CompilerDescriptor::Single(output), targets);
        }

        let targets: Vec<BuildTarget> = config
            .configs
            .iter()
            .map(|target| BuildTarget {
                name: target.name.clone(),
                source_dir: PathBuf::from(&target.source_dir),
                output: OutputConfig::new(&target.output_path, target.public_path.as_deref()),
            })
            .collect();
        let descriptor = CompilerDescriptor::Composite {
            output_path: config.output_path.clone(),
            configs: targets.iter().map(|t| t.output.clone()).collect(),
        };
        Self::new(descriptor, targets)
    }

    /// Run one build synchronously
    pub fn run(&self) -> BuildStats {
        self.inner.build()
    }
}

impl Compiler for DirectoryCompiler {
    fn descriptor(&self) -> &CompilerDescriptor {
        &self.descriptor
    }

    fn output_file_system(&self) -> Option<SharedFs> {
        self.inner
            .fs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_output_file_system(&self, fs: SharedFs) {
        *self.inner.fs.lock().unwrap_or_else(PoisonError::into_inner) = Some(fs);
    }

    fn rebuild(&self, pending: PendingBuild) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        // A build is already running: fold this request into one follow-up run
        if self.inner.running.swap(true, Ordering::SeqCst) {
            self.inner.rerun.store(true, Ordering::SeqCst);
            return;
        }

        pending.invalidate();
        let inner = Arc::clone(&self.inner);
        let job = move || inner.run_until_settled(&pending);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(job);
            }
            Err(_) => job(),
        }
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }
}

impl Inner {
    fn run_until_settled(&self, pending: &PendingBuild) {
        loop {
            let stats = self.build();
            if self.rerun.swap(false, Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst) {
                continue;
            }
            self.running.store(false, Ordering::SeqCst);
            pending.finish(stats);

            // A rebuild may have been requested between the swap and the store
            if self.rerun.swap(false, Ordering::SeqCst)
                && !self.closed.load(Ordering::SeqCst)
                && !self.running.swap(true, Ordering::SeqCst)
            {
                pending.invalidate();
                continue;
            }
            break;
        }
    }

    fn build(&self) -> BuildStats {
        let started = Instant::now();
        let mut stats = BuildStats::default();
        let mut hasher = DefaultHasher::new();

        let fs = self.fs.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(fs) = fs else {
            stats.errors.push("no output filesystem installed".to_string());
            return stats;
        };

        for target in &self.targets {
            emit_target(&fs, target, &mut stats, &mut hasher);
        }

        stats.hash = format!("{:016x}", hasher.finish());
        stats.duration = started.elapsed();
        stats
    }
}

/// Write one target's files over the previous output, then prune entries
/// the new build no longer produces. Existing files stay readable for the
/// whole build.
fn emit_target(fs: &SharedFs, target: &BuildTarget, stats: &mut BuildStats, hasher: &mut DefaultHasher) {
    let output_root = target.output.output_path.trim_end_matches(['/', '\\']);

    if let Err(e) = replace_dir(fs, &target.output.output_path) {
        stats.errors.push(format!("[{}] {e}", target.name));
        return;
    }

    if !target.source_dir.is_dir() {
        stats.errors.push(format!(
            "[{}] source directory not found: {}",
            target.name,
            target.source_dir.display()
        ));
        return;
    }

    let mut produced = HashSet::new();
    for entry in WalkDir::new(&target.source_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                stats.errors.push(format!("[{}] {e}", target.name));
                continue;
            }
        };
        let Some(relative) = relative_url_path(&target.source_dir, entry.path()) else {
            continue;
        };
        let dest = format!("{output_root}/{relative}");
        produced.insert(normalize(&dest));

        if entry.file_type().is_dir() {
            if let Err(e) = replace_dir(fs, &dest) {
                stats.errors.push(format!("[{}] {e}", target.name));
            }
            continue;
        }

        match std::fs::read(entry.path()) {
            Ok(data) => {
                relative.hash(hasher);
                data.hash(hasher);
                if data.is_empty() {
                    stats
                        .warnings
                        .push(format!("[{}] empty asset: {relative}", target.name));
                }
                match replace_file(fs, &dest, data) {
                    Ok(()) => stats.assets.push(dest),
                    Err(e) => stats.errors.push(format!("[{}] {e}", target.name)),
                }
            }
            Err(e) => stats.errors.push(format!(
                "[{}] failed to read {}: {e}",
                target.name,
                entry.path().display()
            )),
        }
    }

    for stale in fs.entries_below(&target.output.output_path) {
        if produced.contains(&stale) {
            continue;
        }
        match fs.remove(&stale) {
            // Already gone with a stale parent directory
            Ok(()) | Err(FsError::NotFound(_)) => {}
            Err(e) => stats.errors.push(format!("[{}] {e}", target.name)),
        }
    }
}

/// `mkdir_p`, first removing a file left where the directory goes
fn replace_dir(fs: &SharedFs, path: &str) -> Result<(), FsError> {
    if fs.stat(path).is_file() {
        fs.remove(path)?;
    }
    fs.mkdir_p(path)
}

/// `write_file`, first removing a directory left where the file goes
fn replace_file(fs: &SharedFs, path: &str, data: Vec<u8>) -> Result<(), FsError> {
    if fs.stat(path).is_directory() {
        fs.remove(path)?;
    }
    fs.write_file(path, data)
}

/// Path below `root` joined with `/`; `None` for the root itself
fn relative_url_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildTargetConfig;
    use crate::fs::{set_fs, FileStat};
    use std::fs;

    fn write_source(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn single(source: &Path, output: &str) -> DirectoryCompiler {
        DirectoryCompiler::new(
            CompilerDescriptor::Single(OutputConfig::new(output, Some("/"))),
            vec![BuildTarget {
                name: "main".to_string(),
                source_dir: source.to_path_buf(),
                output: OutputConfig::new(output, Some("/")),
            }],
        )
    }

    #[test]
    fn test_run_mirrors_source_tree() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "index.html", "<html></html>");
        write_source(src.path(), "js/app.js", "console.log(1)");

        let compiler = single(src.path(), "/build");
        let out = set_fs(&compiler).unwrap();
        let stats = compiler.run();

        assert!(!stats.has_errors(), "{:?}", stats.errors);
        assert_eq!(
            stats.assets,
            vec!["/build/index.html".to_string(), "/build/js/app.js".to_string()]
        );
        assert_eq!(out.read_file("/build/js/app.js").unwrap(), "console.log(1)");
        assert_eq!(stats.hash.len(), 16);
    }

    #[test]
    fn test_run_removes_stale_output() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "a.js", "a");

        let compiler = single(src.path(), "/build");
        let out = set_fs(&compiler).unwrap();
        compiler.run();

        fs::remove_file(src.path().join("a.js")).unwrap();
        write_source(src.path(), "b.js", "b");
        compiler.run();

        assert_eq!(out.stat("/build/a.js"), FileStat::Missing);
        assert!(out.stat("/build/b.js").is_file());
    }

    #[test]
    fn test_stale_directory_and_type_changes() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "old/a.js", "a");
        write_source(src.path(), "img", "file first");

        let compiler = single(src.path(), "/build");
        let out = set_fs(&compiler).unwrap();
        compiler.run();

        fs::remove_dir_all(src.path().join("old")).unwrap();
        fs::remove_file(src.path().join("img")).unwrap();
        write_source(src.path(), "img/logo.svg", "<svg/>");
        let stats = compiler.run();

        assert!(!stats.has_errors(), "{:?}", stats.errors);
        assert_eq!(out.stat("/build/old"), FileStat::Missing);
        assert!(out.stat("/build/img").is_directory());
        assert!(out.stat("/build/img/logo.svg").is_file());
    }

    #[test]
    fn test_hashed_asset_stays_readable_during_rebuild() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "app.0123456789abcdef.js", "bundle");
        for i in 0..50 {
            write_source(src.path(), &format!("chunks/{i}.js"), "chunk");
        }

        let compiler = Arc::new(single(src.path(), "/build"));
        let out = set_fs(compiler.as_ref()).unwrap();
        compiler.run();

        let builder = Arc::clone(&compiler);
        let rebuilds = std::thread::spawn(move || {
            for _ in 0..20 {
                builder.run();
            }
        });

        while !rebuilds.is_finished() {
            assert_eq!(
                out.read_file("/build/app.0123456789abcdef.js").unwrap(),
                "bundle"
            );
        }
        rebuilds.join().unwrap();
    }

    #[test]
    fn test_hash_follows_content() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "a.js", "one");
        let compiler = single(src.path(), "/build");
        set_fs(&compiler).unwrap();

        let first = compiler.run();
        let same = compiler.run();
        write_source(src.path(), "a.js", "two");
        let changed = compiler.run();

        assert_eq!(first.hash, same.hash);
        assert_ne!(first.hash, changed.hash);
    }

    #[test]
    fn test_missing_source_dir_is_reported() {
        let compiler = single(Path::new("/definitely/not/here"), "/build");
        set_fs(&compiler).unwrap();
        let stats = compiler.run();
        assert!(stats.has_errors());
    }

    #[test]
    fn test_run_without_fs_is_an_error() {
        let compiler = single(Path::new("/tmp"), "/build");
        assert!(compiler.run().has_errors());
    }

    #[test]
    fn test_from_config_composite() {
        let config = BuildConfig {
            output_path: "/".to_string(),
            source_dir: None,
            public_path: None,
            configs: vec![
                BuildTargetConfig {
                    name: "client".to_string(),
                    source_dir: "web".to_string(),
                    output_path: "/client".to_string(),
                    public_path: Some("/static/".to_string()),
                },
                BuildTargetConfig {
                    name: "admin".to_string(),
                    source_dir: "admin".to_string(),
                    output_path: "/admin".to_string(),
                    public_path: Some("/admin/".to_string()),
                },
            ],
        };

        let compiler = DirectoryCompiler::from_config(&config);
        match compiler.descriptor() {
            CompilerDescriptor::Composite { output_path, configs } => {
                assert_eq!(output_path, "/");
                assert_eq!(configs.len(), 2);
                assert_eq!(configs[0].public_path.as_deref(), Some("/static/"));
            }
            CompilerDescriptor::Single(_) => panic!("Expected Composite"),
        }
    }

    #[test]
    fn test_rebuild_without_runtime_finishes_inline() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "a.js", "a");
        let compiler = single(src.path(), "/build");
        set_fs(&compiler).unwrap();

        let pending = PendingBuild::new();
        compiler.rebuild(pending.clone());

        assert!(pending.is_finished());
        assert_eq!(pending.stats().unwrap().assets, vec!["/build/a.js".to_string()]);
    }

    #[tokio::test]
    async fn test_rebuild_reports_through_pending_state() {
        let src = tempfile::tempdir().unwrap();
        write_source(src.path(), "a.js", "a");
        let compiler = single(src.path(), "/build");
        set_fs(&compiler).unwrap();

        let pending = PendingBuild::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        pending.ready(
            move |stats| {
                let _ = tx.send(stats.map(|s| s.assets.clone()));
            },
            None,
        );
        compiler.rebuild(pending.clone());

        let assets = rx.await.unwrap();
        assert_eq!(assets, Some(vec!["/build/a.js".to_string()]));
    }

    #[test]
    fn test_closed_compiler_ignores_rebuild() {
        let compiler = single(Path::new("/tmp"), "/build");
        set_fs(&compiler).unwrap();
        compiler.close();

        let pending = PendingBuild::new();
        compiler.rebuild(pending.clone());
        assert!(!pending.is_finished());
    }
}
