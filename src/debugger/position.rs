//! Source position mapping
//!
//! The debuggee reports locations as `(module, line)`; the user thinks in
//! `(file, line)`. [`PositionMapper`] translates between the two using a
//! [`ModuleResolver`], caching resolved positions by `(module, line)`.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::common::{Error, Result};
use crate::node::{ProcessSnapshot, TraceElement};

/// Key identifying a breakpoint line on the remote side
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BreakpointKey {
    pub module: String,
    pub line: u32,
}

impl BreakpointKey {
    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Self {
            module: module.into(),
            line,
        }
    }
}

impl fmt::Display for BreakpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.line)
    }
}

/// Function enclosing a position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnclosingFunction {
    pub name: String,
    pub arity: u32,
    /// Ordinal of the anonymous fun inside `name/arity`, if the code runs in one
    pub fun_ordinal: Option<u32>,
}

impl EnclosingFunction {
    /// Decode a function name as reported by the runtime
    ///
    /// Plain names use the separately reported arity. Anonymous funs are
    /// encoded as `-Name/Arity-fun-N-`.
    pub fn parse(raw: &str, arity: Option<u32>) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        if let Some(inner) = raw.strip_prefix('-') {
            if let Some((head, tail)) = inner.split_once("-fun-") {
                let (name, fun_arity) = head.rsplit_once('/')?;
                let ordinal = tail.trim_end_matches('-').split('-').next()?;
                return Some(Self {
                    name: name.to_string(),
                    arity: fun_arity.parse().ok()?,
                    fun_ordinal: ordinal.parse().ok(),
                });
            }
        }

        Some(Self {
            name: raw.to_string(),
            arity: arity.unwrap_or(0),
            fun_ordinal: None,
        })
    }
}

impl fmt::Display for EnclosingFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.arity)?;
        if let Some(n) = self.fun_ordinal {
            write!(f, " fun #{}", n)?;
        }
        Ok(())
    }
}

/// A location resolved to both coordinate systems
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePosition {
    pub file: PathBuf,
    /// 1-based line number
    pub line: u32,
    pub module: String,
    pub function: Option<EnclosingFunction>,
}

impl SourcePosition {
    pub fn key(&self) -> BreakpointKey {
        BreakpointKey::new(self.module.clone(), self.line)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)?;
        if let Some(function) = &self.function {
            write!(f, " ({}:{})", self.module, function)?;
        }
        Ok(())
    }
}

/// Breakpoint location as typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation {
    /// `src/server.erl:12`
    File { file: PathBuf, line: u32 },
    /// `server:12`
    Module { module: String, line: u32 },
}

impl BreakpointLocation {
    /// Parse `file.erl:12` or `module:12`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (target, line_str) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::InvalidLocation(format!("expected <file|module>:<line>, got '{}'", s)))?;

        if target.is_empty() {
            return Err(Error::InvalidLocation(format!("missing file or module in '{}'", s)));
        }
        let line: u32 = line_str
            .parse()
            .ok()
            .filter(|&n| n > 0)
            .ok_or_else(|| Error::InvalidLocation(format!("invalid line number: {}", line_str)))?;

        let is_path = target.ends_with(".erl") || target.contains('/') || target.contains('\\');
        if is_path {
            Ok(Self::File {
                file: PathBuf::from(target),
                line,
            })
        } else {
            Ok(Self::Module {
                module: target.to_string(),
                line,
            })
        }
    }
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File { file, line } => write!(f, "{}:{}", file.display(), line),
            Self::Module { module, line } => write!(f, "{}:{}", module, line),
        }
    }
}

/// Project index answering which files define which modules
pub trait ModuleResolver: Send + Sync {
    /// Source files defining `module`, best candidate first
    fn candidates(&self, module: &str) -> Vec<PathBuf>;

    /// Every known source file with its module name
    fn all_modules(&self) -> Vec<(String, PathBuf)>;

    /// Module defined by `file`
    fn module_of(&self, file: &Path) -> Option<String> {
        module_name_of(file)
    }
}

/// Erlang requires the module name to match the file stem
pub fn module_name_of(file: &Path) -> Option<String> {
    if file.extension().and_then(|e| e.to_str()) != Some("erl") {
        return None;
    }
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

fn is_test_path(path: &Path) -> bool {
    path.components()
        .any(|c| c.as_os_str() == "test" || c.as_os_str() == "tests")
}

/// Resolver built by scanning source roots for `.erl` files
#[derive(Debug, Default, Clone)]
pub struct SourceIndex {
    modules: HashMap<String, Vec<PathBuf>>,
}

impl SourceIndex {
    /// Walk `roots` and index every `.erl` file
    pub fn scan(roots: &[PathBuf], prefer_test_sources: bool) -> Self {
        let mut modules: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for root in roots {
            let walker = WalkDir::new(root).follow_links(true).into_iter().filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .map(|n| n.starts_with('.') || n == "_build")
                        .unwrap_or(false)
            });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::debug!(error = %e, "Skipping unreadable path");
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(module) = module_name_of(entry.path()) {
                    modules
                        .entry(module)
                        .or_default()
                        .push(entry.path().to_path_buf());
                }
            }
        }

        for files in modules.values_mut() {
            files.sort_by(|a, b| {
                let a_test = is_test_path(a) != prefer_test_sources;
                let b_test = is_test_path(b) != prefer_test_sources;
                a_test.cmp(&b_test).then_with(|| a.cmp(b))
            });
            files.dedup();
        }

        tracing::debug!(modules = modules.len(), "Source index built");
        Self { modules }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleResolver for SourceIndex {
    fn candidates(&self, module: &str) -> Vec<PathBuf> {
        self.modules.get(module).cloned().unwrap_or_default()
    }

    fn all_modules(&self) -> Vec<(String, PathBuf)> {
        let mut all: Vec<(String, PathBuf)> = self
            .modules
            .iter()
            .filter_map(|(module, files)| files.first().map(|f| (module.clone(), f.clone())))
            .collect();
        all.sort();
        all
    }
}

/// Fixed module to file mapping supplied by an embedding front end
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    files: HashMap<String, PathBuf>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, module: impl Into<String>, file: impl Into<PathBuf>) -> Self {
        self.files.insert(module.into(), file.into());
        self
    }
}

impl ModuleResolver for StaticResolver {
    fn candidates(&self, module: &str) -> Vec<PathBuf> {
        self.files.get(module).cloned().into_iter().collect()
    }

    fn all_modules(&self) -> Vec<(String, PathBuf)> {
        let mut all: Vec<(String, PathBuf)> = self
            .files
            .iter()
            .map(|(m, f)| (m.clone(), f.clone()))
            .collect();
        all.sort();
        all
    }

    fn module_of(&self, file: &Path) -> Option<String> {
        self.files
            .iter()
            .find(|(_, f)| f.as_path() == file)
            .map(|(m, _)| m.clone())
            .or_else(|| module_name_of(file))
    }
}

/// Translates between remote and local coordinates
pub struct PositionMapper {
    resolver: Arc<dyn ModuleResolver>,
    cache: HashMap<BreakpointKey, Option<SourcePosition>>,
}

impl PositionMapper {
    pub fn new(resolver: Arc<dyn ModuleResolver>) -> Self {
        Self {
            resolver,
            cache: HashMap::new(),
        }
    }

    pub fn resolver(&self) -> &Arc<dyn ModuleResolver> {
        &self.resolver
    }

    /// Drop cached positions after the source index changed
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }

    /// Replace the resolver and drop everything cached from the old one
    pub fn set_resolver(&mut self, resolver: Arc<dyn ModuleResolver>) {
        self.resolver = resolver;
        self.invalidate();
    }

    /// Resolve a remote `(module, line)` to a local position
    pub fn resolve(&mut self, module: &str, line: u32) -> Option<SourcePosition> {
        let key = BreakpointKey::new(module, line);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let position = self
            .resolver
            .candidates(module)
            .into_iter()
            .next()
            .map(|file| SourcePosition {
                file,
                line,
                module: module.to_string(),
                function: None,
            });

        self.cache.insert(key, position.clone());
        position
    }

    /// Resolve a local `(file, line)` to a position carrying the module name
    pub fn from_file(&self, file: &Path, line: u32) -> Result<SourcePosition> {
        let module = self.resolver.module_of(file).ok_or_else(|| {
            Error::InvalidLocation(format!("{} is not an Erlang module", file.display()))
        })?;
        Ok(SourcePosition {
            file: file.to_path_buf(),
            line,
            module,
            function: None,
        })
    }

    /// Resolve whatever the user typed
    pub fn resolve_location(&mut self, location: &BreakpointLocation) -> Result<SourcePosition> {
        match location {
            BreakpointLocation::File { file, line } => self.from_file(file, *line),
            BreakpointLocation::Module { module, line } => self
                .resolve(module, *line)
                .ok_or_else(|| Error::ModuleNotFound(module.clone())),
        }
    }

    /// Position of one stack frame, with its enclosing function
    pub fn for_frame(&mut self, frame: &TraceElement) -> Option<SourcePosition> {
        let line = frame.line?;
        let mut position = self.resolve(&frame.module, line)?;
        position.function = EnclosingFunction::parse(&frame.function, frame.arity);
        Some(position)
    }

    /// Position where a suspended process is stopped
    pub fn for_snapshot(&mut self, snapshot: &ProcessSnapshot) -> Option<SourcePosition> {
        let module = snapshot.module.as_deref()?;
        let line = snapshot.line?;
        let mut position = self.resolve(module, line)?;
        position.function = snapshot
            .stack
            .first()
            .filter(|frame| frame.module == module)
            .and_then(|frame| EnclosingFunction::parse(&frame.function, frame.arity));
        Some(position)
    }
}
