//! Call stack capture for operation records.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use backtrace::Backtrace;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;

use crate::config::TrackerConfig;
use crate::record::StackFrame;

// Frames of the tracker itself, of the backtrace machinery, and of the
// unwind guard wrapped around the capture. Matched against a frame's
// owning path, never against its generic arguments.
static INSTRUMENTATION_FRAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^(?:{}|backtrace)::|^std::panicking::|^std::panic::catch_unwind|^core::panic::unwind_safe::|^__rust_try",
        env!("CARGO_CRATE_NAME")
    ))
    .unwrap()
});

const CAPTURE_FAILED_FUNCTION: &str = "Error retrieving stack";
const CAPTURE_FAILED_MESSAGE: &str = "Could not retrieve stack. The backtrace capture panicked; \
     this can happen with unusual frame layouts such as JIT or foreign-language frames.";

/// An unfiltered frame as reported by the unwinder, innermost first.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawFrame {
    pub symbol: Option<String>,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
}

/// Decides which frames belong in a recorded trace.
#[derive(Debug, Clone)]
pub(crate) struct FrameFilter {
    driver_modules: Vec<String>,
    driver_paths: Vec<PathBuf>,
}

impl FrameFilter {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            driver_modules: config
                .driver_modules
                .iter()
                .map(|module| format!("{}::", module.trim_end_matches("::")))
                .collect(),
            driver_paths: config
                .driver_paths
                .iter()
                .map(|path| canonical(path))
                .collect(),
        }
    }

    fn is_hidden(&self, frame: &RawFrame) -> bool {
        if let Some(symbol) = &frame.symbol {
            let owner = owning_path(symbol);
            if INSTRUMENTATION_FRAME_REGEX.is_match(&owner) {
                return true;
            }
            if self
                .driver_modules
                .iter()
                .any(|module| owner.starts_with(module.as_str()))
            {
                return true;
            }
        }
        if let Some(file) = &frame.file {
            if !self.driver_paths.is_empty() {
                let file = canonical(file);
                if self.driver_paths.iter().any(|dir| file.starts_with(dir)) {
                    return true;
                }
            }
        }
        false
    }
}

type SourceLines = Option<Arc<Vec<String>>>;

/// Source files read while resolving frames, keyed by path.
///
/// Each file is read once per collector and kept until the collector is
/// dropped, so edits made while a tracker is alive are not picked up.
#[derive(Debug, Default)]
struct SourceCache {
    files: Mutex<HashMap<PathBuf, SourceLines>>,
}

impl SourceCache {
    fn line(&self, file: &Path, line: u32) -> Option<String> {
        if line == 0 {
            return None;
        }

        let lines = self
            .files
            .lock()
            .entry(file.to_path_buf())
            .or_insert_with(|| {
                std::fs::read_to_string(file)
                    .ok()
                    .map(|text| Arc::new(text.lines().map(str::to_owned).collect()))
            })
            .clone()?;

        lines
            .get(line as usize - 1)
            .map(|text| text.trim().to_string())
    }
}

/// Collects stack traces for records, or nothing when disabled.
#[derive(Debug)]
pub(crate) struct StackCollector {
    enabled: bool,
    filter: FrameFilter,
    sources: SourceCache,
}

impl StackCollector {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            enabled: config.capture_stack_traces,
            filter: FrameFilter::from_config(config),
            sources: SourceCache::default(),
        }
    }

    pub fn collect(&self) -> Vec<StackFrame> {
        self.collect_with(capture_raw)
    }

    /// Run `capture` and turn its frames into a trace. A panic inside
    /// `capture` yields the placeholder frame instead.
    fn collect_with(&self, capture: impl FnOnce() -> Vec<RawFrame>) -> Vec<StackFrame> {
        if !self.enabled {
            return Vec::new();
        }

        match panic::catch_unwind(AssertUnwindSafe(capture)) {
            Ok(frames) => self.tidy(frames.into_iter().rev()),
            Err(_) => {
                tracing::warn!("Stack trace capture failed, recording placeholder frame");
                vec![placeholder_frame()]
            }
        }
    }

    /// Drop hidden and unresolved frames and convert the rest, keeping order.
    fn tidy(&self, frames: impl IntoIterator<Item = RawFrame>) -> Vec<StackFrame> {
        frames
            .into_iter()
            .filter(|frame| frame.symbol.is_some() || frame.file.is_some())
            .filter(|frame| !self.filter.is_hidden(frame))
            .map(|frame| {
                let line = frame.line.unwrap_or(0);
                let source = frame
                    .file
                    .as_deref()
                    .and_then(|file| self.sources.line(file, line))
                    .unwrap_or_default();
                StackFrame {
                    file: frame
                        .file
                        .as_deref()
                        .map(|file| file.display().to_string())
                        .unwrap_or_default(),
                    line,
                    function: frame.symbol.unwrap_or_default(),
                    source,
                }
            })
            .collect()
    }
}

fn capture_raw() -> Vec<RawFrame> {
    let backtrace = Backtrace::new();
    backtrace
        .frames()
        .iter()
        .flat_map(|frame| frame.symbols())
        .map(|symbol| RawFrame {
            symbol: symbol.name().map(|name| format!("{:#}", name)),
            file: symbol.filename().map(Path::to_path_buf),
            line: symbol.lineno(),
        })
        .collect()
}

fn placeholder_frame() -> StackFrame {
    StackFrame {
        file: String::new(),
        line: 0,
        function: CAPTURE_FAILED_FUNCTION.to_string(),
        source: CAPTURE_FAILED_MESSAGE.to_string(),
    }
}

/// The path a frame's code lives under: the self type of a
/// `<Type as Trait>::method` symbol or the symbol itself, with generic
/// arguments removed.
fn owning_path(symbol: &str) -> String {
    let owner = match symbol.strip_prefix('<') {
        Some(qualified) => self_type(qualified),
        None => symbol,
    };
    let owner = owner
        .trim_start_matches('&')
        .trim_start_matches("mut ")
        .trim_start_matches("dyn ");
    strip_generics(owner)
}

/// The part of `Type as Trait>::rest` before ` as ` or the closing `>`.
fn self_type(qualified: &str) -> &str {
    let mut depth = 0usize;
    let mut prev = None;
    for (idx, c) in qualified.char_indices() {
        match c {
            '<' => depth += 1,
            '>' if prev == Some('-') => {}
            '>' if depth == 0 => return &qualified[..idx],
            '>' => depth -= 1,
            ' ' if depth == 0 && qualified[idx..].starts_with(" as ") => return &qualified[..idx],
            _ => {}
        }
        prev = Some(c);
    }
    qualified
}

fn strip_generics(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut depth = 0usize;
    let mut prev = None;
    for c in path.chars() {
        match c {
            '<' => depth += 1,
            '>' if prev == Some('-') => {}
            '>' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
        prev = Some(c);
    }
    out
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
