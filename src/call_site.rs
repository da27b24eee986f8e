//! Call site resolution from captured stack traces
//!
//! A raw trace is an ordered list of frame lines, innermost first. The first
//! `skip_frames` lines are the capture boundary (the `Error` header and the
//! interception wrapper itself) and are never candidates.
//!
//! Supported line shapes:
//! - `at fn (url:LINE:COL)` and bare `url:LINE:COL` (bundler/webpack format)
//! - `VM123 file.js:LINE:COL` (devtools VM context with a file name)
//! - `VM123:LINE:COL` (opaque VM id only; a "weak" frame)
//! - `at eval (...)` / `at <anonymous>` markers
//!
//! Every remaining frame is scored and the best one wins. Ties keep the
//! innermost-first order.

use crate::config::{ConfigError, FrameWeights, ResolverConfig};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A resolved source location believed to have issued a mutating call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub url: String,
    pub line: u32,
    /// Absent when the frame carried no column (never reported as 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Originated from an anonymous VM context (devtools `VM123`)
    pub is_vm: bool,
}

impl CallSite {
    pub fn new(url: impl Into<String>, line: u32, column: Option<u32>) -> Self {
        Self {
            url: url.into(),
            line,
            column,
            is_vm: false,
        }
    }

    /// `url:line:col` key used in signatures (empty column when absent)
    pub fn key(&self) -> String {
        match self.column {
            Some(col) => format!("{}:{}:{}", self.url, self.line, col),
            None => format!("{}:{}:", self.url, self.line),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.url, self.line)?;
        if let Some(col) = self.column {
            write!(f, ":{}", col)?;
        }
        if self.is_vm {
            write!(f, " [vm]")?;
        }
        Ok(())
    }
}

/// Narrow seam for host-specific trace parsing
///
/// Returning `None` means "no call site", never an error.
pub trait StackResolver: Send + Sync {
    fn resolve(&self, raw_trace: &str) -> Option<CallSite>;
}

/// A parsed, classified frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub url: String,
    pub line: u32,
    pub column: Option<u32>,
    /// Trimmed source line the frame was parsed from
    pub raw: String,
    pub vm: bool,
    pub eval: bool,
    pub same_origin: bool,
    pub code_like: bool,
    /// Opaque VM id with no file name
    pub weak: bool,
}

impl Frame {
    pub fn call_site(&self) -> CallSite {
        CallSite {
            url: self.url.clone(),
            line: self.line,
            column: self.column,
            is_vm: self.vm,
        }
    }
}

/// Frame with its ranking score
#[derive(Debug, Clone, PartialEq)]
pub struct RankedFrame {
    pub frame: Frame,
    pub score: i32,
}

struct FramePatterns {
    paren: Regex,
    bare: Regex,
    vm_with_file: Regex,
    vm_simple: Regex,
    eval_marker: Regex,
    eval_location: Regex,
    virtual_scheme: Regex,
    has_scheme: Regex,
    code_ext: Regex,
}

impl FramePatterns {
    fn compile() -> Result<Self, ConfigError> {
        Ok(Self {
            paren: pattern(r"\(([^\s()]+?):(\d+)(?::(\d+))?(?::\d+)*\)\s*$")?,
            bare: pattern(r"(?:^|\s)([^\s()]+?):(\d+)(?::(\d+))?(?::\d+)*\s*$")?,
            vm_with_file: pattern(r"VM\d+\s+([^\s)]+?):(\d+)(?::(\d+))?(?::\d+)*\)?$")?,
            vm_simple: pattern(r"(VM\d+):(\d+)(?::(\d+))?(?::\d+)*\)?$")?,
            eval_marker: pattern(
                r"^at (?:(?:[\w$.]*\.)?eval(?:\s|$)|<anonymous>)|\(eval at |<anonymous>:\d",
            )?,
            eval_location: pattern(r"([^\s(),]+?):(\d+)(?::(\d+))?(?::\d+)*(?:[),\s]|$)")?,
            virtual_scheme: insensitive(
                r"^(?:webpack|webpack-internal|rollup|vite|parcel|ng|blob|file|node):",
            )?,
            has_scheme: insensitive(r"^[a-z][a-z0-9+.-]*:")?,
            code_ext: insensitive(r"\.(?:m?js|cjs|jsx|ts|tsx|jsp)(?:\?|#|$)")?,
        })
    }
}

fn pattern(src: &str) -> Result<Regex, ConfigError> {
    Regex::new(src).map_err(|e| ConfigError::InvalidPattern {
        pattern: src.to_string(),
        reason: e.to_string(),
    })
}

fn insensitive(src: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(src)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: src.to_string(),
            reason: e.to_string(),
        })
}

/// Frame-ranking resolver for V8-style traces
pub struct TraceResolver {
    skip_frames: usize,
    origin_host: Option<String>,
    self_files: Vec<String>,
    skip_line: Option<Regex>,
    hidden_libraries: Vec<Regex>,
    weights: FrameWeights,
    patterns: FramePatterns,
}

impl fmt::Debug for TraceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceResolver")
            .field("skip_frames", &self.skip_frames)
            .field("origin_host", &self.origin_host)
            .field("self_files", &self.self_files)
            .field("hidden_libraries", &self.hidden_libraries.len())
            .field("weights", &self.weights)
            .finish()
    }
}

impl TraceResolver {
    /// Build a resolver, compiling the configured blocklists
    pub fn new(config: &ResolverConfig) -> Result<Self, ConfigError> {
        let mut alternatives: Vec<String> = config.noise_patterns.clone();
        alternatives.extend(config.self_files.iter().map(|f| regex::escape(f)));
        let skip_line = if alternatives.is_empty() {
            None
        } else {
            Some(insensitive(&alternatives.join("|"))?)
        };

        let hidden_libraries = config
            .hidden_libraries
            .iter()
            .map(|p| insensitive(p))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            skip_frames: config.skip_frames,
            origin_host: config.origin_host.clone().filter(|h| !h.is_empty()),
            self_files: config
                .self_files
                .iter()
                .map(|f| f.to_lowercase())
                .collect(),
            skip_line,
            hidden_libraries,
            weights: config.weights.clone(),
            patterns: FramePatterns::compile()?,
        })
    }

    /// Parse all usable frames, dropping noise, in innermost-first order
    pub fn parse_frames(&self, raw_trace: &str) -> Vec<Frame> {
        raw_trace
            .lines()
            .skip(self.skip_frames)
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter(|line| !self.is_noise_line(line))
            .filter_map(|line| self.parse_line(line))
            .collect()
    }

    /// Score every usable frame, best first (stable on ties)
    pub fn rank(&self, raw_trace: &str) -> Vec<RankedFrame> {
        let mut ranked: Vec<RankedFrame> = self
            .parse_frames(raw_trace)
            .into_iter()
            .map(|frame| RankedFrame {
                score: self.score(&frame),
                frame,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score));
        ranked
    }

    pub fn score(&self, frame: &Frame) -> i32 {
        let w = &self.weights;
        let mut score = 0;
        if frame.same_origin {
            score += w.same_origin;
        }
        if frame.code_like {
            score += w.code;
        }
        if !frame.weak {
            score += w.strong;
        }
        if frame.eval {
            score += w.eval_penalty;
        }
        score
    }

    fn is_noise_line(&self, line: &str) -> bool {
        self.skip_line.as_ref().is_some_and(|re| re.is_match(line))
    }

    fn is_hidden_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        self.self_files.iter().any(|f| lower.contains(f.as_str()))
            || self.hidden_libraries.iter().any(|re| re.is_match(url))
    }

    fn parse_line(&self, line: &str) -> Option<Frame> {
        let p = &self.patterns;

        if p.eval_marker.is_match(line) {
            return self.parse_eval_line(line);
        }

        if let Some((url, line_no, column)) = captures(&p.vm_with_file, line) {
            if self.is_hidden_url(&url) {
                return None;
            }
            return Some(Frame {
                url,
                line: line_no,
                column,
                raw: line.to_string(),
                vm: true,
                eval: false,
                same_origin: true,
                code_like: true,
                weak: false,
            });
        }

        if let Some((url, line_no, column)) = captures(&p.vm_simple, line) {
            return Some(Frame {
                url,
                line: line_no,
                column,
                raw: line.to_string(),
                vm: true,
                eval: false,
                same_origin: true,
                code_like: true,
                weak: true,
            });
        }

        let (url, line_no, column) =
            captures(&p.paren, line).or_else(|| captures(&p.bare, line))?;
        if self.is_hidden_url(&url) {
            return None;
        }
        Some(self.classify(url, line_no, column, line, false))
    }

    /// An eval frame is kept only when it names a real file location
    fn parse_eval_line(&self, line: &str) -> Option<Frame> {
        let (url, line_no, column) = self
            .patterns
            .eval_location
            .captures_iter(line)
            .filter_map(|caps| location(&caps))
            .find(|(url, _, _)| url != "<anonymous>" && !is_vm_id(url))?;
        if self.is_hidden_url(&url) {
            return None;
        }
        Some(self.classify(url, line_no, column, line, true))
    }

    fn classify(&self, url: String, line_no: u32, column: Option<u32>, raw: &str, eval: bool) -> Frame {
        let p = &self.patterns;
        let is_virtual = p.virtual_scheme.is_match(&url);
        let is_relative = !p.has_scheme.is_match(&url);
        let same_host = self
            .origin_host
            .as_deref()
            .is_some_and(|host| url.contains(host));
        let looks_code = p.code_ext.is_match(&url);
        Frame {
            same_origin: same_host || is_virtual || is_relative,
            code_like: looks_code || is_virtual,
            url,
            line: line_no,
            column,
            raw: raw.to_string(),
            vm: false,
            eval,
            weak: false,
        }
    }
}

impl StackResolver for TraceResolver {
    fn resolve(&self, raw_trace: &str) -> Option<CallSite> {
        let best = self.rank(raw_trace).into_iter().next()?;
        tracing::trace!(site = %best.frame.call_site(), score = best.score, "resolved call site");
        Some(best.frame.call_site())
    }
}

fn is_vm_id(url: &str) -> bool {
    url.strip_prefix("VM")
        .is_some_and(|id| !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()))
}

fn captures(re: &Regex, line: &str) -> Option<(String, u32, Option<u32>)> {
    re.captures(line).and_then(|caps| location(&caps))
}

fn location(caps: &regex::Captures<'_>) -> Option<(String, u32, Option<u32>)> {
    let url = caps.get(1)?.as_str().to_string();
    let line = caps.get(2)?.as_str().parse().ok()?;
    let column = caps.get(3).and_then(|m| m.as_str().parse().ok());
    Some((url, line, column))
}
