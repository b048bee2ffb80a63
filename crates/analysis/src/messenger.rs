//! Line-oriented diagnostic sink with per-function framing and an optional
//! uniqueness filter.

use std::io::{self, Write};

use rustc_hash::FxHashSet;

pub struct Messenger<W> {
    sink: W,
    debug: bool,
    trace: bool,
    unique: bool,
    frame: Option<String>,
    seen: FxHashSet<String>,
    errors: usize,
}

impl Messenger<io::Stderr> {
    pub fn stderr(debug: bool, trace: bool, unique: bool) -> Self {
        Self::new(io::stderr(), debug, trace, unique)
    }
}

impl<W: Write> Messenger<W> {
    pub fn new(sink: W, debug: bool, trace: bool, unique: bool) -> Self {
        Self {
            sink,
            debug,
            trace,
            unique,
            frame: None,
            seen: FxHashSet::default(),
            errors: 0,
        }
    }

    /// Open a new per-function frame; the uniqueness filter is scoped to it.
    pub fn new_function(&mut self, header: impl Into<String>) {
        self.frame = Some(header.into());
        self.seen.clear();
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    pub fn trace(&mut self, text: &str, at: &str) {
        if self.trace {
            self.emit("TRACE", text, at);
        }
    }

    pub fn debug(&mut self, text: &str, at: &str) {
        if self.debug {
            self.emit("DEBUG", text, at);
        }
    }

    /// Errors are never filtered or gated.
    pub fn error(&mut self, text: &str, at: &str) {
        self.errors += 1;
        let line = self.format("ERROR", text, at);
        let _ = writeln!(self.sink, "{line}");
    }

    /// Unconditional raw line, bypassing levels and the uniqueness filter
    /// (used by state dumps).
    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.sink, "{text}");
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    fn emit(&mut self, level: &str, text: &str, at: &str) {
        let line = self.format(level, text, at);
        if self.unique && !self.seen.insert(line.clone()) {
            return;
        }
        let _ = writeln!(self.sink, "{line}");
    }

    fn format(&self, level: &str, text: &str, at: &str) -> String {
        match &self.frame {
            Some(frame) => format!("{level} {text} [{frame} {at}]"),
            None => format!("{level} {text} [{at}]"),
        }
    }
}
