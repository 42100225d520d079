//! Lua pattern matching (not regex): character classes, sets, quantifiers,
//! captures, and back-references, over bytes.

use luma_core::RuntimeError;

const MAX_CAPTURES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Capture {
    /// Byte span `[start, end)` of a `()` capture.
    Span(usize, usize),
    /// A position capture `()` — the 1-based position it matched at.
    Position(usize),
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Capture>,
}

impl MatchResult {
    /// Captures if any were present, else the whole match as capture 0.
    pub fn effective_captures(&self) -> Vec<Capture> {
        if self.captures.is_empty() {
            vec![Capture::Span(self.start, self.end)]
        } else {
            self.captures.clone()
        }
    }
}

/// Find the first match of `pattern` in `source` at or after `init`.
/// A leading `^` anchors the search to `init`.
pub fn find(source: &[u8], pattern: &[u8], init: usize) -> Result<Option<MatchResult>, RuntimeError> {
    let (anchored, pattern) = match pattern.first() {
        Some(b'^') => (true, &pattern[1..]),
        _ => (false, pattern),
    };
    let mut start = init.min(source.len());
    loop {
        let mut state = MatchState::new(source, pattern);
        if let Some(end) = state.do_match(start, 0)? {
            return Ok(Some(MatchResult {
                start,
                end,
                captures: state.finished_captures()?,
            }));
        }
        if anchored || start >= source.len() {
            return Ok(None);
        }
        start += 1;
    }
}

#[derive(Clone, Copy)]
struct OpenCapture {
    start: usize,
    /// Length, or the sentinels below.
    len: isize,
}

const CAP_UNFINISHED: isize = -1;
const CAP_POSITION: isize = -2;

struct MatchState<'a> {
    src: &'a [u8],
    pat: &'a [u8],
    captures: Vec<OpenCapture>,
}

impl<'a> MatchState<'a> {
    fn new(src: &'a [u8], pat: &'a [u8]) -> Self {
        Self {
            src,
            pat,
            captures: Vec::new(),
        }
    }

    fn error(message: &str) -> RuntimeError {
        RuntimeError::msg(format!("malformed pattern ({})", message))
    }

    fn finished_captures(&self) -> Result<Vec<Capture>, RuntimeError> {
        let mut out = Vec::with_capacity(self.captures.len());
        for cap in &self.captures {
            match cap.len {
                CAP_UNFINISHED => return Err(Self::error("unfinished capture")),
                CAP_POSITION => out.push(Capture::Position(cap.start + 1)),
                len => out.push(Capture::Span(cap.start, cap.start + len as usize)),
            }
        }
        Ok(out)
    }

    /// End index (exclusive) of the single pattern item starting at `p`.
    fn class_end(&self, p: usize) -> Result<usize, RuntimeError> {
        match self.pat.get(p) {
            None => Err(Self::error("pattern ends unexpectedly")),
            Some(b'%') => {
                if p + 1 >= self.pat.len() {
                    Err(Self::error("malformed pattern (ends with '%')"))
                } else {
                    Ok(p + 2)
                }
            }
            Some(b'[') => {
                let mut q = p + 1;
                if self.pat.get(q) == Some(&b'^') {
                    q += 1;
                }
                // The first ']' is literal.
                if self.pat.get(q) == Some(&b']') {
                    q += 1;
                }
                loop {
                    match self.pat.get(q) {
                        None => return Err(Self::error("missing ']'")),
                        Some(b'%') => q += 2,
                        Some(b']') => return Ok(q + 1),
                        _ => q += 1,
                    }
                }
            }
            Some(_) => Ok(p + 1),
        }
    }

    fn match_class(c: u8, class: u8) -> bool {
        let result = match class.to_ascii_lowercase() {
            b'a' => c.is_ascii_alphabetic(),
            b'c' => c.is_ascii_control(),
            b'd' => c.is_ascii_digit(),
            b'g' => c.is_ascii_graphic(),
            b'l' => c.is_ascii_lowercase(),
            b'p' => c.is_ascii_punctuation(),
            b's' => c.is_ascii_whitespace(),
            b'u' => c.is_ascii_uppercase(),
            b'w' => c.is_ascii_alphanumeric(),
            b'x' => c.is_ascii_hexdigit(),
            other => return c == other || c == class,
        };
        if class.is_ascii_uppercase() {
            !result
        } else {
            result
        }
    }

    /// Bracket set `[...]` between `p` (at '[') and `ep` (just past ']').
    fn match_set(&self, c: u8, p: usize, ep: usize) -> bool {
        let mut i = p + 1;
        let mut negate = false;
        if self.pat.get(i) == Some(&b'^') {
            negate = true;
            i += 1;
        }
        let mut found = false;
        while i < ep - 1 {
            if self.pat[i] == b'%' && i + 1 < ep - 1 {
                i += 1;
                if Self::match_class(c, self.pat[i]) {
                    found = true;
                }
                i += 1;
            } else if i + 2 < ep - 1 && self.pat[i + 1] == b'-' {
                if self.pat[i] <= c && c <= self.pat[i + 2] {
                    found = true;
                }
                i += 3;
            } else {
                if self.pat[i] == c {
                    found = true;
                }
                i += 1;
            }
        }
        found != negate
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        let Some(&c) = self.src.get(s) else {
            return false;
        };
        match self.pat[p] {
            b'.' => true,
            b'%' => Self::match_class(c, self.pat[p + 1]),
            b'[' => self.match_set(c, p, ep),
            literal => literal == c,
        }
    }

    fn do_match(&mut self, mut s: usize, mut p: usize) -> Result<Option<usize>, RuntimeError> {
        loop {
            if p >= self.pat.len() {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CAP_POSITION)
                    } else {
                        self.start_capture(s, p + 1, CAP_UNFINISHED)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == self.pat.len() => {
                    return Ok(if s == self.src.len() { Some(s) } else { None });
                }
                b'%' => {
                    if let Some(&next) = self.pat.get(p + 1) {
                        if next.is_ascii_digit() {
                            return self.match_backref(s, next, p + 2);
                        }
                    }
                }
                _ => {}
            }

            let ep = self.class_end(p)?;
            match self.pat.get(ep) {
                Some(b'?') => {
                    if self.single_match(s, p, ep) {
                        if let Some(end) = self.do_match(s + 1, ep + 1)? {
                            return Ok(Some(end));
                        }
                    }
                    p = ep + 1;
                }
                Some(b'+') => {
                    return if self.single_match(s, p, ep) {
                        self.max_expand(s + 1, p, ep)
                    } else {
                        Ok(None)
                    };
                }
                Some(b'*') => return self.max_expand(s, p, ep),
                Some(b'-') => return self.min_expand(s, p, ep),
                _ => {
                    if !self.single_match(s, p, ep) {
                        return Ok(None);
                    }
                    s += 1;
                    p = ep;
                }
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, what: isize) -> Result<Option<usize>, RuntimeError> {
        if self.captures.len() >= MAX_CAPTURES {
            return Err(Self::error("too many captures"));
        }
        self.captures.push(OpenCapture { start: s, len: what });
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures.pop();
        }
        Ok(result)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, RuntimeError> {
        let index = self
            .captures
            .iter()
            .rposition(|c| c.len == CAP_UNFINISHED)
            .ok_or_else(|| Self::error("invalid pattern capture"))?;
        self.captures[index].len = (s - self.captures[index].start) as isize;
        let result = self.do_match(s, p)?;
        if result.is_none() {
            self.captures[index].len = CAP_UNFINISHED;
        }
        Ok(result)
    }

    fn match_backref(&mut self, s: usize, digit: u8, p: usize) -> Result<Option<usize>, RuntimeError> {
        let index = (digit - b'0') as usize;
        if index == 0 || index > self.captures.len() {
            return Err(Self::error("invalid capture index"));
        }
        let cap = self.captures[index - 1];
        if cap.len < 0 {
            return Err(Self::error("unfinished capture referenced"));
        }
        let len = cap.len as usize;
        let text = &self.src[cap.start..cap.start + len];
        if self.src.len() >= s + len && &self.src[s..s + len] == text {
            self.do_match(s + len, p)
        } else {
            Ok(None)
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, RuntimeError> {
        let mut count = 0;
        while self.single_match(s + count, p, ep) {
            count += 1;
        }
        loop {
            if let Some(end) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(end));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, RuntimeError> {
        loop {
            if let Some(end) = self.do_match(s, ep + 1)? {
                return Ok(Some(end));
            }
            if self.single_match(s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }
}
