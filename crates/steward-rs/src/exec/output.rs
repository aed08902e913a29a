//! Tail-retaining line buffer for captured process output.

use std::collections::VecDeque;

/// Buffers output lines up to a byte cap, discarding the oldest lines once
/// the cap is exceeded so the most recent output is always kept.
#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    bytes: usize,
    max_bytes: usize,
    dropped_lines: usize,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            bytes: 0,
            max_bytes,
            dropped_lines: 0,
        }
    }

    /// Append one line (without its trailing newline).
    pub fn push(&mut self, line: String) {
        let line = tail_of_line(line, self.max_bytes);
        self.bytes += line.len() + 1;
        self.lines.push_back(line);
        while self.bytes > self.max_bytes && self.lines.len() > 1 {
            if let Some(old) = self.lines.pop_front() {
                self.bytes -= old.len() + 1;
                self.dropped_lines += 1;
            }
        }
    }

    /// Number of lines discarded because of the byte cap.
    pub fn dropped_lines(&self) -> usize {
        self.dropped_lines
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// All retained output, prefixed with a notice when lines were dropped.
    pub fn full(&self) -> String {
        let body = self.lines.iter().map(String::as_str).collect::<Vec<_>>();
        if self.dropped_lines > 0 {
            format!(
                "[{} earlier lines omitted]\n{}",
                self.dropped_lines,
                body.join("\n")
            )
        } else {
            body.join("\n")
        }
    }

    /// The last `n` retained lines.
    pub fn tail(&self, n: usize) -> String {
        let skip = self.lines.len().saturating_sub(n);
        self.lines
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Keep at most the last `max` bytes of a single line, on a char boundary.
fn tail_of_line(line: String, max: usize) -> String {
    if line.len() < max {
        return line;
    }
    let mut cut = line.len() - max.saturating_sub(1);
    while !line.is_char_boundary(cut) {
        cut += 1;
    }
    line.get(cut..).unwrap_or_default().to_string()
}
