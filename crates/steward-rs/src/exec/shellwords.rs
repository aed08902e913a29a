//! Lightweight tokenizing of shell command lines.
//!
//! This is not a shell parser. It understands single and double quotes,
//! backslash escapes, the `;`, `&&`, `||`, `|`, `&` separators, subshell
//! and group delimiters, command substitution and output redirection, which
//! is enough to find the program each segment runs and the `KEY=value`
//! assignments in front of it.

/// A lexical token of a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// A word with quotes removed. `start..end` is its byte span in the input.
    Word {
        text: String,
        start: usize,
        end: usize,
    },
    /// One of `;`, `&&`, `||`, `|`, `&`, a newline, `(`, `)`, `$(`, a
    /// backtick, or a `{` / `}` standing on its own.
    Separator,
    /// `>` / `>>` (output), or `<` / `>&` (no file written).
    Redirect { output: bool },
}

/// Split a command line into tokens.
pub fn tokenize(line: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = WordBuilder::default();
    let mut quote: Option<char> = None;
    let mut chars = line.char_indices().peekable();
    // Paren depth, and the depths at which a substitution left a
    // double-quoted string that resumes after the closing `)`.
    let mut depth = 0usize;
    let mut resume_at: Vec<usize> = Vec::new();
    let mut resume_after_backtick = false;

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            } else if q == '"' && (c == '`' || (c == '$' && next_is(&mut chars, '('))) {
                // Substitution runs even inside double quotes: leave the
                // quote so the substituted command is seen as a segment.
                if c == '$' {
                    chars.next();
                    depth += 1;
                    resume_at.push(depth);
                } else {
                    resume_after_backtick = true;
                }
                quote = None;
                if word.text.is_empty() {
                    word.start = None;
                }
                word.flush(&mut tokens, i);
                tokens.push(Token::Separator);
            } else if c == '\\' && q == '"' {
                word.start.get_or_insert(i);
                if let Some((_, next)) = chars.next() {
                    word.text.push(next);
                }
            } else {
                word.start.get_or_insert(i);
                word.text.push(c);
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                word.start.get_or_insert(i);
                quote = Some(c);
            }
            '\\' => {
                word.start.get_or_insert(i);
                if let Some((_, next)) = chars.next() {
                    word.text.push(next);
                }
            }
            '$' if next_is(&mut chars, '(') => {
                chars.next();
                depth += 1;
                word.flush(&mut tokens, i);
                tokens.push(Token::Separator);
            }
            '$' if next_is(&mut chars, '{') => {
                word.start.get_or_insert(i);
                word.text.push(c);
                for (_, n) in chars.by_ref() {
                    word.text.push(n);
                    if n == '}' {
                        break;
                    }
                }
            }
            '(' => {
                depth += 1;
                word.flush(&mut tokens, i);
                tokens.push(Token::Separator);
            }
            ')' => {
                word.flush(&mut tokens, i);
                tokens.push(Token::Separator);
                if resume_at.last() == Some(&depth) {
                    resume_at.pop();
                    quote = Some('"');
                }
                depth = depth.saturating_sub(1);
            }
            '`' => {
                word.flush(&mut tokens, i);
                tokens.push(Token::Separator);
                if resume_after_backtick {
                    resume_after_backtick = false;
                    quote = Some('"');
                }
            }
            '\n' | ';' => {
                word.flush(&mut tokens, i);
                tokens.push(Token::Separator);
            }
            // `find -exec ... {}` placeholder.
            '{' if word.start.is_none() && next_is(&mut chars, '}') => {
                chars.next();
                word.start = Some(i);
                word.text.push_str("{}");
            }
            '{' | '}' if word.start.is_none() => tokens.push(Token::Separator),
            '&' | '|' => {
                word.flush(&mut tokens, i);
                if chars.peek().is_some_and(|&(_, n)| n == c) {
                    chars.next();
                }
                tokens.push(Token::Separator);
            }
            '>' | '<' => {
                word.flush(&mut tokens, i);
                let mut output = c == '>';
                match chars.peek() {
                    Some(&(_, '>')) => {
                        chars.next();
                    }
                    // `>&1` duplicates a descriptor rather than writing a file.
                    Some(&(_, '&')) => {
                        chars.next();
                        output = false;
                    }
                    _ => {}
                }
                tokens.push(Token::Redirect { output });
            }
            c if c.is_whitespace() => word.flush(&mut tokens, i),
            _ => {
                word.start.get_or_insert(i);
                word.text.push(c);
            }
        }
    }
    word.flush(&mut tokens, line.len());
    tokens
}

fn next_is(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, c: char) -> bool {
    chars.peek().is_some_and(|&(_, n)| n == c)
}

#[derive(Default)]
struct WordBuilder {
    text: String,
    start: Option<usize>,
}

impl WordBuilder {
    fn flush(&mut self, tokens: &mut Vec<Token>, end: usize) {
        if let Some(start) = self.start.take() {
            tokens.push(Token::Word {
                text: std::mem::take(&mut self.text),
                start,
                end,
            });
        }
    }
}

/// Reserved words that introduce the next simple command rather than
/// being a program themselves.
const TRANSPARENT_KEYWORDS: &[&str] = &[
    "if", "then", "else", "elif", "fi", "do", "done", "while", "until", "!", "time",
];

/// One simple command of a compound command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    /// Leading `KEY=value` assignments.
    pub env: Vec<(String, String)>,
    /// Program followed by its arguments. Redirection targets are excluded.
    pub words: Vec<String>,
    /// Whether the segment redirects output into a file.
    pub writes_output: bool,
}

impl Segment {
    /// Basename of the program this segment runs (`/usr/bin/ls` → `ls`).
    pub fn program(&self) -> Option<&str> {
        self.words.first().map(|w| program_basename(w))
    }

    pub fn args(&self) -> &[String] {
        self.words.get(1..).unwrap_or_default()
    }
}

/// Split a command line into its simple commands.
///
/// Empty segments (for example the tail of `ls;`) are dropped. Reserved
/// words such as `then` or `do` in command position are skipped, so
/// `if true; then make; fi` yields `true` and `make`.
pub fn segments(line: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    let mut current = Segment::default();
    let mut pending_redirect: Option<bool> = None;

    for token in tokenize(line) {
        match token {
            Token::Separator => {
                if !current.words.is_empty() || !current.env.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                pending_redirect = None;
            }
            Token::Redirect { output } => pending_redirect = Some(output),
            Token::Word { text, .. } => {
                if let Some(output) = pending_redirect.take() {
                    current.writes_output |= output && text != "/dev/null";
                } else if current.words.is_empty()
                    && let Some(pair) = parse_env_assignment(&text)
                {
                    current.env.push(pair);
                } else if current.words.is_empty()
                    && current.env.is_empty()
                    && TRANSPARENT_KEYWORDS.contains(&text.as_str())
                {
                    continue;
                } else {
                    current.words.push(text);
                }
            }
        }
    }
    if !current.words.is_empty() || !current.env.is_empty() {
        out.push(current);
    }
    out
}

/// Split leading `KEY=value` assignments off a command line.
///
/// Returns the parsed assignments and the remainder of the line, which is
/// what should be handed to the shell.
pub fn split_leading_env(line: &str) -> (Vec<(String, String)>, &str) {
    let mut env = Vec::new();
    let mut rest_at = 0;
    for token in tokenize(line) {
        match token {
            Token::Word { text, end, .. } => match parse_env_assignment(&text) {
                Some(pair) => {
                    env.push(pair);
                    rest_at = end;
                }
                None => break,
            },
            _ => break,
        }
    }
    let rest = line.get(rest_at..).unwrap_or_default().trim_start();
    (env, rest)
}

/// Parse `KEY=value` where `KEY` is a valid shell variable name.
pub fn parse_env_assignment(word: &str) -> Option<(String, String)> {
    let (key, value) = word.split_once('=')?;
    let mut chars = key.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Strip any directory prefix from a program path.
pub fn program_basename(word: &str) -> &str {
    word.rsplit('/').next().unwrap_or(word)
}
