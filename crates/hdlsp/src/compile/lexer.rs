//
// compile/lexer.rs
//
// Byte-level SystemVerilog lexer producing the coarse token stream the
// preprocessor and structure checks work on. Numbers, operators and system
// identifiers are lexed only far enough to be skipped.
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delim {
    Paren,
    Bracket,
    Brace,
}

impl Delim {
    pub fn open_char(self) -> char {
        match self {
            Delim::Paren => '(',
            Delim::Bracket => '[',
            Delim::Brace => '{',
        }
    }

    pub fn close_char(self) -> char {
        match self {
            Delim::Paren => ')',
            Delim::Bracket => ']',
            Delim::Brace => '}',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    /// `` `name ``; the token text excludes the backtick
    Directive,
    /// String literal; the token text excludes the quotes
    Str,
    Open(Delim),
    Close(Delim),
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte span in the source, including any sigil or quotes
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexErrorKind {
    UnterminatedComment,
    UnterminatedString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexError {
    pub kind: LexErrorKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default)]
pub struct Lexed<'a> {
    pub tokens: Vec<Token<'a>>,
    pub errors: Vec<LexError>,
}

pub fn lex(source: &str) -> Lexed<'_> {
    let mut lexer = Lexer {
        text: source,
        source: source.as_bytes(),
        pos: 0,
        out: Lexed::default(),
    };
    lexer.lex_all();
    lexer.out
}

/// End of the logical line starting at `from`: the next newline not escaped
/// by a trailing backslash, or the end of the text.
pub fn logical_line_end(source: &str, from: usize) -> usize {
    let bytes = source.as_bytes();
    let mut pos = from;
    while pos < bytes.len() {
        if bytes[pos] == b'\n' {
            let escaped = pos > 0
                && (bytes[pos - 1] == b'\\'
                    || (bytes[pos - 1] == b'\r' && pos > 1 && bytes[pos - 2] == b'\\'));
            if !escaped {
                return pos;
            }
        }
        pos += 1;
    }
    bytes.len()
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

struct Lexer<'a> {
    text: &'a str,
    source: &'a [u8],
    pos: usize,
    out: Lexed<'a>,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> u8 {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> u8 {
        self.source.get(self.pos + offset).copied().unwrap_or(0)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.source.len()
    }

    /// Step over one whole UTF-8 sequence, if any
    fn bump_char(&mut self) {
        if self.at_end() {
            return;
        }
        self.pos += 1;
        while !self.at_end() && !self.text.is_char_boundary(self.pos) {
            self.pos += 1;
        }
    }

    fn push(&mut self, kind: TokenKind, text_start: usize, text_end: usize, start: usize) {
        self.out.tokens.push(Token {
            kind,
            text: &self.text[text_start..text_end],
            start,
            end: self.pos,
        });
    }

    fn lex_all(&mut self) {
        loop {
            self.skip_whitespace_and_comments();
            if self.at_end() {
                break;
            }
            self.next_token();
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while !self.at_end() && self.peek().is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.at_end() {
                return;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'/' {
                while !self.at_end() && self.peek() != b'\n' {
                    self.pos += 1;
                }
                continue;
            }
            if self.peek() == b'/' && self.peek_at(1) == b'*' {
                let start = self.pos;
                self.pos += 2;
                loop {
                    if self.at_end() {
                        self.out.errors.push(LexError {
                            kind: LexErrorKind::UnterminatedComment,
                            start,
                            end: (start + 2).min(self.source.len()),
                        });
                        break;
                    }
                    if self.peek() == b'*' && self.peek_at(1) == b'/' {
                        self.pos += 2;
                        break;
                    }
                    self.pos += 1;
                }
                continue;
            }
            break;
        }
    }

    fn next_token(&mut self) {
        let start = self.pos;
        let b = self.peek();

        if is_ident_start(b) {
            self.pos += 1;
            while !self.at_end() && is_ident_char(self.peek()) {
                self.pos += 1;
            }
            self.push(TokenKind::Identifier, start, self.pos, start);
            return;
        }

        match b {
            b'`' => {
                self.pos += 1;
                if is_ident_start(self.peek()) {
                    let name_start = self.pos;
                    while !self.at_end() && is_ident_char(self.peek()) {
                        self.pos += 1;
                    }
                    self.push(TokenKind::Directive, name_start, self.pos, start);
                } else {
                    // `" and `` inside macro bodies
                    self.bump_char();
                    self.push(TokenKind::Other, start, self.pos, start);
                }
            }
            b'\\' => {
                // Escaped identifier runs to the next whitespace
                self.pos += 1;
                while !self.at_end() && !self.peek().is_ascii_whitespace() {
                    self.pos += 1;
                }
                self.push(TokenKind::Identifier, start, self.pos, start);
            }
            b'$' => {
                self.pos += 1;
                while !self.at_end() && is_ident_char(self.peek()) {
                    self.pos += 1;
                }
                self.push(TokenKind::Other, start, self.pos, start);
            }
            b'"' => self.lex_string(start),
            b'0'..=b'9' => {
                while !self.at_end() && (self.peek().is_ascii_digit() || matches!(self.peek(), b'_' | b'.')) {
                    self.pos += 1;
                }
                if self.peek() == b'\'' {
                    self.lex_based_tail();
                }
                self.push(TokenKind::Other, start, self.pos, start);
            }
            b'\'' => {
                self.lex_based_tail();
                if self.pos == start {
                    self.pos += 1;
                }
                self.push(TokenKind::Other, start, self.pos, start);
            }
            b'(' | b'[' | b'{' => {
                self.pos += 1;
                let delim = match b {
                    b'(' => Delim::Paren,
                    b'[' => Delim::Bracket,
                    _ => Delim::Brace,
                };
                self.push(TokenKind::Open(delim), start, self.pos, start);
            }
            b')' | b']' | b'}' => {
                self.pos += 1;
                let delim = match b {
                    b')' => Delim::Paren,
                    b']' => Delim::Bracket,
                    _ => Delim::Brace,
                };
                self.push(TokenKind::Close(delim), start, self.pos, start);
            }
            _ => {
                self.bump_char();
                self.push(TokenKind::Other, start, self.pos, start);
            }
        }
    }

    /// `'b1010`, `'hFF`, `'sd3`, `'0`, `'x`. Leaves `pos` untouched when the
    /// tick starts something else (a cast or an assignment pattern).
    fn lex_based_tail(&mut self) {
        let tick = self.pos;
        let mut pos = tick + 1;
        let at = |p: usize| self.source.get(p).copied().unwrap_or(0);
        if matches!(at(pos), b's' | b'S') {
            pos += 1;
        }
        if matches!(at(pos).to_ascii_lowercase(), b'b' | b'o' | b'd' | b'h') {
            pos += 1;
            while at(pos).is_ascii_whitespace() && at(pos) != b'\n' {
                pos += 1;
            }
            while at(pos).is_ascii_hexdigit() || matches!(at(pos), b'_' | b'x' | b'X' | b'z' | b'Z' | b'?') {
                pos += 1;
            }
            self.pos = pos;
        } else if matches!(at(tick + 1), b'0' | b'1' | b'x' | b'X' | b'z' | b'Z') && !is_ident_char(at(tick + 2)) {
            self.pos = tick + 2;
        }
    }

    fn lex_string(&mut self, start: usize) {
        self.pos += 1;
        let content_start = self.pos;
        loop {
            if self.at_end() || self.peek() == b'\n' {
                self.out.errors.push(LexError {
                    kind: LexErrorKind::UnterminatedString,
                    start,
                    end: self.pos,
                });
                self.push(TokenKind::Str, content_start, self.pos, start);
                return;
            }
            match self.peek() {
                b'\\' => {
                    // Escapes, including an escaped newline continuation
                    self.pos += 1;
                    self.bump_char();
                }
                b'"' => {
                    let content_end = self.pos;
                    self.pos += 1;
                    self.push(TokenKind::Str, content_start, content_end, start);
                    return;
                }
                _ => self.pos += 1,
            }
        }
    }
}
