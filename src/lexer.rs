// lexer.rs - DuckyScript Lexer/Tokenizer

use crate::bytecode::Directive;
use crate::keys::NamedKey;
use std::fmt;
use thiserror::Error;

// ============================================================================
// TOKEN TYPES
// ============================================================================

/// Reserved words that are neither keys nor zero-operand directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Var,
    True,
    False,
    If,
    Then,
    Else,
    EndIf,
    While,
    EndWhile,
    Function,
    EndFunction,
    Return,
    Delay,
    Exfil,
    Hold,
    Release,
    ButtonDef,
    EndButton,
    AttackMode,
    SaveAttackMode,
    RestoreAttackMode,
    Hid,
    Storage,
    Off,
}

impl Keyword {
    pub fn name(&self) -> &'static str {
        match self {
            Keyword::Var => "VAR",
            Keyword::True => "TRUE",
            Keyword::False => "FALSE",
            Keyword::If => "IF",
            Keyword::Then => "THEN",
            Keyword::Else => "ELSE",
            Keyword::EndIf => "END_IF",
            Keyword::While => "WHILE",
            Keyword::EndWhile => "END_WHILE",
            Keyword::Function => "FUNCTION",
            Keyword::EndFunction => "END_FUNCTION",
            Keyword::Return => "RETURN",
            Keyword::Delay => "DELAY",
            Keyword::Exfil => "EXFIL",
            Keyword::Hold => "HOLD",
            Keyword::Release => "RELEASE",
            Keyword::ButtonDef => "BUTTON_DEF",
            Keyword::EndButton => "END_BUTTON",
            Keyword::AttackMode => "ATTACKMODE",
            Keyword::SaveAttackMode => "SAVE_ATTACKMODE",
            Keyword::RestoreAttackMode => "RESTORE_ATTACKMODE",
            Keyword::Hid => "HID",
            Keyword::Storage => "STORAGE",
            Keyword::Off => "OFF",
        }
    }

    pub fn from_name(name: &str) -> Option<Keyword> {
        let keyword = match name {
            "VAR" => Keyword::Var,
            "TRUE" => Keyword::True,
            "FALSE" => Keyword::False,
            "IF" => Keyword::If,
            "THEN" => Keyword::Then,
            "ELSE" => Keyword::Else,
            "END_IF" => Keyword::EndIf,
            "WHILE" => Keyword::While,
            "END_WHILE" => Keyword::EndWhile,
            "FUNCTION" => Keyword::Function,
            "END_FUNCTION" => Keyword::EndFunction,
            "RETURN" => Keyword::Return,
            "DELAY" => Keyword::Delay,
            "EXFIL" => Keyword::Exfil,
            "HOLD" => Keyword::Hold,
            "RELEASE" => Keyword::Release,
            "BUTTON_DEF" => Keyword::ButtonDef,
            "END_BUTTON" => Keyword::EndButton,
            "ATTACKMODE" => Keyword::AttackMode,
            "SAVE_ATTACKMODE" => Keyword::SaveAttackMode,
            "RESTORE_ATTACKMODE" => Keyword::RestoreAttackMode,
            "HID" => Keyword::Hid,
            "STORAGE" => Keyword::Storage,
            "OFF" => Keyword::Off,
            _ => return None,
        };
        Some(keyword)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Statement separator
    Newline,

    // Literals
    Number(u64),        // 42
    Rem(String),        // REM ... / REM_BLOCK ... END_REM
    String(String),     // STRING ... / STRING ... END_STRING
    StringLn(String),   // STRINGLN ... / STRINGLN ... END_STRINGLN
    Variable(String),   // $name

    // Device descriptors (ATTACKMODE)
    Vid(u16),           // VID_046D
    Pid(u16),           // PID_C31C
    Man(String),        // MAN_Logitech
    Prod(String),       // PROD_Keyboard
    Serial(u64),        // SERIAL_1234

    // Reserved words
    Key(NamedKey),
    Directive(Directive),
    Keyword(Keyword),

    // Anything else that looks like a word: single-letter keys, function names
    Id(String),

    // Operators and punctuation
    Assign,             // =
    Plus,               // +
    Minus,              // -
    Star,               // *
    Slash,              // /
    Percent,            // %
    Caret,              // ^
    Lt,                 // <
    Gt,                 // >
    Le,                 // <=
    Ge,                 // >=
    EqEq,               // ==
    NotEq,              // !=
    AndAnd,             // &&
    OrOr,               // ||
    Amp,                // &
    Pipe,               // |
    Shl,                // <<
    Shr,                // >>
    LParen,             // (
    RParen,             // )
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TokenKind::Newline => write!(f, "end of line"),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Rem(_) => write!(f, "REM"),
            TokenKind::String(_) => write!(f, "STRING"),
            TokenKind::StringLn(_) => write!(f, "STRINGLN"),
            TokenKind::Variable(v) => write!(f, "{}", v),
            TokenKind::Vid(v) => write!(f, "VID_{:04X}", v),
            TokenKind::Pid(p) => write!(f, "PID_{:04X}", p),
            TokenKind::Man(m) => write!(f, "MAN_{}", m),
            TokenKind::Prod(p) => write!(f, "PROD_{}", p),
            TokenKind::Serial(s) => write!(f, "SERIAL_{}", s),
            TokenKind::Key(k) => write!(f, "{}", k.name()),
            TokenKind::Directive(d) => write!(f, "{}", d.name()),
            TokenKind::Keyword(k) => write!(f, "{}", k.name()),
            TokenKind::Id(id) => write!(f, "{}", id),
            TokenKind::Assign => write!(f, "="),
            TokenKind::Plus => write!(f, "+"),
            TokenKind::Minus => write!(f, "-"),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::Percent => write!(f, "%"),
            TokenKind::Caret => write!(f, "^"),
            TokenKind::Lt => write!(f, "<"),
            TokenKind::Gt => write!(f, ">"),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::EqEq => write!(f, "=="),
            TokenKind::NotEq => write!(f, "!="),
            TokenKind::AndAnd => write!(f, "&&"),
            TokenKind::OrOr => write!(f, "||"),
            TokenKind::Amp => write!(f, "&"),
            TokenKind::Pipe => write!(f, "|"),
            TokenKind::Shl => write!(f, "<<"),
            TokenKind::Shr => write!(f, ">>"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
        }
    }
}

/// A token and where it starts in the (preprocessed) source, in bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
}

// ============================================================================
// LEXER
// ============================================================================

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    errors: Vec<LexerError>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer {
            input,
            position: 0,
            errors: Vec::new(),
        }
    }

    /// Scan the whole input. Bad characters are reported and skipped so every
    /// problem in the file is found in one pass; any error fails the result.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, Vec<LexerError>> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            self.skip_whitespace();

            if self.is_at_end() {
                break;
            }

            let start = self.position;
            if let Some(kind) = self.next_token() {
                tokens.push(Token {
                    kind,
                    offset: start,
                    len: self.token_len(start),
                });
            }
        }

        if self.errors.is_empty() {
            Ok(tokens)
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn next_token(&mut self) -> Option<TokenKind> {
        let ch = self.peek()?;

        match ch {
            '\n' => {
                self.advance();
                Some(TokenKind::Newline)
            }
            '0'..='9' => self.parse_number(),
            '$' => self.parse_variable(),
            'A'..='Z' | 'a'..='z' | '_' => Some(self.parse_word()),
            _ => self.parse_operator(ch),
        }
    }

    fn parse_operator(&mut self, ch: char) -> Option<TokenKind> {
        let start = self.position;
        self.advance();
        let next = self.peek();

        let (kind, wide) = match (ch, next) {
            ('=', Some('=')) => (TokenKind::EqEq, true),
            ('!', Some('=')) => (TokenKind::NotEq, true),
            ('<', Some('=')) => (TokenKind::Le, true),
            ('>', Some('=')) => (TokenKind::Ge, true),
            ('<', Some('<')) => (TokenKind::Shl, true),
            ('>', Some('>')) => (TokenKind::Shr, true),
            ('&', Some('&')) => (TokenKind::AndAnd, true),
            ('|', Some('|')) => (TokenKind::OrOr, true),
            ('=', _) => (TokenKind::Assign, false),
            ('+', _) => (TokenKind::Plus, false),
            ('-', _) => (TokenKind::Minus, false),
            ('*', _) => (TokenKind::Star, false),
            ('/', _) => (TokenKind::Slash, false),
            ('%', _) => (TokenKind::Percent, false),
            ('^', _) => (TokenKind::Caret, false),
            ('<', _) => (TokenKind::Lt, false),
            ('>', _) => (TokenKind::Gt, false),
            ('&', _) => (TokenKind::Amp, false),
            ('|', _) => (TokenKind::Pipe, false),
            ('(', _) => (TokenKind::LParen, false),
            (')', _) => (TokenKind::RParen, false),
            _ => {
                // Skip exactly the one bad character and keep scanning
                self.errors.push(LexerError::InvalidCharacter { ch, offset: start });
                return None;
            }
        };

        if wide {
            self.advance();
        }
        Some(kind)
    }

    fn parse_number(&mut self) -> Option<TokenKind> {
        let start = self.position;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        match self.input[start..self.position].parse::<u64>() {
            Ok(n) => Some(TokenKind::Number(n)),
            Err(_) => {
                self.errors.push(LexerError::InvalidNumber {
                    offset: start,
                    len: self.position - start,
                });
                None
            }
        }
    }

    fn parse_variable(&mut self) -> Option<TokenKind> {
        let start = self.position;
        self.advance(); // consume $

        while matches!(self.peek(), Some(c) if is_word_char(c)) {
            self.advance();
        }

        if self.position - start == 1 {
            self.errors.push(LexerError::EmptyVariable { offset: start });
            return None;
        }

        Some(TokenKind::Variable(self.input[start..self.position].to_string()))
    }

    fn parse_word(&mut self) -> TokenKind {
        let start = self.position;
        while matches!(self.peek(), Some(c) if is_word_char(c)) {
            self.advance();
        }
        let word = &self.input[start..self.position];

        match word {
            "REM" => return TokenKind::Rem(self.rest_of_line().trim().to_string()),
            "REM_BLOCK" => {
                let lines = self.parse_block("REM_BLOCK", "END_REM", start);
                return TokenKind::Rem(lines.join("\n"));
            }
            "STRING" => return TokenKind::String(self.parse_string_literal(start, false)),
            "STRINGLN" => return TokenKind::StringLn(self.parse_string_literal(start, true)),
            _ => {}
        }

        if let Some(kind) = descriptor(word) {
            return kind;
        }
        if let Some(key) = NamedKey::from_name(word) {
            return TokenKind::Key(key);
        }
        if let Some(directive) = Directive::from_name(word) {
            return TokenKind::Directive(directive);
        }
        if let Some(keyword) = Keyword::from_name(word) {
            return TokenKind::Keyword(keyword);
        }

        TokenKind::Id(word.to_string())
    }

    /// STRING / STRINGLN body. Text on the same line is the single-line form
    /// (separated from the keyword by one blank); a keyword alone on its line
    /// opens a block closed by END_STRING / END_STRINGLN on its own line.
    fn parse_string_literal(&mut self, start: usize, newline: bool) -> String {
        let at_line_end = matches!(self.peek(), None | Some('\n') | Some('\r'));

        if at_line_end {
            let (keyword, terminator) = if newline {
                ("STRINGLN", "END_STRINGLN")
            } else {
                ("STRING", "END_STRING")
            };
            let lines = self.parse_block(keyword, terminator, start);

            let mut text = String::new();
            for line in lines {
                if newline {
                    // Drop the one-character continuation marker
                    text.extend(line.chars().skip(1));
                    text.push('\n');
                } else {
                    text.push_str(line.trim());
                }
            }
            return text;
        }

        if matches!(self.peek(), Some(' ') | Some('\t')) {
            self.advance();
        }
        let content = self.rest_of_line();

        if newline {
            format!("{}\n", content)
        } else {
            content.trim_end().to_string()
        }
    }

    /// Collect the lines after the current one up to a line that is exactly
    /// `terminator` (ignoring surrounding blanks). The lexer is left just
    /// before the terminator line's newline.
    fn parse_block(&mut self, keyword: &'static str, terminator: &str, start: usize) -> Vec<&'a str> {
        // Anything left on the opening line is ignored
        self.rest_of_line();

        let mut lines = Vec::new();
        while self.peek() == Some('\n') {
            self.advance();
            let line = self.rest_of_line();
            if line.trim() == terminator {
                return lines;
            }
            lines.push(line);
        }

        self.errors.push(LexerError::UnterminatedBlock { keyword, offset: start });
        lines
    }

    /// Consume up to (not including) the next newline; a trailing '\r' is
    /// consumed but not returned.
    fn rest_of_line(&mut self) -> &'a str {
        let start = self.position;
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
        self.input[start..self.position].trim_end_matches('\r')
    }

    /// Length used for caret markers: the token text on its first line.
    fn token_len(&self, start: usize) -> usize {
        let text = &self.input[start..self.position];
        text.find('\n').unwrap_or(text.len()).max(1)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.peek() {
            self.position += ch.len_utf8();
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// VID_/PID_ (4 hex digits), MAN_/PROD_ (up to 32 alphanumerics) and
/// SERIAL_ (up to 12 digits), matched against the whole word.
fn descriptor(word: &str) -> Option<TokenKind> {
    if let Some(hex) = word.strip_prefix("VID_") {
        return parse_hex16(hex).map(TokenKind::Vid);
    }
    if let Some(hex) = word.strip_prefix("PID_") {
        return parse_hex16(hex).map(TokenKind::Pid);
    }
    if let Some(name) = word.strip_prefix("MAN_") {
        return is_descriptor_name(name).then(|| TokenKind::Man(name.to_string()));
    }
    if let Some(name) = word.strip_prefix("PROD_") {
        return is_descriptor_name(name).then(|| TokenKind::Prod(name.to_string()));
    }
    if let Some(digits) = word.strip_prefix("SERIAL_") {
        if !digits.is_empty() && digits.len() <= 12 && digits.chars().all(|c| c.is_ascii_digit()) {
            return digits.parse().ok().map(TokenKind::Serial);
        }
    }
    None
}

fn parse_hex16(hex: &str) -> Option<u16> {
    if hex.len() == 4 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        None
    }
}

fn is_descriptor_name(name: &str) -> bool {
    name.len() <= 32 && name.chars().all(|c| c.is_ascii_alphanumeric())
}

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexerError {
    #[error("invalid character '{ch}'")]
    InvalidCharacter { ch: char, offset: usize },

    #[error("number literal out of range")]
    InvalidNumber { offset: usize, len: usize },

    #[error("variable name expected after '$'")]
    EmptyVariable { offset: usize },

    #[error("unterminated {keyword} block")]
    UnterminatedBlock { keyword: &'static str, offset: usize },
}

impl LexerError {
    pub fn offset(&self) -> usize {
        match self {
            LexerError::InvalidCharacter { offset, .. }
            | LexerError::InvalidNumber { offset, .. }
            | LexerError::EmptyVariable { offset }
            | LexerError::UnterminatedBlock { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            LexerError::InvalidCharacter { ch, .. } => ch.len_utf8(),
            LexerError::InvalidNumber { len, .. } => *len,
            LexerError::EmptyVariable { .. } => 1,
            LexerError::UnterminatedBlock { keyword, .. } => keyword.len(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
