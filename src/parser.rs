// parser.rs - DuckyScript Parser (Tokens → AST)

use crate::bytecode::{BinaryOp, Directive};
use crate::keys::Key;
use crate::lexer::{Keyword, Token, TokenKind};
use thiserror::Error;

// ============================================================================
// AST (Abstract Syntax Tree) - Represents payload script structure
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
}

/// Top-level entries. Functions and button handlers cannot nest.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Statement(Statement),

    /// FUNCTION name() ... END_FUNCTION
    Function {
        name: String,
        body: Vec<Statement>,
        offset: usize,
    },

    /// BUTTON_DEF ... END_BUTTON
    ButtonDef { body: Vec<Statement> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// REM / REM_BLOCK
    Rem,

    /// Bare expression; its value is discarded
    Expression(Expression),

    /// VAR $x = expr, or $x = expr
    Assign { name: String, value: Expression },

    /// RETURN expr
    Return(Expression),

    /// STRING / STRINGLN, with STRINGLN's line breaks already in the text
    String(String),

    /// DELAY expr
    Delay(Expression),

    /// EXFIL expr
    Exfil(Expression),

    /// IF ... [ELSE IF ...]* [ELSE ...] END_IF
    If {
        branches: Vec<IfBranch>,
        otherwise: Option<Vec<Statement>>,
    },

    /// WHILE expr ... END_WHILE
    While {
        condition: Expression,
        body: Vec<Statement>,
    },

    /// HOLD key
    Hold(Key),

    /// RELEASE key
    Release(Key),

    /// One or more keys pressed together: GUI r
    Keys(Vec<Key>),

    /// Zero-operand command
    Directive(Directive),

    /// ATTACKMODE mode [VID PID MAN PROD SERIAL]
    AttackMode(AttackMode),

    SaveAttackMode,

    RestoreAttackMode,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub condition: Expression,
    pub body: Vec<Statement>,
}

/// USB device presentation requested by ATTACKMODE. `OFF` is neither flag.
#[derive(Debug, Clone, PartialEq)]
pub struct AttackMode {
    pub hid: bool,
    pub storage: bool,
    pub descriptor: Option<DeviceDescriptor>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: String,
    pub product: String,
    pub serial: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Literal number: 42
    Number(u64),

    /// TRUE / FALSE
    Bool(bool),

    /// $name
    Variable(String),

    /// name()
    Call { name: String, offset: usize },

    /// left op right
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

// ============================================================================
// PARSER
// ============================================================================

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected {found}, expected {expected}")]
    UnexpectedToken {
        found: TokenKind,
        expected: &'static str,
        offset: usize,
        len: usize,
    },

    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str, offset: usize },

    #[error("unknown key '{name}'")]
    UnknownKey {
        name: String,
        offset: usize,
        len: usize,
    },

    #[error("{keyword} is only allowed at the top level")]
    NotTopLevel { keyword: &'static str, offset: usize },
}

impl ParseError {
    pub fn offset(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { offset, .. }
            | ParseError::UnexpectedEof { offset, .. }
            | ParseError::UnknownKey { offset, .. }
            | ParseError::NotTopLevel { offset, .. } => *offset,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ParseError::UnexpectedToken { len, .. } | ParseError::UnknownKey { len, .. } => *len,
            ParseError::UnexpectedEof { .. } => 1,
            ParseError::NotTopLevel { keyword, .. } => keyword.len(),
        }
    }
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    /// Parse entire program
    pub fn parse(&mut self) -> Result<Program, ParseError> {
        let mut items = Vec::new();

        loop {
            self.skip_newlines();
            if self.is_at_end() {
                break;
            }
            items.push(self.parse_item()?);
        }

        Ok(Program { items })
    }

    fn parse_item(&mut self) -> Result<Item, ParseError> {
        let item = if self.check_keyword(Keyword::Function) {
            self.parse_function()?
        } else if self.check_keyword(Keyword::ButtonDef) {
            self.parse_button_def()?
        } else {
            Item::Statement(self.parse_statement()?)
        };

        self.consume_line_end()?;
        Ok(item)
    }

    /// Parse function definition: FUNCTION name() NEWLINE body END_FUNCTION
    fn parse_function(&mut self) -> Result<Item, ParseError> {
        let offset = self.current_offset();
        self.advance(); // consume FUNCTION

        let name = match self.peek() {
            Some(TokenKind::Id(name)) => {
                let name = name.clone();
                self.advance();
                name
            }
            _ => return Err(self.unexpected("function name")),
        };

        self.consume(&TokenKind::LParen, "'('")?;
        self.consume(&TokenKind::RParen, "')'")?;
        self.consume(&TokenKind::Newline, "end of line")?;

        let body = self.parse_block(&[Keyword::EndFunction])?;
        self.consume_keyword(Keyword::EndFunction)?;

        Ok(Item::Function { name, body, offset })
    }

    /// Parse button handler: BUTTON_DEF NEWLINE body END_BUTTON
    fn parse_button_def(&mut self) -> Result<Item, ParseError> {
        self.advance(); // consume BUTTON_DEF
        self.consume(&TokenKind::Newline, "end of line")?;

        let body = self.parse_block(&[Keyword::EndButton])?;
        self.consume_keyword(Keyword::EndButton)?;

        Ok(Item::ButtonDef { body })
    }

    /// Statements up to (not including) one of `terminators`.
    fn parse_block(&mut self, terminators: &[Keyword]) -> Result<Vec<Statement>, ParseError> {
        let mut body = Vec::new();

        loop {
            self.skip_newlines();

            if self.is_at_end() {
                return Err(ParseError::UnexpectedEof {
                    expected: terminators[0].name(),
                    offset: self.end_offset(),
                });
            }
            if terminators.iter().any(|k| self.check_keyword(*k)) {
                return Ok(body);
            }

            body.push(self.parse_statement()?);
            self.consume_line_end()?;
        }
    }

    /// Parse a single statement (without its line terminator)
    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let Some(kind) = self.peek() else {
            return Err(self.unexpected("statement"));
        };

        match kind {
            TokenKind::Rem(_) => {
                self.advance();
                Ok(Statement::Rem)
            }

            TokenKind::String(text) | TokenKind::StringLn(text) => {
                let text = text.clone();
                self.advance();
                Ok(Statement::String(text))
            }

            TokenKind::Variable(name) if self.peek_at(1) == Some(&TokenKind::Assign) => {
                let name = name.clone();
                self.advance(); // variable
                self.advance(); // =
                let value = self.parse_expression()?;
                Ok(Statement::Assign { name, value })
            }

            TokenKind::Directive(directive) => {
                let directive = *directive;
                self.advance();
                Ok(Statement::Directive(directive))
            }

            TokenKind::Keyword(keyword) => self.parse_keyword_statement(*keyword),

            TokenKind::Key(_) => self.parse_chord(),

            TokenKind::Id(name) => {
                if self.peek_at(1) == Some(&TokenKind::LParen) {
                    Ok(Statement::Expression(self.parse_expression()?))
                } else if name.chars().count() == 1 {
                    self.parse_chord()
                } else {
                    Err(self.unknown_key())
                }
            }

            _ => Ok(Statement::Expression(self.parse_expression()?)),
        }
    }

    fn parse_keyword_statement(&mut self, keyword: Keyword) -> Result<Statement, ParseError> {
        match keyword {
            Keyword::Var => {
                self.advance(); // consume VAR
                let name = match self.peek() {
                    Some(TokenKind::Variable(name)) => {
                        let name = name.clone();
                        self.advance();
                        name
                    }
                    _ => return Err(self.unexpected("variable name")),
                };
                self.consume(&TokenKind::Assign, "'='")?;
                let value = self.parse_expression()?;
                Ok(Statement::Assign { name, value })
            }

            Keyword::Return => {
                self.advance();
                Ok(Statement::Return(self.parse_expression()?))
            }

            Keyword::Delay => {
                self.advance();
                Ok(Statement::Delay(self.parse_expression()?))
            }

            Keyword::Exfil => {
                self.advance();
                Ok(Statement::Exfil(self.parse_expression()?))
            }

            Keyword::If => self.parse_if(),

            Keyword::While => self.parse_while(),

            Keyword::Hold => {
                self.advance();
                Ok(Statement::Hold(self.parse_key()?))
            }

            Keyword::Release => {
                self.advance();
                Ok(Statement::Release(self.parse_key()?))
            }

            Keyword::AttackMode => self.parse_attack_mode(),

            Keyword::SaveAttackMode => {
                self.advance();
                Ok(Statement::SaveAttackMode)
            }

            Keyword::RestoreAttackMode => {
                self.advance();
                Ok(Statement::RestoreAttackMode)
            }

            Keyword::Function | Keyword::ButtonDef => Err(ParseError::NotTopLevel {
                keyword: keyword.name(),
                offset: self.current_offset(),
            }),

            Keyword::True | Keyword::False => Ok(Statement::Expression(self.parse_expression()?)),

            Keyword::Then
            | Keyword::Else
            | Keyword::EndIf
            | Keyword::EndWhile
            | Keyword::EndFunction
            | Keyword::EndButton
            | Keyword::Hid
            | Keyword::Storage
            | Keyword::Off => Err(self.unexpected("statement")),
        }
    }

    /// Parse IF cond THEN ... [ELSE IF cond THEN ...]* [ELSE ...] END_IF
    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        let mut branches = Vec::new();
        let mut otherwise = None;

        self.advance(); // consume IF
        branches.push(self.parse_if_branch()?);

        while self.check_keyword(Keyword::Else) {
            self.advance(); // consume ELSE

            if self.check_keyword(Keyword::If) {
                self.advance(); // consume IF
                branches.push(self.parse_if_branch()?);
            } else {
                self.consume(&TokenKind::Newline, "end of line")?;
                otherwise = Some(self.parse_block(&[Keyword::EndIf])?);
                break;
            }
        }

        self.consume_keyword(Keyword::EndIf)?;

        Ok(Statement::If { branches, otherwise })
    }

    /// Condition, THEN, and the statements up to the next ELSE / END_IF
    fn parse_if_branch(&mut self) -> Result<IfBranch, ParseError> {
        let condition = self.parse_expression()?;
        self.consume_keyword(Keyword::Then)?;
        self.consume(&TokenKind::Newline, "end of line")?;
        let body = self.parse_block(&[Keyword::EndIf, Keyword::Else])?;
        Ok(IfBranch { condition, body })
    }

    /// Parse WHILE cond NEWLINE ... END_WHILE
    fn parse_while(&mut self) -> Result<Statement, ParseError> {
        self.advance(); // consume WHILE

        let condition = self.parse_expression()?;
        self.consume(&TokenKind::Newline, "end of line")?;
        let body = self.parse_block(&[Keyword::EndWhile])?;
        self.consume_keyword(Keyword::EndWhile)?;

        Ok(Statement::While { condition, body })
    }

    /// A run of keys. After the first key, single digits are accepted too
    /// (CTRL 1), since a statement cannot start with a chord digit.
    fn parse_chord(&mut self) -> Result<Statement, ParseError> {
        let mut keys = vec![self.parse_key()?];

        loop {
            let next = match self.peek() {
                Some(TokenKind::Key(_)) | Some(TokenKind::Id(_)) => self.parse_key()?,
                Some(TokenKind::Number(n)) if *n < 10 && self.current_len() == 1 => {
                    let digit = char::from(b'0' + *n as u8);
                    self.advance();
                    Key::Char(digit)
                }
                _ => break,
            };
            keys.push(next);
        }

        Ok(Statement::Keys(keys))
    }

    fn parse_key(&mut self) -> Result<Key, ParseError> {
        match self.peek() {
            Some(TokenKind::Key(named)) => {
                let key = Key::Named(*named);
                self.advance();
                Ok(key)
            }
            Some(TokenKind::Id(name)) => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => {
                        self.advance();
                        Ok(Key::Char(c))
                    }
                    _ => Err(self.unknown_key()),
                }
            }
            _ => Err(self.unexpected("key name")),
        }
    }

    /// ATTACKMODE HID | STORAGE | HID STORAGE | STORAGE HID | OFF,
    /// optionally followed by VID_ PID_ MAN_ PROD_ SERIAL_
    fn parse_attack_mode(&mut self) -> Result<Statement, ParseError> {
        self.advance(); // consume ATTACKMODE

        let mut mode = AttackMode {
            hid: false,
            storage: false,
            descriptor: None,
        };

        if self.check_keyword(Keyword::Off) {
            self.advance();
        } else {
            loop {
                if self.check_keyword(Keyword::Hid) && !mode.hid {
                    mode.hid = true;
                } else if self.check_keyword(Keyword::Storage) && !mode.storage {
                    mode.storage = true;
                } else {
                    break;
                }
                self.advance();
            }
            if !mode.hid && !mode.storage {
                return Err(self.unexpected("HID, STORAGE or OFF"));
            }
        }

        if matches!(self.peek(), Some(TokenKind::Vid(_))) {
            mode.descriptor = Some(self.parse_descriptor()?);
        }

        Ok(Statement::AttackMode(mode))
    }

    fn parse_descriptor(&mut self) -> Result<DeviceDescriptor, ParseError> {
        let vendor_id = match self.peek() {
            Some(TokenKind::Vid(v)) => *v,
            _ => return Err(self.unexpected("VID_")),
        };
        self.advance();
        let product_id = match self.peek() {
            Some(TokenKind::Pid(p)) => *p,
            _ => return Err(self.unexpected("PID_")),
        };
        self.advance();
        let manufacturer = match self.peek() {
            Some(TokenKind::Man(m)) => m.clone(),
            _ => return Err(self.unexpected("MAN_")),
        };
        self.advance();
        let product = match self.peek() {
            Some(TokenKind::Prod(p)) => p.clone(),
            _ => return Err(self.unexpected("PROD_")),
        };
        self.advance();
        let serial = match self.peek() {
            Some(TokenKind::Serial(s)) => *s,
            _ => return Err(self.unexpected("SERIAL_")),
        };
        self.advance();

        Ok(DeviceDescriptor {
            vendor_id,
            product_id,
            manufacturer,
            product,
            serial,
        })
    }

    // ========================================================================
    // EXPRESSIONS
    // ========================================================================

    pub fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        self.parse_binary(1)
    }

    /// Precedence climbing; every level is left-associative.
    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expression, ParseError> {
        let mut left = self.parse_primary()?;

        while let Some(op) = self.peek().and_then(binary_op) {
            if op.precedence() < min_precedence {
                break;
            }
            self.advance();

            let right = self.parse_binary(op.precedence() + 1)?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }

        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        match self.peek() {
            Some(TokenKind::Number(n)) => {
                let n = *n;
                self.advance();
                Ok(Expression::Number(n))
            }

            Some(TokenKind::Keyword(Keyword::True)) => {
                self.advance();
                Ok(Expression::Bool(true))
            }

            Some(TokenKind::Keyword(Keyword::False)) => {
                self.advance();
                Ok(Expression::Bool(false))
            }

            Some(TokenKind::Variable(name)) => {
                let name = name.clone();
                self.advance();
                Ok(Expression::Variable(name))
            }

            Some(TokenKind::Id(name)) if self.peek_at(1) == Some(&TokenKind::LParen) => {
                let name = name.clone();
                let offset = self.current_offset();
                self.advance(); // name
                self.advance(); // (
                self.consume(&TokenKind::RParen, "')'")?;
                Ok(Expression::Call { name, offset })
            }

            Some(TokenKind::LParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }

            _ => Err(self.unexpected("expression")),
        }
    }

    // ========================================================================
    // HELPER METHODS
    // ========================================================================

    fn peek(&self) -> Option<&TokenKind> {
        self.peek_at(0)
    }

    fn peek_at(&self, ahead: usize) -> Option<&TokenKind> {
        self.tokens.get(self.position + ahead).map(|t| &t.kind)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.tokens.len()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == Some(kind)
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        self.peek() == Some(&TokenKind::Keyword(keyword))
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenKind::Newline) {
            self.advance();
        }
    }

    fn consume(&mut self, kind: &TokenKind, expected: &'static str) -> Result<(), ParseError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn consume_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(keyword.name()))
        }
    }

    /// A statement ends at a newline or at the end of input.
    fn consume_line_end(&mut self) -> Result<(), ParseError> {
        if self.is_at_end() {
            Ok(())
        } else {
            self.consume(&TokenKind::Newline, "end of line")
        }
    }

    fn current_offset(&self) -> usize {
        self.tokens
            .get(self.position)
            .map(|t| t.offset)
            .unwrap_or_else(|| self.end_offset())
    }

    fn current_len(&self) -> usize {
        self.tokens.get(self.position).map(|t| t.len).unwrap_or(1)
    }

    /// End of the last token on a real line; trailing newlines would put
    /// the position on an empty line past the script.
    fn end_offset(&self) -> usize {
        self.tokens
            .iter()
            .rev()
            .find(|t| t.kind != TokenKind::Newline)
            .map(|t| t.offset + t.len)
            .unwrap_or(0)
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        match self.tokens.get(self.position) {
            Some(token) => ParseError::UnexpectedToken {
                found: token.kind.clone(),
                expected,
                offset: token.offset,
                len: token.len,
            },
            None => ParseError::UnexpectedEof {
                expected,
                offset: self.end_offset(),
            },
        }
    }

    fn unknown_key(&self) -> ParseError {
        match self.tokens.get(self.position) {
            Some(token) => ParseError::UnknownKey {
                name: token.kind.to_string(),
                offset: token.offset,
                len: token.len,
            },
            None => self.unexpected("key name"),
        }
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    let op = match kind {
        TokenKind::OrOr => BinaryOp::Or,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::Ne,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Amp => BinaryOp::BitAnd,
        TokenKind::Pipe => BinaryOp::BitOr,
        TokenKind::Shl => BinaryOp::Shl,
        TokenKind::Shr => BinaryOp::Shr,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Mod,
        TokenKind::Caret => BinaryOp::Pow,
        _ => return None,
    };
    Some(op)
}
