use log::{trace, warn};
use std::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    Illegal,
    Eof,

    Ident,
    Int,
    Float,
    String,

    Assign,
    Plus,
    Minus,
    Asterisk,
    Slash,
    Modulo,
    Power,

    PlusAssign,
    MinusAssign,
    MultiplyAssign,
    DivideAssign,

    Eq,
    NotEq,
    Lt,
    Gt,
    Lte,
    Gte,

    And,
    Or,
    Not,

    Semicolon,
    Colon,
    Comma,
    Dot,
    Question,

    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    At,
    Hash,
    Arrow,

    Let,
    Const,
    Var,
    Function,
    Return,

    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Switch,
    Case,
    Default,

    True,
    False,
    Null,

    StringType,
    IntType,
    FloatType,
    BoolType,
    ArrayType,
    ObjectType,

    Class,
    This,
    New,
    Extends,
    Super,

    Try,
    Catch,
    Throw,
    Finally,

    Import,
    Export,
    From,
    As,

    Global,
    Local,
}

impl TokenType {
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenType::Let
                | TokenType::Const
                | TokenType::Var
                | TokenType::Function
                | TokenType::Return
                | TokenType::If
                | TokenType::Else
                | TokenType::While
                | TokenType::For
                | TokenType::Break
                | TokenType::Continue
                | TokenType::Switch
                | TokenType::Case
                | TokenType::Default
                | TokenType::True
                | TokenType::False
                | TokenType::Null
                | TokenType::StringType
                | TokenType::IntType
                | TokenType::FloatType
                | TokenType::BoolType
                | TokenType::ArrayType
                | TokenType::ObjectType
                | TokenType::Class
                | TokenType::This
                | TokenType::New
                | TokenType::Extends
                | TokenType::Super
                | TokenType::Try
                | TokenType::Catch
                | TokenType::Throw
                | TokenType::Finally
                | TokenType::Import
                | TokenType::Export
                | TokenType::From
                | TokenType::As
                | TokenType::Global
                | TokenType::Local
        )
    }
}

impl Display for TokenType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            TokenType::Illegal => "ILLEGAL",
            TokenType::Eof => "EOF",
            TokenType::Ident => "IDENT",
            TokenType::Int => "INT",
            TokenType::Float => "FLOAT",
            TokenType::String => "STRING",
            TokenType::Assign => "=",
            TokenType::Plus => "+",
            TokenType::Minus => "-",
            TokenType::Asterisk => "*",
            TokenType::Slash => "/",
            TokenType::Modulo => "%",
            TokenType::Power => "**",
            TokenType::PlusAssign => "+=",
            TokenType::MinusAssign => "-=",
            TokenType::MultiplyAssign => "*=",
            TokenType::DivideAssign => "/=",
            TokenType::Eq => "==",
            TokenType::NotEq => "!=",
            TokenType::Lt => "<",
            TokenType::Gt => ">",
            TokenType::Lte => "<=",
            TokenType::Gte => ">=",
            TokenType::And => "&&",
            TokenType::Or => "||",
            TokenType::Not => "!",
            TokenType::Semicolon => ";",
            TokenType::Colon => ":",
            TokenType::Comma => ",",
            TokenType::Dot => ".",
            TokenType::Question => "?",
            TokenType::LParen => "(",
            TokenType::RParen => ")",
            TokenType::LBrace => "{",
            TokenType::RBrace => "}",
            TokenType::LBracket => "[",
            TokenType::RBracket => "]",
            TokenType::At => "@",
            TokenType::Hash => "#",
            TokenType::Arrow => "=>",
            TokenType::Let => "LET",
            TokenType::Const => "CONST",
            TokenType::Var => "VAR",
            TokenType::Function => "FUNCTION",
            TokenType::Return => "RETURN",
            TokenType::If => "IF",
            TokenType::Else => "ELSE",
            TokenType::While => "WHILE",
            TokenType::For => "FOR",
            TokenType::Break => "BREAK",
            TokenType::Continue => "CONTINUE",
            TokenType::Switch => "SWITCH",
            TokenType::Case => "CASE",
            TokenType::Default => "DEFAULT",
            TokenType::True => "TRUE",
            TokenType::False => "FALSE",
            TokenType::Null => "NULL",
            TokenType::StringType => "STRING_TYPE",
            TokenType::IntType => "INT_TYPE",
            TokenType::FloatType => "FLOAT_TYPE",
            TokenType::BoolType => "BOOL_TYPE",
            TokenType::ArrayType => "ARRAY_TYPE",
            TokenType::ObjectType => "OBJECT_TYPE",
            TokenType::Class => "CLASS",
            TokenType::This => "THIS",
            TokenType::New => "NEW",
            TokenType::Extends => "EXTENDS",
            TokenType::Super => "SUPER",
            TokenType::Try => "TRY",
            TokenType::Catch => "CATCH",
            TokenType::Throw => "THROW",
            TokenType::Finally => "FINALLY",
            TokenType::Import => "IMPORT",
            TokenType::Export => "EXPORT",
            TokenType::From => "FROM",
            TokenType::As => "AS",
            TokenType::Global => "GLOBAL",
            TokenType::Local => "LOCAL",
        };
        write!(f, "{}", name)
    }
}

/// Maps a reserved word to its keyword token, or `Ident` for anything else.
pub fn lookup_ident(ident: &str) -> TokenType {
    match ident {
        "let" => TokenType::Let,
        "const" => TokenType::Const,
        "var" => TokenType::Var,
        "fn" | "function" => TokenType::Function,
        "return" => TokenType::Return,
        "if" => TokenType::If,
        "else" => TokenType::Else,
        "while" => TokenType::While,
        "for" => TokenType::For,
        "break" => TokenType::Break,
        "continue" => TokenType::Continue,
        "switch" => TokenType::Switch,
        "case" => TokenType::Case,
        "default" => TokenType::Default,
        "true" => TokenType::True,
        "false" => TokenType::False,
        "null" => TokenType::Null,
        "string" => TokenType::StringType,
        "int" => TokenType::IntType,
        "float" => TokenType::FloatType,
        "bool" => TokenType::BoolType,
        "array" => TokenType::ArrayType,
        "object" => TokenType::ObjectType,
        "class" => TokenType::Class,
        "this" => TokenType::This,
        "new" => TokenType::New,
        "extends" => TokenType::Extends,
        "super" => TokenType::Super,
        "try" => TokenType::Try,
        "catch" => TokenType::Catch,
        "throw" => TokenType::Throw,
        "finally" => TokenType::Finally,
        "import" => TokenType::Import,
        "export" => TokenType::Export,
        "from" => TokenType::From,
        "as" => TokenType::As,
        "global" => TokenType::Global,
        "local" => TokenType::Local,
        _ => TokenType::Ident,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub token_type: TokenType,
    pub literal: &'a str,
}

impl<'a> Token<'a> {
    pub fn new(token_type: TokenType, literal: &'a str) -> Self {
        Self {
            token_type,
            literal,
        }
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    read_position: usize,
    ch: u8,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Self {
            input,
            position: 0,
            read_position: 0,
            ch: 0,
        };
        lexer.advance();
        lexer
    }

    fn advance(&mut self) {
        self.ch = self
            .input
            .as_bytes()
            .get(self.read_position)
            .copied()
            .unwrap_or(0);
        self.position = self.read_position;
        self.read_position += 1;
    }

    fn peek(&self) -> u8 {
        self.input
            .as_bytes()
            .get(self.read_position)
            .copied()
            .unwrap_or(0)
    }

    fn at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    pub fn next_token(&mut self) -> Token<'a> {
        self.skip_whitespace_and_comments();

        if self.at_end() {
            return Token::new(TokenType::Eof, "");
        }

        let start = self.position;

        // Two-byte operators first, keyed on the current byte and one byte of lookahead
        let double = match (self.ch, self.peek()) {
            (b'=', b'=') => Some(TokenType::Eq),
            (b'=', b'>') => Some(TokenType::Arrow),
            (b'+', b'=') => Some(TokenType::PlusAssign),
            (b'-', b'=') => Some(TokenType::MinusAssign),
            (b'*', b'*') => Some(TokenType::Power),
            (b'*', b'=') => Some(TokenType::MultiplyAssign),
            (b'/', b'=') => Some(TokenType::DivideAssign),
            (b'!', b'=') => Some(TokenType::NotEq),
            (b'<', b'=') => Some(TokenType::Lte),
            (b'>', b'=') => Some(TokenType::Gte),
            (b'&', b'&') => Some(TokenType::And),
            (b'|', b'|') => Some(TokenType::Or),
            _ => None,
        };

        if let Some(token_type) = double {
            self.advance();
            self.advance();
            return self.emit(token_type, start);
        }

        let single = match self.ch {
            b'=' => Some(TokenType::Assign),
            b'+' => Some(TokenType::Plus),
            b'-' => Some(TokenType::Minus),
            b'*' => Some(TokenType::Asterisk),
            b'/' => Some(TokenType::Slash),
            b'%' => Some(TokenType::Modulo),
            b'!' => Some(TokenType::Not),
            b'<' => Some(TokenType::Lt),
            b'>' => Some(TokenType::Gt),
            b'(' => Some(TokenType::LParen),
            b')' => Some(TokenType::RParen),
            b'{' => Some(TokenType::LBrace),
            b'}' => Some(TokenType::RBrace),
            b'[' => Some(TokenType::LBracket),
            b']' => Some(TokenType::RBracket),
            b',' => Some(TokenType::Comma),
            b';' => Some(TokenType::Semicolon),
            b':' => Some(TokenType::Colon),
            b'.' => Some(TokenType::Dot),
            b'?' => Some(TokenType::Question),
            b'@' => Some(TokenType::At),
            b'#' => Some(TokenType::Hash),
            _ => None,
        };

        if let Some(token_type) = single {
            self.advance();
            return self.emit(token_type, start);
        }

        match self.ch {
            b'"' => self.read_string(),
            b if is_letter(b) => {
                while is_letter(self.ch) {
                    self.advance();
                }
                let literal = &self.input[start..self.position];
                self.emit(lookup_ident(literal), start)
            }
            b if b.is_ascii_digit() => self.read_number(),
            _ => {
                // A lone `&` or `|`, or any byte outside the grammar. Non-ASCII input
                // is consumed a whole character at a time so the literal stays valid UTF-8.
                let width = self.input[start..]
                    .chars()
                    .next()
                    .map_or(1, char::len_utf8);
                for _ in 0..width {
                    self.advance();
                }
                self.emit(TokenType::Illegal, start)
            }
        }
    }

    fn emit(&self, token_type: TokenType, start: usize) -> Token<'a> {
        let token = Token::new(token_type, &self.input[start..self.position]);
        trace!("token {:?} {:?}", token.token_type, token.literal);
        token
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.ch {
                b' ' | b'\t' | b'\n' | b'\r' => self.advance(),
                b'/' if self.peek() == b'/' => {
                    while !self.at_end() && self.ch != b'\n' {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_number(&mut self) -> Token<'a> {
        let start = self.position;
        let mut token_type = TokenType::Int;

        while self.ch.is_ascii_digit() {
            self.advance();
        }

        if self.ch == b'.' && self.peek().is_ascii_digit() {
            token_type = TokenType::Float;
            self.advance();
            while self.ch.is_ascii_digit() {
                self.advance();
            }
        }

        self.emit(token_type, start)
    }

    fn read_string(&mut self) -> Token<'a> {
        let start = self.position;
        self.advance();

        while !self.at_end() && self.ch != b'"' {
            self.advance();
        }

        if self.at_end() {
            warn!("unterminated string literal starting at byte {}", start);
            return self.emit(TokenType::Illegal, start);
        }

        let literal = &self.input[start + 1..self.position];
        self.advance();
        trace!("token String {:?}", literal);
        Token::new(TokenType::String, literal)
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.next_token();
        (token.token_type != TokenType::Eof).then_some(token)
    }
}

fn is_letter(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

/// Converts source text into its full token sequence, excluding the end-of-input token.
pub fn tokenize(source: &str) -> Vec<Token<'_>> {
    Lexer::new(source).collect()
}
