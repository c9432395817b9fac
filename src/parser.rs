use crate::tokenizer::{Lexer, Token, TokenType};
use log::debug;
use std::{
    fmt::{self, Display, Formatter},
    rc::Rc,
};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        kind: DeclarationKind,
        name: String,
        value: Option<Expr>,
    },
    Return(Option<Expr>),
    Expression(Expr),
    Block(Block),
    While {
        condition: Expr,
        body: Block,
    },
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Block,
    },
    Break,
    Continue,
    Function {
        name: String,
        function: FunctionLiteral,
    },
    Switch {
        subject: Expr,
        cases: Vec<Case>,
        default: Option<Block>,
    },
    Try {
        body: Block,
        catch: Option<Catch>,
        finally: Option<Block>,
    },
    Throw(Expr),
    Import {
        path: String,
        alias: Option<String>,
    },
    Export(Box<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub value: Expr,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catch {
    pub parameter: String,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionLiteral {
    pub parameters: Vec<String>,
    pub body: Rc<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Identifier(String),
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Array(Vec<Expr>),
    Hash(Vec<(Expr, Expr)>),
    Prefix {
        operator: PrefixOp,
        right: Box<Expr>,
    },
    Infix {
        left: Box<Expr>,
        operator: InfixOp,
        right: Box<Expr>,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
    },
    Assign {
        target: Box<Expr>,
        operator: AssignOp,
        value: Box<Expr>,
    },
    Call {
        function: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Function(FunctionLiteral),
    Index {
        left: Box<Expr>,
        index: Box<Expr>,
    },
    Property {
        left: Box<Expr>,
        name: String,
    },
    Ternary {
        condition: Box<Expr>,
        consequence: Box<Expr>,
        alternative: Box<Expr>,
    },
    If {
        condition: Box<Expr>,
        consequence: Block,
        alternative: Option<Block>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl AssignOp {
    /// The arithmetic applied before storing, if this is a compound operator.
    pub fn infix(self) -> Option<InfixOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::Add => Some(InfixOp::Add),
            AssignOp::Subtract => Some(InfixOp::Subtract),
            AssignOp::Multiply => Some(InfixOp::Multiply),
            AssignOp::Divide => Some(InfixOp::Divide),
        }
    }
}

impl Display for PrefixOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            PrefixOp::Not => write!(f, "!"),
            PrefixOp::Negate => write!(f, "-"),
        }
    }
}

impl Display for InfixOp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let symbol = match self {
            InfixOp::Add => "+",
            InfixOp::Subtract => "-",
            InfixOp::Multiply => "*",
            InfixOp::Divide => "/",
            InfixOp::Modulo => "%",
            InfixOp::Power => "**",
            InfixOp::Equal => "==",
            InfixOp::NotEqual => "!=",
            InfixOp::Less => "<",
            InfixOp::LessEqual => "<=",
            InfixOp::Greater => ">",
            InfixOp::GreaterEqual => ">=",
        };
        write!(f, "{}", symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Assign,
    Ternary,
    Or,
    And,
    Equals,
    LessGreater,
    Sum,
    Product,
    Power,
    Prefix,
    Call,
    Index,
}

fn precedence_of(token_type: TokenType) -> Precedence {
    match token_type {
        TokenType::Assign
        | TokenType::PlusAssign
        | TokenType::MinusAssign
        | TokenType::MultiplyAssign
        | TokenType::DivideAssign => Precedence::Assign,
        TokenType::Question => Precedence::Ternary,
        TokenType::Or => Precedence::Or,
        TokenType::And => Precedence::And,
        TokenType::Eq | TokenType::NotEq => Precedence::Equals,
        TokenType::Lt | TokenType::Gt | TokenType::Lte | TokenType::Gte => Precedence::LessGreater,
        TokenType::Plus | TokenType::Minus => Precedence::Sum,
        TokenType::Asterisk | TokenType::Slash | TokenType::Modulo => Precedence::Product,
        TokenType::Power => Precedence::Power,
        TokenType::LParen => Precedence::Call,
        TokenType::LBracket | TokenType::Dot => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

fn infix_op(token_type: TokenType) -> Option<InfixOp> {
    let op = match token_type {
        TokenType::Plus => InfixOp::Add,
        TokenType::Minus => InfixOp::Subtract,
        TokenType::Asterisk => InfixOp::Multiply,
        TokenType::Slash => InfixOp::Divide,
        TokenType::Modulo => InfixOp::Modulo,
        TokenType::Power => InfixOp::Power,
        TokenType::Eq => InfixOp::Equal,
        TokenType::NotEq => InfixOp::NotEqual,
        TokenType::Lt => InfixOp::Less,
        TokenType::Lte => InfixOp::LessEqual,
        TokenType::Gt => InfixOp::Greater,
        TokenType::Gte => InfixOp::GreaterEqual,
        _ => return None,
    };
    Some(op)
}

fn logical_op(token_type: TokenType) -> Option<LogicalOp> {
    match token_type {
        TokenType::And => Some(LogicalOp::And),
        TokenType::Or => Some(LogicalOp::Or),
        _ => None,
    }
}

fn assign_op(token_type: TokenType) -> Option<AssignOp> {
    let op = match token_type {
        TokenType::Assign => AssignOp::Assign,
        TokenType::PlusAssign => AssignOp::Add,
        TokenType::MinusAssign => AssignOp::Subtract,
        TokenType::MultiplyAssign => AssignOp::Multiply,
        TokenType::DivideAssign => AssignOp::Divide,
        _ => return None,
    };
    Some(op)
}

/// Pratt parser over a lazily advanced token stream.
///
/// Malformed constructs never abort the parse: each one records a message and
/// yields `None`, and the enclosing statement is dropped from the tree.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token<'a>,
    peek: Token<'a>,
    errors: Vec<String>,
}

impl<'a> Parser<'a> {
    pub fn new(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        let peek = lexer.next_token();
        Self {
            lexer,
            current,
            peek,
            errors: Vec::new(),
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();

        while !self.current_is(TokenType::Eof) {
            if let Some(stmt) = self.parse_statement() {
                program.statements.push(stmt);
            }
            self.next();
        }

        program
    }

    fn next(&mut self) {
        self.current = self.peek;
        self.peek = self.lexer.next_token();
    }

    fn current_is(&self, token_type: TokenType) -> bool {
        self.current.token_type == token_type
    }

    fn peek_is(&self, token_type: TokenType) -> bool {
        self.peek.token_type == token_type
    }

    fn expect_peek(&mut self, token_type: TokenType) -> Option<()> {
        if self.peek_is(token_type) {
            self.next();
            Some(())
        } else {
            self.error(format!(
                "expected next token to be {}, got {} instead",
                token_type, self.peek.token_type
            ));
            None
        }
    }

    fn skip_semicolon(&mut self) {
        if self.peek_is(TokenType::Semicolon) {
            self.next();
        }
    }

    fn error(&mut self, message: String) {
        debug!("parse error: {}", message);
        self.errors.push(message);
    }

    fn parse_statement(&mut self) -> Option<Stmt> {
        match self.current.token_type {
            TokenType::Let => self.parse_declaration(DeclarationKind::Let),
            TokenType::Const => self.parse_declaration(DeclarationKind::Const),
            TokenType::Var => self.parse_declaration(DeclarationKind::Var),
            TokenType::Return => self.parse_return(),
            TokenType::Function if self.peek_is(TokenType::Ident) => {
                self.parse_function_declaration()
            }
            TokenType::While => self.parse_while(),
            TokenType::For => self.parse_for(),
            TokenType::Break => {
                self.skip_semicolon();
                Some(Stmt::Break)
            }
            TokenType::Continue => {
                self.skip_semicolon();
                Some(Stmt::Continue)
            }
            TokenType::Switch => self.parse_switch(),
            TokenType::Try => self.parse_try(),
            TokenType::Throw => {
                self.next();
                let value = self.parse_expression(Precedence::Lowest)?;
                self.skip_semicolon();
                Some(Stmt::Throw(value))
            }
            TokenType::Import => self.parse_import(),
            TokenType::Export => {
                self.next();
                let inner = self.parse_statement()?;
                Some(Stmt::Export(Box::new(inner)))
            }
            TokenType::LBrace if !self.starts_hash_literal() => {
                let block = self.parse_block()?;
                self.skip_semicolon();
                Some(Stmt::Block(block))
            }
            _ => self.parse_expression_statement(),
        }
    }

    // At statement start a `{` is a hash literal only when its first key is a literal
    fn starts_hash_literal(&self) -> bool {
        matches!(
            self.peek.token_type,
            TokenType::String | TokenType::Int | TokenType::True | TokenType::False | TokenType::RBrace
        )
    }

    fn parse_declaration(&mut self, kind: DeclarationKind) -> Option<Stmt> {
        self.expect_peek(TokenType::Ident)?;
        let name = self.current.literal.to_string();

        let value = if kind == DeclarationKind::Var && !self.peek_is(TokenType::Assign) {
            None
        } else {
            self.expect_peek(TokenType::Assign)?;
            self.next();
            Some(self.parse_expression(Precedence::Lowest)?)
        };

        self.skip_semicolon();
        Some(Stmt::Let { kind, name, value })
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        if matches!(
            self.peek.token_type,
            TokenType::Semicolon | TokenType::RBrace | TokenType::Eof
        ) {
            self.skip_semicolon();
            return Some(Stmt::Return(None));
        }

        self.next();
        let value = self.parse_expression(Precedence::Lowest)?;
        self.skip_semicolon();
        Some(Stmt::Return(Some(value)))
    }

    fn parse_function_declaration(&mut self) -> Option<Stmt> {
        self.expect_peek(TokenType::Ident)?;
        let name = self.current.literal.to_string();
        let function = self.parse_function_rest()?;
        self.skip_semicolon();
        Some(Stmt::Function { name, function })
    }

    fn parse_expression_statement(&mut self) -> Option<Stmt> {
        let expr = self.parse_expression(Precedence::Lowest)?;
        self.skip_semicolon();
        Some(Stmt::Expression(expr))
    }

    /// Parses `{ statements }` with the current token on the opening brace,
    /// leaving the current token on the closing brace.
    fn parse_block(&mut self) -> Option<Block> {
        let mut block = Block::default();
        self.next();

        while !self.current_is(TokenType::RBrace) {
            if self.current_is(TokenType::Eof) {
                self.error(format!(
                    "expected next token to be {}, got {} instead",
                    TokenType::RBrace,
                    TokenType::Eof
                ));
                return None;
            }
            if let Some(stmt) = self.parse_statement() {
                block.statements.push(stmt);
            }
            self.next();
        }

        Some(block)
    }

    fn parse_condition(&mut self) -> Option<Expr> {
        self.expect_peek(TokenType::LParen)?;
        self.next();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenType::RParen)?;
        Some(condition)
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let condition = self.parse_condition()?;
        self.expect_peek(TokenType::LBrace)?;
        let body = self.parse_block()?;
        self.skip_semicolon();
        Some(Stmt::While { condition, body })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        self.expect_peek(TokenType::LParen)?;

        self.next();
        let initializer = if self.current_is(TokenType::Semicolon) {
            None
        } else {
            let stmt = self.parse_statement()?;
            if !self.current_is(TokenType::Semicolon) {
                self.expect_peek(TokenType::Semicolon)?;
            }
            Some(Box::new(stmt))
        };

        self.next();
        let condition = if self.current_is(TokenType::Semicolon) {
            None
        } else {
            let condition = self.parse_expression(Precedence::Lowest)?;
            self.expect_peek(TokenType::Semicolon)?;
            Some(condition)
        };

        self.next();
        let increment = if self.current_is(TokenType::RParen) {
            None
        } else {
            let increment = self.parse_expression(Precedence::Lowest)?;
            self.expect_peek(TokenType::RParen)?;
            Some(increment)
        };

        self.expect_peek(TokenType::LBrace)?;
        let body = self.parse_block()?;
        self.skip_semicolon();

        Some(Stmt::For {
            initializer,
            condition,
            increment,
            body,
        })
    }

    fn parse_switch(&mut self) -> Option<Stmt> {
        let subject = self.parse_condition()?;
        self.expect_peek(TokenType::LBrace)?;
        self.next();

        let mut cases = Vec::new();
        let mut default = None;

        while !self.current_is(TokenType::RBrace) && !self.current_is(TokenType::Eof) {
            match self.current.token_type {
                TokenType::Case => {
                    self.next();
                    let value = self.parse_expression(Precedence::Lowest)?;
                    self.expect_peek(TokenType::Colon)?;
                    self.expect_peek(TokenType::LBrace)?;
                    let body = self.parse_block()?;
                    cases.push(Case { value, body });
                }
                TokenType::Default => {
                    self.expect_peek(TokenType::Colon)?;
                    self.expect_peek(TokenType::LBrace)?;
                    default = Some(self.parse_block()?);
                }
                other => {
                    self.error(format!("expected CASE or DEFAULT in switch, got {}", other));
                }
            }
            self.next();
        }

        if self.current_is(TokenType::Eof) {
            self.error(format!(
                "expected next token to be {}, got {} instead",
                TokenType::RBrace,
                TokenType::Eof
            ));
            return None;
        }

        self.skip_semicolon();
        Some(Stmt::Switch {
            subject,
            cases,
            default,
        })
    }

    fn parse_try(&mut self) -> Option<Stmt> {
        self.expect_peek(TokenType::LBrace)?;
        let body = self.parse_block()?;

        let catch = if self.peek_is(TokenType::Catch) {
            self.next();
            self.expect_peek(TokenType::LParen)?;
            self.expect_peek(TokenType::Ident)?;
            let parameter = self.current.literal.to_string();
            self.expect_peek(TokenType::RParen)?;
            self.expect_peek(TokenType::LBrace)?;
            let body = self.parse_block()?;
            Some(Catch { parameter, body })
        } else {
            None
        };

        let finally = if self.peek_is(TokenType::Finally) {
            self.next();
            self.expect_peek(TokenType::LBrace)?;
            Some(self.parse_block()?)
        } else {
            None
        };

        self.skip_semicolon();
        Some(Stmt::Try {
            body,
            catch,
            finally,
        })
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        self.expect_peek(TokenType::String)?;
        let path = self.current.literal.to_string();

        let alias = if self.peek_is(TokenType::As) {
            self.next();
            self.expect_peek(TokenType::Ident)?;
            Some(self.current.literal.to_string())
        } else {
            None
        };

        self.skip_semicolon();
        Some(Stmt::Import { path, alias })
    }

    fn parse_expression(&mut self, precedence: Precedence) -> Option<Expr> {
        let mut left = self.parse_prefix()?;

        while !self.peek_is(TokenType::Semicolon) && precedence < precedence_of(self.peek.token_type)
        {
            self.next();
            left = self.parse_infix(left)?;
        }

        Some(left)
    }

    fn parse_prefix(&mut self) -> Option<Expr> {
        let token = self.current;
        match token.token_type {
            TokenType::Ident => Some(Expr::Identifier(token.literal.to_string())),
            TokenType::Int => match token.literal.parse::<i64>() {
                Ok(value) => Some(Expr::Integer(value)),
                Err(_) => {
                    self.error(format!("could not parse {:?} as integer", token.literal));
                    None
                }
            },
            TokenType::Float => match token.literal.parse::<f64>() {
                Ok(value) => Some(Expr::Float(value)),
                Err(_) => {
                    self.error(format!("could not parse {:?} as float", token.literal));
                    None
                }
            },
            TokenType::String => Some(Expr::String(token.literal.to_string())),
            TokenType::True => Some(Expr::Boolean(true)),
            TokenType::False => Some(Expr::Boolean(false)),
            TokenType::Null => Some(Expr::Null),
            TokenType::Not | TokenType::Minus => {
                let operator = if token.token_type == TokenType::Not {
                    PrefixOp::Not
                } else {
                    PrefixOp::Negate
                };
                self.next();
                let right = self.parse_expression(Precedence::Prefix)?;
                Some(Expr::Prefix {
                    operator,
                    right: Box::new(right),
                })
            }
            TokenType::LParen => {
                self.next();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(TokenType::RParen)?;
                Some(expr)
            }
            TokenType::If => self.parse_if(),
            TokenType::Function => Some(Expr::Function(self.parse_function_rest()?)),
            TokenType::LBracket => {
                let elements =
                    self.parse_list(TokenType::RBracket, |p| p.parse_expression(Precedence::Lowest))?;
                Some(Expr::Array(elements))
            }
            TokenType::LBrace => {
                let pairs = self.parse_list(TokenType::RBrace, Self::parse_hash_pair)?;
                Some(Expr::Hash(pairs))
            }
            TokenType::Illegal => {
                self.error(format!("illegal token {:?}", token.literal));
                None
            }
            other => {
                self.error(format!("no prefix parse function for {} found", other));
                None
            }
        }
    }

    fn parse_infix(&mut self, left: Expr) -> Option<Expr> {
        let token_type = self.current.token_type;

        if let Some(operator) = infix_op(token_type) {
            let precedence = precedence_of(token_type);
            self.next();
            let right = self.parse_expression(precedence)?;
            return Some(Expr::Infix {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            });
        }

        if let Some(operator) = logical_op(token_type) {
            let precedence = precedence_of(token_type);
            self.next();
            let right = self.parse_expression(precedence)?;
            return Some(Expr::Logical {
                left: Box::new(left),
                operator,
                right: Box::new(right),
            });
        }

        if let Some(operator) = assign_op(token_type) {
            if !matches!(
                left,
                Expr::Identifier(_) | Expr::Index { .. } | Expr::Property { .. }
            ) {
                self.error(format!("invalid assignment target before {}", token_type));
                return None;
            }
            self.next();
            let value = self.parse_expression(Precedence::Lowest)?;
            return Some(Expr::Assign {
                target: Box::new(left),
                operator,
                value: Box::new(value),
            });
        }

        match token_type {
            TokenType::Question => {
                self.next();
                let consequence = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(TokenType::Colon)?;
                self.next();
                let alternative = self.parse_expression(Precedence::Lowest)?;
                Some(Expr::Ternary {
                    condition: Box::new(left),
                    consequence: Box::new(consequence),
                    alternative: Box::new(alternative),
                })
            }
            TokenType::LParen => {
                let arguments =
                    self.parse_list(TokenType::RParen, |p| p.parse_expression(Precedence::Lowest))?;
                Some(Expr::Call {
                    function: Box::new(left),
                    arguments,
                })
            }
            TokenType::LBracket => {
                self.next();
                let index = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(TokenType::RBracket)?;
                Some(Expr::Index {
                    left: Box::new(left),
                    index: Box::new(index),
                })
            }
            TokenType::Dot => {
                self.expect_peek(TokenType::Ident)?;
                Some(Expr::Property {
                    left: Box::new(left),
                    name: self.current.literal.to_string(),
                })
            }
            other => {
                self.error(format!("no infix parse function for {} found", other));
                None
            }
        }
    }

    fn parse_if(&mut self) -> Option<Expr> {
        let condition = self.parse_condition()?;
        self.expect_peek(TokenType::LBrace)?;
        let consequence = self.parse_block()?;

        let alternative = if self.peek_is(TokenType::Else) {
            self.next();
            if self.peek_is(TokenType::If) {
                self.next();
                let nested = self.parse_if()?;
                Some(Block {
                    statements: vec![Stmt::Expression(nested)],
                })
            } else {
                self.expect_peek(TokenType::LBrace)?;
                Some(self.parse_block()?)
            }
        } else {
            None
        };

        Some(Expr::If {
            condition: Box::new(condition),
            consequence,
            alternative,
        })
    }

    /// Parses `(params) { body }` following the `fn` keyword or a declared name.
    fn parse_function_rest(&mut self) -> Option<FunctionLiteral> {
        self.expect_peek(TokenType::LParen)?;
        let parameters = self.parse_list(TokenType::RParen, Self::parse_parameter)?;
        self.expect_peek(TokenType::LBrace)?;
        let body = self.parse_block()?;
        Some(FunctionLiteral {
            parameters,
            body: Rc::new(body),
        })
    }

    fn parse_parameter(&mut self) -> Option<String> {
        if self.current_is(TokenType::Ident) {
            Some(self.current.literal.to_string())
        } else {
            self.error(format!(
                "expected parameter to be {}, got {} instead",
                TokenType::Ident,
                self.current.token_type
            ));
            None
        }
    }

    fn parse_hash_pair(&mut self) -> Option<(Expr, Expr)> {
        let key = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenType::Colon)?;
        self.next();
        let value = self.parse_expression(Precedence::Lowest)?;
        Some((key, value))
    }

    /// Parses a comma separated list up to `end`, with the current token on the
    /// opening delimiter. A trailing comma is accepted.
    fn parse_list<T>(
        &mut self,
        end: TokenType,
        mut item: impl FnMut(&mut Self) -> Option<T>,
    ) -> Option<Vec<T>> {
        let mut items = Vec::new();

        if self.peek_is(end) {
            self.next();
            return Some(items);
        }

        self.next();
        items.push(item(self)?);

        while self.peek_is(TokenType::Comma) {
            self.next();
            if self.peek_is(end) {
                break;
            }
            self.next();
            items.push(item(self)?);
        }

        self.expect_peek(end)?;
        Some(items)
    }
}

/// Parses source text into a program and the list of accumulated error messages.
pub fn parse(source: &str) -> (Program, Vec<String>) {
    let mut parser = Parser::new(Lexer::new(source));
    let program = parser.parse_program();
    (program, parser.errors)
}
