use crate::runtime::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
    #[error("line editor error: {0}")]
    LineEditor(#[from] reedline::ReedlineError),
    #[error("file '{}' not found", .0.display())]
    FileNotFound(PathBuf),
    #[error("parser errors:\n{}", format_messages(.errors))]
    Parser { errors: Vec<String> },
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

pub type Result<T> = std::result::Result<T, Error>;

fn format_messages(errors: &[String]) -> String {
    errors
        .iter()
        .map(|message| format!("\t{}", message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Failure raised while evaluating a program. Travels through the evaluator
/// as a control signal and surfaces as [`Value::Error`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("identifier not found: {0}")]
    IdentifierNotFound(String),
    #[error("type mismatch: {left} {operator} {right}")]
    TypeMismatch {
        left: &'static str,
        operator: String,
        right: &'static str,
    },
    #[error("unknown operator: {operator}{operand}")]
    UnknownPrefixOperator {
        operator: String,
        operand: &'static str,
    },
    #[error("unknown operator: {left} {operator} {right}")]
    UnknownInfixOperator {
        left: &'static str,
        operator: String,
        right: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("unusable as hash key: {0}")]
    UnusableAsHashKey(&'static str),
    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("index out of bounds: {index} (length {length})")]
    IndexOutOfBounds { index: i64, length: usize },
    #[error("property access not supported: {0}")]
    PropertyNotSupported(&'static str),
    #[error("not a function: {0}")]
    NotAFunction(&'static str),
    #[error("invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("wrong number of arguments: expected {expected}, got {got}")]
    WrongArgumentCount { expected: usize, got: usize },
    #[error("argument to `{function}` not supported, got {got}")]
    InvalidArgument {
        function: &'static str,
        got: &'static str,
    },
    #[error("break outside of loop")]
    BreakOutsideLoop,
    #[error("continue outside of loop")]
    ContinueOutsideLoop,
    #[error("maximum call depth exceeded ({0})")]
    CallDepthExceeded(usize),
    #[error("unsupported statement: {0}")]
    UnsupportedStatement(&'static str),
    #[error("{0}")]
    Thrown(Box<Value>),
}
