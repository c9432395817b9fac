use crate::{
    environment::{Environment, ScopeTracker},
    error::RuntimeError,
    parser::{AssignOp, Block, Expr, FunctionLiteral, InfixOp, LogicalOp, PrefixOp, Program, Stmt},
    stdlib,
};
use log::{debug, warn};
use std::{
    cell::RefCell,
    collections::{hash_map::DefaultHasher, BTreeMap},
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    rc::Rc,
};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 1000;

// Headroom kept below each evaluation step before a new stack segment is mapped
const STACK_RED_ZONE: usize = 256 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

pub type HashPairs = BTreeMap<HashKey, HashPair>;
pub type BuiltinFn = fn(&[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone)]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Array(Rc<RefCell<Vec<Value>>>),
    Hash(Rc<RefCell<HashPairs>>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Error(RuntimeError),
}

pub struct Function {
    pub parameters: Vec<String>,
    pub body: Rc<Block>,
    pub env: Environment,
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Value,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HashKind {
    Integer,
    Boolean,
    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HashKey {
    pub kind: HashKind,
    pub value: u64,
}

/// Values that can be reduced to a fixed-size key for use in a hash.
pub trait Hashable {
    fn hash_key(&self) -> HashKey;
}

impl Hashable for i64 {
    fn hash_key(&self) -> HashKey {
        HashKey {
            kind: HashKind::Integer,
            value: *self as u64,
        }
    }
}

impl Hashable for bool {
    fn hash_key(&self) -> HashKey {
        HashKey {
            kind: HashKind::Boolean,
            value: u64::from(*self),
        }
    }
}

impl Hashable for str {
    fn hash_key(&self) -> HashKey {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        HashKey {
            kind: HashKind::String,
            value: hasher.finish(),
        }
    }
}

impl Value {
    pub fn array(elements: Vec<Value>) -> Self {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn hash(pairs: HashPairs) -> Self {
        Value::Hash(Rc::new(RefCell::new(pairs)))
    }

    fn function(literal: &FunctionLiteral, env: &Environment) -> Self {
        Value::Function(Rc::new(Function {
            parameters: literal.parameters.clone(),
            body: Rc::clone(&literal.body),
            env: env.clone(),
        }))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "INTEGER",
            Value::Float(_) => "FLOAT",
            Value::String(_) => "STRING",
            Value::Boolean(_) => "BOOLEAN",
            Value::Null => "NULL",
            Value::Array(_) => "ARRAY",
            Value::Hash(_) => "HASH",
            Value::Function(_) => "FUNCTION",
            Value::Builtin(_) => "BUILTIN",
            Value::Error(_) => "ERROR",
        }
    }

    /// `null` and `false` are falsy; everything else, including `0` and `""`, is truthy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Null | Value::Boolean(false))
    }

    pub fn as_hash_key(&self) -> Result<HashKey, RuntimeError> {
        match self {
            Value::Integer(i) => Ok(i.hash_key()),
            Value::Boolean(b) => Ok(b.hash_key()),
            Value::String(s) => Ok(s.as_str().hash_key()),
            other => Err(RuntimeError::UnusableAsHashKey(other.type_name())),
        }
    }
}

// Compound values compare by identity, primitives by value
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.name == b.name,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write_value(f, self, &mut Vec::new())
    }
}

// `open` holds the arrays and hashes being written, so a value that contains
// itself prints as `[...]` or `{...}`
fn write_value(f: &mut Formatter, value: &Value, open: &mut Vec<*const ()>) -> fmt::Result {
    match value {
        Value::Integer(i) => write!(f, "{}", i),
        Value::Float(n) => write!(f, "{}", n),
        Value::String(s) => write!(f, "{}", s),
        Value::Boolean(b) => write!(f, "{}", b),
        Value::Null => write!(f, "null"),
        Value::Array(elements) => {
            let id = Rc::as_ptr(elements) as *const ();
            if open.contains(&id) {
                return write!(f, "[...]");
            }
            open.push(id);
            write!(f, "[")?;
            for (i, element) in elements.borrow().iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(f, element, open)?;
            }
            open.pop();
            write!(f, "]")
        }
        Value::Hash(pairs) => {
            let id = Rc::as_ptr(pairs) as *const ();
            if open.contains(&id) {
                return write!(f, "{{...}}");
            }
            open.push(id);
            write!(f, "{{")?;
            for (i, pair) in pairs.borrow().values().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(f, &pair.key, open)?;
                write!(f, ": ")?;
                write_value(f, &pair.value, open)?;
            }
            open.pop();
            write!(f, "}}")
        }
        Value::Function(function) => {
            write!(f, "fn({}) {{ ... }}", function.parameters.join(", "))
        }
        Value::Builtin(builtin) => write!(f, "<built-in {}>", builtin.name),
        Value::Error(error) => write!(f, "{}", error),
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Error(error) => write!(f, "Error({:?})", error),
            _ => write!(f, "{}", self),
        }
    }
}

/// Non-local control flow, carried on the `Err` side of evaluation results.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Return(Value),
    Break,
    Continue,
    Error(RuntimeError),
}

impl From<RuntimeError> for Signal {
    fn from(error: RuntimeError) -> Self {
        Signal::Error(error)
    }
}

type Flow = Result<Value, Signal>;

/// Tree-walking evaluator. Tracks nesting of user function calls so runaway
/// recursion surfaces as an error value, and grows the host stack on demand
/// so the limit is reached before the stack runs out.
pub struct Evaluator {
    depth: usize,
    max_depth: usize,
    scopes: ScopeTracker,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_MAX_CALL_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            depth: 0,
            max_depth,
            scopes: ScopeTracker::default(),
        }
    }

    /// Frees scopes that only closure cycles keep alive. Returns how many.
    pub fn collect(&mut self) -> usize {
        self.scopes.collect()
    }

    pub fn live_scopes(&self) -> usize {
        self.scopes.live()
    }

    fn enclose(&mut self, env: &Environment) -> Environment {
        let scope = Environment::enclosed(env);
        self.scopes.track(&scope);
        scope
    }

    /// Runs every statement of `program` in `env` and returns the value of the
    /// last one. A runtime error stops evaluation and becomes the result.
    pub fn eval_program(&mut self, program: &Program, env: &Environment) -> Value {
        self.scopes.adopt(env);
        let mut result = Value::Null;

        for stmt in &program.statements {
            match self.eval_statement(stmt, env) {
                Ok(value) => result = value,
                Err(Signal::Return(value)) => return value,
                Err(Signal::Error(error)) => return Value::Error(error),
                Err(Signal::Break) => {
                    warn!("break escaped to the top level");
                    return Value::Error(RuntimeError::BreakOutsideLoop);
                }
                Err(Signal::Continue) => {
                    warn!("continue escaped to the top level");
                    return Value::Error(RuntimeError::ContinueOutsideLoop);
                }
            }
        }

        result
    }

    fn eval_block(&mut self, block: &Block, env: &Environment) -> Flow {
        let mut result = Value::Null;
        for stmt in &block.statements {
            result = self.eval_statement(stmt, env)?;
        }
        Ok(result)
    }

    fn eval_statement(&mut self, stmt: &Stmt, env: &Environment) -> Flow {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.eval_statement_inner(stmt, env)
        })
    }

    fn eval_statement_inner(&mut self, stmt: &Stmt, env: &Environment) -> Flow {
        match stmt {
            Stmt::Let { name, value, .. } => {
                let value = match value {
                    Some(expr) => self.eval_expression(expr, env)?,
                    None => Value::Null,
                };
                Ok(env.set(name, value))
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval_expression(expr, env)?,
                    None => Value::Null,
                };
                Err(Signal::Return(value))
            }
            Stmt::Expression(expr) => self.eval_expression(expr, env),
            Stmt::Block(block) => self.eval_block(block, env),
            Stmt::While { condition, body } => self.eval_while(condition, body, env),
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
            } => self.eval_for(
                initializer.as_deref(),
                condition.as_ref(),
                increment.as_ref(),
                body,
                env,
            ),
            Stmt::Break => Err(Signal::Break),
            Stmt::Continue => Err(Signal::Continue),
            Stmt::Function { name, function } => Ok(env.set(name, Value::function(function, env))),
            Stmt::Switch {
                subject,
                cases,
                default,
            } => {
                let subject = self.eval_expression(subject, env)?;
                let mut selected = default.as_ref();
                for case in cases {
                    let value = self.eval_expression(&case.value, env)?;
                    if eval_infix(InfixOp::Equal, subject.clone(), value)?.is_truthy() {
                        selected = Some(&case.body);
                        break;
                    }
                }
                match selected.map(|body| self.eval_block(body, env)) {
                    None | Some(Err(Signal::Break)) => Ok(Value::Null),
                    Some(outcome) => outcome,
                }
            }
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                let outcome = match (self.eval_block(body, env), catch) {
                    (Err(Signal::Error(error)), Some(catch)) => {
                        debug!("caught runtime error: {}", error);
                        let caught = match error {
                            RuntimeError::Thrown(value) => *value,
                            other => Value::String(other.to_string()),
                        };
                        env.set(&catch.parameter, caught);
                        self.eval_block(&catch.body, env)
                    }
                    (outcome, _) => outcome,
                };
                if let Some(finally) = finally {
                    self.eval_block(finally, env)?;
                }
                outcome
            }
            Stmt::Throw(expr) => {
                let value = self.eval_expression(expr, env)?;
                Err(RuntimeError::Thrown(Box::new(value)).into())
            }
            Stmt::Import { .. } => Err(RuntimeError::UnsupportedStatement("import").into()),
            Stmt::Export(inner) => self.eval_statement(inner, env),
        }
    }

    fn eval_while(&mut self, condition: &Expr, body: &Block, env: &Environment) -> Flow {
        let mut result = Value::Null;

        while self.eval_expression(condition, env)?.is_truthy() {
            match self.eval_block(body, env) {
                Ok(value) => result = value,
                Err(Signal::Break) => return Ok(Value::Null),
                Err(Signal::Continue) => continue,
                Err(signal) => return Err(signal),
            }
        }

        Ok(result)
    }

    fn eval_for(
        &mut self,
        initializer: Option<&Stmt>,
        condition: Option<&Expr>,
        increment: Option<&Expr>,
        body: &Block,
        env: &Environment,
    ) -> Flow {
        let scope = self.enclose(env);
        if let Some(initializer) = initializer {
            self.eval_statement(initializer, &scope)?;
        }

        let mut result = Value::Null;
        loop {
            if let Some(condition) = condition {
                if !self.eval_expression(condition, &scope)?.is_truthy() {
                    break;
                }
            }

            match self.eval_block(body, &scope) {
                Ok(value) => result = value,
                Err(Signal::Break) => return Ok(Value::Null),
                Err(Signal::Continue) => {}
                Err(signal) => return Err(signal),
            }

            if let Some(increment) = increment {
                self.eval_expression(increment, &scope)?;
            }
        }

        Ok(result)
    }

    fn eval_expression(&mut self, expr: &Expr, env: &Environment) -> Flow {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.eval_expression_inner(expr, env)
        })
    }

    fn eval_expression_inner(&mut self, expr: &Expr, env: &Environment) -> Flow {
        match expr {
            Expr::Identifier(name) => Ok(eval_identifier(name, env)?),
            Expr::Integer(i) => Ok(Value::Integer(*i)),
            Expr::Float(n) => Ok(Value::Float(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Array(elements) => Ok(Value::array(self.eval_expressions(elements, env)?)),
            Expr::Hash(pairs) => {
                let mut map = HashPairs::new();
                for (key, value) in pairs {
                    let key = self.eval_expression(key, env)?;
                    let hash_key = key.as_hash_key()?;
                    let value = self.eval_expression(value, env)?;
                    map.insert(hash_key, HashPair { key, value });
                }
                Ok(Value::hash(map))
            }
            Expr::Prefix { operator, right } => {
                let right = self.eval_expression(right, env)?;
                Ok(eval_prefix(*operator, right)?)
            }
            Expr::Infix {
                left,
                operator,
                right,
            } => {
                let left = self.eval_expression(left, env)?;
                let right = self.eval_expression(right, env)?;
                Ok(eval_infix(*operator, left, right)?)
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                // Both operands are always evaluated
                let left = self.eval_expression(left, env)?.is_truthy();
                let right = self.eval_expression(right, env)?.is_truthy();
                Ok(Value::Boolean(match operator {
                    LogicalOp::And => left && right,
                    LogicalOp::Or => left || right,
                }))
            }
            Expr::Assign {
                target,
                operator,
                value,
            } => self.eval_assignment(target, *operator, value, env),
            Expr::Call {
                function,
                arguments,
            } => {
                let function = self.eval_expression(function, env)?;
                let arguments = self.eval_expressions(arguments, env)?;
                self.apply(function, arguments)
            }
            Expr::Function(literal) => Ok(Value::function(literal, env)),
            Expr::Index { left, index } => {
                let left = self.eval_expression(left, env)?;
                let index = self.eval_expression(index, env)?;
                Ok(eval_index(&left, &index)?)
            }
            Expr::Property { left, name } => {
                let left = self.eval_expression(left, env)?;
                Ok(eval_property(&left, name)?)
            }
            Expr::Ternary {
                condition,
                consequence,
                alternative,
            } => {
                if self.eval_expression(condition, env)?.is_truthy() {
                    self.eval_expression(consequence, env)
                } else {
                    self.eval_expression(alternative, env)
                }
            }
            Expr::If {
                condition,
                consequence,
                alternative,
            } => {
                if self.eval_expression(condition, env)?.is_truthy() {
                    self.eval_block(consequence, env)
                } else if let Some(alternative) = alternative {
                    self.eval_block(alternative, env)
                } else {
                    Ok(Value::Null)
                }
            }
        }
    }

    fn eval_expressions(&mut self, exprs: &[Expr], env: &Environment) -> Result<Vec<Value>, Signal> {
        exprs
            .iter()
            .map(|expr| self.eval_expression(expr, env))
            .collect()
    }

    fn eval_assignment(
        &mut self,
        target: &Expr,
        operator: AssignOp,
        value: &Expr,
        env: &Environment,
    ) -> Flow {
        let value = self.eval_expression(value, env)?;

        match target {
            Expr::Identifier(name) => {
                let value = match operator.infix() {
                    Some(op) => {
                        let current = env
                            .get(name)
                            .ok_or_else(|| RuntimeError::IdentifierNotFound(name.clone()))?;
                        eval_infix(op, current, value)?
                    }
                    None => value,
                };
                Ok(env.set(name, value))
            }
            Expr::Index { left, index } => {
                let container = self.eval_expression(left, env)?;
                let index = self.eval_expression(index, env)?;
                let value = match operator.infix() {
                    Some(op) => eval_infix(op, eval_index(&container, &index)?, value)?,
                    None => value,
                };
                store_index(&container, &index, value.clone())?;
                Ok(value)
            }
            Expr::Property { left, name } => {
                let container = self.eval_expression(left, env)?;
                let value = match operator.infix() {
                    Some(op) => eval_infix(op, eval_property(&container, name)?, value)?,
                    None => value,
                };
                match &container {
                    Value::Hash(_) => {
                        store_index(&container, &Value::String(name.clone()), value.clone())?;
                        Ok(value)
                    }
                    other => Err(RuntimeError::PropertyNotSupported(other.type_name()).into()),
                }
            }
            _ => Err(RuntimeError::InvalidAssignmentTarget.into()),
        }
    }

    fn apply(&mut self, function: Value, arguments: Vec<Value>) -> Flow {
        match function {
            Value::Function(function) => {
                if arguments.len() != function.parameters.len() {
                    return Err(RuntimeError::WrongArgumentCount {
                        expected: function.parameters.len(),
                        got: arguments.len(),
                    }
                    .into());
                }
                if self.depth >= self.max_depth {
                    return Err(RuntimeError::CallDepthExceeded(self.max_depth).into());
                }

                let scope = self.enclose(&function.env);
                for (parameter, argument) in function.parameters.iter().zip(arguments) {
                    scope.set(parameter, argument);
                }

                debug!(
                    "applying fn({}) at depth {}",
                    function.parameters.join(", "),
                    self.depth + 1
                );
                self.depth += 1;
                let outcome = self.eval_block(&function.body, &scope);
                self.depth -= 1;

                match outcome {
                    Ok(value) | Err(Signal::Return(value)) => Ok(value),
                    Err(Signal::Break) => Err(RuntimeError::BreakOutsideLoop.into()),
                    Err(Signal::Continue) => Err(RuntimeError::ContinueOutsideLoop.into()),
                    Err(signal) => Err(signal),
                }
            }
            Value::Builtin(builtin) => {
                debug!("applying built-in {}", builtin.name);
                Ok((builtin.func)(&arguments)?)
            }
            other => Err(RuntimeError::NotAFunction(other.type_name()).into()),
        }
    }
}

/// Evaluates `program` in `env` with a fresh evaluator.
pub fn evaluate(program: &Program, env: &Environment) -> Value {
    Evaluator::new().eval_program(program, env)
}

fn eval_identifier(name: &str, env: &Environment) -> Result<Value, RuntimeError> {
    stdlib::lookup(name)
        .or_else(|| env.get(name))
        .ok_or_else(|| RuntimeError::IdentifierNotFound(name.to_string()))
}

fn eval_prefix(operator: PrefixOp, right: Value) -> Result<Value, RuntimeError> {
    match (operator, right) {
        (PrefixOp::Not, right) => Ok(Value::Boolean(!right.is_truthy())),
        (PrefixOp::Negate, Value::Integer(i)) => Ok(Value::Integer(i.wrapping_neg())),
        (PrefixOp::Negate, Value::Float(n)) => Ok(Value::Float(-n)),
        (operator, right) => Err(RuntimeError::UnknownPrefixOperator {
            operator: operator.to_string(),
            operand: right.type_name(),
        }),
    }
}

fn eval_infix(operator: InfixOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match (operator, &left, &right) {
        (_, Value::Integer(l), Value::Integer(r)) => integer_infix(operator, *l, *r),
        (_, Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            float_infix(operator, as_float(&left), as_float(&right))
        }
        (InfixOp::Add, Value::String(l), Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
        (InfixOp::Equal, Value::String(l), Value::String(r)) => Ok(Value::Boolean(l == r)),
        (InfixOp::NotEqual, Value::String(l), Value::String(r)) => Ok(Value::Boolean(l != r)),
        (InfixOp::Equal, _, _) => Ok(Value::Boolean(left == right)),
        (InfixOp::NotEqual, _, _) => Ok(Value::Boolean(left != right)),
        _ if left.type_name() != right.type_name() => Err(RuntimeError::TypeMismatch {
            left: left.type_name(),
            operator: operator.to_string(),
            right: right.type_name(),
        }),
        _ => Err(RuntimeError::UnknownInfixOperator {
            left: left.type_name(),
            operator: operator.to_string(),
            right: right.type_name(),
        }),
    }
}

fn as_float(value: &Value) -> f64 {
    match value {
        Value::Integer(i) => *i as f64,
        Value::Float(n) => *n,
        _ => f64::NAN,
    }
}

fn integer_infix(operator: InfixOp, l: i64, r: i64) -> Result<Value, RuntimeError> {
    let value = match operator {
        InfixOp::Add => Value::Integer(l.wrapping_add(r)),
        InfixOp::Subtract => Value::Integer(l.wrapping_sub(r)),
        InfixOp::Multiply => Value::Integer(l.wrapping_mul(r)),
        InfixOp::Divide if r == 0 => return Err(RuntimeError::DivisionByZero),
        InfixOp::Divide => Value::Integer(l.wrapping_div(r)),
        InfixOp::Modulo if r == 0 => return Err(RuntimeError::DivisionByZero),
        InfixOp::Modulo => Value::Integer(l.wrapping_rem(r)),
        InfixOp::Power if r < 0 => Value::Float((l as f64).powf(r as f64)),
        InfixOp::Power => Value::Integer(wrapping_pow(l, r.unsigned_abs())),
        InfixOp::Equal => Value::Boolean(l == r),
        InfixOp::NotEqual => Value::Boolean(l != r),
        InfixOp::Less => Value::Boolean(l < r),
        InfixOp::LessEqual => Value::Boolean(l <= r),
        InfixOp::Greater => Value::Boolean(l > r),
        InfixOp::GreaterEqual => Value::Boolean(l >= r),
    };
    Ok(value)
}

fn wrapping_pow(mut base: i64, mut exponent: u64) -> i64 {
    let mut acc: i64 = 1;
    while exponent > 0 {
        if exponent & 1 == 1 {
            acc = acc.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exponent >>= 1;
    }
    acc
}

fn float_infix(operator: InfixOp, l: f64, r: f64) -> Result<Value, RuntimeError> {
    let value = match operator {
        InfixOp::Add => Value::Float(l + r),
        InfixOp::Subtract => Value::Float(l - r),
        InfixOp::Multiply => Value::Float(l * r),
        InfixOp::Divide | InfixOp::Modulo if r == 0.0 => return Err(RuntimeError::DivisionByZero),
        InfixOp::Divide => Value::Float(l / r),
        InfixOp::Modulo => Value::Float(l % r),
        InfixOp::Power => Value::Float(l.powf(r)),
        InfixOp::Equal => Value::Boolean(l == r),
        InfixOp::NotEqual => Value::Boolean(l != r),
        InfixOp::Less => Value::Boolean(l < r),
        InfixOp::LessEqual => Value::Boolean(l <= r),
        InfixOp::Greater => Value::Boolean(l > r),
        InfixOp::GreaterEqual => Value::Boolean(l >= r),
    };
    Ok(value)
}

fn eval_index(left: &Value, index: &Value) -> Result<Value, RuntimeError> {
    match (left, index) {
        (Value::Array(elements), Value::Integer(i)) => Ok(usize::try_from(*i)
            .ok()
            .and_then(|i| elements.borrow().get(i).cloned())
            .unwrap_or(Value::Null)),
        (Value::Hash(pairs), key) => {
            let hash_key = key.as_hash_key()?;
            Ok(pairs
                .borrow()
                .get(&hash_key)
                .map(|pair| pair.value.clone())
                .unwrap_or(Value::Null))
        }
        (other, _) => Err(RuntimeError::IndexNotSupported(other.type_name())),
    }
}

fn eval_property(left: &Value, name: &str) -> Result<Value, RuntimeError> {
    match left {
        Value::Hash(pairs) => Ok(pairs
            .borrow()
            .get(&name.hash_key())
            .map(|pair| pair.value.clone())
            .unwrap_or(Value::Null)),
        other => Err(RuntimeError::PropertyNotSupported(other.type_name())),
    }
}

fn store_index(container: &Value, index: &Value, value: Value) -> Result<(), RuntimeError> {
    match (container, index) {
        (Value::Array(elements), Value::Integer(i)) => {
            let mut elements = elements.borrow_mut();
            let length = elements.len();
            let slot = usize::try_from(*i)
                .ok()
                .and_then(|i| elements.get_mut(i))
                .ok_or(RuntimeError::IndexOutOfBounds { index: *i, length })?;
            *slot = value;
            Ok(())
        }
        (Value::Hash(pairs), key) => {
            let hash_key = key.as_hash_key()?;
            pairs.borrow_mut().insert(
                hash_key,
                HashPair {
                    key: key.clone(),
                    value,
                },
            );
            Ok(())
        }
        (other, _) => Err(RuntimeError::IndexNotSupported(other.type_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::parser::parse;

    fn run(source: &str) -> Result<Value> {
        run_with(&mut Evaluator::new(), source)
    }

    fn run_with(evaluator: &mut Evaluator, source: &str) -> Result<Value> {
        let (program, errors) = parse(source);
        if !errors.is_empty() {
            return Err(Error::Parser { errors });
        }
        Ok(evaluator.eval_program(&program, &Environment::new()))
    }

    fn run_display(source: &str) -> Result<String> {
        Ok(run(source)?.to_string())
    }

    #[test]
    fn test_precedence() -> Result<()> {
        assert_eq!(run("5 + 3 * 2")?, Value::Integer(11));
        assert_eq!(run("(5 + 3) * 2")?, Value::Integer(16));
        assert_eq!(run("2 ** 3 * 2")?, Value::Integer(16));
        assert_eq!(run("2 ** 3 ** 2")?, Value::Integer(64));
        assert_eq!(run("-2 ** 2")?, Value::Integer(4));
        assert_eq!(run("1 + 2 == 3 && 4 > 3")?, Value::Boolean(true));
        Ok(())
    }

    #[test]
    fn test_numeric_promotion() -> Result<()> {
        assert_eq!(run("10 / 4")?, Value::Integer(2));
        assert_eq!(run("10.0 / 4")?, Value::Float(2.5));
        assert_eq!(run("7 % 3")?, Value::Integer(1));
        assert_eq!(run("7.5 % 2")?, Value::Float(1.5));
        assert_eq!(run("2 ** -1")?, Value::Float(0.5));
        assert_eq!(run("1 < 2.5")?, Value::Boolean(true));
        assert_eq!(run("3 <= 3")?, Value::Boolean(true));
        assert_eq!(run("3 >= 4")?, Value::Boolean(false));
        assert_eq!(run("1 == 1.0")?, Value::Boolean(true));
        Ok(())
    }

    #[test]
    fn test_division_by_zero() -> Result<()> {
        for source in ["5 / 0", "5.0 / 0", "5 % 0", "1.5 % 0.0"] {
            assert_eq!(run(source)?, Value::Error(RuntimeError::DivisionByZero));
        }
        Ok(())
    }

    #[test]
    fn test_integer_arithmetic_wraps() -> Result<()> {
        assert_eq!(run("9223372036854775807 + 1")?, Value::Integer(i64::MIN));
        assert_eq!(run("2 ** 64")?, Value::Integer(0));
        Ok(())
    }

    #[test]
    fn test_prefix_operators() -> Result<()> {
        assert_eq!(run("!5")?, Value::Boolean(false));
        assert_eq!(run("!null")?, Value::Boolean(true));
        assert_eq!(run("!!0")?, Value::Boolean(true));
        assert_eq!(run("!true")?, Value::Boolean(false));
        assert_eq!(run("-5")?, Value::Integer(-5));
        assert_eq!(run("-1.5")?, Value::Float(-1.5));
        assert_eq!(
            run("-\"a\"")?,
            Value::Error(RuntimeError::UnknownPrefixOperator {
                operator: "-".to_string(),
                operand: "STRING",
            })
        );
        Ok(())
    }

    #[test]
    fn test_truthiness_in_conditionals() -> Result<()> {
        assert_eq!(run("if (0) { \"yes\" } else { \"no\" }")?, Value::String("yes".to_string()));
        assert_eq!(run("if (\"\") { 1 }")?, Value::Integer(1));
        assert_eq!(run("if (null) { 1 }")?, Value::Null);
        assert_eq!(run("if (false) { 1 } else if (true) { 2 } else { 3 }")?, Value::Integer(2));
        assert_eq!(run("null ? 1 : 2")?, Value::Integer(2));
        Ok(())
    }

    #[test]
    fn test_logical_operators_evaluate_both_sides() -> Result<()> {
        assert_eq!(run("true && false")?, Value::Boolean(false));
        assert_eq!(run("1 && \"x\"")?, Value::Boolean(true));
        assert_eq!(run("null || 0")?, Value::Boolean(true));

        let source = r#"
            let calls = [];
            let touch = fn() { push(calls, 1); true };
            false && touch();
            true || touch();
            len(calls)
        "#;
        assert_eq!(run(source)?, Value::Integer(2));
        Ok(())
    }

    #[test]
    fn test_string_operators() -> Result<()> {
        assert_eq!(run("\"foo\" + \"bar\"")?, Value::String("foobar".to_string()));
        assert_eq!(run("\"a\" == \"a\"")?, Value::Boolean(true));
        assert_eq!(run("\"a\" != \"b\"")?, Value::Boolean(true));
        assert_eq!(
            run("\"a\" - \"b\"")?,
            Value::Error(RuntimeError::UnknownInfixOperator {
                left: "STRING",
                operator: "-".to_string(),
                right: "STRING",
            })
        );
        assert_eq!(
            run("\"a\" + 1")?,
            Value::Error(RuntimeError::TypeMismatch {
                left: "STRING",
                operator: "+".to_string(),
                right: "INTEGER",
            })
        );
        assert_eq!(run_display("true + false")?, "unknown operator: BOOLEAN + BOOLEAN");
        Ok(())
    }

    #[test]
    fn test_cross_type_equality() -> Result<()> {
        assert_eq!(run("1 == \"1\"")?, Value::Boolean(false));
        assert_eq!(run("null == null")?, Value::Boolean(true));
        assert_eq!(run("null != false")?, Value::Boolean(true));
        assert_eq!(run("let a = [1]; a == a")?, Value::Boolean(true));
        assert_eq!(run("[1] == [1]")?, Value::Boolean(false));
        Ok(())
    }

    #[test]
    fn test_identifiers() -> Result<()> {
        assert_eq!(run("let x = 5; x")?, Value::Integer(5));
        assert_eq!(run("let x = 5")?, Value::Integer(5));
        assert_eq!(run("var y; y")?, Value::Null);
        assert_eq!(run("const z = 1; z = 2; z")?, Value::Integer(2));
        assert_eq!(
            run("foo")?,
            Value::Error(RuntimeError::IdentifierNotFound("foo".to_string()))
        );
        assert_eq!(
            run("missing += 1")?,
            Value::Error(RuntimeError::IdentifierNotFound("missing".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_closures_capture_by_reference() -> Result<()> {
        assert_eq!(run("let x = 1; let f = fn() { x }; let x = 2; f()")?, Value::Integer(2));

        let source = r#"
            let makeCounter = fn() {
                let state = {"count": 0};
                fn() { state.count += 1; state.count }
            };
            let counter = makeCounter();
            [counter(), counter(), counter()]
        "#;
        assert_eq!(run_display(source)?, "[1, 2, 3]");

        let source = "let adder = fn(a) { fn(b) { a + b } }; let addTwo = adder(2); addTwo(3)";
        assert_eq!(run(source)?, Value::Integer(5));
        Ok(())
    }

    #[test]
    fn test_assignment_shadows_in_nested_scopes() -> Result<()> {
        assert_eq!(run("let x = 1; let f = fn() { x = 2; x }; f()")?, Value::Integer(2));
        assert_eq!(run("let x = 1; let f = fn() { x = 2; x }; f(); x")?, Value::Integer(1));
        assert_eq!(
            run("let y = 10; for (let i = 0; i < 3; i += 1) { y = i; } y")?,
            Value::Integer(10)
        );
        assert_eq!(run("let n = 0; while (n < 3) { n += 1; } n")?, Value::Integer(3));
        assert_eq!(
            run("let f = fn() { let inner = 1; inner }; f(); inner")?,
            Value::Error(RuntimeError::IdentifierNotFound("inner".to_string()))
        );
        Ok(())
    }

    #[test]
    fn test_arrays() -> Result<()> {
        assert_eq!(run("let a = [1, 2, 3]; a[1]")?, Value::Integer(2));
        assert_eq!(run("let a = [1, 2, 3]; a[5]")?, Value::Null);
        assert_eq!(run("let a = [1, 2, 3]; a[-1]")?, Value::Null);
        assert_eq!(run_display("let a = [1, 2, 3]; a[0] = 9; a")?, "[9, 2, 3]");
        assert_eq!(run_display("let a = [1, 2, 3]; a[2] *= 5; a")?, "[1, 2, 15]");
        assert_eq!(
            run("let a = [1, 2, 3]; a[5] = 9")?,
            Value::Error(RuntimeError::IndexOutOfBounds {
                index: 5,
                length: 3
            })
        );
        assert_eq!(
            run_display("let a = [1, 2, 3]; try { a[5] = 9; } catch (e) { } a")?,
            "[1, 2, 3]"
        );
        assert_eq!(run("1[0]")?, Value::Error(RuntimeError::IndexNotSupported("INTEGER")));
        Ok(())
    }

    #[test]
    fn test_arrays_alias_shared_storage() -> Result<()> {
        assert_eq!(run("let a = [1]; let b = a; push(b, 2); len(a)")?, Value::Integer(2));
        assert_eq!(
            run_display("let a = [1]; let set = fn(arr) { arr[0] = 7 }; set(a); a")?,
            "[7]"
        );
        Ok(())
    }

    #[test]
    fn test_hashes() -> Result<()> {
        let source = "let h = {\"a\": 1, 2: \"two\", true: null};";
        assert_eq!(run(&format!("{} h[\"a\"]", source))?, Value::Integer(1));
        assert_eq!(run(&format!("{} h[2]", source))?, Value::String("two".to_string()));
        assert_eq!(run(&format!("{} h[true]", source))?, Value::Null);
        assert_eq!(run(&format!("{} h[\"missing\"]", source))?, Value::Null);
        assert_eq!(run(&format!("{} h.a", source))?, Value::Integer(1));
        assert_eq!(run(&format!("{} h.b = 5; h[\"b\"]", source))?, Value::Integer(5));
        assert_eq!(run(&format!("{} h[\"a\"] += 1; h.a", source))?, Value::Integer(2));
        assert_eq!(
            run(&format!("{} h[[1]]", source))?,
            Value::Error(RuntimeError::UnusableAsHashKey("ARRAY"))
        );
        assert_eq!(
            run("let k = fn() { 1 }; let h = {k: 2}")?,
            Value::Error(RuntimeError::UnusableAsHashKey("FUNCTION"))
        );
        assert_eq!(run("5.x")?, Value::Error(RuntimeError::PropertyNotSupported("INTEGER")));
        assert_eq!(
            run("let a = [1]; a.x = 2")?,
            Value::Error(RuntimeError::PropertyNotSupported("ARRAY"))
        );
        Ok(())
    }

    #[test]
    fn test_function_application() -> Result<()> {
        assert_eq!(run("let add = fn(a, b) { a + b }; add(3, 4)")?, Value::Integer(7));
        assert_eq!(run("fn(x) { return x * 2; 99 }(21)")?, Value::Integer(42));
        assert_eq!(run("let f = fn() { return; }; f()")?, Value::Null);
        assert_eq!(
            run("fn fact(n) { if (n <= 1) { return 1; } n * fact(n - 1) } fact(10)")?,
            Value::Integer(3628800)
        );
        assert_eq!(
            run("let f = fn(a, b) { a }; f(1)")?,
            Value::Error(RuntimeError::WrongArgumentCount {
                expected: 2,
                got: 1
            })
        );
        assert_eq!(run("5()")?, Value::Error(RuntimeError::NotAFunction("INTEGER")));
        Ok(())
    }

    #[test]
    fn test_call_depth_limit() -> Result<()> {
        let mut evaluator = Evaluator::with_max_depth(5);
        assert_eq!(
            run_with(&mut evaluator, "let f = fn(n) { f(n + 1) }; f(0)")?,
            Value::Error(RuntimeError::CallDepthExceeded(5))
        );

        // The depth counter unwinds after an error
        assert_eq!(
            run_with(&mut evaluator, "let f = fn(n) { if (n < 4) { f(n + 1) } else { n } }; f(0)")?,
            Value::Integer(4)
        );
        Ok(())
    }

    #[test]
    fn test_while_loops() -> Result<()> {
        let source = r#"
            let i = 0;
            let sum = 0;
            while (i < 10) {
                i += 1;
                if (i % 2 == 0) { continue; }
                sum += i;
            }
            sum
        "#;
        assert_eq!(run(source)?, Value::Integer(25));
        assert_eq!(run("let i = 0; while (true) { i += 1; if (i == 3) { break; } }")?, Value::Null);
        assert_eq!(run("let i = 0; while (i < 3) { i += 1; i * 10 }")?, Value::Integer(30));
        Ok(())
    }

    #[test]
    fn test_for_loops() -> Result<()> {
        assert_eq!(
            run("let total = [0]; for (let i = 0; i < 5; i += 1) { total[0] += i; } total[0]")?,
            Value::Integer(10)
        );
        assert_eq!(
            run_display(
                "let seen = []; for (let i = 0; i < 5; i += 1) { if (i % 2 == 0) { continue; } push(seen, i); } seen"
            )?,
            "[1, 3]"
        );
        assert_eq!(
            run("for (let i = 0; i < 1; i += 1) { } i")?,
            Value::Error(RuntimeError::IdentifierNotFound("i".to_string()))
        );
        assert_eq!(run("let n = [0]; for (;;) { n[0] += 1; if (n[0] == 4) { break; } } n[0]")?, Value::Integer(4));
        Ok(())
    }

    #[test]
    fn test_stray_control_signals() -> Result<()> {
        assert_eq!(run("break")?, Value::Error(RuntimeError::BreakOutsideLoop));
        assert_eq!(run("fn() { continue; }()")?, Value::Error(RuntimeError::ContinueOutsideLoop));
        assert_eq!(
            run("while (true) { let f = fn() { break; }; f(); }")?,
            Value::Error(RuntimeError::BreakOutsideLoop)
        );
        assert_eq!(run("return 7; 8")?, Value::Integer(7));
        Ok(())
    }

    #[test]
    fn test_switch() -> Result<()> {
        let cases = r#"
            case 1: { "one" }
            case 2: { "two" }
            default: { "other" }
        "#;
        assert_eq!(
            run(&format!("let x = 2; switch (x) {{ {} }}", cases))?,
            Value::String("two".to_string())
        );
        assert_eq!(
            run(&format!("let x = 7; switch (x) {{ {} }}", cases))?,
            Value::String("other".to_string())
        );
        assert_eq!(run("switch (3) { case 1: { 1 } }")?, Value::Null);
        assert_eq!(run("switch (1) { case 1: { break; 5 } }")?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_try_catch_finally() -> Result<()> {
        assert_eq!(
            run("try { throw \"boom\"; } catch (e) { e }")?,
            Value::String("boom".to_string())
        );
        assert_eq!(
            run("try { 1 / 0 } catch (e) { e }")?,
            Value::String("division by zero".to_string())
        );
        assert_eq!(
            run_display(
                "let log = []; try { push(log, \"body\"); } finally { push(log, \"finally\"); } log"
            )?,
            "[body, finally]"
        );
        assert_eq!(
            run("let f = fn() { try { return 1; } finally { 2 } 3 }; f()")?,
            Value::Integer(1)
        );
        assert_eq!(
            run("try { 1 } finally { throw \"late\"; }")?,
            Value::Error(RuntimeError::Thrown(Box::new(Value::String("late".to_string()))))
        );

        let uncaught = run("throw \"oops\"")?;
        assert_eq!(uncaught.to_string(), "oops");
        Ok(())
    }

    #[test]
    fn test_import_and_export() -> Result<()> {
        assert_eq!(
            run("import \"lib\" as lib")?,
            Value::Error(RuntimeError::UnsupportedStatement("import"))
        );
        assert_eq!(run("export let x = 5; x")?, Value::Integer(5));
        Ok(())
    }

    #[test]
    fn test_display() -> Result<()> {
        assert_eq!(run_display("[1, \"a\", [2.5, null], true]")?, "[1, a, [2.5, null], true]");
        assert_eq!(run_display("{\"k\": 1}")?, "{k: 1}");
        assert_eq!(run_display("fn(a, b) { a }")?, "fn(a, b) { ... }");
        assert_eq!(run_display("len")?, "<built-in len>");
        assert_eq!(run_display("foo")?, "identifier not found: foo");
        Ok(())
    }

    #[test]
    fn test_display_of_self_containing_values() -> Result<()> {
        assert_eq!(run_display("let a = [1]; a[0] = a; str(a)")?, "[[...]]");
        assert_eq!(run_display("let a = [1, 2]; push(a, a); a")?, "[1, 2, [...]]");
        assert_eq!(run_display("let h = {}; h.me = h; str(h)")?, "{me: {...}}");
        assert_eq!(run_display("let inner = [0]; [inner, inner]")?, "[[0], [0]]");
        Ok(())
    }

    #[test]
    fn test_default_call_depth_on_standard_thread() {
        fn eval_display(source: &str) -> String {
            let (program, errors) = parse(source);
            assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
            evaluate(&program, &Environment::new()).to_string()
        }

        let outcome = std::thread::spawn(|| {
            (
                eval_display("let f = fn(n) { if (n < 999) { f(n + 1) } else { n } }; f(0)"),
                eval_display("let f = fn(n) { f(n + 1) }; f(0)"),
            )
        })
        .join();

        let (deepest, runaway) = outcome.expect("evaluation thread panicked");
        assert_eq!(deepest, "999");
        assert_eq!(
            runaway,
            format!("maximum call depth exceeded ({})", DEFAULT_MAX_CALL_DEPTH)
        );
    }

    #[test]
    fn test_hash_keys() {
        assert_eq!("name".hash_key(), "name".hash_key());
        assert_ne!("name".hash_key(), "other".hash_key());
        assert_ne!(1_i64.hash_key(), true.hash_key());
        assert_eq!(
            Value::String("k".to_string()).as_hash_key(),
            Ok("k".hash_key())
        );
        assert_eq!(
            Value::Null.as_hash_key(),
            Err(RuntimeError::UnusableAsHashKey("NULL"))
        );
    }

    #[test]
    fn test_environment_persists_across_programs() -> Result<()> {
        let env = Environment::new();
        let mut evaluator = Evaluator::new();
        for (source, expected) in [("let x = 2;", 2), ("let y = x * 3;", 6), ("x + y", 8)] {
            let (program, errors) = parse(source);
            assert!(errors.is_empty());
            assert_eq!(evaluator.eval_program(&program, &env), Value::Integer(expected));
        }
        Ok(())
    }
}
