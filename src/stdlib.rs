use crate::error::RuntimeError;
use crate::runtime::{Builtin, Value};
use std::io::{self, Write};

// Declares the built-in table from `name => function` pairs
macro_rules! define_builtins {
    ($($name:literal => $func:ident),* $(,)?) => {
        const BUILTINS: &[Builtin] = &[$(Builtin { name: $name, func: $func }),*];
    };
}

define_builtins! {
    "print" => print,
    "len" => len,
    "type" => type_of,
    "str" => to_str,
    "push" => push,
    "keys" => keys,
}

/// Resolves a built-in function by name. Built-ins take priority over any
/// user binding of the same name.
pub fn lookup(name: &str) -> Option<Value> {
    BUILTINS
        .iter()
        .find(|builtin| builtin.name == name)
        .map(|builtin| Value::Builtin(*builtin))
}

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|builtin| builtin.name)
}

fn expect_args(args: &[Value], expected: usize) -> Result<(), RuntimeError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(RuntimeError::WrongArgumentCount {
            expected,
            got: args.len(),
        })
    }
}

fn print(args: &[Value]) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(|arg| arg.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{}", line);
    Ok(Value::Null)
}

fn len(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args(args, 1)?;
    let length = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(elements) => elements.borrow().len(),
        Value::Hash(pairs) => pairs.borrow().len(),
        other => {
            return Err(RuntimeError::InvalidArgument {
                function: "len",
                got: other.type_name(),
            })
        }
    };
    Ok(Value::Integer(length as i64))
}

fn type_of(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args(args, 1)?;
    Ok(Value::String(args[0].type_name().to_lowercase()))
}

fn to_str(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args(args, 1)?;
    Ok(Value::String(args[0].to_string()))
}

fn push(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args(args, 2)?;
    match &args[0] {
        Value::Array(elements) => {
            elements.borrow_mut().push(args[1].clone());
            Ok(args[0].clone())
        }
        other => Err(RuntimeError::InvalidArgument {
            function: "push",
            got: other.type_name(),
        }),
    }
}

fn keys(args: &[Value]) -> Result<Value, RuntimeError> {
    expect_args(args, 1)?;
    match &args[0] {
        Value::Hash(pairs) => Ok(Value::array(
            pairs.borrow().values().map(|pair| pair.key.clone()).collect(),
        )),
        other => Err(RuntimeError::InvalidArgument {
            function: "keys",
            got: other.type_name(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::error::Result;
    use crate::parser::parse;
    use crate::runtime::evaluate;

    fn call(name: &str, args: &[Value]) -> std::result::Result<Value, RuntimeError> {
        match lookup(name) {
            Some(Value::Builtin(builtin)) => (builtin.func)(args),
            other => panic!("Expected built-in {}, got {:?}", name, other),
        }
    }

    fn run(source: &str) -> Result<Value> {
        let (program, errors) = parse(source);
        assert!(errors.is_empty(), "unexpected parse errors: {:?}", errors);
        Ok(evaluate(&program, &Environment::new()))
    }

    #[test]
    fn test_lookup() {
        for name in ["print", "len", "type", "str", "push", "keys"] {
            assert!(matches!(lookup(name), Some(Value::Builtin(_))));
        }
        assert!(lookup("println").is_none());
        assert_eq!(names().count(), 6);
    }

    #[test]
    fn test_len() -> std::result::Result<(), RuntimeError> {
        assert_eq!(call("len", &[Value::String("héllo".to_string())])?, Value::Integer(5));
        assert_eq!(
            call("len", &[Value::array(vec![Value::Null, Value::Null])])?,
            Value::Integer(2)
        );
        assert_eq!(
            call("len", &[Value::Integer(1)]),
            Err(RuntimeError::InvalidArgument {
                function: "len",
                got: "INTEGER"
            })
        );
        assert_eq!(
            call("len", &[]),
            Err(RuntimeError::WrongArgumentCount {
                expected: 1,
                got: 0
            })
        );
        Ok(())
    }

    #[test]
    fn test_type_and_str() -> std::result::Result<(), RuntimeError> {
        assert_eq!(call("type", &[Value::Float(1.5)])?, Value::String("float".to_string()));
        assert_eq!(call("type", &[Value::Null])?, Value::String("null".to_string()));
        assert_eq!(
            call("str", &[Value::array(vec![Value::Integer(1), Value::Boolean(true)])])?,
            Value::String("[1, true]".to_string())
        );
        Ok(())
    }

    #[test]
    fn test_print_returns_null() -> std::result::Result<(), RuntimeError> {
        assert_eq!(call("print", &[Value::Integer(1), Value::String("two".to_string())])?, Value::Null);
        assert_eq!(call("print", &[])?, Value::Null);
        Ok(())
    }

    #[test]
    fn test_push_and_keys() -> Result<()> {
        assert_eq!(run("let a = [1]; push(a, 2); a")?.to_string(), "[1, 2]");
        assert_eq!(run("len(push([], 5))")?, Value::Integer(1));
        assert_eq!(run("len(keys({\"a\": 1, \"b\": 2}))")?, Value::Integer(2));
        assert_eq!(run("keys({7: true})")?.to_string(), "[7]");
        assert_eq!(
            run("push(1, 2)")?,
            Value::Error(RuntimeError::InvalidArgument {
                function: "push",
                got: "INTEGER"
            })
        );
        Ok(())
    }

    #[test]
    fn test_builtins_cannot_be_shadowed() -> Result<()> {
        assert_eq!(run("let len = 5; len(\"ab\")")?, Value::Integer(2));
        Ok(())
    }
}
