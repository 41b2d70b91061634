use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::opcode::Instructions;

/// Runtime values. Equality between values is structural; the VM layers its
/// own comparison semantics on top of this in `execute_comparison`.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Integer(i64),
    Boolean(bool),
    Str(String),
    Array(Vec<Object>),
    Hash(HashMap<HashKey, HashPair>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(Builtin),
    Error(String),
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub func: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

/// Hashable identity of a value: its type tag plus a 64-bit payload. Strings
/// use a digest that is stable within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub object_type: &'static str,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Integer(_) => "INTEGER",
            Object::Boolean(_) => "BOOLEAN",
            Object::Str(_) => "STRING",
            Object::Array(_) => "ARRAY",
            Object::Hash(_) => "HASH",
            Object::CompiledFunction(_) => "COMPILED_FUNCTION",
            Object::Closure(_) => "CLOSURE",
            Object::Builtin(_) => "BUILTIN",
            Object::Error(_) => "ERROR",
            Object::Null => "NULL",
        }
    }

    pub fn hash_key(&self) -> Result<HashKey, String> {
        match self {
            Object::Integer(value) => Ok(HashKey {
                object_type: self.type_name(),
                value: *value as u64,
            }),
            Object::Boolean(value) => Ok(HashKey {
                object_type: self.type_name(),
                value: *value as u64,
            }),
            Object::Str(value) => {
                let mut hasher = DefaultHasher::new();
                value.hash(&mut hasher);
                Ok(HashKey {
                    object_type: self.type_name(),
                    value: hasher.finish(),
                })
            }
            other => Err(format!("unusable as hash key: {}", other.type_name())),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Integer(value) => write!(f, "{}", value),
            Object::Boolean(value) => write!(f, "{}", value),
            Object::Str(value) => write!(f, "{}", value),
            Object::Array(elements) => {
                let rendered: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Object::Hash(pairs) => {
                // Sorted for stable output; map iteration order is arbitrary.
                let mut rendered: Vec<String> = pairs
                    .values()
                    .map(|p| format!("{}: {}", p.key, p.value))
                    .collect();
                rendered.sort();
                write!(f, "{{{}}}", rendered.join(", "))
            }
            Object::CompiledFunction(func) => {
                write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(func))
            }
            Object::Closure(closure) => write!(f, "Closure[{:p}]", Rc::as_ptr(closure)),
            Object::Builtin(builtin) => write!(f, "builtin function {}", builtin.name),
            Object::Error(message) => write!(f, "ERROR: {}", message),
            Object::Null => write!(f, "null"),
        }
    }
}

pub type BuiltinFn = fn(&[Object]) -> Object;

#[derive(Debug, Clone, PartialEq)]
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
}

/// Builtins in registration order. Indices are fixed so bytecode compiled on
/// one REPL line keeps resolving on later lines.
pub const BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        func: builtin_len,
    },
    Builtin {
        name: "puts",
        func: builtin_puts,
    },
    Builtin {
        name: "first",
        func: builtin_first,
    },
    Builtin {
        name: "last",
        func: builtin_last,
    },
    Builtin {
        name: "rest",
        func: builtin_rest,
    },
    Builtin {
        name: "push",
        func: builtin_push,
    },
];

fn wrong_arg_count(got: usize, want: usize) -> Object {
    Object::Error(format!(
        "wrong number of arguments. got={}, want={}",
        got, want
    ))
}

fn builtin_len(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Object::Str(value) => Object::Integer(value.len() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => Object::Error(format!(
            "argument to `len` not supported, got {}",
            other.type_name()
        )),
    }
}

fn builtin_puts(args: &[Object]) -> Object {
    for arg in args {
        println!("{}", arg);
    }
    Object::Null
}

fn builtin_first(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => elements.first().cloned().unwrap_or(Object::Null),
        other => Object::Error(format!(
            "argument to `first` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn builtin_last(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => elements.last().cloned().unwrap_or(Object::Null),
        other => Object::Error(format!(
            "argument to `last` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn builtin_rest(args: &[Object]) -> Object {
    if args.len() != 1 {
        return wrong_arg_count(args.len(), 1);
    }
    match &args[0] {
        Object::Array(elements) => {
            if elements.is_empty() {
                Object::Null
            } else {
                Object::Array(elements[1..].to_vec())
            }
        }
        other => Object::Error(format!(
            "argument to `rest` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}

fn builtin_push(args: &[Object]) -> Object {
    if args.len() != 2 {
        return wrong_arg_count(args.len(), 2);
    }
    match &args[0] {
        Object::Array(elements) => {
            let mut out = elements.clone();
            out.push(args[1].clone());
            Object::Array(out)
        }
        other => Object::Error(format!(
            "argument to `push` must be ARRAY, got {}",
            other.type_name()
        )),
    }
}
