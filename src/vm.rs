use std::collections::HashMap;
use std::convert::TryFrom;
use std::rc::Rc;

use crate::{
    compiler::Bytecode,
    object::{Closure, CompiledFunction, HashKey, HashPair, Object, BUILTINS},
    opcode::{read_u16, OpCode},
};

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

const TRUE: Object = Object::Boolean(true);
const FALSE: Object = Object::Boolean(false);

/// Per-call execution record. `base_pointer` marks where this frame's locals
/// begin on the operand stack.
struct Frame {
    cl: Rc<Closure>,
    ip: usize,
    base_pointer: usize,
}

impl Frame {
    fn new(cl: Rc<Closure>, base_pointer: usize) -> Self {
        Frame {
            cl,
            ip: 0,
            base_pointer,
        }
    }
}

/// Stack machine over the compiler's bytecode. The top-level instruction
/// stream is wrapped as a closure and pushed as the initial frame.
pub struct Vm {
    constants: Vec<Object>,
    stack: Vec<Object>,
    sp: usize,
    globals: Vec<Object>,
    frames: Vec<Frame>,
}

impl Vm {
    pub fn new(bytecode: Bytecode) -> Self {
        Vm::new_with_globals(bytecode, vec![Object::Null; GLOBALS_SIZE])
    }

    /// Seed the machine with an existing globals array so REPL lines share
    /// bindings. Take it back with `into_globals` after the run.
    pub fn new_with_globals(bytecode: Bytecode, globals: Vec<Object>) -> Self {
        let main_fn = CompiledFunction {
            instructions: bytecode.instructions,
            num_locals: 0,
            num_parameters: 0,
        };
        let main_closure = Closure {
            func: Rc::new(main_fn),
            free: Vec::new(),
        };

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(Rc::new(main_closure), 0));

        Vm {
            constants: bytecode.constants,
            stack: vec![Object::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames,
        }
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    /// The value that sat on top of the stack before the most recent pop;
    /// the REPL renders this after a successful run.
    pub fn last_popped_stack_elem(&self) -> &Object {
        &self.stack[self.sp]
    }

    pub fn run(&mut self) -> Result<(), String> {
        loop {
            let frame_index = self.frames.len() - 1;
            let ip = self.frames[frame_index].ip;
            if ip >= self.frames[frame_index].cl.func.instructions.len() {
                break;
            }

            let op_byte = self.frames[frame_index].cl.func.instructions[ip];
            self.frames[frame_index].ip += 1;
            let op = OpCode::try_from(op_byte)
                .map_err(|_| format!("unknown opcode {}", op_byte))?;

            match op {
                OpCode::Constant => {
                    let idx = self.read_u16_operand(frame_index);
                    let constant = self
                        .constants
                        .get(idx)
                        .cloned()
                        .ok_or_else(|| format!("no constant at index {}", idx))?;
                    self.push(constant)?;
                }

                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    self.execute_binary_operation(op)?;
                }

                OpCode::True => self.push(TRUE)?,
                OpCode::False => self.push(FALSE)?,
                OpCode::Null => self.push(Object::Null)?,

                OpCode::Equal | OpCode::NotEqual | OpCode::GreaterThan => {
                    self.execute_comparison(op)?;
                }

                OpCode::Bang => {
                    let operand = self.pop()?;
                    self.push(bool_object(!is_truthy(&operand)))?;
                }

                OpCode::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Object::Integer(value) => self.push(Object::Integer(value.wrapping_neg()))?,
                        other => {
                            return Err(format!(
                                "unsupported type for negation: {}",
                                other.type_name()
                            ))
                        }
                    }
                }

                OpCode::JumpNotTruthy => {
                    let target = self.read_u16_operand(frame_index);
                    let condition = self.pop()?;
                    if !is_truthy(&condition) {
                        self.frames[frame_index].ip = target;
                    }
                }

                OpCode::Jump => {
                    let target = self.read_u16_operand(frame_index);
                    self.frames[frame_index].ip = target;
                }

                OpCode::SetGlobal => {
                    let idx = self.read_u16_operand(frame_index);
                    let value = self.pop()?;
                    self.globals[idx] = value;
                }

                OpCode::GetGlobal => {
                    let idx = self.read_u16_operand(frame_index);
                    let value = self.globals[idx].clone();
                    self.push(value)?;
                }

                OpCode::SetLocal => {
                    let idx = self.read_u8_operand(frame_index);
                    let base = self.frames[frame_index].base_pointer;
                    let value = self.pop()?;
                    self.stack[base + idx] = value;
                }

                OpCode::GetLocal => {
                    let idx = self.read_u8_operand(frame_index);
                    let base = self.frames[frame_index].base_pointer;
                    let value = self.stack[base + idx].clone();
                    self.push(value)?;
                }

                OpCode::GetBuiltin => {
                    let idx = self.read_u8_operand(frame_index);
                    let builtin = BUILTINS
                        .get(idx)
                        .ok_or_else(|| format!("no builtin at index {}", idx))?;
                    self.push(Object::Builtin(builtin.clone()))?;
                }

                OpCode::GetFree => {
                    let idx = self.read_u8_operand(frame_index);
                    let value = self.frames[frame_index].cl.free[idx].clone();
                    self.push(value)?;
                }

                OpCode::CurrentClosure => {
                    let cl = Rc::clone(&self.frames[frame_index].cl);
                    self.push(Object::Closure(cl))?;
                }

                OpCode::Array => {
                    let count = self.read_u16_operand(frame_index);
                    let elements = self.stack[self.sp - count..self.sp].to_vec();
                    self.sp -= count;
                    self.push(Object::Array(elements))?;
                }

                OpCode::Hash => {
                    let count = self.read_u16_operand(frame_index);
                    let hash = self.build_hash(self.sp - count, self.sp)?;
                    self.sp -= count;
                    self.push(hash)?;
                }

                OpCode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }

                OpCode::Call => {
                    let num_args = self.read_u8_operand(frame_index);
                    self.call_value(num_args)?;
                }

                OpCode::ReturnValue => {
                    let return_value = self.pop()?;
                    if self.finish_frame(return_value)? {
                        return Ok(());
                    }
                }

                OpCode::Return => {
                    if self.finish_frame(Object::Null)? {
                        return Ok(());
                    }
                }

                OpCode::Closure => {
                    let const_idx = self.read_u16_operand(frame_index);
                    let num_free = self.read_u8_operand(frame_index);
                    self.push_closure(const_idx, num_free)?;
                }
            }
        }

        Ok(())
    }

    // ----------------- DISPATCH HELPERS -----------------

    fn execute_binary_operation(&mut self, op: OpCode) -> Result<(), String> {
        let right = self.pop()?;
        let left = self.pop()?;

        match (&left, &right) {
            (Object::Integer(l), Object::Integer(r)) => {
                let result = match op {
                    OpCode::Add => l.wrapping_add(*r),
                    OpCode::Sub => l.wrapping_sub(*r),
                    OpCode::Mul => l.wrapping_mul(*r),
                    _ => {
                        if *r == 0 {
                            return Err("division by zero".to_string());
                        }
                        l.wrapping_div(*r)
                    }
                };
                self.push(Object::Integer(result))
            }
            (Object::Str(l), Object::Str(r)) => {
                if op != OpCode::Add {
                    return Err("unknown string operator".to_string());
                }
                self.push(Object::Str(format!("{}{}", l, r)))
            }
            _ => Err(format!(
                "unsupported types for binary operation: {} {}",
                left.type_name(),
                right.type_name()
            )),
        }
    }

    fn execute_comparison(&mut self, op: OpCode) -> Result<(), String> {
        let right = self.pop()?;
        let left = self.pop()?;

        if let (Object::Integer(l), Object::Integer(r)) = (&left, &right) {
            let result = match op {
                OpCode::Equal => l == r,
                OpCode::NotEqual => l != r,
                _ => l > r,
            };
            return self.push(bool_object(result));
        }

        match op {
            OpCode::Equal => self.push(bool_object(objects_identical(&left, &right))),
            OpCode::NotEqual => self.push(bool_object(!objects_identical(&left, &right))),
            _ => Err(format!(
                "unknown operator: {} {}",
                left.type_name(),
                right.type_name()
            )),
        }
    }

    fn execute_index_expression(&mut self, left: Object, index: Object) -> Result<(), String> {
        match (&left, &index) {
            (Object::Array(elements), Object::Integer(idx)) => {
                let value = if *idx < 0 || *idx as usize >= elements.len() {
                    Object::Null
                } else {
                    elements[*idx as usize].clone()
                };
                self.push(value)
            }
            (Object::Hash(pairs), _) => {
                let key = index.hash_key()?;
                let value = pairs
                    .get(&key)
                    .map(|pair| pair.value.clone())
                    .unwrap_or(Object::Null);
                self.push(value)
            }
            _ => Err(format!(
                "index operator not supported: {}",
                left.type_name()
            )),
        }
    }

    fn build_hash(&self, start: usize, end: usize) -> Result<Object, String> {
        let mut pairs = HashMap::new();

        let mut i = start;
        while i < end {
            let key = self.stack[i].clone();
            let value = self.stack[i + 1].clone();
            let hash_key = key.hash_key()?;
            pairs.insert(hash_key, HashPair { key, value });
            i += 2;
        }

        Ok(Object::Hash(pairs))
    }

    /// Pop the finished frame and leave the return value for the caller.
    /// Returns true when the outermost frame returned, ending the run with
    /// the value preserved as the last popped element.
    fn finish_frame(&mut self, return_value: Object) -> Result<bool, String> {
        let frame = self.frames.pop().ok_or("no frame to pop")?;
        if self.frames.is_empty() {
            self.sp = frame.base_pointer;
            self.push(return_value)?;
            self.pop()?;
            return Ok(true);
        }
        self.sp = frame.base_pointer - 1;
        self.push(return_value)?;
        Ok(false)
    }

    fn call_value(&mut self, num_args: usize) -> Result<(), String> {
        let callee = self.stack[self.sp - 1 - num_args].clone();
        match callee {
            Object::Closure(cl) => self.call_closure(cl, num_args),
            Object::Builtin(builtin) => {
                let args = self.stack[self.sp - num_args..self.sp].to_vec();
                let result = (builtin.func)(&args);
                self.sp = self.sp - num_args - 1;
                match result {
                    Object::Error(message) => Err(message),
                    value => self.push(value),
                }
            }
            _ => Err("calling non-function".to_string()),
        }
    }

    fn call_closure(&mut self, cl: Rc<Closure>, num_args: usize) -> Result<(), String> {
        if num_args != cl.func.num_parameters {
            return Err(format!(
                "wrong number of arguments: want={}, got={}",
                cl.func.num_parameters, num_args
            ));
        }
        if self.frames.len() >= MAX_FRAMES {
            return Err("stack overflow".to_string());
        }

        let num_locals = cl.func.num_locals;
        let frame = Frame::new(cl, self.sp - num_args);
        let next_sp = frame.base_pointer + num_locals;
        self.frames.push(frame);
        self.sp = next_sp;
        Ok(())
    }

    fn push_closure(&mut self, const_idx: usize, num_free: usize) -> Result<(), String> {
        let constant = self
            .constants
            .get(const_idx)
            .cloned()
            .ok_or_else(|| format!("no constant at index {}", const_idx))?;
        let func = match constant {
            Object::CompiledFunction(func) => func,
            other => return Err(format!("not a function: {}", other.type_name())),
        };

        let free = self.stack[self.sp - num_free..self.sp].to_vec();
        self.sp -= num_free;

        self.push(Object::Closure(Rc::new(Closure { func, free })))
    }

    // ----------------- STACK & OPERANDS -----------------

    fn read_u16_operand(&mut self, frame_index: usize) -> usize {
        let frame = &mut self.frames[frame_index];
        let value = read_u16(&frame.cl.func.instructions, frame.ip);
        frame.ip += 2;
        value
    }

    fn read_u8_operand(&mut self, frame_index: usize) -> usize {
        let frame = &mut self.frames[frame_index];
        let value = frame.cl.func.instructions[frame.ip] as usize;
        frame.ip += 1;
        value
    }

    fn push(&mut self, obj: Object) -> Result<(), String> {
        if self.sp >= STACK_SIZE {
            return Err("stack overflow".to_string());
        }
        self.stack[self.sp] = obj;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<Object, String> {
        if self.sp == 0 {
            return Err("stack underflow".to_string());
        }
        self.sp -= 1;
        Ok(self.stack[self.sp].clone())
    }
}

fn bool_object(value: bool) -> Object {
    if value {
        TRUE
    } else {
        FALSE
    }
}

/// `false` and `null` are falsy; everything else, including `0` and empty
/// collections, is truthy.
fn is_truthy(obj: &Object) -> bool {
    match obj {
        Object::Boolean(value) => *value,
        Object::Null => false,
        _ => true,
    }
}

/// Identity comparison for non-integer operands: booleans and nulls are
/// singleton-valued, everything else compares unequal.
fn objects_identical(left: &Object, right: &Object) -> bool {
    match (left, right) {
        (Object::Boolean(l), Object::Boolean(r)) => l == r,
        (Object::Null, Object::Null) => true,
        _ => false,
    }
}
