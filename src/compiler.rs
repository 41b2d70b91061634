use std::mem;
use std::rc::Rc;

use crate::{
    ast::{Block, Expr, ExprKind, InfixOp, PrefixOp, Program, Stmt, StmtKind},
    object::{CompiledFunction, Object, BUILTINS},
    opcode::{self, Instructions, OpCode},
    symbol_table::{Symbol, SymbolScope, SymbolTable},
};

/// The compiler's output: a flat instruction stream plus the constant pool it
/// references. Constants are immutable once compilation ends.
#[derive(Debug, Clone)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

#[derive(Debug, Clone, Copy)]
struct EmittedInstruction {
    opcode: OpCode,
    position: usize,
}

/// Per-function instruction buffer. The last two emitted opcodes are tracked
/// so a trailing `OpPop` can be removed when an `if` arm or a function body
/// must leave its value on the stack.
struct CompilationScope {
    instructions: Instructions,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

impl CompilationScope {
    fn new() -> Self {
        CompilationScope {
            instructions: Vec::new(),
            last_instruction: None,
            previous_instruction: None,
        }
    }
}

pub struct Compiler {
    constants: Vec<Object>,
    symbol_table: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (i, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(i, builtin.name);
        }
        Compiler {
            constants: Vec::new(),
            symbol_table,
            scopes: vec![CompilationScope::new()],
        }
    }

    /// Seed a fresh compiler with state from a previous run so REPL lines see
    /// earlier bindings and constants.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Compiler {
            constants,
            symbol_table,
            scopes: vec![CompilationScope::new()],
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Object>) {
        (self.symbol_table, self.constants)
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    pub fn compile(&mut self, program: &Program) -> Result<(), String> {
        for stmt in &program.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_statement(&mut self, stmt: &Stmt) -> Result<(), String> {
        match &stmt.kind {
            StmtKind::Expr { expr } => {
                self.compile_expression(expr)?;
                self.emit(OpCode::Pop, &[]);
            }

            StmtKind::Let { name, value } => {
                // Defined before the value compiles so the binding is visible
                // to a recursive function body.
                let symbol = self.symbol_table.define(name);
                self.compile_expression(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(OpCode::SetGlobal, &[symbol.index]),
                    _ => self.emit(OpCode::SetLocal, &[symbol.index]),
                };
            }

            StmtKind::Return { value } => {
                self.compile_expression(value)?;
                self.emit(OpCode::ReturnValue, &[]);
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &Block) -> Result<(), String> {
        for stmt in &block.statements {
            self.compile_statement(stmt)?;
        }
        Ok(())
    }

    fn compile_expression(&mut self, expr: &Expr) -> Result<(), String> {
        match &expr.kind {
            ExprKind::IntLiteral(value) => {
                let idx = self.add_constant(Object::Integer(*value));
                self.emit(OpCode::Constant, &[idx]);
            }

            ExprKind::BoolLiteral(value) => {
                if *value {
                    self.emit(OpCode::True, &[]);
                } else {
                    self.emit(OpCode::False, &[]);
                }
            }

            ExprKind::StringLiteral(value) => {
                let idx = self.add_constant(Object::Str(value.clone()));
                self.emit(OpCode::Constant, &[idx]);
            }

            ExprKind::Ident(name) => {
                let symbol = self
                    .symbol_table
                    .resolve(name)
                    .ok_or_else(|| format!("undefined variable {}", name))?;
                self.load_symbol(&symbol);
            }

            ExprKind::Prefix { op, right } => {
                self.compile_expression(right)?;
                match op {
                    PrefixOp::Bang => self.emit(OpCode::Bang, &[]),
                    PrefixOp::Minus => self.emit(OpCode::Minus, &[]),
                };
            }

            ExprKind::Infix { op, left, right } => {
                // There is no less-than opcode; swap the operands instead.
                if *op == InfixOp::Lt {
                    self.compile_expression(right)?;
                    self.compile_expression(left)?;
                    self.emit(OpCode::GreaterThan, &[]);
                    return Ok(());
                }

                self.compile_expression(left)?;
                self.compile_expression(right)?;
                match op {
                    InfixOp::Add => self.emit(OpCode::Add, &[]),
                    InfixOp::Sub => self.emit(OpCode::Sub, &[]),
                    InfixOp::Mul => self.emit(OpCode::Mul, &[]),
                    InfixOp::Div => self.emit(OpCode::Div, &[]),
                    InfixOp::Gt => self.emit(OpCode::GreaterThan, &[]),
                    InfixOp::Eq => self.emit(OpCode::Equal, &[]),
                    InfixOp::NotEq => self.emit(OpCode::NotEqual, &[]),
                    InfixOp::Lt => unreachable!(),
                };
            }

            ExprKind::If {
                condition,
                consequence,
                alternative,
            } => {
                self.compile_expression(condition)?;

                // Placeholder target, patched once the consequence is laid out.
                let jump_not_truthy_pos = self.emit(OpCode::JumpNotTruthy, &[9999]);

                self.compile_block(consequence)?;
                if self.last_instruction_is(OpCode::Pop) {
                    self.remove_last_pop();
                }

                let jump_pos = self.emit(OpCode::Jump, &[9999]);

                let after_consequence = self.current_instructions().len();
                self.change_operand(jump_not_truthy_pos, after_consequence);

                match alternative {
                    Some(alt) => {
                        self.compile_block(alt)?;
                        if self.last_instruction_is(OpCode::Pop) {
                            self.remove_last_pop();
                        }
                    }
                    None => {
                        self.emit(OpCode::Null, &[]);
                    }
                }

                let after_alternative = self.current_instructions().len();
                self.change_operand(jump_pos, after_alternative);
            }

            ExprKind::ArrayLiteral(elements) => {
                for element in elements {
                    self.compile_expression(element)?;
                }
                self.emit(OpCode::Array, &[elements.len()]);
            }

            ExprKind::HashLiteral(pairs) => {
                // Sorted by stringified key so output bytecode is stable.
                let mut sorted: Vec<&(Expr, Expr)> = pairs.iter().collect();
                sorted.sort_by_key(|(key, _)| key.to_string());

                for (key, value) in sorted {
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                self.emit(OpCode::Hash, &[pairs.len() * 2]);
            }

            ExprKind::Index { left, index } => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(OpCode::Index, &[]);
            }

            ExprKind::FunctionLiteral {
                name,
                parameters,
                body,
            } => {
                self.enter_scope();

                if !name.is_empty() {
                    self.symbol_table.define_function_name(name);
                }
                for parameter in parameters {
                    self.symbol_table.define(parameter);
                }

                self.compile_block(body)?;

                if self.last_instruction_is(OpCode::Pop) {
                    self.replace_last_pop_with_return();
                }
                if !self.last_instruction_is(OpCode::ReturnValue) {
                    self.emit(OpCode::Return, &[]);
                }

                let free_symbols = self.symbol_table.free_symbols.clone();
                let num_locals = self.symbol_table.num_definitions;
                let instructions = self.leave_scope();

                for free in &free_symbols {
                    self.load_symbol(free);
                }

                let func = CompiledFunction {
                    instructions,
                    num_locals,
                    num_parameters: parameters.len(),
                };
                let idx = self.add_constant(Object::CompiledFunction(Rc::new(func)));
                self.emit(OpCode::Closure, &[idx, free_symbols.len()]);
            }

            ExprKind::Call {
                function,
                arguments,
            } => {
                self.compile_expression(function)?;
                for argument in arguments {
                    self.compile_expression(argument)?;
                }
                self.emit(OpCode::Call, &[arguments.len()]);
            }
        }
        Ok(())
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OpCode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(OpCode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(OpCode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(OpCode::GetFree, &[symbol.index]),
            SymbolScope::Function => self.emit(OpCode::CurrentClosure, &[]),
        };
    }

    // ----------------- SCOPES -----------------

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::new());
        let outer = mem::take(&mut self.symbol_table);
        self.symbol_table = SymbolTable::new_enclosed(outer);
    }

    fn leave_scope(&mut self) -> Instructions {
        let scope = self.scopes.pop().expect("scope stack empty");
        let inner = mem::take(&mut self.symbol_table);
        self.symbol_table = inner.into_outer().expect("left outermost scope");
        scope.instructions
    }

    fn current_scope(&mut self) -> &mut CompilationScope {
        self.scopes.last_mut().expect("scope stack empty")
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scopes.last().expect("scope stack empty").instructions
    }

    // ----------------- EMISSION -----------------

    fn add_constant(&mut self, obj: Object) -> usize {
        self.constants.push(obj);
        self.constants.len() - 1
    }

    fn emit(&mut self, op: OpCode, operands: &[usize]) -> usize {
        let ins = opcode::make(op, operands);
        let pos = self.add_instruction(&ins);

        let scope = self.current_scope();
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction {
            opcode: op,
            position: pos,
        });

        pos
    }

    fn add_instruction(&mut self, ins: &[u8]) -> usize {
        let scope = self.current_scope();
        let pos = scope.instructions.len();
        scope.instructions.extend_from_slice(ins);
        pos
    }

    fn last_instruction_is(&self, op: OpCode) -> bool {
        self.scopes
            .last()
            .and_then(|scope| scope.last_instruction)
            .map(|last| last.opcode == op)
            .unwrap_or(false)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.current_scope();
        let last = scope.last_instruction.expect("no instruction to remove");
        scope.instructions.truncate(last.position);
        scope.last_instruction = scope.previous_instruction;
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.current_scope();
        let last = scope.last_instruction.expect("no instruction to replace");
        let ins = opcode::make(OpCode::ReturnValue, &[]);
        scope.instructions.truncate(last.position);
        scope.instructions.extend_from_slice(&ins);
        scope.last_instruction = Some(EmittedInstruction {
            opcode: OpCode::ReturnValue,
            position: last.position,
        });
    }

    fn change_operand(&mut self, pos: usize, operand: usize) {
        let scope = self.current_scope();
        let op = OpCode::try_from(scope.instructions[pos]).expect("patching invalid opcode");
        let ins = opcode::make(op, &[operand]);
        scope.instructions[pos..pos + ins.len()].copy_from_slice(&ins);
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}
