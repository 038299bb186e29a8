//! AST to bytecode lowering.
//!
//! A single walk over the chunk emits instructions into a fresh
//! [`Function`] prototype, wraps it in a closure whose upvalue 0 is the
//! global environment, and pushes that closure onto the operand stack.
//!
//! Expected result counts flow from parent to child through two stacks on
//! the per-function state: `exp_value_count` for single expressions and
//! `exp_list_value_count` for expression lists. A parent pushes exactly
//! once before descending into an expression; the expression pops exactly
//! once on entry. Only the final element of an expression list may fan out
//! to multiple values.

pub mod scope;

use crate::ast::{
    Block, Chunk, Expression, ExpressionList, FuncCallArgs, LocalNameListStatement, NameList,
    NormalFuncCall, Statement,
};
use crate::token::{TokenDetail, TokenKind, TokenValue};
use scope::ScopeStack;
use std::fmt;
use umbra_core::function::{Closure, Function, UpvalueKind};
use umbra_core::gc::GcIdx;
use umbra_core::opcode::{Instruction, OpCode, ENV_UPVALUE_INDEX, EXP_VALUE_COUNT_ANY};
use umbra_core::state::State;
use umbra_core::value::Value;

/// What went wrong during code generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// An AST form whose lowering is not defined yet.
    Unsupported,
    /// Bookkeeping that must have been guaranteed by the parser broke.
    Internal,
}

/// Code generation error with its source line.
#[derive(Clone, Debug)]
pub struct CodegenError {
    pub kind: CodegenErrorKind,
    pub message: String,
    pub line: u32,
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.message)
    }
}

impl std::error::Error for CodegenError {}

/// Lower `chunk` into a prototype, push the resulting closure onto the
/// operand stack, and return its handle.
pub fn generate(state: &mut State, chunk: &Chunk) -> Result<GcIdx<Closure>, CodegenError> {
    CodeGenerator::new(state).visit_chunk(chunk)
}

/// A declared name waiting for its initialising `Move`.
#[derive(Clone, Copy, Debug)]
struct NameReg {
    register: u8,
    line: u32,
}

/// Code generation state for one function.
#[derive(Debug, Default)]
struct FuncGenState {
    names_register: Vec<NameReg>,
    exp_value_count: Vec<i32>,
    exp_list_value_count: Vec<i32>,
}

impl FuncGenState {
    fn new() -> Self {
        Self::default()
    }

    fn push_exp_value_count(&mut self, count: i32) {
        self.exp_value_count.push(count);
    }

    fn pop_exp_value_count(&mut self) -> i32 {
        self.exp_value_count.pop().unwrap_or(0)
    }

    fn push_exp_list_value_count(&mut self, count: i32) {
        self.exp_list_value_count.push(count);
    }

    fn pop_exp_list_value_count(&mut self) -> i32 {
        self.exp_list_value_count.pop().unwrap_or(0)
    }
}

struct CodeGenerator<'a> {
    state: &'a mut State,
    scopes: ScopeStack,
    func_states: Vec<FuncGenState>,
    /// The function currently being generated.
    func: Option<GcIdx<Function>>,
}

impl<'a> CodeGenerator<'a> {
    fn new(state: &'a mut State) -> Self {
        CodeGenerator {
            state,
            scopes: ScopeStack::new(),
            func_states: Vec::new(),
            func: None,
        }
    }

    fn func(&self) -> GcIdx<Function> {
        self.func.expect("no function being generated")
    }

    fn fstate(&mut self) -> &mut FuncGenState {
        self.func_states.last_mut().expect("no function state")
    }

    fn emit(&mut self, inst: Instruction, line: u32) {
        let func = self.func();
        self.state.gc.function_mut(func).add_instruction(inst, line);
    }

    fn unsupported(&self, construct: &str, line: u32) -> CodegenError {
        CodegenError {
            kind: CodegenErrorKind::Unsupported,
            message: format!("{construct} is not supported"),
            line,
        }
    }

    fn internal(&self, message: &str, line: u32) -> CodegenError {
        CodegenError {
            kind: CodegenErrorKind::Internal,
            message: message.into(),
            line,
        }
    }

    fn visit_chunk(&mut self, chunk: &Chunk) -> Result<GcIdx<Closure>, CodegenError> {
        let func = self.state.gc.new_function();
        self.state.gc.function_set_base_info(func, chunk.module, 0);
        if let Some(outer) = self.func {
            self.state.gc.function_set_superior(func, outer);
            self.state.gc.function_add_child(outer, func);
        }
        self.func = Some(func);

        self.func_states.push(FuncGenState::new());
        let body = self.visit_block(&chunk.block);
        self.func_states.pop();
        body?;

        let closure = self.state.gc.new_closure();
        let global = self.state.global();
        {
            let cl = self.state.gc.closure_mut(closure);
            cl.set_prototype(func);
            cl.add_upvalue(Value::Table(global), UpvalueKind::Stack);
        }
        self.state.push_value(Value::Closure(closure));
        Ok(closure)
    }

    fn visit_block(&mut self, block: &Block) -> Result<(), CodegenError> {
        let func = self.func();
        self.scopes.enter(func);
        let reg = self.state.gc.function(func).get_next_register();

        let body = self.visit_block_body(block);
        if body.is_ok() {
            // Release every temporary and local of the block, in the
            // generator and in the running frame alike.
            let f = self.state.gc.function_mut(func);
            f.set_next_register(reg);
            f.add_instruction(Instruction::a_code(OpCode::SetTop, reg), 0);
        }

        self.scopes.leave();
        body
    }

    fn visit_block_body(&mut self, block: &Block) -> Result<(), CodegenError> {
        for stmt in &block.statements {
            self.visit_statement(stmt)?;
        }
        if let Some(ret) = &block.return_stmt {
            return Err(self.unsupported("return statement", ret.line));
        }
        Ok(())
    }

    fn visit_statement(&mut self, stmt: &Statement) -> Result<(), CodegenError> {
        match stmt {
            Statement::LocalNameList(s) => self.visit_local_name_list(s),
            Statement::FuncCall(e) => self.visit_expression(e),
            Statement::Assignment(s) => Err(self.unsupported("assignment statement", s.line)),
            Statement::Break(s) => Err(self.unsupported("break statement", s.line)),
            Statement::Do(s) => Err(self.unsupported("do statement", s.line)),
            Statement::While(s) => Err(self.unsupported("while statement", s.line)),
            Statement::Repeat(s) => Err(self.unsupported("repeat statement", s.line)),
            Statement::If(s) => Err(self.unsupported("if statement", s.line)),
            Statement::NumericFor(s) => Err(self.unsupported("numeric for statement", s.line)),
            Statement::GenericFor(s) => Err(self.unsupported("generic for statement", s.line)),
            Statement::Function(s) => Err(self.unsupported("function statement", s.line)),
            Statement::LocalFunction(s) => {
                Err(self.unsupported("local function statement", s.line))
            }
        }
    }

    fn visit_local_name_list(&mut self, stmt: &LocalNameListStatement) -> Result<(), CodegenError> {
        self.visit_name_list(&stmt.name_list)?;

        let func = self.func();
        let reg = self.state.gc.function(func).get_next_register();
        let names: Vec<NameReg> = self.fstate().names_register.clone();

        // The initialisers land in the temporary region starting at `reg`
        if let Some(exp_list) = &stmt.exp_list {
            self.fstate().push_exp_list_value_count(names.len() as i32);
            self.visit_expression_list(exp_list)?;
        }

        // Copy each value into the stable register its name was bound to
        for (i, name) in names.iter().enumerate() {
            self.emit(
                Instruction::ab_code(OpCode::Move, name.register, (reg + i as u8) as u16),
                name.line,
            );
        }
        self.fstate().names_register.clear();

        let f = self.state.gc.function_mut(func);
        f.set_next_register(reg);
        f.add_instruction(Instruction::a_code(OpCode::SetTop, reg), 0);
        Ok(())
    }

    fn visit_name_list(&mut self, list: &NameList) -> Result<(), CodegenError> {
        let func = self.func();
        for name in &list.names {
            let id = match (name.kind, name.value) {
                (TokenKind::Id, TokenValue::Str(s)) => s,
                _ => return Err(self.internal("name list entry is not an identifier", name.line)),
            };
            let next = self.state.gc.function(func).get_next_register();
            let (register, fresh) = self.scopes.add_name(id, next);
            if fresh {
                self.state.gc.function_mut(func).alloca_next_register();
            }
            self.fstate().names_register.push(NameReg {
                register,
                line: name.line,
            });
        }
        Ok(())
    }

    fn visit_expression_list(&mut self, list: &ExpressionList) -> Result<(), CodegenError> {
        let mut value_count = self.fstate().pop_exp_list_value_count();

        let exp_count = list.exps.len();
        for (i, exp) in list.exps.iter().enumerate() {
            if value_count == 0 {
                self.fstate().push_exp_value_count(0);
            } else {
                // Only the last expression takes all remaining values
                let count = if i + 1 == exp_count { value_count } else { 1 };
                self.fstate().push_exp_value_count(count);
                if value_count != EXP_VALUE_COUNT_ANY {
                    value_count -= count;
                }
            }
            self.visit_expression(exp)?;
        }
        Ok(())
    }

    fn visit_expression(&mut self, exp: &Expression) -> Result<(), CodegenError> {
        match exp {
            Expression::Terminator(t) => self.visit_terminator(t),
            Expression::NormalFuncCall(c) => self.visit_normal_func_call(c),
            Expression::Binary(b) => Err(self.unsupported("binary expression", b.op.line)),
            Expression::Unary(u) => Err(self.unsupported("unary expression", u.op.line)),
            Expression::FunctionBody(f) => Err(self.unsupported("function expression", f.line)),
            Expression::TableDefine(t) => Err(self.unsupported("table constructor", t.line)),
            Expression::IndexAccessor(a) => Err(self.unsupported("index access", a.line)),
            Expression::MemberAccessor(a) => {
                Err(self.unsupported("member access", a.member.line))
            }
            Expression::MemberFuncCall(c) => Err(self.unsupported("method call", c.line)),
        }
    }

    fn visit_terminator(&mut self, t: &TokenDetail) -> Result<(), CodegenError> {
        let value_count = self.fstate().pop_exp_value_count();
        let func = self.func();
        match t.kind {
            TokenKind::Number | TokenKind::String => {
                let index = match t.value {
                    TokenValue::Number(n) => {
                        self.state.gc.function_mut(func).add_const_number(n)
                    }
                    TokenValue::Str(s) => self.state.gc.function_add_const_string(func, s),
                    TokenValue::None => {
                        return Err(self.internal("literal token without payload", t.line))
                    }
                };
                if value_count != 0 {
                    let f = self.state.gc.function_mut(func);
                    let reg = f.alloca_next_register();
                    f.add_instruction(
                        Instruction::ab_code(OpCode::LoadConst, reg, index as u16),
                        t.line,
                    );
                }
            }
            TokenKind::Id => {
                let name = match t.value {
                    TokenValue::Str(s) => s,
                    _ => return Err(self.internal("identifier without a name", t.line)),
                };
                match self.scopes.resolve(name) {
                    None => {
                        // Unbound names live in the environment table
                        let index = self.state.gc.function_add_const_string(func, name);
                        if value_count != 0 {
                            let f = self.state.gc.function_mut(func);
                            let reg = f.alloca_next_register();
                            f.add_instruction(
                                Instruction::ab_code(OpCode::LoadConst, reg, index as u16),
                                t.line,
                            );
                            f.add_instruction(
                                Instruction::abc_code(
                                    OpCode::GetUpTable,
                                    reg,
                                    ENV_UPVALUE_INDEX,
                                    reg,
                                ),
                                t.line,
                            );
                        }
                    }
                    Some(binding) if binding.owner == func => {
                        if value_count != 0 {
                            let f = self.state.gc.function_mut(func);
                            let dst = f.alloca_next_register();
                            f.add_instruction(
                                Instruction::ab_code(OpCode::Move, dst, binding.register as u16),
                                t.line,
                            );
                        }
                    }
                    Some(_) => {
                        return Err(self.unsupported("upvalue reference", t.line));
                    }
                }
            }
            _ => return Err(self.unsupported("terminator token", t.line)),
        }
        Ok(())
    }

    fn visit_normal_func_call(&mut self, call: &NormalFuncCall) -> Result<(), CodegenError> {
        let func = self.func();
        let reg = self.state.gc.function(func).get_next_register();
        let result_count = self.fstate().pop_exp_value_count();

        // The callee lands at `reg`, its arguments right above it
        self.fstate().push_exp_value_count(1);
        self.visit_expression(&call.caller)?;
        self.visit_func_call_args(&call.args)?;

        self.emit(Instruction::asbx_code(OpCode::Call, reg, result_count), 0);
        Ok(())
    }

    fn visit_func_call_args(&mut self, args: &FuncCallArgs) -> Result<(), CodegenError> {
        match args {
            FuncCallArgs::String { token, .. } => {
                self.fstate().push_exp_value_count(1);
                self.visit_terminator(token)
            }
            FuncCallArgs::Table { table, .. } => {
                Err(self.unsupported("table constructor argument", table.line))
            }
            FuncCallArgs::ExpList { exp_list, .. } => {
                if let Some(list) = exp_list {
                    self.fstate().push_exp_list_value_count(EXP_VALUE_COUNT_ANY);
                    self.visit_expression_list(list)?;
                }
                Ok(())
            }
        }
    }
}
