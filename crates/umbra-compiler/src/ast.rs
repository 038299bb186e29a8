//! The abstract syntax tree handed over by the external parser.
//!
//! Tagged variants with exhaustive matching in the code generator, so an
//! unhandled node is a compile error rather than a silent no-op. Every
//! node carries enough line information to attribute emitted instructions.

use crate::token::TokenDetail;
use umbra_core::gc::GcIdx;
use umbra_core::string::LuaStr;

/// Root of a compilation unit.
#[derive(Debug)]
pub struct Chunk {
    pub module: GcIdx<LuaStr>,
    pub block: Block,
}

/// Ordered statements plus an optional trailing return.
#[derive(Debug, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub return_stmt: Option<ReturnStatement>,
}

#[derive(Debug)]
pub struct ReturnStatement {
    pub exp_list: Option<ExpressionList>,
    pub line: u32,
}

#[derive(Debug)]
pub enum Statement {
    LocalNameList(LocalNameListStatement),
    Assignment(AssignmentStatement),
    /// A function call in statement position, discarding its results.
    FuncCall(Expression),
    Break(BreakStatement),
    Do(DoStatement),
    While(WhileStatement),
    Repeat(RepeatStatement),
    If(IfStatement),
    NumericFor(NumericForStatement),
    GenericFor(GenericForStatement),
    Function(FunctionStatement),
    LocalFunction(LocalFunctionStatement),
}

impl Statement {
    pub fn line(&self) -> u32 {
        match self {
            Statement::LocalNameList(s) => s.line,
            Statement::Assignment(s) => s.line,
            Statement::FuncCall(e) => e.line(),
            Statement::Break(s) => s.line,
            Statement::Do(s) => s.line,
            Statement::While(s) => s.line,
            Statement::Repeat(s) => s.line,
            Statement::If(s) => s.line,
            Statement::NumericFor(s) => s.line,
            Statement::GenericFor(s) => s.line,
            Statement::Function(s) => s.line,
            Statement::LocalFunction(s) => s.line,
        }
    }
}

#[derive(Debug)]
pub struct LocalNameListStatement {
    pub name_list: NameList,
    pub exp_list: Option<ExpressionList>,
    pub line: u32,
}

#[derive(Debug)]
pub struct AssignmentStatement {
    pub var_list: VarList,
    pub exp_list: ExpressionList,
    pub line: u32,
}

#[derive(Debug)]
pub struct BreakStatement {
    pub line: u32,
}

#[derive(Debug)]
pub struct DoStatement {
    pub block: Block,
    pub line: u32,
}

#[derive(Debug)]
pub struct WhileStatement {
    pub exp: Expression,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug)]
pub struct RepeatStatement {
    pub block: Block,
    pub exp: Expression,
    pub line: u32,
}

#[derive(Debug)]
pub struct IfStatement {
    pub exp: Expression,
    pub true_branch: Block,
    pub else_clause: Option<ElseClause>,
    pub line: u32,
}

#[derive(Debug)]
pub enum ElseClause {
    ElseIf(Box<IfStatement>),
    Else(Block),
}

#[derive(Debug)]
pub struct NumericForStatement {
    pub name: TokenDetail,
    pub start: Expression,
    pub limit: Expression,
    pub step: Option<Expression>,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug)]
pub struct GenericForStatement {
    pub name_list: NameList,
    pub exp_list: ExpressionList,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug)]
pub struct FunctionStatement {
    pub func_name: FunctionName,
    pub func_body: FunctionBody,
    pub line: u32,
}

/// Dotted function name with an optional method part.
#[derive(Debug)]
pub struct FunctionName {
    pub names: Vec<TokenDetail>,
    pub member_name: Option<TokenDetail>,
    pub line: u32,
}

#[derive(Debug)]
pub struct LocalFunctionStatement {
    pub name: TokenDetail,
    pub func_body: FunctionBody,
    pub line: u32,
}

#[derive(Debug)]
pub enum Expression {
    /// A literal or identifier token.
    Terminator(TokenDetail),
    Binary(BinaryExpression),
    Unary(UnaryExpression),
    FunctionBody(Box<FunctionBody>),
    TableDefine(TableDefine),
    IndexAccessor(Box<IndexAccessor>),
    MemberAccessor(Box<MemberAccessor>),
    NormalFuncCall(Box<NormalFuncCall>),
    MemberFuncCall(Box<MemberFuncCall>),
}

impl Expression {
    pub fn line(&self) -> u32 {
        match self {
            Expression::Terminator(t) => t.line,
            Expression::Binary(b) => b.op.line,
            Expression::Unary(u) => u.op.line,
            Expression::FunctionBody(f) => f.line,
            Expression::TableDefine(t) => t.line,
            Expression::IndexAccessor(a) => a.line,
            Expression::MemberAccessor(a) => a.member.line,
            Expression::NormalFuncCall(c) => c.line,
            Expression::MemberFuncCall(c) => c.line,
        }
    }
}

#[derive(Debug)]
pub struct BinaryExpression {
    pub left: Box<Expression>,
    pub op: TokenDetail,
    pub right: Box<Expression>,
}

#[derive(Debug)]
pub struct UnaryExpression {
    pub op: TokenDetail,
    pub exp: Box<Expression>,
}

#[derive(Debug)]
pub struct FunctionBody {
    pub param_list: Option<ParamList>,
    pub block: Block,
    pub line: u32,
}

#[derive(Debug)]
pub struct ParamList {
    pub params: Vec<TokenDetail>,
    pub vararg: bool,
    pub line: u32,
}

#[derive(Debug)]
pub struct TableDefine {
    pub fields: Vec<TableField>,
    pub line: u32,
}

#[derive(Debug)]
pub enum TableField {
    /// `[exp] = exp`
    Index {
        key: Expression,
        value: Expression,
        line: u32,
    },
    /// `name = exp`
    Name {
        name: TokenDetail,
        value: Expression,
        line: u32,
    },
    /// positional `exp`
    Array { value: Expression, line: u32 },
}

#[derive(Debug)]
pub struct IndexAccessor {
    pub table: Expression,
    pub index: Expression,
    pub line: u32,
}

#[derive(Debug)]
pub struct MemberAccessor {
    pub table: Expression,
    pub member: TokenDetail,
}

#[derive(Debug)]
pub struct NormalFuncCall {
    pub caller: Expression,
    pub args: FuncCallArgs,
    pub line: u32,
}

#[derive(Debug)]
pub struct MemberFuncCall {
    pub caller: Expression,
    pub member: TokenDetail,
    pub args: FuncCallArgs,
    pub line: u32,
}

/// Call argument forms: a parenthesised expression list, a sole table
/// constructor, or a sole string literal.
#[derive(Debug)]
pub enum FuncCallArgs {
    ExpList {
        exp_list: Option<ExpressionList>,
        line: u32,
    },
    Table {
        table: TableDefine,
        line: u32,
    },
    String {
        token: TokenDetail,
        line: u32,
    },
}

#[derive(Debug, Default)]
pub struct NameList {
    pub names: Vec<TokenDetail>,
}

#[derive(Debug)]
pub struct VarList {
    pub vars: Vec<Expression>,
    pub line: u32,
}

#[derive(Debug)]
pub struct ExpressionList {
    pub exps: Vec<Expression>,
    pub line: u32,
}
