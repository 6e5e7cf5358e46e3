//! 语句节点

use super::expr::Expr;
use crate::core::Type;

/// 函数声明
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: Vec<Stmt>,
    pub line: u32,
}

impl FunctionDecl {
    /// 函数的完整类型
    pub fn ty(&self) -> Type {
        Type::function(
            self.params.iter().map(|(_, t)| t.clone()).collect(),
            self.ret.clone(),
        )
    }
}

/// `given` 中的一个 `when` 分支
#[derive(Debug, Clone, PartialEq)]
pub struct WhenCase {
    pub value: Expr,
    pub body: Vec<Stmt>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expression(Expr),
    Var {
        name: String,
        /// 显式标注的类型；省略时由分析器填入初始值的类型
        declared: Option<Type>,
        initializer: Expr,
        is_const: bool,
        line: u32,
    },
    Function(FunctionDecl),
    Block {
        body: Vec<Stmt>,
        line: u32,
    },
    If {
        condition: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        line: u32,
    },
    /// 依次与各分支的值比较，执行第一个相等的分支，都不相等时执行 else
    Given {
        subject: Expr,
        cases: Vec<WhenCase>,
        else_branch: Vec<Stmt>,
        line: u32,
    },
    While {
        condition: Expr,
        body: Vec<Stmt>,
        line: u32,
    },
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Vec<Stmt>,
        line: u32,
    },
    Return {
        value: Option<Expr>,
        line: u32,
    },
    Break {
        line: u32,
    },
    Continue {
        line: u32,
    },
    Pause {
        line: u32,
    },
}

impl Stmt {
    /// 语句起始行
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Expression(e) => e.line,
            Stmt::Function(f) => f.line,
            Stmt::Var { line, .. }
            | Stmt::Block { line, .. }
            | Stmt::If { line, .. }
            | Stmt::Given { line, .. }
            | Stmt::While { line, .. }
            | Stmt::For { line, .. }
            | Stmt::Return { line, .. }
            | Stmt::Break { line }
            | Stmt::Continue { line }
            | Stmt::Pause { line } => *line,
        }
    }
}
