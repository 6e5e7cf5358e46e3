pub mod error;
pub mod expr;
pub mod parser;
pub mod stmt;
pub mod type_checker;

// 重新导出常用类型
pub use error::{ParseError, ParseResult};
pub use expr::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
pub use parser::{parse_source, Parser};
pub use stmt::{FunctionDecl, Stmt, WhenCase};
pub use type_checker::{analyse, AnalysisError, TypeChecker};
