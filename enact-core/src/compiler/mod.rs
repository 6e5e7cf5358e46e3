//! 前端：词法分析、语法分析、类型分析

pub mod lexer;
pub mod parser;
