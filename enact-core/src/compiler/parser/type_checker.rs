//! 类型检查 / 名称解析
//!
//! 在语法树上原地填写每个表达式的 `ty`，并补全变量声明的类型标注。
//! 检查内容：先声明后使用、常量不可赋值、静态类型兼容（`any` 为动态类型）、
//! 参数个数与类型、返回类型、`break`/`continue` 只能出现在循环中。
//! 每条语句独立报错，错误不会中断同级语句的检查。

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

use super::expr::{BinaryOp, Expr, ExprKind, LogicalOp, UnaryOp};
use super::stmt::{FunctionDecl, Stmt};
use crate::core::Type;
use crate::runtime::stdlib::natives;

/// 静态分析错误
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[line {line}] Error: {message}")]
pub struct AnalysisError {
    pub line: u32,
    pub message: String,
}

type CheckResult<T> = Result<T, AnalysisError>;

fn error<T>(line: u32, message: impl Into<String>) -> CheckResult<T> {
    Err(AnalysisError {
        line,
        message: message.into(),
    })
}

#[derive(Debug, Clone)]
struct Binding {
    ty: Type,
    is_const: bool,
}

/// 每个正在检查的函数的上下文
struct FunctionScope {
    ret: Type,
    loop_depth: usize,
}

pub struct TypeChecker {
    scopes: Vec<HashMap<String, Binding>>,
    functions: Vec<FunctionScope>,
    /// 脚本顶层的循环深度
    top_loop_depth: usize,
    errors: Vec<AnalysisError>,
}

impl Default for TypeChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeChecker {
    /// 顶层作用域已声明全部本地函数
    pub fn new() -> Self {
        let mut globals = HashMap::new();
        for native in natives() {
            globals.insert(
                native.name.to_string(),
                Binding {
                    ty: native.ty,
                    is_const: true,
                },
            );
        }
        Self {
            scopes: vec![globals],
            functions: Vec::new(),
            top_loop_depth: 0,
            errors: Vec::new(),
        }
    }

    /// 检查整个程序
    pub fn analyse(mut self, statements: &mut [Stmt]) -> Result<(), Vec<AnalysisError>> {
        self.check_statements(statements);
        debug!(target: "enact::analyser", "analysed program, {} errors", self.errors.len());
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }

    fn check_statements(&mut self, statements: &mut [Stmt]) {
        for stmt in statements {
            if let Err(e) = self.check_stmt(stmt) {
                self.errors.push(e);
            }
        }
    }

    fn scoped(&mut self, statements: &mut [Stmt]) {
        self.scopes.push(HashMap::new());
        self.check_statements(statements);
        self.scopes.pop();
    }

    // ==================== 语句 ====================

    fn check_stmt(&mut self, stmt: &mut Stmt) -> CheckResult<()> {
        match stmt {
            Stmt::Expression(expr) => self.check_expr(expr).map(|_| ()),
            Stmt::Var {
                name,
                declared,
                initializer,
                is_const,
                line,
            } => {
                let init = match declared {
                    Some(t) => {
                        let t = t.clone();
                        self.check_expr_expecting(initializer, &t)
                    }
                    None => self.check_expr(initializer),
                };
                let ty = match (&declared, &init) {
                    (Some(t), _) => t.clone(),
                    (None, Ok(t)) => t.clone(),
                    (None, Err(_)) => Type::Dynamic,
                };
                *declared = Some(ty.clone());
                self.declare(name, ty.clone(), *is_const, *line)?;
                let init = init?;
                if !ty.loosely_accepts(&init) {
                    return error(
                        *line,
                        format!(
                            "Cannot initialize variable '{name}' of type '{ty}' with a value of type '{init}'."
                        ),
                    );
                }
                Ok(())
            }
            Stmt::Function(decl) => self.check_function(decl),
            Stmt::Block { body, .. } => {
                self.scoped(body);
                Ok(())
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
                line,
            } => {
                let result = self.check_condition(condition, *line);
                self.scoped(then_branch);
                self.scoped(else_branch);
                result
            }
            Stmt::Given {
                subject,
                cases,
                else_branch,
                ..
            } => {
                let subject_ty = self.check_expr(subject);
                let mut result = subject_ty.as_ref().map(|_| ()).map_err(|e| e.clone());
                for case in cases.iter_mut() {
                    let case_result = match (&subject_ty, self.check_expr(&mut case.value)) {
                        (Ok(expected), Ok(found))
                            if !expected.loosely_accepts(&found) && !found.loosely_accepts(expected) =>
                        {
                            error(
                                case.line,
                                format!(
                                    "Given value of type '{expected}' cannot be compared with case of type '{found}'."
                                ),
                            )
                        }
                        (_, found) => found.map(|_| ()),
                    };
                    if result.is_ok() {
                        result = case_result;
                    }
                    self.scoped(&mut case.body);
                }
                self.scoped(else_branch);
                result
            }
            Stmt::While {
                condition,
                body,
                line,
            } => {
                let result = self.check_condition(condition, *line);
                self.enter_loop();
                self.scoped(body);
                self.exit_loop();
                result
            }
            Stmt::For {
                initializer,
                condition,
                increment,
                body,
                line,
            } => {
                self.scopes.push(HashMap::new());
                let result = self.check_for_clauses(initializer, condition, increment, *line);
                self.enter_loop();
                self.scoped(body);
                self.exit_loop();
                self.scopes.pop();
                result
            }
            Stmt::Return { value, line } => {
                let Some(ret) = self.functions.last().map(|f| f.ret.clone()) else {
                    return error(*line, "Can't return from top-level code.");
                };
                match value {
                    Some(expr) => {
                        let ty = self.check_expr_expecting(expr, &ret)?;
                        if !ret.loosely_accepts(&ty) {
                            return error(
                                *line,
                                format!("Expected a return value of type '{ret}' but got '{ty}'."),
                            );
                        }
                    }
                    None => {
                        if !matches!(ret, Type::Nothing | Type::Dynamic) {
                            return error(
                                *line,
                                format!("Expected a return value of type '{ret}'."),
                            );
                        }
                    }
                }
                Ok(())
            }
            Stmt::Break { line } => self.check_in_loop("break", *line),
            Stmt::Continue { line } => self.check_in_loop("continue", *line),
            Stmt::Pause { .. } => Ok(()),
        }
    }

    fn check_function(&mut self, decl: &mut FunctionDecl) -> CheckResult<()> {
        // 先声明再检查函数体，允许递归
        self.declare(&decl.name, decl.ty(), true, decl.line)?;

        let mut scope = HashMap::new();
        for (param, ty) in &decl.params {
            if scope
                .insert(
                    param.clone(),
                    Binding {
                        ty: ty.clone(),
                        is_const: false,
                    },
                )
                .is_some()
            {
                return error(decl.line, format!("Duplicate parameter '{param}'."));
            }
        }
        self.scopes.push(scope);
        self.functions.push(FunctionScope {
            ret: decl.ret.clone(),
            loop_depth: 0,
        });
        self.check_statements(&mut decl.body);
        self.functions.pop();
        self.scopes.pop();
        Ok(())
    }

    fn check_for_clauses(
        &mut self,
        initializer: &mut Option<Box<Stmt>>,
        condition: &mut Option<Expr>,
        increment: &mut Option<Expr>,
        line: u32,
    ) -> CheckResult<()> {
        if let Some(init) = initializer {
            self.check_stmt(init)?;
        }
        if let Some(cond) = condition {
            self.check_condition(cond, line)?;
        }
        if let Some(incr) = increment {
            self.check_expr(incr)?;
        }
        Ok(())
    }

    fn check_condition(&mut self, condition: &mut Expr, line: u32) -> CheckResult<()> {
        let ty = self.check_expr(condition)?;
        if !matches!(ty, Type::Bool | Type::Dynamic) {
            return error(
                line,
                format!("Expected a condition of type 'bool' but got '{ty}'."),
            );
        }
        Ok(())
    }

    fn loop_depth(&mut self) -> &mut usize {
        match self.functions.last_mut() {
            Some(f) => &mut f.loop_depth,
            None => &mut self.top_loop_depth,
        }
    }

    fn enter_loop(&mut self) {
        *self.loop_depth() += 1;
    }

    fn exit_loop(&mut self) {
        *self.loop_depth() -= 1;
    }

    fn check_in_loop(&mut self, keyword: &str, line: u32) -> CheckResult<()> {
        if *self.loop_depth() == 0 {
            return error(line, format!("Can't use '{keyword}' outside of a loop."));
        }
        Ok(())
    }

    // ==================== 作用域 ====================

    fn declare(&mut self, name: &str, ty: Type, is_const: bool, line: u32) -> CheckResult<()> {
        let scope = self
            .scopes
            .last_mut()
            .ok_or_else(|| AnalysisError {
                line,
                message: "No open scope.".to_string(),
            })?;
        if scope.contains_key(name) {
            return error(
                line,
                format!("Variable '{name}' is already declared in this scope."),
            );
        }
        scope.insert(name.to_string(), Binding { ty, is_const });
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    // ==================== 表达式 ====================

    fn check_expr(&mut self, expr: &mut Expr) -> CheckResult<Type> {
        let line = expr.line;
        let ty = match &mut expr.kind {
            ExprKind::Int(_) => Type::Int,
            ExprKind::Float(_) => Type::Float,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Nil => Type::Nothing,
            ExprKind::Str(_) => Type::String,
            ExprKind::Array {
                elements,
                element_type,
            } => {
                let element = match element_type {
                    Some(t) => t.clone(),
                    None => self.unify_elements(elements, line)?,
                };
                *element_type = Some(element.clone());
                Type::array(element)
            }
            ExprKind::Variable(name) => match self.lookup(name) {
                Some(binding) => binding.ty.clone(),
                None => return error(line, format!("Undefined variable '{name}'.")),
            },
            ExprKind::Assign { target, value } => {
                let target_ty = self.check_assign_target(target)?;
                let value_ty = self.check_expr_expecting(value, &target_ty)?;
                if !target_ty.loosely_accepts(&value_ty) {
                    return error(
                        line,
                        format!("Cannot assign a value of type '{value_ty}' to a target of type '{target_ty}'."),
                    );
                }
                target_ty
            }
            ExprKind::Unary { op, operand } => {
                let ty = self.check_expr(operand)?;
                match op {
                    UnaryOp::Negate if ty.is_numeric() || ty.is_dynamic() => ty,
                    UnaryOp::Negate => {
                        return error(line, format!("Operand of '-' must be a number, not '{ty}'."))
                    }
                    UnaryOp::Not if matches!(ty, Type::Bool | Type::Dynamic) => Type::Bool,
                    UnaryOp::Not => {
                        return error(line, format!("Operand of '!' must be a bool, not '{ty}'."))
                    }
                    UnaryOp::Copy if ty.is_reference() || ty.is_dynamic() => ty,
                    UnaryOp::Copy => {
                        return error(
                            line,
                            format!("Only reference types can be copied, not '{ty}'."),
                        )
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let l = self.check_expr(left)?;
                let r = self.check_expr(right)?;
                binary_type(*op, &l, &r).ok_or_else(|| AnalysisError {
                    line,
                    message: format!("Invalid operand types '{l}' and '{r}' for {op:?}."),
                })?
            }
            ExprKind::Logical { op, left, right } => {
                let l = self.check_expr(left)?;
                let r = self.check_expr(right)?;
                let word = match op {
                    LogicalOp::And => "and",
                    LogicalOp::Or => "or",
                };
                for t in [&l, &r] {
                    if !matches!(t, Type::Bool | Type::Dynamic) {
                        return error(line, format!("Operands of '{word}' must be bools, not '{t}'."));
                    }
                }
                Type::Bool
            }
            ExprKind::Call { callee, args } => {
                let callee_ty = self.check_expr(callee)?;
                let params = match &callee_ty {
                    Type::Function(f) if f.params.len() == args.len() => f.params.clone(),
                    _ => vec![Type::Dynamic; args.len()],
                };
                let mut arg_types = Vec::with_capacity(args.len());
                for (arg, param) in args.iter_mut().zip(&params) {
                    arg_types.push(self.check_expr_expecting(arg, param)?);
                }
                match callee_ty {
                    Type::Function(f) => {
                        if f.params.len() != arg_types.len() {
                            return error(
                                line,
                                format!(
                                    "Expected {} arguments but got {}.",
                                    f.params.len(),
                                    arg_types.len()
                                ),
                            );
                        }
                        for (i, (param, arg)) in f.params.iter().zip(&arg_types).enumerate() {
                            if !param.loosely_accepts(arg) {
                                return error(
                                    line,
                                    format!(
                                        "Expected argument {} to be of type '{param}' but got '{arg}'.",
                                        i + 1
                                    ),
                                );
                            }
                        }
                        *f.ret
                    }
                    Type::Dynamic => Type::Dynamic,
                    other => {
                        return error(line, format!("Only functions can be called, not '{other}'."))
                    }
                }
            }
            ExprKind::Subscript { object, index } => self.check_subscript(object, index, line)?,
        };
        expr.ty = ty.clone();
        Ok(ty)
    }

    /// 带预期类型的检查：未标注元素类型的数组字面量采用预期的元素类型
    fn check_expr_expecting(&mut self, expr: &mut Expr, expected: &Type) -> CheckResult<Type> {
        let line = expr.line;
        let Type::Array(element) = expected else {
            return self.check_expr(expr);
        };
        let ExprKind::Array {
            elements,
            element_type: element_type @ None,
        } = &mut expr.kind
        else {
            return self.check_expr(expr);
        };
        for item in elements.iter_mut() {
            let ty = self.check_expr_expecting(item, element)?;
            if !element.loosely_accepts(&ty) {
                return error(
                    line,
                    format!("Array elements must be of type '{element}', found '{ty}'."),
                );
            }
        }
        *element_type = Some((**element).clone());
        expr.ty = expected.clone();
        Ok(expected.clone())
    }

    fn check_assign_target(&mut self, target: &mut Expr) -> CheckResult<Type> {
        let line = target.line;
        let ty = match &mut target.kind {
            ExprKind::Variable(name) => match self.lookup(name) {
                Some(Binding { is_const: true, .. }) => {
                    return error(line, format!("Can't assign to constant '{name}'."))
                }
                Some(binding) => binding.ty.clone(),
                None => return error(line, format!("Undefined variable '{name}'.")),
            },
            ExprKind::Subscript { object, index } => self.check_subscript(object, index, line)?,
            _ => return error(line, "Invalid assignment target."),
        };
        target.ty = ty.clone();
        Ok(ty)
    }

    fn check_subscript(&mut self, object: &mut Expr, index: &mut Expr, line: u32) -> CheckResult<Type> {
        let object_ty = self.check_expr(object)?;
        let index_ty = self.check_expr(index)?;
        if !matches!(index_ty, Type::Int | Type::Dynamic) {
            return error(line, format!("Array index must be an int, not '{index_ty}'."));
        }
        match object_ty {
            Type::Array(element) => Ok(*element),
            Type::Dynamic => Ok(Type::Dynamic),
            other => error(line, format!("Only arrays can be indexed, not '{other}'.")),
        }
    }

    fn unify_elements(&mut self, elements: &mut [Expr], line: u32) -> CheckResult<Type> {
        let mut unified: Option<Type> = None;
        for element in elements.iter_mut() {
            let ty = self.check_expr(element)?;
            unified = Some(match unified {
                None => ty,
                Some(prev) => match unify(&prev, &ty) {
                    Some(t) => t,
                    None => {
                        return error(
                            line,
                            format!("Array elements must share a type, found '{prev}' and '{ty}'."),
                        )
                    }
                },
            });
        }
        Ok(unified.unwrap_or(Type::Dynamic))
    }
}

/// 数组元素的公共类型
fn unify(a: &Type, b: &Type) -> Option<Type> {
    if a == b {
        return Some(a.clone());
    }
    match (a, b) {
        (Type::Dynamic, _) | (_, Type::Dynamic) => Some(Type::Dynamic),
        (Type::Int, Type::Float) | (Type::Float, Type::Int) => Some(Type::Float),
        _ => None,
    }
}

/// 二元表达式的结果类型
fn binary_type(op: BinaryOp, l: &Type, r: &Type) -> Option<Type> {
    let numeric_or_dynamic = |t: &Type| t.is_numeric() || t.is_dynamic();
    match op {
        BinaryOp::Equal | BinaryOp::NotEqual => Some(Type::Bool),
        BinaryOp::Add if *l == Type::String && *r == Type::String => Some(Type::String),
        _ if op.is_comparison() => {
            (numeric_or_dynamic(l) && numeric_or_dynamic(r)).then_some(Type::Bool)
        }
        _ => match (l, r) {
            (Type::Int, Type::Int) => Some(Type::Int),
            (Type::Dynamic, t) | (t, Type::Dynamic) if numeric_or_dynamic(t) => Some(Type::Dynamic),
            (a, b) if a.is_numeric() && b.is_numeric() => Some(Type::Float),
            _ => None,
        },
    }
}

/// 便捷入口
pub fn analyse(statements: &mut [Stmt]) -> Result<(), Vec<AnalysisError>> {
    TypeChecker::new().analyse(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parser::parse_source;

    fn check(source: &str) -> Result<Vec<Stmt>, Vec<AnalysisError>> {
        let mut stmts = parse_source(source).expect("parse failed");
        analyse(&mut stmts)?;
        Ok(stmts)
    }

    fn expr_type(source: &str) -> Type {
        let stmts = check(source).unwrap();
        match stmts.last() {
            Some(Stmt::Expression(e)) => e.ty.clone(),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_types() {
        assert_eq!(expr_type("1 + 2"), Type::Int);
        assert_eq!(expr_type("1 + 2.0"), Type::Float);
        assert_eq!(expr_type("\"a\" + \"b\""), Type::String);
        assert_eq!(expr_type("1 < 2"), Type::Bool);
        assert_eq!(expr_type("var x any = 1\nx + 1"), Type::Dynamic);
        assert_eq!(expr_type("[1, 2.5]"), Type::array(Type::Float));
    }

    #[test]
    fn test_fills_declared_type() {
        let stmts = check("var x = 3").unwrap();
        assert!(matches!(&stmts[0], Stmt::Var { declared: Some(Type::Int), .. }));
    }

    #[test]
    fn test_array_literal_takes_declared_element_type() {
        let stmts = check("var b [float] = [1, 2]").unwrap();
        let Stmt::Var { initializer, .. } = &stmts[0] else {
            panic!("expected a var declaration");
        };
        assert_eq!(initializer.ty, Type::array(Type::Float));
        assert!(matches!(
            &initializer.kind,
            ExprKind::Array { element_type: Some(Type::Float), .. }
        ));
        assert!(check("fun f(a [[float]]) float: return a[0][0] end
f([[1], [2.5]])").is_ok());
    }

    #[test]
    fn test_nested_int_does_not_promote() {
        let errors = check("var a [int] = [1]
var b [float] = a").unwrap_err();
        assert_eq!(errors[0].line, 2);

        let errors = check("fun one() int: return 1 end
var g fun () float = one").unwrap_err();
        assert_eq!(errors[0].line, 2);

        assert!(check("var a [int] = [1]
var b [any] = a").is_ok());
    }

    #[test]
    fn test_given_case_types() {
        assert!(check("var x = 2\ngiven x:\n when 1: print(1)\n when 2.5: print(2)\n else: print(0)\nend").is_ok());
        assert!(check("var x any = 2\ngiven x: when \"a\": print(1) end").is_ok());

        let errors = check("var x = 2\ngiven x:\n when 1: var y = 1\n when \"two\": print(y)\nend").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.line == 4));
        assert!(errors.iter().any(|e| e.message.contains("cannot be compared")));
        // 分支各自成作用域
        assert!(errors.iter().any(|e| e.message == "Undefined variable 'y'."));
    }

    #[test]
    fn test_undefined_and_const() {
        let errors = check("print(y)").unwrap_err();
        assert_eq!(errors[0].message, "Undefined variable 'y'.");

        let errors = check("const k = 1\nk = 2").unwrap_err();
        assert_eq!(errors[0].message, "Can't assign to constant 'k'.");
        assert_eq!(errors[0].line, 2);
    }

    #[test]
    fn test_call_checks() {
        let errors = check("fun f(a int) int: return a end\nf(1, 2)\nf(\"s\")").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].message.contains("Expected 1 arguments"));
        assert!(errors[1].message.contains("argument 1"));
    }

    #[test]
    fn test_recursion_is_allowed() {
        assert!(check("fun f(n int) int:\n if n == 0: return 0 end\n return f(n - 1)\nend").is_ok());
    }

    #[test]
    fn test_return_and_loop_rules() {
        let errors = check("return 1").unwrap_err();
        assert!(errors[0].message.contains("top-level"));

        let errors = check("break").unwrap_err();
        assert!(errors[0].message.contains("outside of a loop"));

        let errors = check("fun f() int: return \"s\" end").unwrap_err();
        assert!(errors[0].message.contains("return value"));

        assert!(check("while true: break end").is_ok());
    }

    #[test]
    fn test_errors_do_not_stop_siblings() {
        let errors = check("var a int = \"x\"\nvar b = a + 1\nundefined").unwrap_err();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[1].line, 3);
    }

    #[test]
    fn test_natives_are_declared() {
        assert_eq!(expr_type("dis(1)"), Type::String);
        assert!(check("var print = 1").is_err());
    }
}
