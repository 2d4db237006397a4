//! `$filter` AST -> sea-query condition over a table scope.

use super::context::QueryContext;
use super::subquery::{compare, correlated, count_exists, exists, swap};
use crate::convert::coerce;
use crate::db::TableScope;
use crate::error::{MessageKey, ProcessorError, Result};
use crate::schema::{Selector, StorageType, StructuredType};
use odata_core::ast::{CompareOperator, Expr as Ast, LambdaKind, Value, COUNT_SEGMENT};
use sea_orm::sea_query::{Condition, Expr, Func, LikeExpr, SimpleExpr};

/* ---------- LIKE helpers ---------- */

pub(crate) fn like_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            c => out.push(c),
        }
    }
    out
}
pub(crate) fn like_contains(s: &str) -> String {
    format!("%{}%", like_escape(s))
}
pub(crate) fn like_starts(s: &str) -> String {
    format!("{}%", like_escape(s))
}
pub(crate) fn like_ends(s: &str) -> String {
    format!("%{}", like_escape(s))
}

/* ---------- scopes ---------- */

/// The scope unqualified paths resolve against, plus lambda range variables.
#[derive(Clone)]
struct Bindings {
    default: TableScope,
    variables: Vec<(String, TableScope)>,
}

impl Bindings {
    fn new(scope: &TableScope) -> Self {
        Self {
            default: scope.clone(),
            variables: Vec::new(),
        }
    }

    fn bind(&self, variable: &str, scope: TableScope) -> Self {
        let mut next = self.clone();
        next.variables.push((variable.to_string(), scope));
        next
    }

    /// Split a range variable (or `$it`) off `path`.
    fn resolve<'p>(&self, path: &'p str) -> (&TableScope, &'p str) {
        if let Some((head, rest)) = path.split_once('/') {
            if head == "$it" {
                return (&self.default, rest);
            }
            if let Some((_, scope)) = self.variables.iter().rev().find(|(v, _)| v == head) {
                return (scope, rest);
            }
        }
        (&self.default, path)
    }
}

fn not_supported(detail: impl Into<String>) -> ProcessorError {
    ProcessorError::new(MessageKey::NotSupportedFilter, [detail.into()])
}

fn filter_error(detail: impl Into<String>) -> ProcessorError {
    ProcessorError::new(MessageKey::QueryPreparationFilterError, [detail.into()])
}

fn unknown_property(path: &str, ty: &StructuredType) -> ProcessorError {
    ProcessorError::new(MessageKey::QueryPreparationUnknownProperty, [path, ty.name.as_str()])
}

fn count_path(expr: &Ast) -> Option<&str> {
    expr.member_path()
        .filter(|p| p.rsplit('/').next() == Some(COUNT_SEGMENT))
}

fn is_predicate_function(name: &str) -> bool {
    matches!(name, "contains" | "startswith" | "endswith")
}

/// Compiles filter expressions against a [`TableScope`].
///
/// Member paths crossing an association and lambda operators become correlated EXISTS
/// subqueries; `Nav/$count` comparisons become a grouped subquery with HAVING.
pub struct FilterCompiler<'a> {
    ctx: &'a QueryContext,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(ctx: &'a QueryContext) -> Self {
        Self { ctx }
    }

    pub fn compile(&self, expr: &Ast, scope: &TableScope) -> Result<Condition> {
        self.condition(expr, &Bindings::new(scope))
    }

    fn condition(&self, expr: &Ast, b: &Bindings) -> Result<Condition> {
        Ok(match expr {
            Ast::And(l, r) => {
                let left = self.condition(l, b)?;
                let right = self.condition(r, b)?;
                Condition::all().add(left).add(right)
            }
            Ast::Or(l, r) => {
                let left = self.condition(l, b)?;
                let right = self.condition(r, b)?;
                Condition::any().add(left).add(right)
            }
            Ast::Not(x) => {
                let inner = self.condition(x, b)?;
                Condition::all().not().add(inner)
            }
            Ast::Compare(l, op, r) => self.compare(l, *op, r, b)?,
            Ast::In(l, list) => self.in_list(l, list, b)?,
            Ast::Function(name, args) => self.predicate(name, args, b)?,
            Ast::Lambda {
                path,
                kind,
                variable,
                predicate,
            } => self.lambda(path, *kind, variable, predicate, b)?,
            Ast::Identifier(path) => self.with_member(path, b, |col, sel| {
                if sel.leaf().storage_type() != Some(StorageType::Bool) {
                    return Err(filter_error(format!("'{path}' is not a boolean property")));
                }
                Ok(Condition::all().add(Expr::expr(col).eq(true)))
            })?,
            Ast::Value(Value::Bool(v)) => Condition::all().add(Expr::cust(if *v { "1=1" } else { "1=0" })),
            Ast::Value(v) => return Err(filter_error(format!("literal {v} is not a condition"))),
        })
    }

    fn compare(&self, l: &Ast, op: CompareOperator, r: &Ast, b: &Bindings) -> Result<Condition> {
        if let Some(path) = count_path(l) {
            return self.count_compare(path, op, r, b);
        }
        if let Some(path) = count_path(r) {
            return self.count_compare(path, swap(op), l, b);
        }
        match (l, r) {
            (Ast::Value(_), Ast::Value(_)) => Err(not_supported("comparison of two literals")),
            (Ast::Value(v), operand) => self.compare_literal(operand, swap(op), v, b),
            (operand, Ast::Value(v)) => self.compare_literal(operand, op, v, b),
            (lhs, rhs) => {
                let (left, _) = self.scalar(lhs, b)?;
                let (right, _) = self.scalar(rhs, b)?;
                Ok(Condition::all().add(compare(left, op, right)))
            }
        }
    }

    fn compare_literal(&self, operand: &Ast, op: CompareOperator, v: &Value, b: &Bindings) -> Result<Condition> {
        match operand {
            Ast::Identifier(path) => self.with_member(path, b, |col, sel| {
                if v.is_null() {
                    return null_compare(col, op);
                }
                let value = self.ctx.values.to_storage(sel.leaf(), v)?;
                Ok(Condition::all().add(compare(col, op, value)))
            }),
            Ast::Function(name, args) if is_predicate_function(&name.to_ascii_lowercase()) => {
                let predicate = self.predicate(name, args, b)?;
                match (op, v) {
                    (CompareOperator::Eq, Value::Bool(true)) | (CompareOperator::Ne, Value::Bool(false)) => {
                        Ok(predicate)
                    }
                    (CompareOperator::Eq, Value::Bool(false)) | (CompareOperator::Ne, Value::Bool(true)) => {
                        Ok(Condition::all().not().add(predicate))
                    }
                    _ => Err(filter_error(format!("{name} can only be compared with true or false"))),
                }
            }
            other => {
                let (expr, storage) = self.scalar(other, b)?;
                if v.is_null() {
                    return null_compare(expr, op);
                }
                let value = coerce(storage, v)?;
                Ok(Condition::all().add(compare(expr, op, value)))
            }
        }
    }

    fn count_compare(&self, path: &str, op: CompareOperator, other: &Ast, b: &Bindings) -> Result<Condition> {
        let Ast::Value(v) = other else {
            return Err(not_supported(format!("{path} compared with a non-literal")));
        };
        let (scope, rest) = b.resolve(path);
        let nav_path = rest
            .strip_suffix(COUNT_SEGMENT)
            .and_then(|p| p.strip_suffix('/'))
            .ok_or_else(|| unknown_property(path, &scope.ty))?;
        let nav = scope
            .ty
            .association_path(nav_path, &self.ctx.schema)
            .ok_or_else(|| unknown_property(nav_path, &scope.ty))?;
        let n = coerce(StorageType::BigInt, v)?;
        Ok(Condition::all().add(count_exists(self.ctx, scope, &nav, op, n.into())?))
    }

    fn in_list(&self, l: &Ast, list: &[Ast], b: &Bindings) -> Result<Condition> {
        if list.is_empty() {
            // IN () -> always false
            return Ok(Condition::all().add(Expr::cust("1=0")));
        }
        let literals = list
            .iter()
            .map(|e| match e {
                Ast::Value(v) => Ok(v),
                _ => Err(not_supported("non-literal in 'in' list")),
            })
            .collect::<Result<Vec<&Value>>>()?;
        match l {
            Ast::Identifier(path) => self.with_member(path, b, |col, sel| {
                let values = literals
                    .iter()
                    .map(|v| self.ctx.values.to_storage(sel.leaf(), v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Condition::all().add(Expr::expr(col).is_in(values)))
            }),
            other => {
                let (expr, storage) = self.scalar(other, b)?;
                let values = literals
                    .iter()
                    .map(|v| coerce(storage, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Condition::all().add(Expr::expr(expr).is_in(values)))
            }
        }
    }

    /// Boolean functions: contains, startswith, endswith.
    fn predicate(&self, name: &str, args: &[Ast], b: &Bindings) -> Result<Condition> {
        let lower = name.to_ascii_lowercase();
        let pattern = |s: &str| match lower.as_str() {
            "contains" => Some(like_contains(s)),
            "startswith" => Some(like_starts(s)),
            "endswith" => Some(like_ends(s)),
            _ => None,
        };
        let (operand, text) = match args {
            [operand, Ast::Value(Value::String(s))] => (operand, s),
            _ => return Err(not_supported(format!("function {name}"))),
        };
        let pattern = pattern(text).ok_or_else(|| not_supported(format!("function {name}")))?;
        let like = |col: SimpleExpr, storage: Option<StorageType>| {
            if !matches!(storage, Some(StorageType::String | StorageType::Char)) {
                return Err(filter_error(format!("{name} requires a string argument")));
            }
            Ok(Condition::all().add(Expr::expr(col).like(LikeExpr::new(pattern.clone()).escape('\\'))))
        };
        match operand {
            Ast::Identifier(path) => {
                self.with_member(path, b, |col, sel| like(col, sel.leaf().storage_type()))
            }
            other => {
                let (expr, storage) = self.scalar(other, b)?;
                like(expr, Some(storage))
            }
        }
    }

    /// Column or scalar function in the current scope.
    fn scalar(&self, expr: &Ast, b: &Bindings) -> Result<(SimpleExpr, StorageType)> {
        match expr {
            Ast::Identifier(path) => {
                let (scope, rest) = b.resolve(path);
                let sel = self.direct_path(scope, rest)?;
                let storage = sel
                    .leaf()
                    .storage_type()
                    .ok_or_else(|| filter_error(format!("'{path}' is not a primitive property")))?;
                Ok((scope.column(&sel), storage))
            }
            Ast::Function(name, args) => {
                let [arg] = args.as_slice() else {
                    return Err(not_supported(format!("function {name}")));
                };
                let (inner, storage) = self.scalar(arg, b)?;
                let text = matches!(storage, StorageType::String | StorageType::Char);
                match name.to_ascii_lowercase().as_str() {
                    "tolower" if text => Ok((Func::lower(inner).into(), StorageType::String)),
                    "toupper" if text => Ok((Func::upper(inner).into(), StorageType::String)),
                    "length" if text => Ok((Func::char_length(inner).into(), StorageType::Int)),
                    "tolower" | "toupper" | "length" => {
                        Err(filter_error(format!("{name} requires a string argument")))
                    }
                    _ => Err(not_supported(format!("function {name}"))),
                }
            }
            Ast::Value(v) => Err(not_supported(format!("literal {v} as an operand"))),
            other => Err(not_supported(format!("{other:?} as an operand"))),
        }
    }

    /// A path without association segments.
    fn direct_path(&self, scope: &TableScope, path: &str) -> Result<Selector> {
        match scope.ty.path(path) {
            Some(sel) if sel.collection_element().is_some() => {
                Err(not_supported(format!("element collection '{path}' in $filter")))
            }
            Some(sel) => Ok(sel),
            None if scope.ty.find_association_path(path).is_some() => {
                Err(not_supported(format!("navigation '{path}' as an operand")))
            }
            None => Err(unknown_property(path, &scope.ty)),
        }
    }

    /// Apply `leaf` to the column `path` names, wrapping it in an EXISTS per association
    /// the path crosses.
    fn with_member<F>(&self, path: &str, b: &Bindings, leaf: F) -> Result<Condition>
    where
        F: FnOnce(SimpleExpr, &Selector) -> Result<Condition>,
    {
        let (scope, rest) = b.resolve(path);
        self.member_in(scope, rest, leaf)
    }

    fn member_in<F>(&self, scope: &TableScope, path: &str, leaf: F) -> Result<Condition>
    where
        F: FnOnce(SimpleExpr, &Selector) -> Result<Condition>,
    {
        if let Some(sel) = scope.ty.path(path) {
            if sel.collection_element().is_some() {
                return Err(not_supported(format!("element collection '{path}' in $filter")));
            }
            if sel.leaf().storage_type().is_none() {
                return Err(filter_error(format!("'{path}' is not a primitive property")));
            }
            return leaf(scope.column(&sel), &sel);
        }
        let segments: Vec<&str> = path.split('/').collect();
        for i in 1..segments.len() {
            let head = segments[..i].join("/");
            if let Some(nav) = scope.ty.association_path(&head, &self.ctx.schema) {
                let rest = segments[i..].join("/");
                let sub = correlated(self.ctx, scope, &nav);
                let target = sub.target.clone();
                let inner = self.member_in(&target, &rest, leaf)?;
                return Ok(Condition::all().add(exists(sub, Some(inner))));
            }
        }
        Err(unknown_property(path, &scope.ty))
    }

    /// `any`: EXISTS(related AND predicate); `all`: NOT EXISTS(related AND NOT predicate).
    fn lambda(
        &self,
        path: &str,
        kind: LambdaKind,
        variable: &str,
        predicate: &Ast,
        b: &Bindings,
    ) -> Result<Condition> {
        let (scope, rest) = b.resolve(path);
        let Some(nav) = scope.ty.association_path(rest, &self.ctx.schema) else {
            return Err(match scope.ty.path(rest) {
                Some(sel) if sel.leaf().collection => {
                    not_supported(format!("lambda over element collection '{rest}'"))
                }
                _ => unknown_property(rest, &scope.ty),
            });
        };
        let sub = correlated(self.ctx, scope, &nav);
        let inner = b.bind(variable, sub.target.clone());
        let condition = self.condition(predicate, &inner)?;
        Ok(match kind {
            LambdaKind::Any => Condition::all().add(exists(sub, Some(condition))),
            LambdaKind::All => {
                let violated = Condition::all().not().add(condition);
                Condition::all().not().add(exists(sub, Some(violated)))
            }
        })
    }
}

fn null_compare(col: SimpleExpr, op: CompareOperator) -> Result<Condition> {
    match op {
        CompareOperator::Eq => Ok(Condition::all().add(Expr::expr(col).is_null())),
        CompareOperator::Ne => Ok(Condition::all().add(Expr::expr(col).is_not_null())),
        other => Err(filter_error(format!("null cannot be compared with '{}'", other.as_str()))),
    }
}
