// XDL expression evaluation.
//
// Evaluation is async because scoring calls (`xed`, `dex`, `nex`) suspend
// on the judge gateway; everything else is pure over the register file.
// Type errors are non-retriable and carry the source line of the op that
// owns the expression.

use std::collections::BTreeMap;

use futures::future::BoxFuture;

use crate::error::{Result, XentError};
use crate::judge::gateway::JudgeGateway;
use crate::score::TokenXent;

use super::ast::{CmpOp, Expr};

/// A runtime value. Game state is all strings; numbers, xents and booleans
/// only exist transiently inside expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
    Xent(TokenXent),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Xent(_) => "xent",
            Value::Bool(_) => "bool",
        }
    }

    pub fn into_str(self, line: u32) -> Result<String> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(type_err(line, "string", &other)),
        }
    }

    pub fn into_xent(self, line: u32) -> Result<TokenXent> {
        match self {
            Value::Xent(x) => Ok(x),
            other => Err(type_err(line, "xent", &other)),
        }
    }

    pub fn into_bool(self, line: u32) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(b),
            other => Err(type_err(line, "bool", &other)),
        }
    }

    /// Numeric view: numbers are themselves, a xent contributes its total.
    fn as_num(&self, line: u32) -> Result<f64> {
        match self {
            Value::Num(n) => Ok(*n),
            Value::Xent(x) => Ok(x.total()),
            other => Err(type_err(line, "number", other)),
        }
    }
}

fn type_err(line: u32, wanted: &str, got: &Value) -> XentError {
    XentError::Expr {
        line,
        message: format!("expected {wanted}, found {}", got.type_name()),
    }
}

/// Evaluation environment: the register file view, the judge gateway, and
/// (only during map construction) the resolved story text.
pub struct Env<'a> {
    pub registers: &'a BTreeMap<String, String>,
    pub judge: &'a JudgeGateway,
    pub story: Option<&'a str>,
}

/// Evaluate an expression. `line` is the source line of the owning op,
/// used for error positions.
pub fn eval<'a>(expr: &'a Expr, line: u32, env: &'a Env<'a>) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
        match expr {
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Var(name) => match env.registers.get(name) {
                Some(value) => Ok(Value::Str(value.clone())),
                None => Err(XentError::Expr {
                    line,
                    message: format!("unbound register `{name}`"),
                }),
            },
            Expr::Concat(lhs, rhs) => {
                let mut out = eval(lhs, line, env).await?.into_str(line)?;
                out.push_str(&eval(rhs, line, env).await?.into_str(line)?);
                Ok(Value::Str(out))
            }
            Expr::Story => match env.story {
                Some(story) => Ok(Value::Str(story.to_string())),
                None => Err(XentError::Expr {
                    line,
                    message: "story() is only available in the map prefix".to_string(),
                }),
            },
            Expr::RemoveCommonWords(a, b) => {
                let a = eval(a, line, env).await?.into_str(line)?;
                let b = eval(b, line, env).await?.into_str(line)?;
                Ok(Value::Str(remove_common_words(&a, &b)))
            }
            Expr::Len(inner) => {
                let s = eval(inner, line, env).await?.into_str(line)?;
                Ok(Value::Num(s.chars().count() as f64))
            }
            Expr::Xed { text, context } => {
                let text = eval(text, line, env).await?.into_str(line)?;
                let context = match context {
                    Some(ctx) => eval(ctx, line, env).await?.into_str(line)?,
                    None => String::new(),
                };
                Ok(Value::Xent(env.judge.score(&text, &context).await?))
            }
            Expr::Dex { text, context } => {
                let text = eval(text, line, env).await?.into_str(line)?;
                let context = eval(context, line, env).await?.into_str(line)?;
                Ok(Value::Xent(env.judge.score_diff(&text, "", &context).await?))
            }
            Expr::Nex { text, context } => {
                let text = eval(text, line, env).await?.into_str(line)?;
                let context = eval(context, line, env).await?.into_str(line)?;
                let gain = env.judge.score_diff(&text, "", &context).await?;
                Ok(Value::Xent(gain.map_values(|x| x.max(0.0))))
            }
            Expr::Cmp { op, lhs, rhs } => {
                let lhs = eval(lhs, line, env).await?;
                let rhs = eval(rhs, line, env).await?;
                let outcome = match (op, &lhs, &rhs) {
                    // String equality when both sides are strings.
                    (CmpOp::Eq, Value::Str(a), Value::Str(b)) => a == b,
                    (CmpOp::Eq, a, b) => a.as_num(line)? == b.as_num(line)?,
                    (CmpOp::Ge, a, b) => a.as_num(line)? >= b.as_num(line)?,
                    (CmpOp::Le, a, b) => a.as_num(line)? <= b.as_num(line)?,
                };
                Ok(Value::Bool(outcome))
            }
        }
    })
}

/// The words of `a` that do not occur in `b`, compared case-insensitively
/// on whitespace-split words. Order and original surfaces from `a` are
/// preserved; the result is joined by single spaces.
pub fn remove_common_words(a: &str, b: &str) -> String {
    let common: std::collections::HashSet<String> =
        b.split_whitespace().map(normalize_word).collect();

    a.split_whitespace()
        .filter(|word| !common.contains(&normalize_word(word)))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase and strip surrounding punctuation so "Knight," matches "knight".
fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}
