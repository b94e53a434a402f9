//! Expression interpreter exposing host primitives as callbacks (spec §4.3,
//! §4.3.1 — design note §9's recommended "embed a small interpreter" strategy).

use scada_common::CnlNum;

use crate::ast::{BinOp, Expr, UnOp};
use crate::error::FormulaError;

/// Host scope a compiled expression runs against. `None` in `val`/`stat` means
/// "the channel currently being computed" (`Val()`/`Stat()` with no argument,
/// spec §4.3's `calc` contract); `Some(n)` reads another channel through the
/// evaluator's processing-snapshot pointer (spec §4.4).
pub trait Env {
    fn val(&self, n: Option<CnlNum>) -> f64;
    fn stat(&self, n: Option<CnlNum>) -> f64;
    fn set_val(&mut self, n: CnlNum, v: f64);
    fn set_stat(&mut self, n: CnlNum, s: f64);
    fn set_data(&mut self, n: CnlNum, v: f64, s: f64);

    /// Loose "auxiliary" scope-level definitions from the configuration
    /// (spec §4.3 point 3). Default: none.
    fn aux(&self, _name: &str) -> Option<f64> {
        None
    }
}

fn as_cnl(v: f64) -> CnlNum {
    v.round().clamp(0.0, u16::MAX as f64) as CnlNum
}

fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}

pub fn eval(expr: &Expr, env: &mut dyn Env) -> Result<f64, FormulaError> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Unary(op, inner) => {
            let v = eval(inner, env)?;
            Ok(match op {
                UnOp::Neg => -v,
                UnOp::Not => {
                    if truthy(v) {
                        0.0
                    } else {
                        1.0
                    }
                }
            })
        }
        Expr::Binary(op, lhs, rhs) => eval_binary(*op, lhs, rhs, env),
        Expr::Call(name, args) => eval_call(name, args, env),
    }
}

fn eval_binary(op: BinOp, lhs: &Expr, rhs: &Expr, env: &mut dyn Env) -> Result<f64, FormulaError> {
    // Short-circuit && / || before evaluating the right-hand side.
    match op {
        BinOp::And => {
            let l = eval(lhs, env)?;
            if !truthy(l) {
                return Ok(0.0);
            }
            let r = eval(rhs, env)?;
            return Ok(if truthy(r) { 1.0 } else { 0.0 });
        }
        BinOp::Or => {
            let l = eval(lhs, env)?;
            if truthy(l) {
                return Ok(1.0);
            }
            let r = eval(rhs, env)?;
            return Ok(if truthy(r) { 1.0 } else { 0.0 });
        }
        _ => {}
    }

    let l = eval(lhs, env)?;
    let r = eval(rhs, env)?;
    Ok(match op {
        BinOp::Add => l + r,
        BinOp::Sub => l - r,
        BinOp::Mul => l * r,
        BinOp::Div => {
            if r == 0.0 {
                return Err(FormulaError::Runtime("division by zero".into()));
            }
            l / r
        }
        BinOp::Mod => {
            if r == 0.0 {
                return Err(FormulaError::Runtime("modulo by zero".into()));
            }
            l % r
        }
        BinOp::Lt => bool_f64(l < r),
        BinOp::Le => bool_f64(l <= r),
        BinOp::Gt => bool_f64(l > r),
        BinOp::Ge => bool_f64(l >= r),
        BinOp::Eq => bool_f64(l == r),
        BinOp::Ne => bool_f64(l != r),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    })
}

fn bool_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

fn eval_call(name: &str, args: &[Expr], env: &mut dyn Env) -> Result<f64, FormulaError> {
    let eval_args = |env: &mut dyn Env| -> Result<Vec<f64>, FormulaError> {
        args.iter().map(|a| eval(a, env)).collect()
    };

    match name {
        "Val" => match args.len() {
            0 => Ok(env.val(None)),
            1 => {
                let n = eval(&args[0], env)?;
                Ok(env.val(Some(as_cnl(n))))
            }
            n => Err(arity_error("Val", n)),
        },
        "Stat" => match args.len() {
            0 => Ok(env.stat(None)),
            1 => {
                let n = eval(&args[0], env)?;
                Ok(env.stat(Some(as_cnl(n))))
            }
            n => Err(arity_error("Stat", n)),
        },
        "SetVal" => {
            if args.len() != 2 {
                return Err(arity_error("SetVal", args.len()));
            }
            let n = as_cnl(eval(&args[0], env)?);
            let v = eval(&args[1], env)?;
            env.set_val(n, v);
            Ok(v)
        }
        "SetStat" => {
            if args.len() != 2 {
                return Err(arity_error("SetStat", args.len()));
            }
            let n = as_cnl(eval(&args[0], env)?);
            let s = eval(&args[1], env)?;
            env.set_stat(n, s);
            Ok(s)
        }
        "SetData" => {
            if args.len() != 3 {
                return Err(arity_error("SetData", args.len()));
            }
            let n = as_cnl(eval(&args[0], env)?);
            let v = eval(&args[1], env)?;
            let s = eval(&args[2], env)?;
            env.set_data(n, v, s);
            Ok(v)
        }
        "if" => {
            if args.len() != 3 {
                return Err(arity_error("if", args.len()));
            }
            let cond = eval(&args[0], env)?;
            if truthy(cond) {
                eval(&args[1], env)
            } else {
                eval(&args[2], env)
            }
        }
        "abs" => unary_math("abs", &eval_args(env)?, f64::abs),
        "sqrt" => unary_math("sqrt", &eval_args(env)?, f64::sqrt),
        "floor" => unary_math("floor", &eval_args(env)?, f64::floor),
        "ceil" => unary_math("ceil", &eval_args(env)?, f64::ceil),
        "round" => unary_math("round", &eval_args(env)?, f64::round),
        "min" => fold_math("min", &eval_args(env)?, f64::min),
        "max" => fold_math("max", &eval_args(env)?, f64::max),
        other => match (args.is_empty(), env.aux(other)) {
            (true, Some(v)) => Ok(v),
            _ => Err(FormulaError::Runtime(format!("unknown identifier: {other}"))),
        },
    }
}

fn arity_error(name: &str, got: usize) -> FormulaError {
    FormulaError::Runtime(format!("{name}: wrong argument count ({got})"))
}

fn unary_math(name: &str, args: &[f64], f: fn(f64) -> f64) -> Result<f64, FormulaError> {
    match args {
        [v] => Ok(f(*v)),
        _ => Err(arity_error(name, args.len())),
    }
}

fn fold_math(name: &str, args: &[f64], f: fn(f64, f64) -> f64) -> Result<f64, FormulaError> {
    if args.len() < 2 {
        return Err(arity_error(name, args.len()));
    }
    Ok(args.iter().copied().reduce(f).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::collections::HashMap;

    struct TestEnv {
        current: CnlNum,
        values: HashMap<CnlNum, f64>,
        stats: HashMap<CnlNum, f64>,
    }

    impl Env for TestEnv {
        fn val(&self, n: Option<CnlNum>) -> f64 {
            *self.values.get(&n.unwrap_or(self.current)).unwrap_or(&0.0)
        }
        fn stat(&self, n: Option<CnlNum>) -> f64 {
            *self.stats.get(&n.unwrap_or(self.current)).unwrap_or(&0.0)
        }
        fn set_val(&mut self, n: CnlNum, v: f64) {
            self.values.insert(n, v);
        }
        fn set_stat(&mut self, n: CnlNum, s: f64) {
            self.stats.insert(n, s);
        }
        fn set_data(&mut self, n: CnlNum, v: f64, s: f64) {
            self.values.insert(n, v);
            self.stats.insert(n, s);
        }
    }

    fn env_with(current: CnlNum, values: &[(CnlNum, f64)]) -> TestEnv {
        TestEnv {
            current,
            values: values.iter().cloned().collect(),
            stats: HashMap::new(),
        }
    }

    #[test]
    fn arithmetic_precedence() {
        let mut env = env_with(1, &[]);
        let e = parse("1 + 2 * 3").unwrap();
        assert_eq!(eval(&e, &mut env).unwrap(), 7.0);
    }

    #[test]
    fn division_by_zero_is_runtime_error() {
        let mut env = env_with(1, &[]);
        let e = parse("1/0").unwrap();
        assert!(matches!(eval(&e, &mut env), Err(FormulaError::Runtime(_))));
    }

    #[test]
    fn val_with_no_arg_reads_current_channel() {
        let mut env = env_with(5, &[(5, 42.0)]);
        let e = parse("Val() + 1").unwrap();
        assert_eq!(eval(&e, &mut env).unwrap(), 43.0);
    }

    #[test]
    fn val_with_arg_reads_other_channel() {
        let mut env = env_with(5, &[(5, 42.0), (9, 100.0)]);
        let e = parse("Val(9)").unwrap();
        assert_eq!(eval(&e, &mut env).unwrap(), 100.0);
    }

    #[test]
    fn if_short_circuits() {
        let mut env = env_with(1, &[]);
        let e = parse("if(1, 10, 1/0)").unwrap();
        assert_eq!(eval(&e, &mut env).unwrap(), 10.0);
    }

    #[test]
    fn unknown_identifier_is_runtime_error() {
        let mut env = env_with(1, &[]);
        let e = parse("Bogus(1)").unwrap();
        assert!(matches!(eval(&e, &mut env), Err(FormulaError::Runtime(_))));
    }
}
