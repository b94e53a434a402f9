//! Formula calculator (spec §4.3): compiles user expressions into per-channel
//! evaluation callables.

pub mod ast;
pub mod error;
pub mod eval;
pub mod parser;

pub use error::{FormulaError, Result};
pub use eval::Env;

use std::collections::HashMap;
use scada_common::CnlNum;

/// A formula split into its mandatory value expression and optional status
/// expression, separated by `;` (spec §4.3 point 1).
#[derive(Debug, Clone)]
pub struct CompiledFormula {
    pub value: ast::Expr,
    pub status: Option<ast::Expr>,
}

/// Split `"value_expr;status_expr"` on the first top-level `;` (not nested
/// inside parentheses).
fn split_formula(source: &str) -> (&str, Option<&str>) {
    let mut depth = 0i32;
    for (i, c) in source.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ';' if depth == 0 => return (&source[..i], Some(&source[i + 1..])),
            _ => {}
        }
    }
    (source, None)
}

pub fn compile(source: &str) -> Result<CompiledFormula> {
    let (value_src, status_src) = split_formula(source);
    let value = parser::parse(value_src.trim())?;
    let status = match status_src {
        Some(s) if !s.trim().is_empty() => Some(parser::parse(s.trim())?),
        _ => None,
    };
    Ok(CompiledFormula { value, status })
}

/// Holds every compiled channel/control-channel formula plus the auxiliary
/// scope-level constants (spec §4.3 point 3). Compilation happens once at
/// startup; a failure here is fatal (`ConfigError`, spec §7) and the caller
/// is expected to name the offending channel.
#[derive(Debug, Default)]
pub struct Calculator {
    channel_formulas: HashMap<CnlNum, CompiledFormula>,
    ctrl_formulas: HashMap<CnlNum, CompiledFormula>,
    aux: HashMap<String, f64>,
}

/// Trivial scope used only to evaluate auxiliary constant definitions at
/// compile time — they have no channel context.
struct AuxEnv<'a> {
    aux: &'a HashMap<String, f64>,
}

impl Env for AuxEnv<'_> {
    fn val(&self, _n: Option<CnlNum>) -> f64 {
        0.0
    }
    fn stat(&self, _n: Option<CnlNum>) -> f64 {
        0.0
    }
    fn set_val(&mut self, _n: CnlNum, _v: f64) {}
    fn set_stat(&mut self, _n: CnlNum, _s: f64) {}
    fn set_data(&mut self, _n: CnlNum, _v: f64, _s: f64) {}
    fn aux(&self, name: &str) -> Option<f64> {
        self.aux.get(name).copied()
    }
}

impl Calculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_channel_formula(&mut self, cnl_num: CnlNum, source: &str) -> Result<()> {
        let compiled = compile(source)?;
        self.channel_formulas.insert(cnl_num, compiled);
        Ok(())
    }

    pub fn compile_ctrl_formula(&mut self, ctrl_cnl_num: CnlNum, source: &str) -> Result<()> {
        let compiled = compile(source)?;
        self.ctrl_formulas.insert(ctrl_cnl_num, compiled);
        Ok(())
    }

    /// Define an auxiliary scope-level constant, evaluated immediately.
    pub fn compile_aux(&mut self, name: &str, source: &str) -> Result<()> {
        let expr = parser::parse(source.trim())?;
        let mut env = AuxEnv { aux: &self.aux };
        let v = eval::eval(&expr, &mut env)?;
        self.aux.insert(name.to_string(), v);
        Ok(())
    }

    pub fn aux_value(&self, name: &str) -> Option<f64> {
        self.aux.get(name).copied()
    }

    pub fn channel_formula(&self, cnl_num: CnlNum) -> Option<&CompiledFormula> {
        self.channel_formulas.get(&cnl_num)
    }

    pub fn ctrl_formula(&self, ctrl_cnl_num: CnlNum) -> Option<&CompiledFormula> {
        self.ctrl_formulas.get(&ctrl_cnl_num)
    }

    pub fn has_channel_formula(&self, cnl_num: CnlNum) -> bool {
        self.channel_formulas.contains_key(&cnl_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_formula_finds_top_level_semicolon() {
        let (value, status) = split_formula("Val() + 1; if(Val() > 0, 1, 0)");
        assert_eq!(value.trim(), "Val() + 1");
        assert_eq!(status.unwrap().trim(), "if(Val() > 0, 1, 0)");
    }

    #[test]
    fn split_formula_ignores_semicolon_inside_parens() {
        let (value, status) = split_formula("if(Val() > 0, 1, 2)");
        assert_eq!(value.trim(), "if(Val() > 0, 1, 2)");
        assert!(status.is_none());
    }

    #[test]
    fn compile_rejects_bad_syntax_with_position() {
        let err = compile("1 + ").unwrap_err();
        assert!(matches!(err, FormulaError::Parse { .. }));
    }

    #[test]
    fn aux_constants_are_available_to_later_compiles() {
        let mut calc = Calculator::new();
        calc.compile_aux("K", "2 + 3").unwrap();
        assert_eq!(calc.aux_value("K"), Some(5.0));
    }
}
