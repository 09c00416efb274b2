//! Dice formula parsing.
//!
//! Formulas are `+`/`-` separated sums of dice pools and constants, such as
//! `2d6 + 1d8 - 1`. Parsing yields a flat list of [`Term`]s which can be
//! simplified back into a canonical string, averaged, or turned into roll
//! components for the resolver.

use crate::component::RollComponent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label suffix used when a formula cannot be parsed.
pub const INVALID_FORMULA_LABEL: &str = "(Invalid Formula)";

/// Error type for dice formula parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("Empty dice formula")]
    Empty,
    #[error("Unexpected character '{found}' at position {position} in '{formula}'")]
    UnexpectedChar {
        found: char,
        position: usize,
        formula: String,
    },
    #[error("Missing term after '{operator}' in '{formula}'")]
    MissingTerm { operator: char, formula: String },
    #[error("Invalid dice term '{term}' in '{formula}'")]
    InvalidTerm { term: String, formula: String },
    #[error("Die size must be at least 1 in '{0}'")]
    InvalidDieSize(String),
    #[error("Number too large in '{0}'")]
    Overflow(String),
}

/// Sign of a term, serialized as `1` or `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Sign {
    Plus,
    Minus,
}

impl Sign {
    /// `1` or `-1`.
    pub fn factor(self) -> i64 {
        match self {
            Sign::Plus => 1,
            Sign::Minus => -1,
        }
    }
}

impl From<Sign> for i8 {
    fn from(sign: Sign) -> i8 {
        sign.factor() as i8
    }
}

impl TryFrom<i8> for Sign {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Sign::Plus),
            -1 => Ok(Sign::Minus),
            other => Err(format!("sign must be 1 or -1, got {other}")),
        }
    }
}

/// One term of a dice formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Term {
    /// `count` dice of `size` faces. A negative count subtracts the pool.
    Rollable { size: u32, count: i64, sign: Sign },
    Constant { value: i64, sign: Sign },
}

impl Term {
    /// Expected value of this term.
    pub fn average(&self) -> f64 {
        match *self {
            Term::Rollable { size, count, sign } => {
                (sign.factor() * count) as f64 * (f64::from(size) + 1.0) / 2.0
            }
            Term::Constant { value, sign } => (sign.factor() * value) as f64,
        }
    }
}

/// Parse a dice formula into its terms.
pub fn parse(formula: &str) -> Result<Vec<Term>, FormulaError> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut sign = Sign::Plus;
    let mut pending_operator: Option<char> = None;

    for (position, ch) in formula.char_indices() {
        match ch {
            c if c.is_whitespace() => continue,
            '+' | '-' => {
                if current.is_empty() {
                    // Only a single leading sign may appear without a term before it
                    if !terms.is_empty() || pending_operator.is_some() {
                        return Err(FormulaError::MissingTerm {
                            operator: pending_operator.unwrap_or(ch),
                            formula: formula.to_string(),
                        });
                    }
                } else {
                    terms.push(parse_term(&current, sign, formula)?);
                    current.clear();
                }
                sign = if ch == '+' { Sign::Plus } else { Sign::Minus };
                pending_operator = Some(ch);
            }
            '0'..='9' | 'd' | 'D' => {
                current.push(ch.to_ascii_lowercase());
                pending_operator = None;
            }
            _ => {
                return Err(FormulaError::UnexpectedChar {
                    found: ch,
                    position,
                    formula: formula.to_string(),
                })
            }
        }
    }

    if current.is_empty() {
        return match pending_operator {
            Some(operator) => Err(FormulaError::MissingTerm {
                operator,
                formula: formula.to_string(),
            }),
            None => Err(FormulaError::Empty),
        };
    }

    terms.push(parse_term(&current, sign, formula)?);
    Ok(terms)
}

fn parse_term(term: &str, sign: Sign, formula: &str) -> Result<Term, FormulaError> {
    let invalid = || FormulaError::InvalidTerm {
        term: term.to_string(),
        formula: formula.to_string(),
    };

    let Some(d_pos) = term.find('d') else {
        let value = parse_number::<i64>(term, formula)?;
        return Ok(Term::Constant { value, sign });
    };

    let count_str = &term[..d_pos];
    let size_str = &term[d_pos + 1..];
    if size_str.is_empty() || size_str.contains('d') {
        return Err(invalid());
    }

    let count = if count_str.is_empty() {
        1
    } else {
        parse_number::<i64>(count_str, formula)?
    };
    let size = parse_number::<u32>(size_str, formula)?;
    if size == 0 {
        return Err(FormulaError::InvalidDieSize(formula.to_string()));
    }

    Ok(Term::Rollable { size, count, sign })
}

// Input is already restricted to ASCII digits, so the only failure is overflow.
fn parse_number<T: FromStr>(digits: &str, formula: &str) -> Result<T, FormulaError> {
    digits
        .parse()
        .map_err(|_| FormulaError::Overflow(formula.to_string()))
}

/// Combine terms into a canonical formula string.
///
/// Dice of the same size are merged into one signed pool, in the order each
/// size was first seen. Zero pools and a zero constant are dropped, and the
/// constant always comes last. A formula that cancels out entirely is `"0"`.
pub fn simplify(terms: &[Term]) -> String {
    let mut pools: Vec<(u32, i64)> = Vec::new();
    let mut constant: i64 = 0;

    for term in terms {
        match *term {
            Term::Rollable { size, count, sign } => {
                let signed = count.saturating_mul(sign.factor());
                match pools.iter_mut().find(|(s, _)| *s == size) {
                    Some((_, total)) => *total = total.saturating_add(signed),
                    None => pools.push((size, signed)),
                }
            }
            Term::Constant { value, sign } => {
                constant = constant.saturating_add(value.saturating_mul(sign.factor()));
            }
        }
    }

    let mut out = String::new();
    for (size, count) in pools.into_iter().filter(|(_, count)| *count != 0) {
        push_signed(&mut out, count, &format!("{}d{}", count.unsigned_abs(), size));
    }
    if constant != 0 {
        push_signed(&mut out, constant, &constant.unsigned_abs().to_string());
    }

    if out.is_empty() {
        "0".to_string()
    } else {
        out
    }
}

fn push_signed(out: &mut String, value: i64, body: &str) {
    if value < 0 {
        out.push('-');
    } else if !out.is_empty() {
        out.push('+');
    }
    out.push_str(body);
}

/// An entry in an averaging pool: a flat number or a dice formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PoolEntry {
    Number(f64),
    Formula(String),
}

impl From<f64> for PoolEntry {
    fn from(value: f64) -> Self {
        PoolEntry::Number(value)
    }
}

impl From<i64> for PoolEntry {
    fn from(value: i64) -> Self {
        PoolEntry::Number(value as f64)
    }
}

impl From<&str> for PoolEntry {
    fn from(formula: &str) -> Self {
        PoolEntry::Formula(formula.to_string())
    }
}

impl From<String> for PoolEntry {
    fn from(formula: String) -> Self {
        PoolEntry::Formula(formula)
    }
}

/// Expected total of a pool of numbers and formulas.
///
/// Formulas that fail to parse contribute nothing.
pub fn average(pool: &[PoolEntry]) -> f64 {
    pool.iter()
        .map(|entry| match entry {
            PoolEntry::Number(value) => *value,
            PoolEntry::Formula(formula) => parse(formula)
                .map(|terms| terms.iter().map(Term::average).sum())
                .unwrap_or(0.0),
        })
        .sum()
}

/// Build roll components from a formula.
///
/// Each dice term becomes a dice component with a signed count. Non-zero
/// constants become bonus components carrying the same label.
pub fn create_components_from_formula(
    formula: &str,
    label: &str,
) -> Result<Vec<RollComponent>, FormulaError> {
    Ok(components_from_terms(&parse(formula)?, label))
}

fn components_from_terms(terms: &[Term], label: &str) -> Vec<RollComponent> {
    terms
        .iter()
        .filter_map(|term| match *term {
            Term::Rollable { count: 0, .. } => None,
            Term::Rollable { size, count, sign } => {
                Some(RollComponent::dice(count * sign.factor(), size).with_label(label))
            }
            Term::Constant { value: 0, .. } => None,
            Term::Constant { value, sign } => {
                Some(RollComponent::bonus(value * sign.factor()).with_label(label))
            }
        })
        .collect()
}

/// Like [`create_components_from_formula`], but an unparsable formula yields a
/// single zero-valued placeholder instead of an error.
pub fn components_or_placeholder(formula: &str, label: &str) -> Vec<RollComponent> {
    match create_components_from_formula(formula, label) {
        Ok(components) => components,
        Err(e) => {
            tracing::warn!(formula, error = %e, "Invalid dice formula");
            let label = if label.is_empty() {
                INVALID_FORMULA_LABEL.to_string()
            } else {
                format!("{label} {INVALID_FORMULA_LABEL}")
            };
            vec![RollComponent::bonus(0).with_label(label)]
        }
    }
}

/// A parsed dice formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceFormula {
    pub terms: Vec<Term>,
}

impl DiceFormula {
    pub fn parse(formula: &str) -> Result<Self, FormulaError> {
        Ok(Self {
            terms: parse(formula)?,
        })
    }

    pub fn simplified(&self) -> String {
        simplify(&self.terms)
    }

    pub fn average(&self) -> f64 {
        self.terms.iter().map(Term::average).sum()
    }

    pub fn to_components(&self, label: &str) -> Vec<RollComponent> {
        components_from_terms(&self.terms, label)
    }
}

impl FromStr for DiceFormula {
    type Err = FormulaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceFormula::parse(s)
    }
}

impl fmt::Display for DiceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simplified())
    }
}
