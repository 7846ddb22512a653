//! Declarative input generator loaded from the `[input]` table of a spec file.
//!
//! ```toml
//! [[input.line]]
//! items = [{ axis = "N" }, { random = { min = 1, max = "N" } }]
//! [[input.line]]
//! seq = { len = "N", item = { choice = ["L", "R"] } }
//! [[input.line]]
//! grid = { rows = "N", cols = "M", item = { weighted = [{ value = ".", weight = 3 }, { value = "#", weight = 1 }] } }
//! ```

use std::io::Write;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::core::space::ParameterSpec;
use crate::core::types::TestCase;
use crate::error::ConfigurationError;
use crate::io::input::{CaseGenerator, InputWriter};

/// Integer literal or the name of an axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Bound {
    Value(i64),
    Axis(String),
}

/// One emitted token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    Axis(String),
    Int(i64),
    Text(String),
    /// Current index inside a `seq`.
    Index,
    /// Current row inside a `grid`.
    Row,
    /// Current column inside a `grid`.
    Col,
    Random { min: Bound, max: Bound },
    Choice(Vec<String>),
    Weighted(Vec<WeightedValue>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedValue {
    pub value: String,
    pub weight: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqSpec {
    pub len: Bound,
    #[serde(default)]
    pub start: i64,
    pub item: Token,
    /// Emit only indices divisible by this step.
    #[serde(default)]
    pub every: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub rows: Bound,
    pub cols: Bound,
    pub item: Token,
}

/// One line (or, for grids, one block of lines) of the generated input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSpec {
    Items(Vec<Token>),
    Seq(SeqSpec),
    Grid(GridSpec),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateGenerator {
    #[serde(default)]
    pub separator: Option<String>,
    #[serde(default)]
    pub line: Vec<LineSpec>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    index: Option<i64>,
    row: Option<i64>,
    col: Option<i64>,
}

impl TemplateGenerator {
    /// One line listing every axis value in declaration order.
    pub fn axis_line(axes: &[ParameterSpec]) -> Self {
        let items = axes
            .iter()
            .map(|axis| Token::Axis(axis.name.clone()))
            .collect();
        Self {
            separator: None,
            line: vec![LineSpec::Items(items)],
        }
    }

    /// Check that every axis reference names a declared axis and that every
    /// positional token is used where a position exists.
    pub fn validate(&self, axes: &[ParameterSpec]) -> Result<(), ConfigurationError> {
        let known = |name: &str| axes.iter().any(|axis| axis.name == name);
        let check_bound = |bound: &Bound| match bound {
            Bound::Axis(name) if !known(name) => Err(ConfigurationError::new(format!(
                "input template references unknown axis {name:?}"
            ))),
            _ => Ok(()),
        };
        let check_token = |token: &Token, in_seq: bool, in_grid: bool| match token {
            Token::Axis(name) => check_bound(&Bound::Axis(name.clone())),
            Token::Random { min, max } => {
                check_bound(min)?;
                check_bound(max)
            }
            Token::Index if !in_seq => Err(ConfigurationError::new(
                "\"index\" is only valid inside seq",
            )),
            Token::Row | Token::Col if !in_grid => Err(ConfigurationError::new(
                "\"row\"/\"col\" are only valid inside grid",
            )),
            Token::Choice(choices) if choices.is_empty() => {
                Err(ConfigurationError::new("choice needs at least one value"))
            }
            Token::Weighted(values) if values.iter().all(|v| v.weight == 0) => Err(
                ConfigurationError::new("weighted needs at least one positive weight"),
            ),
            _ => Ok(()),
        };

        for line in &self.line {
            match line {
                LineSpec::Items(tokens) => {
                    for token in tokens {
                        check_token(token, false, false)?;
                    }
                }
                LineSpec::Seq(seq) => {
                    check_bound(&seq.len)?;
                    check_token(&seq.item, true, false)?;
                    if matches!(seq.every, Some(step) if step <= 0) {
                        return Err(ConfigurationError::new("seq.every must be > 0"));
                    }
                }
                LineSpec::Grid(grid) => {
                    check_bound(&grid.rows)?;
                    check_bound(&grid.cols)?;
                    check_token(&grid.item, false, true)?;
                }
            }
        }
        Ok(())
    }
}

impl CaseGenerator for TemplateGenerator {
    fn generate<W: Write>(&self, case: &TestCase, out: &mut InputWriter<'_, W>) -> Result<()> {
        if let Some(separator) = &self.separator {
            out.set_separator(separator);
        }
        for line in &self.line {
            match line {
                LineSpec::Items(tokens) => {
                    for token in tokens {
                        let value = eval(token, case, Position::default(), out)?;
                        out.token(value);
                    }
                    out.eol()?;
                }
                LineSpec::Seq(seq) => {
                    let len = resolve(&seq.len, case)?;
                    for index in seq.start..seq.start + len.max(0) {
                        if let Some(step) = seq.every
                            && index % step != 0
                        {
                            continue;
                        }
                        let position = Position {
                            index: Some(index),
                            ..Position::default()
                        };
                        let value = eval(&seq.item, case, position, out)?;
                        out.token(value);
                    }
                    out.eol()?;
                }
                LineSpec::Grid(grid) => {
                    let rows = resolve(&grid.rows, case)?;
                    let cols = resolve(&grid.cols, case)?;
                    for row in 0..rows.max(0) {
                        for col in 0..cols.max(0) {
                            let position = Position {
                                index: None,
                                row: Some(row),
                                col: Some(col),
                            };
                            let value = eval(&grid.item, case, position, out)?;
                            out.token(value);
                        }
                        out.eol()?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn resolve(bound: &Bound, case: &TestCase) -> Result<i64, ConfigurationError> {
    match bound {
        Bound::Value(value) => Ok(*value),
        Bound::Axis(name) => case.get(name).ok_or_else(|| {
            ConfigurationError::new(format!("input template references unknown axis {name:?}"))
        }),
    }
}

fn eval<W: Write>(
    token: &Token,
    case: &TestCase,
    position: Position,
    out: &mut InputWriter<'_, W>,
) -> Result<String> {
    let missing =
        |what: &str| ConfigurationError::new(format!("\"{what}\" used outside its block"));
    let value = match token {
        Token::Axis(name) => resolve(&Bound::Axis(name.clone()), case)?.to_string(),
        Token::Int(value) => value.to_string(),
        Token::Text(text) => text.clone(),
        Token::Index => position.index.ok_or_else(|| missing("index"))?.to_string(),
        Token::Row => position.row.ok_or_else(|| missing("row"))?.to_string(),
        Token::Col => position.col.ok_or_else(|| missing("col"))?.to_string(),
        Token::Random { min, max } => {
            let min = resolve(min, case)?;
            let max = resolve(max, case)?;
            out.random().range(min, max)?.to_string()
        }
        Token::Choice(choices) => out.random().choice(choices)?.clone(),
        Token::Weighted(values) => {
            let weighted: Vec<(&str, u32)> = values
                .iter()
                .map(|v| (v.value.as_str(), v.weight))
                .collect();
            out.random().weighted_choice(&weighted)?.to_string()
        }
    };
    Ok(value)
}
