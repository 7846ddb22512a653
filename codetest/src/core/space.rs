//! Odometer iteration over named integer axes.
//!
//! Axes are enumerated in declaration order with the last-declared axis varying
//! fastest. The iterator is deterministic: the same declarations always yield
//! the same sequence of bindings.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigurationError;

static RANGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+)\s*\.\.\s*(-?\d+)\s*$").expect("valid range regex"));
static LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(-?\d+)\s*$").expect("valid literal regex"));
static OVERRIDE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.+)$").expect("valid override regex"));

/// One axis of the parameter space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    pub min: i64,
    pub max: i64,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, min: i64, max: i64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }

    /// Fixed single-point axis.
    pub fn constant(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, value, value)
    }

    /// Number of points on this axis.
    pub fn len(&self) -> u128 {
        (i128::from(self.max) - i128::from(self.min) + 1) as u128
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }
}

/// Axis declaration value: either `"min..max"` or a literal integer.
pub fn parse_axis(name: &str, value: &str) -> Result<ParameterSpec, ConfigurationError> {
    if let Some(caps) = RANGE_RE.captures(value) {
        let min = parse_bound(name, &caps[1])?;
        let max = parse_bound(name, &caps[2])?;
        return Ok(ParameterSpec::new(name, min, max));
    }
    if let Some(caps) = LITERAL_RE.captures(value) {
        let literal = parse_bound(name, &caps[1])?;
        return Ok(ParameterSpec::constant(name, literal));
    }
    Err(ConfigurationError::new(format!(
        "axis {name}: expected an integer or \"min..max\", got {value:?}"
    )))
}

fn parse_bound(name: &str, raw: &str) -> Result<i64, ConfigurationError> {
    raw.parse::<i64>().map_err(|err| {
        ConfigurationError::new(format!("axis {name}: {raw:?} out of range ({err})"))
    })
}

/// Parse a `NAME=VALUE` command-line axis override.
pub fn parse_override(arg: &str) -> Result<ParameterSpec, ConfigurationError> {
    let caps = OVERRIDE_RE.captures(arg).ok_or_else(|| {
        ConfigurationError::new(format!("invalid axis override {arg:?} (expected NAME=VALUE)"))
    })?;
    parse_axis(&caps[1], &caps[2])
}

/// Replace declared axes by name or append new ones, keeping declaration order.
pub fn apply_overrides(axes: &mut Vec<ParameterSpec>, overrides: Vec<ParameterSpec>) {
    for spec in overrides {
        match axes.iter_mut().find(|axis| axis.name == spec.name) {
            Some(existing) => *existing = spec,
            None => axes.push(spec),
        }
    }
}

/// Current axis values, readable by input generators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: Vec<(String, i64)>,
}

impl Bindings {
    pub fn get(&self, name: &str) -> Option<i64> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(key, value)| (key.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// File-name friendly rendering, e.g. `A-1-B-2`.
    pub fn archive_key(&self) -> String {
        if self.values.is_empty() {
            return "case".to_string();
        }
        self.values
            .iter()
            .map(|(key, value)| format!("{key}-{value}"))
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.values.is_empty() {
            return f.write_str("(no parameters)");
        }
        for (index, (key, value)) in self.values.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key} = {value}")?;
        }
        Ok(())
    }
}

impl FromIterator<(String, i64)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Active,
    Exhausted,
}

/// Mixed-radix counter over the Cartesian product of all axes.
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    specs: Vec<ParameterSpec>,
    current: Vec<i64>,
    bindings: Bindings,
    phase: Phase,
}

impl ParameterSpace {
    /// Build a space, rejecting duplicate names and inverted ranges.
    pub fn new(specs: Vec<ParameterSpec>) -> Result<Self, ConfigurationError> {
        for (index, spec) in specs.iter().enumerate() {
            if spec.is_empty() {
                return Err(ConfigurationError::new(format!(
                    "axis {}: min {} exceeds max {}",
                    spec.name, spec.min, spec.max
                )));
            }
            if specs[..index].iter().any(|prior| prior.name == spec.name) {
                return Err(ConfigurationError::new(format!(
                    "axis {} declared twice",
                    spec.name
                )));
            }
        }
        let current = specs.iter().map(|spec| spec.min).collect();
        Ok(Self {
            specs,
            current,
            bindings: Bindings::default(),
            phase: Phase::Fresh,
        })
    }

    /// Number of combinations the space will yield.
    pub fn total_cases(&self) -> u128 {
        self.specs
            .iter()
            .fold(1u128, |acc, spec| acc.saturating_mul(spec.len()))
    }

    /// Move to the next combination.
    ///
    /// The first call binds every axis to its minimum and always returns `true`,
    /// even with no axes. Returns `false` once the product is exhausted, after
    /// which the bindings are cleared.
    pub fn advance(&mut self) -> bool {
        match self.phase {
            Phase::Fresh => {
                self.reset_counter();
                self.phase = Phase::Active;
                self.publish();
                true
            }
            Phase::Active => {
                if self.increment() {
                    self.publish();
                    true
                } else {
                    self.phase = Phase::Exhausted;
                    self.bindings = Bindings::default();
                    false
                }
            }
            Phase::Exhausted => false,
        }
    }

    /// Current binding; empty before the first advance and after exhaustion.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Return to the state before the first `advance`.
    pub fn restart(&mut self) {
        self.reset_counter();
        self.bindings = Bindings::default();
        self.phase = Phase::Fresh;
    }

    fn increment(&mut self) -> bool {
        for idx in (0..self.specs.len()).rev() {
            let spec = &self.specs[idx];
            if self.current[idx] < spec.max {
                self.current[idx] += 1;
                return true;
            }
            self.current[idx] = spec.min;
        }
        false
    }

    fn reset_counter(&mut self) {
        for (slot, spec) in self.current.iter_mut().zip(&self.specs) {
            *slot = spec.min;
        }
    }

    fn publish(&mut self) {
        self.bindings = self
            .specs
            .iter()
            .zip(&self.current)
            .map(|(spec, value)| (spec.name.clone(), *value))
            .collect();
    }
}
