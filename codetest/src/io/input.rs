//! Structured input emission for generated test cases.
//!
//! Tokens accumulate on the current line and are joined with the item
//! separator; a line is only written when [`InputWriter::eol`] is called.

use std::fmt::Display;
use std::io::Write;
use std::ops::Range;

use anyhow::{Context, Result};

use crate::core::random::RandomSource;
use crate::core::types::TestCase;

pub const DEFAULT_SEPARATOR: &str = " ";

/// Produces the input text for one test case.
///
/// The case carries the axis bindings; implementations read them from there
/// rather than from any shared state.
pub trait CaseGenerator {
    fn generate<W: Write>(&self, case: &TestCase, out: &mut InputWriter<'_, W>) -> Result<()>;
}

/// Line-buffered token writer over any sink.
pub struct InputWriter<'a, W: Write> {
    out: W,
    random: &'a mut RandomSource,
    separator: String,
    line: Vec<String>,
}

impl<'a, W: Write> InputWriter<'a, W> {
    pub fn new(out: W, random: &'a mut RandomSource) -> Self {
        Self {
            out,
            random,
            separator: DEFAULT_SEPARATOR.to_string(),
            line: Vec::new(),
        }
    }

    pub fn set_separator(&mut self, separator: &str) -> &mut Self {
        self.separator = separator.to_string();
        self
    }

    /// The random source shared by every case of the run.
    pub fn random(&mut self) -> &mut RandomSource {
        &mut *self.random
    }

    pub fn token(&mut self, value: impl Display) -> &mut Self {
        self.line.push(value.to_string());
        self
    }

    pub fn int(&mut self, value: i64) -> &mut Self {
        self.token(value)
    }

    pub fn str(&mut self, value: &str) -> &mut Self {
        self.token(value)
    }

    /// Terminate the current line.
    pub fn eol(&mut self) -> Result<()> {
        let mut line = self.line.join(&self.separator);
        line.push('\n');
        self.line.clear();
        self.out
            .write_all(line.as_bytes())
            .context("write input line")?;
        Ok(())
    }

    /// Emit one line with the values produced for each index; `None` skips the index.
    pub fn seq<T, F>(&mut self, indices: Range<i64>, mut value: F) -> Result<()>
    where
        T: Display,
        F: FnMut(i64, &mut RandomSource) -> Result<Option<T>>,
    {
        for index in indices {
            if let Some(item) = value(index, &mut *self.random)? {
                self.token(item);
            }
        }
        self.eol()
    }

    /// Emit a row-major grid, one line per row.
    pub fn grid<T, F>(&mut self, rows: Range<i64>, cols: Range<i64>, mut value: F) -> Result<()>
    where
        T: Display,
        F: FnMut(i64, i64, &mut RandomSource) -> Result<Option<T>>,
    {
        for row in rows {
            for col in cols.clone() {
                if let Some(item) = value(row, col, &mut *self.random)? {
                    self.token(item);
                }
            }
            self.eol()?;
        }
        Ok(())
    }

    /// Emit a uniformly chosen alternative.
    pub fn choice<T: Display>(&mut self, choices: &[T]) -> Result<&mut Self> {
        let picked = self.random.choice(choices)?.to_string();
        Ok(self.token(picked))
    }

    /// Emit an alternative chosen proportionally to its weight.
    pub fn weighted_choice<T: Display>(&mut self, choices: &[(T, u32)]) -> Result<&mut Self> {
        let picked = self.random.weighted_choice(choices)?.to_string();
        Ok(self.token(picked))
    }

    /// Emit a uniform integer in `min..=max`.
    pub fn range(&mut self, min: i64, max: i64) -> Result<&mut Self> {
        let value = self.random.range(min, max)?;
        Ok(self.token(value))
    }

    /// Flush pending tokens (without adding a newline) and return the sink.
    pub fn finish(mut self) -> Result<W> {
        if !self.line.is_empty() {
            let line = self.line.join(&self.separator);
            self.out
                .write_all(line.as_bytes())
                .context("write input line")?;
        }
        self.out.flush().context("flush input")?;
        Ok(self.out)
    }
}
