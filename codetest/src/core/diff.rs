//! Line-oriented comparison of golden and candidate outputs.
//!
//! A single trailing newline on either side is ignored, so `"1\n2\n"` and
//! `"1\n2"` compare equal. Line numbers are 1-based and tracked independently
//! for the reference (old) and candidate (new) sides.

use std::fmt::Write as _;

/// Upper bound on the alignment table; larger middles fall back to a
/// positional replace.
const MAX_TABLE_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Line present on both sides.
    Context,
    /// Line only in the reference output.
    Removed,
    /// Line only in the candidate output.
    Added,
    /// Reference line replaced by a candidate line at the same hunk offset.
    Changed,
}

/// One entry of the ordered change list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub old_line: Option<usize>,
    pub new_line: Option<usize>,
    pub old_text: Option<String>,
    pub new_text: Option<String>,
}

impl ChangeRecord {
    fn context(old_line: usize, new_line: usize, text: &str) -> Self {
        Self {
            kind: ChangeKind::Context,
            old_line: Some(old_line),
            new_line: Some(new_line),
            old_text: Some(text.to_string()),
            new_text: Some(text.to_string()),
        }
    }

    fn removed(old_line: usize, text: &str) -> Self {
        Self {
            kind: ChangeKind::Removed,
            old_line: Some(old_line),
            new_line: None,
            old_text: Some(text.to_string()),
            new_text: None,
        }
    }

    fn added(new_line: usize, text: &str) -> Self {
        Self {
            kind: ChangeKind::Added,
            old_line: None,
            new_line: Some(new_line),
            old_text: None,
            new_text: Some(text.to_string()),
        }
    }

    fn changed(old_line: usize, old: &str, new_line: usize, new: &str) -> Self {
        Self {
            kind: ChangeKind::Changed,
            old_line: Some(old_line),
            new_line: Some(new_line),
            old_text: Some(old.to_string()),
            new_text: Some(new.to_string()),
        }
    }

    pub fn is_change(&self) -> bool {
        self.kind != ChangeKind::Context
    }
}

/// Verdict plus the full ordered record list (context included).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    records: Vec<ChangeRecord>,
}

impl DiffResult {
    pub fn passed(&self) -> bool {
        !self.records.iter().any(ChangeRecord::is_change)
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Non-context records, in order.
    pub fn changes(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(|record| record.is_change())
    }

    /// Annotated listing of every change with `context` surrounding lines.
    ///
    /// Each block starts with an `@@ -old +new @@` header; removed lines are
    /// prefixed with `-`, added lines with `+`.
    pub fn render(&self, context: usize) -> String {
        let visible = self.visible_mask(context);
        let width = self.number_width();
        let mut out = String::new();
        let mut in_block = false;
        for (record, show) in self.records.iter().zip(visible) {
            if !show {
                in_block = false;
                continue;
            }
            if !in_block {
                let _ = writeln!(
                    out,
                    "@@ -{} +{} @@",
                    record.old_line.map_or("?".to_string(), |n| n.to_string()),
                    record.new_line.map_or("?".to_string(), |n| n.to_string()),
                );
                in_block = true;
            }
            render_record(&mut out, record, width);
        }
        out
    }

    fn visible_mask(&self, context: usize) -> Vec<bool> {
        let mut visible = vec![false; self.records.len()];
        for (index, record) in self.records.iter().enumerate() {
            if !record.is_change() {
                continue;
            }
            let start = index.saturating_sub(context);
            let end = (index + context + 1).min(self.records.len());
            for slot in &mut visible[start..end] {
                *slot = true;
            }
        }
        visible
    }

    fn number_width(&self) -> usize {
        let max_line = self
            .records
            .iter()
            .flat_map(|record| [record.old_line, record.new_line])
            .flatten()
            .max()
            .unwrap_or(1);
        max_line.to_string().len()
    }
}

fn render_record(out: &mut String, record: &ChangeRecord, width: usize) {
    let number = |line: Option<usize>| match line {
        Some(n) => format!("{n:>width$}"),
        None => " ".repeat(width),
    };
    let old_text = record.old_text.as_deref().unwrap_or_default();
    let new_text = record.new_text.as_deref().unwrap_or_default();
    let blank = number(None);
    match record.kind {
        ChangeKind::Context => {
            let _ = writeln!(
                out,
                "  {} {} | {old_text}",
                number(record.old_line),
                number(record.new_line)
            );
        }
        ChangeKind::Removed => {
            let _ = writeln!(out, "- {} {blank} | {old_text}", number(record.old_line));
        }
        ChangeKind::Added => {
            let _ = writeln!(out, "+ {blank} {} | {new_text}", number(record.new_line));
        }
        ChangeKind::Changed => {
            let _ = writeln!(out, "- {} {blank} | {old_text}", number(record.old_line));
            let _ = writeln!(out, "+ {blank} {} | {new_text}", number(record.new_line));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Compare reference output against candidate output.
pub fn diff_outputs(reference: &str, candidate: &str) -> DiffResult {
    let old = split_lines(reference);
    let new = split_lines(candidate);
    let ops = align(&old, &new);
    DiffResult {
        records: build_records(&ops, &old, &new),
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    let body = text.strip_suffix('\n').unwrap_or(text);
    if body.is_empty() {
        return Vec::new();
    }
    body.split('\n').collect()
}

fn align(old: &[&str], new: &[&str]) -> Vec<Op> {
    let prefix = old
        .iter()
        .zip(new)
        .take_while(|(left, right)| left == right)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(left, right)| left == right)
        .count();

    let mut ops: Vec<Op> = (0..prefix).map(|i| Op::Equal(i, i)).collect();
    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];
    align_middle(old_mid, new_mid, prefix, &mut ops);
    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    ops.extend((0..suffix).map(|k| Op::Equal(old_tail + k, new_tail + k)));
    ops
}

fn align_middle(old: &[&str], new: &[&str], offset: usize, ops: &mut Vec<Op>) {
    let rows = old.len() + 1;
    let cols = new.len() + 1;
    if rows.saturating_mul(cols) > MAX_TABLE_CELLS {
        ops.extend((0..old.len()).map(|i| Op::Delete(offset + i)));
        ops.extend((0..new.len()).map(|j| Op::Insert(offset + j)));
        return;
    }

    // lcs[i * cols + j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![0u32; rows * cols];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i * cols + j] = if old[i] == new[j] {
                lcs[(i + 1) * cols + j + 1] + 1
            } else {
                lcs[(i + 1) * cols + j].max(lcs[i * cols + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            ops.push(Op::Equal(offset + i, offset + j));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * cols + j] >= lcs[i * cols + j + 1] {
            ops.push(Op::Delete(offset + i));
            i += 1;
        } else {
            ops.push(Op::Insert(offset + j));
            j += 1;
        }
    }
    ops.extend((i..old.len()).map(|k| Op::Delete(offset + k)));
    ops.extend((j..new.len()).map(|k| Op::Insert(offset + k)));
}

fn build_records(ops: &[Op], old: &[&str], new: &[&str]) -> Vec<ChangeRecord> {
    let mut records = Vec::with_capacity(ops.len());
    let mut deleted: Vec<usize> = Vec::new();
    let mut inserted: Vec<usize> = Vec::new();

    for op in ops {
        match *op {
            Op::Equal(i, j) => {
                flush_run(&mut records, &mut deleted, &mut inserted, old, new);
                records.push(ChangeRecord::context(i + 1, j + 1, old[i]));
            }
            Op::Delete(i) => deleted.push(i),
            Op::Insert(j) => inserted.push(j),
        }
    }
    flush_run(&mut records, &mut deleted, &mut inserted, old, new);
    records
}

fn flush_run(
    records: &mut Vec<ChangeRecord>,
    deleted: &mut Vec<usize>,
    inserted: &mut Vec<usize>,
    old: &[&str],
    new: &[&str],
) {
    let paired = deleted.len().min(inserted.len());
    for (&i, &j) in deleted.iter().zip(inserted.iter()) {
        records.push(ChangeRecord::changed(i + 1, old[i], j + 1, new[j]));
    }
    for &i in &deleted[paired..] {
        records.push(ChangeRecord::removed(i + 1, old[i]));
    }
    for &j in &inserted[paired..] {
        records.push(ChangeRecord::added(j + 1, new[j]));
    }
    deleted.clear();
    inserted.clear();
}
