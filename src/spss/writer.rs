//! Encodes a [`Dataset`] as a little-endian SPSS system file.
//!
//! Strings wider than 255 bytes are split into 252-byte segments and described by a
//! very long string record. String value labels are not written.

use std::{
    collections::HashSet,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use chrono::Local;
use log::warn;

use super::{Column, Dataset, Format, MissingValues, Variable, SYSMIS};
use crate::error::{Error, Result};

const BIAS: f64 = 100.0;
const MAX_SEGMENT_WIDTH: usize = 255;
const SEGMENT_BYTES: usize = 252;
const MAX_STRING_WIDTH: usize = 32767;
const MAX_LABEL_LEN: usize = 255;
const MAX_VALUE_LABEL_LEN: usize = 120;

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Use bytecode compression for the data records.
    pub compress: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions { compress: true }
    }
}

pub fn write_sav(path: &Path, dataset: &Dataset, options: WriteOptions) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_dataset(&mut writer, dataset, options)?;
    writer.flush()?;
    Ok(())
}

pub fn write_dataset<W: Write>(
    w: &mut W,
    dataset: &Dataset,
    options: WriteOptions,
) -> Result<()> {
    if dataset.variables.len() != dataset.columns.len() {
        return Err(Error::spss("variable and column counts differ"));
    }
    let n_cases = dataset.n_cases();
    if dataset.columns.iter().any(|c| c.len() != n_cases) {
        return Err(Error::spss("columns have different lengths"));
    }

    let layout = Layout::new(&dataset.variables, &dataset.columns);

    write_header(w, dataset, &layout, n_cases, options)?;
    for (var, entry) in dataset.variables.iter().zip(&layout.entries) {
        write_variable(w, var, entry)?;
    }
    for (var, entry) in dataset.variables.iter().zip(&layout.entries) {
        if var.is_numeric() && !var.value_labels.is_empty() {
            write_value_labels(w, var, entry.segments[0].first_slot)?;
        }
    }
    write_extensions(w, dataset, &layout)?;
    put_i32(w, 999)?;
    put_i32(w, 0)?;

    let mut data = DataWriter::new(w, options.compress);
    for row in 0..n_cases {
        for (column, entry) in dataset.columns.iter().zip(&layout.entries) {
            match column {
                Column::Numeric(values) => data.number(values[row])?,
                Column::Text(values) => {
                    let value = truncate_bytes(&values[row], entry.width).as_bytes();
                    let mut start = 0;
                    for segment in &entry.segments {
                        let end = (start + segment.used_bytes()).min(value.len());
                        data.text(&value[start..end], segment.width)?;
                        start = end;
                    }
                }
            }
        }
    }
    data.finish()
}

/// One dictionary variable. Strings wider than 255 bytes take several.
struct Segment {
    short_name: String,
    width: usize,
    /// 1-based dictionary index.
    first_slot: i32,
    last: bool,
}

impl Segment {
    fn n_slots(&self) -> usize {
        if self.width == 0 {
            1
        } else {
            self.width.div_ceil(8)
        }
    }

    /// Bytes of the value stored in this segment.
    fn used_bytes(&self) -> usize {
        if self.last {
            self.width
        } else {
            SEGMENT_BYTES
        }
    }
}

struct LayoutEntry {
    width: usize,
    segments: Vec<Segment>,
}

impl LayoutEntry {
    fn is_very_long(&self) -> bool {
        self.segments.len() > 1
    }
}

struct Layout {
    entries: Vec<LayoutEntry>,
    n_slots: usize,
}

impl Layout {
    fn new(variables: &[Variable], columns: &[Column]) -> Self {
        let mut used = HashSet::new();
        let mut entries = Vec::with_capacity(variables.len());
        let mut next_slot = 1;
        for (var, column) in variables.iter().zip(columns) {
            let width = match column {
                Column::Numeric(_) => 0,
                // Re-encoded text can be longer than the declared width.
                Column::Text(values) => {
                    let longest = values.iter().map(String::len).max().unwrap_or(0);
                    let width = var.width.max(longest).max(1);
                    if width > MAX_STRING_WIDTH {
                        warn!(
                            "Truncating `{}` from {width} to {MAX_STRING_WIDTH} bytes",
                            var.name
                        );
                    }
                    width.min(MAX_STRING_WIDTH)
                }
            };

            let n_segments = if width > MAX_SEGMENT_WIDTH {
                width.div_ceil(SEGMENT_BYTES)
            } else {
                1
            };
            let first_name = short_name(&var.name, &mut used);
            let mut segments = Vec::with_capacity(n_segments);
            for i in 0..n_segments {
                let last = i + 1 == n_segments;
                let segment_width = match (n_segments, last) {
                    (1, _) => width,
                    (_, false) => MAX_SEGMENT_WIDTH,
                    (_, true) => width - SEGMENT_BYTES * (n_segments - 1),
                };
                let name = if i == 0 {
                    first_name.clone()
                } else {
                    let suffix = i.to_string();
                    let mut prefix = first_name.clone();
                    prefix.truncate(8 - suffix.len().min(7));
                    short_name(&format!("{prefix}{suffix}"), &mut used)
                };
                let segment = Segment {
                    short_name: name,
                    width: segment_width,
                    first_slot: next_slot,
                    last,
                };
                next_slot += segment.n_slots() as i32;
                segments.push(segment);
            }
            entries.push(LayoutEntry { width, segments });
        }
        Layout {
            entries,
            n_slots: (next_slot - 1) as usize,
        }
    }
}

/// Derives a unique upper-case name of at most eight bytes.
fn short_name(name: &str, used: &mut HashSet<String>) -> String {
    let mut base: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '@' | '#' | '$' | '.'))
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if !base.starts_with(|c: char| c.is_ascii_alphabetic() || c == '@') {
        base.insert(0, 'V');
    }
    base.truncate(8);

    let mut candidate = base.clone();
    let mut n = 1;
    while used.contains(&candidate) {
        let suffix = n.to_string();
        let mut prefix = base.clone();
        prefix.truncate(8 - suffix.len());
        candidate = format!("{prefix}{suffix}");
        n += 1;
    }
    used.insert(candidate.clone());
    candidate
}

fn write_header<W: Write>(
    w: &mut W,
    dataset: &Dataset,
    layout: &Layout,
    n_cases: usize,
    options: WriteOptions,
) -> Result<()> {
    let now = Local::now();
    w.write_all(b"$FL2")?;
    put_padded(w, "@(#) SPSS DATA FILE ess-eosc", 60)?;
    put_i32(w, 2)?;
    put_i32(w, layout.n_slots as i32)?;
    put_i32(w, i32::from(options.compress))?;
    put_i32(w, 0)?;
    put_i32(w, i32::try_from(n_cases).unwrap_or(-1))?;
    put_f64(w, BIAS)?;
    put_padded(w, &now.format("%d %b %y").to_string(), 9)?;
    put_padded(w, &now.format("%H:%M:%S").to_string(), 8)?;
    put_padded(w, &dataset.file_label, 64)?;
    w.write_all(&[0u8; 3])?;
    Ok(())
}

fn write_variable<W: Write>(w: &mut W, var: &Variable, entry: &LayoutEntry) -> Result<()> {
    let missing: (i32, Vec<[u8; 8]>) = match &var.missing {
        MissingValues::None => (0, vec![]),
        MissingValues::Discrete(values) if entry.width == 0 => (
            values.len().min(3) as i32,
            values.iter().take(3).map(|v| v.to_le_bytes()).collect(),
        ),
        MissingValues::Range { low, high } if entry.width == 0 => {
            (-2, vec![low.to_le_bytes(), high.to_le_bytes()])
        }
        MissingValues::RangeAndValue { low, high, value } if entry.width == 0 => (
            -3,
            vec![low.to_le_bytes(), high.to_le_bytes(), value.to_le_bytes()],
        ),
        MissingValues::Strings(values) if entry.width > 0 && entry.width <= 8 => {
            (values.len().min(3) as i32, values.iter().take(3).copied().collect())
        }
        _ => (0, vec![]),
    };

    let first = &entry.segments[0];
    let mut print = var.print;
    let mut write = var.write;
    if first.width > 0 {
        print.width = print.width.min(first.width as u8);
        write.width = write.width.min(first.width as u8);
    }
    write_segment(w, first, var.label.as_deref(), missing, print, write)?;

    for segment in &entry.segments[1..] {
        let format = Format::string(segment.width as u8);
        write_segment(w, segment, None, (0, vec![]), format, format)?;
    }
    Ok(())
}

fn write_segment<W: Write>(
    w: &mut W,
    segment: &Segment,
    label: Option<&str>,
    missing: (i32, Vec<[u8; 8]>),
    print: Format,
    write: Format,
) -> Result<()> {
    put_i32(w, 2)?;
    put_i32(w, segment.width as i32)?;
    put_i32(w, i32::from(label.is_some()))?;
    put_i32(w, missing.0)?;
    put_i32(w, print.pack())?;
    put_i32(w, write.pack())?;
    put_padded(w, &segment.short_name, 8)?;

    if let Some(label) = label {
        let label = truncate_bytes(label, MAX_LABEL_LEN);
        put_i32(w, label.len() as i32)?;
        put_padded(w, label, label.len().div_ceil(4) * 4)?;
    }
    for value in &missing.1 {
        w.write_all(value)?;
    }

    for _ in 1..segment.n_slots() {
        put_i32(w, 2)?;
        put_i32(w, -1)?;
        put_i32(w, 0)?;
        put_i32(w, 0)?;
        put_i32(w, 0)?;
        put_i32(w, 0)?;
        put_padded(w, "", 8)?;
    }
    Ok(())
}

fn write_value_labels<W: Write>(w: &mut W, var: &Variable, slot: i32) -> Result<()> {
    put_i32(w, 3)?;
    put_i32(w, var.value_labels.len() as i32)?;
    for (value, label) in &var.value_labels {
        put_f64(w, *value)?;
        let label = truncate_bytes(label, MAX_VALUE_LABEL_LEN);
        w.write_all(&[label.len() as u8])?;
        put_padded(w, label, (label.len() + 1).div_ceil(8) * 8 - 1)?;
    }
    put_i32(w, 4)?;
    put_i32(w, 1)?;
    put_i32(w, slot)?;
    Ok(())
}

fn write_extensions<W: Write>(w: &mut W, dataset: &Dataset, layout: &Layout) -> Result<()> {
    // Machine integer info: version, machine code, IEEE floats, compression,
    // little-endian, UTF-8 code page.
    put_extension_header(w, 3, 4, 8)?;
    for value in [1, 0, 0, -1, 1, 1, 2, 65001] {
        put_i32(w, value)?;
    }

    // Machine floating-point info: sysmis, highest, lowest.
    put_extension_header(w, 4, 8, 3)?;
    put_f64(w, SYSMIS)?;
    put_f64(w, f64::MAX)?;
    put_f64(w, f64::from_bits(SYSMIS.to_bits() - 1))?;

    let long_names = dataset
        .variables
        .iter()
        .zip(&layout.entries)
        .map(|(var, entry)| {
            let short_name = &entry.segments[0].short_name;
            format!("{short_name}={}", truncate_bytes(&var.name, 64))
        })
        .collect::<Vec<_>>()
        .join("\t");
    put_extension_header(w, 13, 1, long_names.len() as i32)?;
    w.write_all(long_names.as_bytes())?;

    let very_long: String = layout
        .entries
        .iter()
        .filter(|entry| entry.is_very_long())
        .map(|entry| format!("{}={:05}\0\t", entry.segments[0].short_name, entry.width))
        .collect();
    if !very_long.is_empty() {
        put_extension_header(w, 14, 1, very_long.len() as i32)?;
        w.write_all(very_long.as_bytes())?;
    }

    let encoding = "UTF-8";
    put_extension_header(w, 20, 1, encoding.len() as i32)?;
    w.write_all(encoding.as_bytes())?;
    Ok(())
}

fn put_extension_header<W: Write>(w: &mut W, subtype: i32, size: i32, count: i32) -> Result<()> {
    put_i32(w, 7)?;
    put_i32(w, subtype)?;
    put_i32(w, size)?;
    put_i32(w, count)?;
    Ok(())
}

fn put_i32<W: Write>(w: &mut W, value: i32) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn put_f64<W: Write>(w: &mut W, value: f64) -> Result<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn put_padded<W: Write>(w: &mut W, text: &str, len: usize) -> Result<()> {
    let bytes = truncate_bytes(text, len).as_bytes();
    w.write_all(bytes)?;
    for _ in bytes.len()..len {
        w.write_all(b" ")?;
    }
    Ok(())
}

/// Cuts `text` to at most `max` bytes on a character boundary.
fn truncate_bytes(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

struct DataWriter<'w, W: Write> {
    w: &'w mut W,
    compress: bool,
    opcodes: Vec<u8>,
    pending: Vec<[u8; 8]>,
}

impl<'w, W: Write> DataWriter<'w, W> {
    fn new(w: &'w mut W, compress: bool) -> Self {
        DataWriter {
            w,
            compress,
            opcodes: Vec::with_capacity(8),
            pending: Vec::with_capacity(8),
        }
    }

    fn number(&mut self, value: Option<f64>) -> Result<()> {
        let value = value.filter(|v| !v.is_nan());
        if !self.compress {
            self.w.write_all(&value.unwrap_or(SYSMIS).to_le_bytes())?;
            return Ok(());
        }
        match value {
            None => self.opcode(255, None),
            Some(v) if v.fract() == 0.0 && (1.0 - BIAS..=251.0 - BIAS).contains(&v) => {
                self.opcode((v + BIAS) as u8, None)
            }
            Some(v) => self.opcode(253, Some(v.to_le_bytes())),
        }
    }

    fn text(&mut self, value: &[u8], width: usize) -> Result<()> {
        let n_slots = width.div_ceil(8);
        for i in 0..n_slots {
            let mut chunk = [b' '; 8];
            let start = (i * 8).min(value.len());
            let end = ((i + 1) * 8).min(value.len());
            chunk[..end - start].copy_from_slice(&value[start..end]);

            if !self.compress {
                self.w.write_all(&chunk)?;
            } else if chunk == [b' '; 8] {
                self.opcode(254, None)?;
            } else {
                self.opcode(253, Some(chunk))?;
            }
        }
        Ok(())
    }

    fn opcode(&mut self, code: u8, raw: Option<[u8; 8]>) -> Result<()> {
        self.opcodes.push(code);
        if let Some(raw) = raw {
            self.pending.push(raw);
        }
        if self.opcodes.len() == 8 {
            self.flush_block()?;
        }
        Ok(())
    }

    fn flush_block(&mut self) -> Result<()> {
        let mut block = [0u8; 8];
        block[..self.opcodes.len()].copy_from_slice(&self.opcodes);
        self.w.write_all(&block)?;
        for raw in self.pending.drain(..) {
            self.w.write_all(&raw)?;
        }
        self.opcodes.clear();
        Ok(())
    }

    fn finish(mut self) -> Result<()> {
        if self.compress && !self.opcodes.is_empty() {
            self.flush_block()?;
        }
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
