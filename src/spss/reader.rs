//! Decodes an SPSS system file into a [`Dataset`].

use std::{collections::HashMap, fs, path::Path};

use encoding_rs::{Encoding, WINDOWS_1252};
use log::debug;

use super::{Column, Dataset, Format, MissingValues, Variable, SYSMIS};
use crate::error::{Error, Result};

const HEADER_LEN: usize = 176;
const SPACES: [u8; 8] = [b' '; 8];

pub fn read_sav(path: &Path) -> Result<Dataset> {
    let bytes = fs::read(path)?;
    parse_sav(&bytes).map_err(|e| match e {
        Error::Spss { reason } => Error::spss(format!("{}: {reason}", path.display())),
        other => other,
    })
}

pub fn parse_sav(bytes: &[u8]) -> Result<Dataset> {
    let mut cursor = Cursor::new(bytes)?;
    let header = Header::read(&mut cursor)?;
    let dictionary = Dictionary::read(&mut cursor)?;
    let encoding = dictionary.encoding();
    let layout = dictionary.layout(encoding)?;
    debug!(
        "SPSS dictionary: {} variables in {} slots, compression {}, encoding {}",
        layout.len(),
        dictionary.slots.len(),
        header.compression,
        encoding.name()
    );

    let mut columns: Vec<Column> = layout
        .iter()
        .map(|v| {
            if v.variable.is_numeric() {
                Column::Numeric(Vec::new())
            } else {
                Column::Text(Vec::new())
            }
        })
        .collect();

    let n_slots = dictionary.slots.len();
    let mut source: Box<dyn SlotSource + '_> = match header.compression {
        0 => Box::new(RawSlots { cursor }),
        1 => Box::new(CompressedSlots::new(cursor, header.bias)),
        other => {
            return Err(Error::spss(format!(
                "compression type {other} is not supported"
            )))
        }
    };

    let mut case = Vec::with_capacity(n_slots);
    let mut n_cases = 0usize;
    loop {
        if header.n_cases >= 0 && n_cases == header.n_cases as usize {
            break;
        }
        case.clear();
        for i in 0..n_slots {
            match source.next_slot()? {
                Some(slot) => case.push(slot),
                None if i == 0 => break,
                None => return Err(Error::spss("file ends in the middle of a case")),
            }
        }
        if case.is_empty() {
            break;
        }

        for (column, var) in columns.iter_mut().zip(&layout) {
            match column {
                Column::Numeric(values) => {
                    values.push(case[var.segments[0].0].as_number(header.big_endian))
                }
                Column::Text(values) => values.push(var.decode_string(&case, encoding)),
            }
        }
        n_cases += 1;
    }

    Ok(Dataset {
        file_label: decode_text(&header.file_label, encoding),
        variables: layout.into_iter().map(|v| v.variable).collect(),
        columns,
    })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::spss("file is too short for an SPSS header"));
        }
        // The layout code is 2 or 3 in the file's byte order.
        let layout = [bytes[64], bytes[65], bytes[66], bytes[67]];
        let big_endian = !matches!(i32::from_le_bytes(layout), 2 | 3);
        Ok(Cursor {
            bytes,
            pos: 0,
            big_endian,
        })
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::spss(format!(
                "unexpected end of file at byte {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take8(&mut self) -> Result<[u8; 8]> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.take(8)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(if self.big_endian {
            i32::from_be_bytes(raw)
        } else {
            i32::from_le_bytes(raw)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let raw = self.take8()?;
        Ok(decode_f64(raw, self.big_endian))
    }

    fn bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }
}

fn decode_f64(raw: [u8; 8], big_endian: bool) -> f64 {
    if big_endian {
        f64::from_be_bytes(raw)
    } else {
        f64::from_le_bytes(raw)
    }
}

fn decode_text(bytes: &[u8], encoding: &'static Encoding) -> String {
    let (text, _) = encoding.decode_without_bom_handling(bytes);
    text.trim_end_matches([' ', '\0']).to_string()
}

/// Maps the character code of the machine integer record to an encoding.
fn code_page_encoding(code: i32) -> Option<&'static Encoding> {
    let label = match code {
        2 | 3 | 20127 => "windows-1252".to_string(),
        65001 => "utf-8".to_string(),
        28591..=28599 => format!("iso-8859-{}", code - 28590),
        other => format!("windows-{other}"),
    };
    Encoding::for_label(label.as_bytes())
        .or_else(|| Encoding::for_label(format!("cp{code}").as_bytes()))
}

struct Header {
    compression: i32,
    n_cases: i32,
    bias: f64,
    file_label: Vec<u8>,
    big_endian: bool,
}

impl Header {
    fn read(cursor: &mut Cursor) -> Result<Self> {
        let magic = cursor.take(4)?;
        match magic {
            b"$FL2" => {}
            b"$FL3" => return Err(Error::spss("zlib-compressed files are not supported")),
            _ => return Err(Error::spss("not an SPSS system file")),
        }
        let _product = cursor.take(60)?;
        let _layout_code = cursor.i32()?;
        let _nominal_case_size = cursor.i32()?;
        let compression = cursor.i32()?;
        let _weight_index = cursor.i32()?;
        let n_cases = cursor.i32()?;
        let bias = cursor.f64()?;
        let _creation_date = cursor.take(9)?;
        let _creation_time = cursor.take(8)?;
        let file_label = cursor.bytes(64)?;
        let _padding = cursor.take(3)?;

        Ok(Header {
            compression,
            n_cases,
            bias,
            file_label,
            big_endian: cursor.big_endian,
        })
    }
}

/// One 8-byte slot of the dictionary, as declared by a type 2 record.
struct Slot {
    /// -1 marks the continuation of the previous string.
    width: i32,
    name: Vec<u8>,
    label: Option<Vec<u8>>,
    print: Format,
    write: Format,
    missing: MissingValues,
    value_labels: Vec<(f64, Vec<u8>)>,
}

/// Text in the dictionary is kept as raw bytes until the encoding record is read.
#[derive(Default)]
struct Dictionary {
    slots: Vec<Slot>,
    long_names: Vec<u8>,
    very_long_strings: Vec<u8>,
    code_page: Option<i32>,
    encoding_name: Option<String>,
}

impl Dictionary {
    fn read(cursor: &mut Cursor) -> Result<Self> {
        let mut dictionary = Dictionary::default();
        loop {
            match cursor.i32()? {
                2 => dictionary.read_variable(cursor)?,
                3 => dictionary.read_value_labels(cursor)?,
                6 => {
                    let n_lines = cursor.i32()?.max(0) as usize;
                    cursor.take(n_lines * 80)?;
                }
                7 => dictionary.read_extension(cursor)?,
                999 => {
                    let _filler = cursor.i32()?;
                    return Ok(dictionary);
                }
                other => {
                    return Err(Error::spss(format!(
                        "unknown dictionary record type {other}"
                    )))
                }
            }
        }
    }

    fn read_variable(&mut self, cursor: &mut Cursor) -> Result<()> {
        let width = cursor.i32()?;
        let has_label = cursor.i32()?;
        let n_missing = cursor.i32()?;
        let print = Format::unpack(cursor.i32()?);
        let write = Format::unpack(cursor.i32()?);
        let name = cursor.bytes(8)?;

        let label = if has_label == 1 {
            let len = cursor.i32()?.max(0) as usize;
            let padded = len.div_ceil(4) * 4;
            let raw = cursor.take(padded)?;
            Some(raw[..len].to_vec())
        } else {
            None
        };

        let missing = if width == 0 {
            match n_missing {
                0 => MissingValues::None,
                1..=3 => MissingValues::Discrete(
                    (0..n_missing)
                        .map(|_| cursor.f64())
                        .collect::<Result<_>>()?,
                ),
                -2 => MissingValues::Range {
                    low: cursor.f64()?,
                    high: cursor.f64()?,
                },
                -3 => MissingValues::RangeAndValue {
                    low: cursor.f64()?,
                    high: cursor.f64()?,
                    value: cursor.f64()?,
                },
                other => {
                    return Err(Error::spss(format!(
                        "invalid missing value count {other} for `{}`",
                        String::from_utf8_lossy(&name).trim_end()
                    )))
                }
            }
        } else {
            let n = n_missing.unsigned_abs() as usize;
            let values = (0..n).map(|_| cursor.take8()).collect::<Result<Vec<_>>>()?;
            if values.is_empty() {
                MissingValues::None
            } else {
                MissingValues::Strings(values)
            }
        };

        self.slots.push(Slot {
            width,
            name,
            label,
            print,
            write,
            missing,
            value_labels: Vec::new(),
        });
        Ok(())
    }

    fn read_value_labels(&mut self, cursor: &mut Cursor) -> Result<()> {
        let count = cursor.i32()?.max(0) as usize;
        let mut labels = Vec::with_capacity(count);
        for _ in 0..count {
            let raw_value = cursor.take8()?;
            let len = cursor.take(1)?[0] as usize;
            let padded = (len + 1).div_ceil(8) * 8 - 1;
            let raw = cursor.take(padded)?;
            labels.push((raw_value, raw[..len].to_vec()));
        }

        if cursor.i32()? != 4 {
            return Err(Error::spss("value labels not followed by a variable index record"));
        }
        let n_vars = cursor.i32()?.max(0) as usize;
        let big_endian = cursor.big_endian;
        for _ in 0..n_vars {
            let index = cursor.i32()?;
            let slot = index
                .checked_sub(1)
                .and_then(|i| self.slots.get_mut(i as usize))
                .ok_or_else(|| Error::spss(format!("value label index {index} out of range")))?;
            // String value labels are not carried over.
            if slot.width == 0 {
                slot.value_labels.extend(
                    labels
                        .iter()
                        .map(|(raw, label)| (decode_f64(*raw, big_endian), label.clone())),
                );
            }
        }
        Ok(())
    }

    fn read_extension(&mut self, cursor: &mut Cursor) -> Result<()> {
        let subtype = cursor.i32()?;
        let size = cursor.i32()?.max(0) as usize;
        let count = cursor.i32()?.max(0) as usize;
        let data = cursor.take(size * count)?;

        match subtype {
            3 if data.len() >= 32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(&data[28..32]);
                self.code_page = Some(if cursor.big_endian {
                    i32::from_be_bytes(raw)
                } else {
                    i32::from_le_bytes(raw)
                });
            }
            13 => self.long_names = data.to_vec(),
            14 => self.very_long_strings = data.to_vec(),
            20 => {
                let name = String::from_utf8_lossy(data);
                self.encoding_name = Some(name.trim_end_matches([' ', '\0']).to_string());
            }
            _ => debug!("Skipping extension record subtype {subtype}"),
        }
        Ok(())
    }

    /// The encoding record wins over the character code of the machine integer record.
    fn encoding(&self) -> &'static Encoding {
        let named = self.encoding_name.as_deref().and_then(|name| {
            let encoding = Encoding::for_label(name.as_bytes());
            if encoding.is_none() {
                debug!("Unknown character encoding `{name}`");
            }
            encoding
        });
        named
            .or_else(|| self.code_page.and_then(code_page_encoding))
            .unwrap_or(WINDOWS_1252)
    }

    fn long_names(&self, encoding: &'static Encoding) -> HashMap<String, String> {
        let (text, _) = encoding.decode_without_bom_handling(&self.long_names);
        text.split('\t')
            .filter_map(|pair| pair.split_once('='))
            .map(|(short, long)| (short.trim().to_uppercase(), long.trim().to_string()))
            .collect()
    }

    fn very_long_strings(&self, encoding: &'static Encoding) -> HashMap<String, usize> {
        let (text, _) = encoding.decode_without_bom_handling(&self.very_long_strings);
        text.split('\t')
            .filter_map(|entry| entry.trim_matches('\0').split_once('='))
            .filter_map(|(name, width)| {
                let width = width.trim_matches('\0').trim().parse::<usize>().ok()?;
                Some((name.trim().to_uppercase(), width))
            })
            .collect()
    }

    /// Groups dictionary slots into logical variables.
    fn layout(&self, encoding: &'static Encoding) -> Result<Vec<LaidOutVariable>> {
        let long_names = self.long_names(encoding);
        let very_long_strings = self.very_long_strings(encoding);
        let mut variables = Vec::new();
        let mut i = 0;
        while i < self.slots.len() {
            let slot = &self.slots[i];
            if slot.width < 0 {
                return Err(Error::spss(format!(
                    "continuation record without a string at slot {}",
                    i + 1
                )));
            }
            let short_name = decode_text(&slot.name, encoding);
            let short = short_name.to_uppercase();
            let name = long_names.get(&short).cloned().unwrap_or(short_name);

            let very_long = very_long_strings
                .get(&short)
                .or_else(|| very_long_strings.get(&name.to_uppercase()))
                .copied();

            let (width, n_segments) = match very_long {
                Some(width) if slot.width > 0 => (width, width.div_ceil(252)),
                _ => (slot.width as usize, 1),
            };

            let mut segments = Vec::with_capacity(n_segments);
            for segment in 0..n_segments {
                let seg_slot = self
                    .slots
                    .get(i)
                    .filter(|s| s.width > 0 || (segment == 0 && s.width == 0))
                    .ok_or_else(|| Error::spss(format!("very long string `{name}` is truncated")))?;
                let n_slots = if seg_slot.width == 0 {
                    1
                } else {
                    (seg_slot.width as usize).div_ceil(8)
                };
                let take = if n_segments > 1 && segment + 1 < n_segments {
                    252
                } else {
                    seg_slot.width.max(0) as usize
                };
                segments.push((i, n_slots, take));
                i += n_slots;
            }

            variables.push(LaidOutVariable {
                variable: Variable {
                    name,
                    label: slot.label.as_deref().map(|raw| decode_text(raw, encoding)),
                    width,
                    print: slot.print,
                    write: slot.write,
                    value_labels: slot
                        .value_labels
                        .iter()
                        .map(|(value, raw)| (*value, decode_text(raw, encoding)))
                        .collect(),
                    missing: slot.missing.clone(),
                },
                segments,
            });
        }
        Ok(variables)
    }
}

struct LaidOutVariable {
    variable: Variable,
    /// `(first slot, slot count, bytes taken)` per segment.
    segments: Vec<(usize, usize, usize)>,
}

impl LaidOutVariable {
    fn decode_string(&self, case: &[CaseSlot], encoding: &'static Encoding) -> String {
        let mut bytes = Vec::with_capacity(self.variable.width);
        for &(first, n_slots, take) in &self.segments {
            let mut segment = Vec::with_capacity(n_slots * 8);
            for slot in &case[first..first + n_slots] {
                segment.extend_from_slice(&slot.as_bytes());
            }
            segment.truncate(take);
            bytes.extend_from_slice(&segment);
        }
        decode_text(&bytes, encoding)
    }
}

enum CaseSlot {
    Raw([u8; 8]),
    Number(f64),
    Sysmis,
    Spaces,
}

impl CaseSlot {
    fn as_number(&self, big_endian: bool) -> Option<f64> {
        let value = match self {
            CaseSlot::Raw(raw) => decode_f64(*raw, big_endian),
            CaseSlot::Number(value) => *value,
            CaseSlot::Sysmis | CaseSlot::Spaces => return None,
        };
        (value != SYSMIS && !value.is_nan()).then_some(value)
    }

    fn as_bytes(&self) -> [u8; 8] {
        match self {
            CaseSlot::Raw(raw) => *raw,
            _ => SPACES,
        }
    }
}

trait SlotSource {
    /// Next data slot, or `None` at the end of the data.
    fn next_slot(&mut self) -> Result<Option<CaseSlot>>;
}

struct RawSlots<'a> {
    cursor: Cursor<'a>,
}

impl SlotSource for RawSlots<'_> {
    fn next_slot(&mut self) -> Result<Option<CaseSlot>> {
        if self.cursor.remaining() < 8 {
            return Ok(None);
        }
        Ok(Some(CaseSlot::Raw(self.cursor.take8()?)))
    }
}

/// Bytecode compression: blocks of eight opcodes, each followed by the raw 8-byte
/// values its `253` opcodes refer to.
struct CompressedSlots<'a> {
    cursor: Cursor<'a>,
    bias: f64,
    opcodes: [u8; 8],
    next: usize,
    finished: bool,
}

impl<'a> CompressedSlots<'a> {
    fn new(cursor: Cursor<'a>, bias: f64) -> Self {
        CompressedSlots {
            cursor,
            bias,
            opcodes: [0; 8],
            next: 8,
            finished: false,
        }
    }
}

impl SlotSource for CompressedSlots<'_> {
    fn next_slot(&mut self) -> Result<Option<CaseSlot>> {
        loop {
            if self.finished {
                return Ok(None);
            }
            if self.next == 8 {
                if self.cursor.remaining() < 8 {
                    self.finished = true;
                    return Ok(None);
                }
                self.opcodes = self.cursor.take8()?;
                self.next = 0;
            }
            let code = self.opcodes[self.next];
            self.next += 1;
            match code {
                0 => continue,
                252 => {
                    self.finished = true;
                    return Ok(None);
                }
                253 => return Ok(Some(CaseSlot::Raw(self.cursor.take8()?))),
                254 => return Ok(Some(CaseSlot::Spaces)),
                255 => return Ok(Some(CaseSlot::Sysmis)),
                n => return Ok(Some(CaseSlot::Number(f64::from(n) - self.bias))),
            }
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use encoding_rs::UTF_8;

    use crate::spss::{writer::write_dataset, WriteOptions};

    #[test]
    fn should_reject_non_sav_bytes() {
        let bytes = vec![0u8; 200];
        assert!(matches!(parse_sav(&bytes), Err(Error::Spss { .. })));
        assert!(matches!(parse_sav(b"$FL2"), Err(Error::Spss { .. })));
    }

    #[test]
    fn should_decode_compressed_opcodes() {
        // 8 opcodes: 101 (= 1.0 with bias 100), sysmis, raw, spaces, end of data
        let mut bytes = vec![101u8, 255, 253, 254, 252, 0, 0, 0];
        bytes.extend_from_slice(&2.5f64.to_le_bytes());
        let mut header = vec![0u8; HEADER_LEN];
        header[64..68].copy_from_slice(&2i32.to_le_bytes());
        header.extend_from_slice(&bytes);

        let mut cursor = Cursor::new(&header).unwrap();
        cursor.take(HEADER_LEN).unwrap();
        let mut slots = CompressedSlots::new(cursor, 100.0);

        let first = slots.next_slot().unwrap().unwrap();
        assert_eq!(first.as_number(false), Some(1.0));
        let second = slots.next_slot().unwrap().unwrap();
        assert_eq!(second.as_number(false), None);
        let third = slots.next_slot().unwrap().unwrap();
        assert_eq!(third.as_number(false), Some(2.5));
        let fourth = slots.next_slot().unwrap().unwrap();
        assert_eq!(fourth.as_bytes(), SPACES);
        assert!(slots.next_slot().unwrap().is_none());
    }

    #[test]
    fn should_stitch_very_long_string_segments() {
        let var = LaidOutVariable {
            variable: Variable::string("comment", None, 260),
            segments: vec![(0, 32, 252), (32, 1, 8)],
        };
        let mut case: Vec<CaseSlot> = (0..32).map(|_| CaseSlot::Raw([b'a'; 8])).collect();
        case.push(CaseSlot::Raw(*b"bcdefgh "));

        let value = var.decode_string(&case, UTF_8);
        assert_eq!(value.len(), 259);
        assert!(value.starts_with("aaaa"));
        assert!(value.ends_with("abcdefgh"));
    }

    fn ints(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    fn splice(bytes: &mut Vec<u8>, from: &[u8], to: &[u8]) {
        let at = bytes
            .windows(from.len())
            .position(|w| w == from)
            .unwrap();
        bytes.splice(at..at + from.len(), to.iter().copied());
    }

    /// A file whose label and string value hold the windows-1252 byte for `é`.
    fn windows_1252_file() -> Vec<u8> {
        let mut dataset = Dataset::default();
        dataset.push(
            Variable::string("name", Some("R~gion"), 4),
            Column::Text(vec!["Caf~".to_string()]),
        );
        let mut bytes = Vec::new();
        write_dataset(&mut bytes, &dataset, WriteOptions::default()).unwrap();
        splice(&mut bytes, b"R~gion", b"R\xe9gion");
        splice(&mut bytes, b"Caf~", b"Caf\xe9");
        bytes
    }

    #[test]
    fn should_decode_text_with_the_encoding_record() {
        let mut bytes = windows_1252_file();
        let utf8 = [ints(&[7, 20, 1, 5]), b"UTF-8".to_vec()].concat();
        let cp1252 = [ints(&[7, 20, 1, 12]), b"windows-1252".to_vec()].concat();
        splice(&mut bytes, &utf8, &cp1252);

        let dataset = parse_sav(&bytes).unwrap();
        assert_eq!(dataset.variables[0].label.as_deref(), Some("Région"));
        assert_eq!(dataset.text("name").unwrap(), &["Café".to_string()]);
    }

    #[test]
    fn should_fall_back_to_the_character_code() {
        let mut bytes = windows_1252_file();
        let utf8 = [ints(&[7, 20, 1, 5]), b"UTF-8".to_vec()].concat();
        splice(&mut bytes, &utf8, &[]);
        splice(&mut bytes, &ints(&[1, 1, 2, 65001]), &ints(&[1, 1, 2, 1252]));

        let dataset = parse_sav(&bytes).unwrap();
        assert_eq!(dataset.variables[0].label.as_deref(), Some("Région"));
        assert_eq!(dataset.text("name").unwrap(), &["Café".to_string()]);
    }

    #[test]
    fn should_map_character_codes_to_encodings() {
        assert_eq!(code_page_encoding(65001), Some(UTF_8));
        assert_eq!(code_page_encoding(1252), Some(WINDOWS_1252));
        assert_eq!(code_page_encoding(2), Some(WINDOWS_1252));
        assert_eq!(code_page_encoding(28592).map(|e| e.name()), Some("ISO-8859-2"));
    }
}
