/*!
 * Streaming CSV lexer
 *
 * Drives on the configured delimiter byte and tracks quote state across
 * buffer refills, so a quoted field may span any number of input slices.
 * One logical record is emitted per row terminator; newlines inside quoted
 * fields are data. Field bytes are accumulated into a reusable record
 * buffer with `""` escapes already collapsed, so callers see final values.
 * Carriage returns are ordinary bytes and stay in the field.
 */

use crate::error::{ImportError, Result};

/// Whether the caller wants more records from this input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// One decoded logical record, borrowed from the assembler's buffers
#[derive(Debug)]
pub struct RawRecord<'a> {
    /// Absolute source offset of the record's first byte
    pub start_offset: u64,
    /// Raw bytes consumed from the source, terminator included
    pub raw_len: u64,
    /// Absolute 1-based logical line number
    pub line: u64,
    bytes: &'a [u8],
    bounds: &'a [(usize, usize)],
}

impl<'a> RawRecord<'a> {
    pub fn field_count(&self) -> usize {
        self.bounds.len()
    }

    /// Decoded bytes of field `i`, or `None` past the last field
    pub fn field(&self, i: usize) -> Option<&'a [u8]> {
        self.bounds.get(i).map(|&(s, e)| &self.bytes[s..e])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    FieldStart,
    InField,
    InQuoted,
    /// Saw a quote inside a quoted field: either an escape or the close
    QuoteEnd,
}

/// Incremental record decoder fed with consecutive byte slices.
#[derive(Debug)]
pub struct RecordAssembler {
    delimiter: u8,
    state: LexState,
    buf: Vec<u8>,
    bounds: Vec<(usize, usize)>,
    field_start: usize,
    record_start: u64,
    cursor: u64,
    line: u64,
}

impl RecordAssembler {
    pub fn new(delimiter: u8, start_offset: u64, starting_line: u64) -> Self {
        Self {
            delimiter,
            state: LexState::FieldStart,
            buf: Vec::with_capacity(4096),
            bounds: Vec::with_capacity(16),
            field_start: 0,
            record_start: start_offset,
            cursor: start_offset,
            line: starting_line,
        }
    }

    fn consumed_in_record(&self) -> u64 {
        self.cursor - self.record_start
    }

    fn end_field(&mut self) {
        self.bounds.push((self.field_start, self.buf.len()));
        self.field_start = self.buf.len();
    }

    fn reset_record(&mut self) {
        self.buf.clear();
        self.bounds.clear();
        self.field_start = 0;
        self.record_start = self.cursor;
        self.line += 1;
        self.state = LexState::FieldStart;
    }

    fn emit<F>(&mut self, on_record: &mut F) -> Result<ScanControl>
    where
        F: FnMut(&RawRecord<'_>) -> Result<ScanControl>,
    {
        self.end_field();
        let record = RawRecord {
            start_offset: self.record_start,
            raw_len: self.cursor - self.record_start,
            line: self.line,
            bytes: &self.buf,
            bounds: &self.bounds,
        };
        let control = on_record(&record)?;
        self.reset_record();
        Ok(control)
    }

    /// Feed the next slice. The callback fires once per completed record;
    /// returning [`ScanControl::Stop`] halts consumption immediately.
    pub fn process<F>(&mut self, input: &[u8], on_record: &mut F) -> Result<ScanControl>
    where
        F: FnMut(&RawRecord<'_>) -> Result<ScanControl>,
    {
        for &b in input {
            self.cursor += 1;
            let control = self.step(b, on_record)?;
            if control == ScanControl::Stop {
                return Ok(ScanControl::Stop);
            }
        }
        Ok(ScanControl::Continue)
    }

    fn step<F>(&mut self, b: u8, on_record: &mut F) -> Result<ScanControl>
    where
        F: FnMut(&RawRecord<'_>) -> Result<ScanControl>,
    {
        match self.state {
            LexState::FieldStart => {
                if b == b'"' {
                    self.state = LexState::InQuoted;
                } else if b == self.delimiter {
                    self.end_field();
                } else if b == b'\n' {
                    // A lone terminator is a blank line, not a record
                    if self.consumed_in_record() == 1 && self.bounds.is_empty() {
                        self.reset_record();
                    } else {
                        return self.emit(on_record);
                    }
                } else {
                    self.buf.push(b);
                    self.state = LexState::InField;
                }
            }
            LexState::InField => {
                if b == self.delimiter {
                    self.end_field();
                    self.state = LexState::FieldStart;
                } else if b == b'\n' {
                    return self.emit(on_record);
                } else {
                    self.buf.push(b);
                }
            }
            LexState::InQuoted => {
                if b == b'"' {
                    self.state = LexState::QuoteEnd;
                } else {
                    self.buf.push(b);
                }
            }
            LexState::QuoteEnd => {
                if b == b'"' {
                    self.buf.push(b'"');
                    self.state = LexState::InQuoted;
                } else if b == self.delimiter {
                    self.end_field();
                    self.state = LexState::FieldStart;
                } else if b == b'\n' {
                    return self.emit(on_record);
                } else {
                    // Stray byte after a closing quote; keep it
                    self.buf.push(b);
                    self.state = LexState::InField;
                }
            }
        }
        Ok(ScanControl::Continue)
    }

    /// Flush at end of input. Emits a final record when the input did not
    /// end with a terminator; fails if the input ended inside quotes.
    pub fn finish<F>(&mut self, on_record: &mut F) -> Result<()>
    where
        F: FnMut(&RawRecord<'_>) -> Result<ScanControl>,
    {
        match self.state {
            LexState::InQuoted => {
                return Err(ImportError::UnterminatedQuote {
                    offset: self.cursor,
                })
            }
            LexState::QuoteEnd | LexState::InField => {
                self.emit(on_record)?;
            }
            LexState::FieldStart => {
                // Trailing bytes without a terminator, e.g. "a,b,"
                if self.consumed_in_record() > 0 || !self.bounds.is_empty() {
                    self.emit(on_record)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(delimiter: u8, input: &[u8]) -> Vec<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        let mut assembler = RecordAssembler::new(delimiter, 0, 1);
        let mut sink = |r: &RawRecord<'_>| {
            let fields = (0..r.field_count())
                .map(|i| r.field(i).unwrap().to_vec())
                .collect();
            out.push(fields);
            Ok(ScanControl::Continue)
        };
        assembler.process(input, &mut sink).unwrap();
        assembler.finish(&mut sink).unwrap();
        out
    }

    #[test]
    fn splits_plain_rows() {
        let rows = collect(b',', b"a,b,c\nd,e,f\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(rows[1][2], b"f");
    }

    #[test]
    fn quoted_field_keeps_newline_and_delimiter() {
        let rows = collect(b',', b"x,\"one\ntwo,three\",y\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][1], b"one\ntwo,three");
        assert_eq!(rows[0][2], b"y");
    }

    #[test]
    fn doubled_quote_is_escape() {
        let rows = collect(b',', b"\"say \"\"hi\"\"\",b\n");
        assert_eq!(rows[0][0], b"say \"hi\"");
    }

    #[test]
    fn empty_fields_and_trailing_delimiter() {
        let rows = collect(b',', b"a,,c\nd,e,\n");
        assert_eq!(rows[0][1], b"");
        assert_eq!(rows[1][2], b"");
        assert_eq!(rows[1].len(), 3);
    }

    #[test]
    fn last_row_without_terminator() {
        let rows = collect(b',', b"a,b\nc,d");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn blank_lines_are_skipped_but_counted() {
        let mut lines = Vec::new();
        let mut assembler = RecordAssembler::new(b',', 0, 1);
        let mut sink = |r: &RawRecord<'_>| {
            lines.push(r.line);
            Ok(ScanControl::Continue)
        };
        assembler.process(b"a,b\n\nc,d\n", &mut sink).unwrap();
        assembler.finish(&mut sink).unwrap();
        assert_eq!(lines, vec![1, 3]);
    }

    #[test]
    fn carriage_return_stays_in_field() {
        let rows = collect(b',', b"a,b\r\nc,d\n");
        assert_eq!(rows[0][1], b"b\r");
    }

    #[test]
    fn tab_delimiter() {
        let rows = collect(b'\t', b"a\tb,c\td\n");
        assert_eq!(rows[0], vec![b"a".to_vec(), b"b,c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn record_offsets_and_lengths_are_raw() {
        let mut seen = Vec::new();
        let mut assembler = RecordAssembler::new(b',', 0, 1);
        let mut sink = |r: &RawRecord<'_>| {
            seen.push((r.start_offset, r.raw_len));
            Ok(ScanControl::Continue)
        };
        // Quoted field: decoded bytes are shorter than raw bytes
        assembler.process(b"\"a\"\"b\",c\nd,e\n", &mut sink).unwrap();
        assembler.finish(&mut sink).unwrap();
        assert_eq!(seen, vec![(0, 9), (9, 4)]);
    }

    #[test]
    fn split_feeds_preserve_quote_state() {
        let input: &[u8] = b"x,\"one\ntwo\",y\n";
        for split in 1..input.len() {
            let mut out: Vec<Vec<u8>> = Vec::new();
            let mut assembler = RecordAssembler::new(b',', 0, 1);
            let mut sink = |r: &RawRecord<'_>| {
                out.push(r.field(1).unwrap().to_vec());
                Ok(ScanControl::Continue)
            };
            assembler.process(&input[..split], &mut sink).unwrap();
            assembler.process(&input[split..], &mut sink).unwrap();
            assembler.finish(&mut sink).unwrap();
            assert_eq!(out, vec![b"one\ntwo".to_vec()], "split at {}", split);
        }
    }

    #[test]
    fn unterminated_quote_fails_finish() {
        let mut assembler = RecordAssembler::new(b',', 0, 1);
        let mut sink = |_: &RawRecord<'_>| Ok(ScanControl::Continue);
        assembler.process(b"a,\"oops", &mut sink).unwrap();
        let err = assembler.finish(&mut sink).unwrap_err();
        assert!(matches!(err, ImportError::UnterminatedQuote { .. }));
    }

    #[test]
    fn stop_halts_consumption() {
        let mut count = 0;
        let mut assembler = RecordAssembler::new(b',', 0, 1);
        let mut sink = |_: &RawRecord<'_>| {
            count += 1;
            Ok(ScanControl::Stop)
        };
        let control = assembler
            .process(b"a,b\nc,d\ne,f\n", &mut sink)
            .unwrap();
        assert_eq!(control, ScanControl::Stop);
        assert_eq!(count, 1);
    }
}
