//! Minimal reader for the comma separated exports the history tools write.
//!
//! Handles the subset those tools produce: `,` separators, `"` quoting with
//! `""` escapes, quoted fields spanning several lines, and stray `\r`
//! characters, which are dropped everywhere. A record containing a NUL byte
//! is reported as an error and reading continues at the next record.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    /// 1-based line the record starts on.
    pub line: u64,
    pub fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct CsvError {
    pub line: u64,
    pub reason: String,
}

/// Iterator over the records of an in-memory CSV document.
pub struct CsvRows {
    text: Vec<u8>,
    pos: usize,
    line: u64,
}

impl CsvRows {
    pub fn new(text: impl Into<Vec<u8>>) -> Self {
        Self {
            text: text.into(),
            pos: 0,
            line: 1,
        }
    }
}

fn finish_field(raw: &mut Vec<u8>, fields: &mut Vec<String>) {
    fields.push(String::from_utf8_lossy(raw).into_owned());
    raw.clear();
}

impl Iterator for CsvRows {
    type Item = Result<CsvRow, CsvError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pos >= self.text.len() {
                return None;
            }

            let start_line = self.line;
            let mut fields = Vec::new();
            let mut raw = Vec::new();
            let mut in_quotes = false;
            let mut saw_nul = false;
            let mut touched = false;

            while self.pos < self.text.len() {
                let b = self.text[self.pos];
                self.pos += 1;
                match b {
                    b'\r' => {}
                    b'\0' => {
                        saw_nul = true;
                        touched = true;
                    }
                    b'\n' if !in_quotes => {
                        self.line += 1;
                        break;
                    }
                    b'\n' => {
                        self.line += 1;
                        raw.push(b);
                    }
                    b'"' if in_quotes => {
                        if self.text.get(self.pos) == Some(&b'"') {
                            raw.push(b'"');
                            self.pos += 1;
                        } else {
                            in_quotes = false;
                        }
                    }
                    b'"' if raw.is_empty() => {
                        in_quotes = true;
                        touched = true;
                    }
                    b',' if !in_quotes => {
                        finish_field(&mut raw, &mut fields);
                        touched = true;
                    }
                    _ => {
                        raw.push(b);
                        touched = true;
                    }
                }
            }

            if !touched {
                // blank line
                continue;
            }
            if in_quotes {
                return Some(Err(CsvError {
                    line: start_line,
                    reason: "unterminated quoted field".to_string(),
                }));
            }
            if saw_nul {
                return Some(Err(CsvError {
                    line: start_line,
                    reason: "record contains a NUL byte".to_string(),
                }));
            }
            finish_field(&mut raw, &mut fields);
            return Some(Ok(CsvRow {
                line: start_line,
                fields,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(text: &str) -> Vec<Vec<String>> {
        CsvRows::new(text)
            .map(|row| row.unwrap().fields)
            .collect()
    }

    #[test]
    fn plain_and_quoted_fields() {
        let rows = fields("1,-,ls -al\n2,/tmp,\"echo \"\"a, b\"\"\"\n");
        assert_eq!(rows[0], vec!["1", "-", "ls -al"]);
        assert_eq!(rows[1], vec!["2", "/tmp", "echo \"a, b\""]);
    }

    #[test]
    fn quoted_field_spans_lines() {
        let mut rows = CsvRows::new("1,\"for x in a b\ndo echo $x\ndone\"\n2,pwd\n");
        let first = rows.next().unwrap().unwrap();
        assert_eq!(first.line, 1);
        assert_eq!(first.fields[1], "for x in a b\ndo echo $x\ndone");
        let second = rows.next().unwrap().unwrap();
        assert_eq!(second.line, 4);
        assert_eq!(second.fields, vec!["2", "pwd"]);
        assert!(rows.next().is_none());
    }

    #[test]
    fn carriage_returns_and_blank_lines_are_ignored() {
        let rows = fields("1,2,a,b\r\n\r\n\n3,4,c,d\r\n");
        assert_eq!(rows, vec![vec!["1", "2", "a", "b"], vec!["3", "4", "c", "d"]]);
    }

    #[test]
    fn empty_fields_are_kept() {
        assert_eq!(fields("a,,\n"), vec![vec!["a", "", ""]]);
    }

    #[test]
    fn nul_byte_fails_only_its_record() {
        let rows: Vec<_> = CsvRows::new("1,5,app\0,title\n2,5,app,title\n").collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_ref().unwrap_err().line, 1);
        assert_eq!(rows[1].as_ref().unwrap().fields[0], "2");
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        let rows: Vec<_> = CsvRows::new("1,\"never closed\n").collect();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_err());
    }

    #[test]
    fn non_ascii_survives() {
        assert_eq!(fields("1,café,naïve\n"), vec![vec!["1", "café", "naïve"]]);
    }
}
