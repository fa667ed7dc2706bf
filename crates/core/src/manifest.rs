//! Manifest codec: CSV batch descriptions in, enriched CSV out.
//!
//! A manifest is a UTF-8 CSV table whose first line holds column headers.
//! One designated input column carries comma-separated source image URIs;
//! one designated output column (appended when absent) receives the
//! comma-separated destination locators of the images that were processed
//! successfully. Every other column is passed through untouched, in order.
//!
//! Blank lines are not records. Their positions, a leading UTF-8 byte order
//! mark, the line terminator and the trailing newline are recorded on decode
//! and written back on encode, so a manifest without the input column
//! round-trips byte for byte.

use csv::{ReaderBuilder, StringRecord, Terminator, WriterBuilder};

/// Header of the column holding source image URIs.
pub const DEFAULT_INPUT_COLUMN: &str = "Input Image Urls";

/// Header of the column receiving published image locators.
pub const DEFAULT_OUTPUT_COLUMN: &str = "Output Image Urls";

/// Separator between image references inside a single cell.
pub const REF_DELIMITER: &str = ",";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Manifest has no header row")]
    MissingHeader,

    #[error("Malformed manifest: {0}")]
    Malformed(String),

    #[error("Failed to write manifest: {0}")]
    Write(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Names of the two designated columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestColumns {
    pub input: String,
    pub output: String,
}

impl Default for ManifestColumns {
    fn default() -> Self {
        Self {
            input: DEFAULT_INPUT_COLUMN.to_string(),
            output: DEFAULT_OUTPUT_COLUMN.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnding {
    Lf,
    CrLf,
}

/// One manifest record.
///
/// `values` are aligned with the manifest headers and never modified by
/// processing. `output_image_refs` stays `None` until the row has been
/// through the fan-out coordinator; `Some(vec![])` is the "no inputs or
/// all failed" sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    values: Vec<String>,
    pub input_image_refs: Vec<String>,
    pub output_image_refs: Option<Vec<String>>,
}

impl Row {
    pub fn new(values: Vec<String>, input_image_refs: Vec<String>) -> Self {
        Self {
            values,
            input_image_refs,
            output_image_refs: None,
        }
    }

}

/// A decoded manifest: headers, rows, and the formatting details needed
/// to write it back byte-for-byte.
#[derive(Debug, Clone)]
pub struct Manifest {
    headers: Vec<String>,
    rows: Vec<Row>,
    columns: ManifestColumns,
    input_index: Option<usize>,
    output_index: Option<usize>,
    line_ending: LineEnding,
    trailing_newline: bool,
    bom: bool,
    /// `blank_lines[0]` precedes the header; `blank_lines[k]` follows the
    /// k-th record, the header being record 1.
    blank_lines: Vec<usize>,
}

impl Manifest {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Whether the designated input column is present.
    pub fn has_input_column(&self) -> bool {
        self.input_index.is_some()
    }

    /// Move the rows out, leaving the manifest empty until [`set_rows`](Self::set_rows).
    pub fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }

    pub fn set_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }

    /// Look up a cell by header name.
    pub fn value<'a>(&self, row: &'a Row, column: &str) -> Option<&'a str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        row.values.get(idx).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Split one input cell into image references.
///
/// Tokens are trimmed; empty tokens are dropped, so an empty cell yields
/// an empty list.
pub fn split_refs(cell: &str) -> Vec<String> {
    cell.split(REF_DELIMITER)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse raw manifest bytes into an ordered [`Manifest`].
///
/// Fails with [`ManifestError::MissingHeader`] on empty input and with
/// [`ManifestError::Malformed`] on invalid UTF-8 or ragged rows. A missing
/// input column is not an error: every row simply has no image references.
pub fn decode(raw: &[u8], columns: &ManifestColumns) -> Result<Manifest, ManifestError> {
    let bom = raw.starts_with(UTF8_BOM);
    let raw = if bom { &raw[UTF8_BOM.len()..] } else { raw };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(raw);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ManifestError::Malformed(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();

    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(ManifestError::MissingHeader);
    }

    let input_index = headers.iter().position(|h| *h == columns.input);
    let output_index = headers.iter().position(|h| *h == columns.output);

    let mut rows = Vec::new();
    let mut record = StringRecord::new();
    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => return Err(ManifestError::Malformed(e.to_string())),
        }

        let values: Vec<String> = record.iter().map(str::to_string).collect();
        let input_image_refs = input_index
            .and_then(|i| values.get(i))
            .map(|cell| split_refs(cell))
            .unwrap_or_default();

        rows.push(Row::new(values, input_image_refs));
    }

    // Fall back to a compact layout if the scan and the reader disagree.
    let mut blank_lines = blank_line_layout(raw);
    if blank_lines.len() != rows.len() + 2 {
        blank_lines = vec![0; rows.len() + 2];
    }

    Ok(Manifest {
        headers,
        rows,
        columns: columns.clone(),
        input_index,
        output_index,
        line_ending: detect_line_ending(raw),
        trailing_newline: raw.ends_with(b"\n"),
        bom,
        blank_lines,
    })
}

/// Count the blank lines around each record, honouring quoted fields that
/// span lines. The result has one slot per record plus one leading slot.
fn blank_line_layout(raw: &[u8]) -> Vec<usize> {
    let mut layout = vec![0];
    let mut line_len = 0usize;
    let mut in_quotes = false;
    let mut field_start = true;

    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if in_quotes {
            if b == b'"' {
                if raw.get(i + 1) == Some(&b'"') {
                    i += 1;
                } else {
                    in_quotes = false;
                }
            }
            line_len += 1;
        } else {
            match b {
                b'\n' => {
                    if line_len == 0 {
                        if let Some(last) = layout.last_mut() {
                            *last += 1;
                        }
                    } else {
                        layout.push(0);
                    }
                    line_len = 0;
                    field_start = true;
                    i += 1;
                    continue;
                }
                b'\r' => {}
                b'"' if field_start => {
                    in_quotes = true;
                    line_len += 1;
                }
                _ => line_len += 1,
            }
            field_start = b == b',';
        }
        i += 1;
    }

    if line_len > 0 {
        layout.push(0);
    }
    layout
}

fn detect_line_ending(raw: &[u8]) -> LineEnding {
    match raw.iter().position(|b| *b == b'\n') {
        Some(i) if i > 0 && raw[i - 1] == b'\r' => LineEnding::CrLf,
        _ => LineEnding::Lf,
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Serialize a manifest back to CSV.
///
/// The output column is appended when the manifest carries the input
/// column but no output column yet. Processed rows write their output
/// references joined with [`REF_DELIMITER`]; unprocessed rows keep the
/// original cell (or an empty one when the column was appended).
pub fn encode(manifest: &Manifest) -> Result<Vec<u8>, ManifestError> {
    let mut headers = manifest.headers.clone();
    let output_index = match (manifest.output_index, manifest.input_index) {
        (Some(idx), _) => Some(idx),
        (None, Some(_)) => {
            headers.push(manifest.columns.output.clone());
            Some(headers.len() - 1)
        }
        (None, None) => None,
    };

    let terminator = match manifest.line_ending {
        LineEnding::Lf => Terminator::Any(b'\n'),
        LineEnding::CrLf => Terminator::CRLF,
    };

    let blank: &[u8] = match manifest.line_ending {
        LineEnding::Lf => b"\n",
        LineEnding::CrLf => b"\r\n",
    };
    let blank_after = |slot: usize| manifest.blank_lines.get(slot).copied().unwrap_or(0);

    let mut bytes = Vec::new();
    if manifest.bom {
        bytes.extend_from_slice(UTF8_BOM);
    }
    bytes.extend(blank.repeat(blank_after(0)));

    write_record(&mut bytes, &headers, terminator)?;
    bytes.extend(blank.repeat(blank_after(1)));

    for (i, row) in manifest.rows.iter().enumerate() {
        let mut record = row.values.clone();
        if let Some(idx) = output_index {
            let joined = row
                .output_image_refs
                .as_ref()
                .map(|refs| refs.join(REF_DELIMITER));
            if idx < record.len() {
                if let Some(joined) = joined {
                    record[idx] = joined;
                }
            } else {
                record.push(joined.unwrap_or_default());
            }
        }
        write_record(&mut bytes, &record, terminator)?;
        bytes.extend(blank.repeat(blank_after(i + 2)));
    }

    if !manifest.trailing_newline && bytes.ends_with(blank) {
        bytes.truncate(bytes.len() - blank.len());
    }

    Ok(bytes)
}

fn write_record(
    out: &mut Vec<u8>,
    record: &[String],
    terminator: Terminator,
) -> Result<(), ManifestError> {
    let mut writer = WriterBuilder::new().terminator(terminator).from_writer(out);
    writer
        .write_record(record)
        .map_err(|e| ManifestError::Write(e.to_string()))?;
    writer
        .flush()
        .map_err(|e| ManifestError::Write(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
