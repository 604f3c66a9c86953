
use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use encoding_rs::{SHIFT_JIS, UTF_8};
use tracing::{debug, info};

use crate::{RagError, Result};

/// Columns that hold a record's text, in priority order.
pub const TEXT_FIELD_ALIASES: &[&str] = &["text", "Text", "sentence"];

/// Vocabulary sheets carry no text column; their text is composed from these.
pub const VOCABULARY_FIELDS: &[&str] = &["word", "meaning_ja", "example"];

const VOCABULARY_SEPARATOR: &str = " : ";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    /// UTF-8 starting with a byte-order mark
    Utf8Sig,
    Utf8,
    ShiftJis,
}

/// Encodings tried when opening a source, in order.
pub const CANDIDATE_ENCODINGS: [SourceEncoding; 3] = [
    SourceEncoding::Utf8Sig,
    SourceEncoding::Utf8,
    SourceEncoding::ShiftJis,
];

impl SourceEncoding {
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8Sig => "utf-8-sig",
            Self::Utf8 => "utf-8",
            Self::ShiftJis => "shift_jis",
        }
    }

    /// Strictly decode `bytes`, returning `None` on any malformed sequence.
    fn decode(self, bytes: &[u8]) -> Option<Cow<'_, str>> {
        match self {
            Self::Utf8Sig => bytes
                .strip_prefix(UTF8_BOM)
                .and_then(|rest| UTF_8.decode_without_bom_handling_and_without_replacement(rest)),
            Self::Utf8 => UTF_8.decode_without_bom_handling_and_without_replacement(bytes),
            Self::ShiftJis => SHIFT_JIS.decode_without_bom_handling_and_without_replacement(bytes),
        }
    }
}

impl fmt::Display for SourceEncoding {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One data row of a source CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    index: usize,
    fields: Vec<(String, String)>,
}

impl Record {
    #[inline]
    pub fn new(index: usize, fields: Vec<(String, String)>) -> Self {
        Self { index, fields }
    }

    /// Zero-based position among the file's data rows
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Fields in column order
    #[inline]
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    #[inline]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }
}

/// A CSV file whose encoding has been detected and which is ready to be read once.
pub struct CsvSource {
    path: PathBuf,
    encoding: SourceEncoding,
    headers: Vec<String>,
    reader: csv::Reader<Cursor<Vec<u8>>>,
}

impl fmt::Debug for CsvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsvSource")
            .field("path", &self.path)
            .field("encoding", &self.encoding)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl CsvSource {
    /// Open `path`, trying each of [`CANDIDATE_ENCODINGS`] in turn.
    ///
    /// Fails with [`RagError::EncodingExhausted`] when no candidate decodes the file.
    #[inline]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;

        let (encoding, text) = detect_encoding(&bytes).ok_or_else(|| RagError::EncodingExhausted {
            path: path.to_path_buf(),
        })?;

        info!("Opened `{}` as {}", path.display(), encoding);

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(Cursor::new(text.into_bytes()));
        let headers = reader.headers()?.iter().map(str::to_string).collect();

        Ok(Self {
            path: path.to_path_buf(),
            encoding,
            headers,
            reader,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn encoding(&self) -> SourceEncoding {
        self.encoding
    }

    #[inline]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Consume the source, yielding its data rows lazily.
    #[inline]
    pub fn records(self) -> Records {
        Records {
            headers: self.headers,
            rows: self.reader.into_records(),
            next_index: 0,
        }
    }
}

/// Iterator over the data rows of a [`CsvSource`].
pub struct Records {
    headers: Vec<String>,
    rows: csv::StringRecordsIntoIter<Cursor<Vec<u8>>>,
    next_index: usize,
}

impl Iterator for Records {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(e) => return Some(Err(e.into())),
        };

        let fields = self
            .headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.clone(), value.to_string()))
            .collect();

        let record = Record::new(self.next_index, fields);
        self.next_index += 1;
        Some(Ok(record))
    }
}

fn detect_encoding(bytes: &[u8]) -> Option<(SourceEncoding, String)> {
    let header_end = bytes
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |newline| newline + 1);
    let header = &bytes[..header_end];

    for encoding in CANDIDATE_ENCODINGS {
        if encoding.decode(header).is_none() {
            debug!("Header is not valid {}", encoding);
            continue;
        }

        match encoding.decode(bytes) {
            Some(text) => return Some((encoding, text.into_owned())),
            None => debug!("Header decodes as {} but the body does not", encoding),
        }
    }

    None
}

/// Pull the text to embed out of a record.
///
/// The first non-blank value among [`TEXT_FIELD_ALIASES`] wins. Failing that,
/// non-blank [`VOCABULARY_FIELDS`] are joined as `word : meaning : example`.
#[inline]
pub fn extract_text(record: &Record) -> Option<String> {
    let aliased = TEXT_FIELD_ALIASES
        .iter()
        .filter_map(|column| record.get(column))
        .map(str::trim)
        .find(|value| !value.is_empty());

    if let Some(text) = aliased {
        return Some(text.to_string());
    }

    let parts: Vec<&str> = VOCABULARY_FIELDS
        .iter()
        .filter_map(|column| record.get(column))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    (!parts.is_empty()).then(|| parts.join(VOCABULARY_SEPARATOR))
}
