// Record loader: turns the lead CSV into `Record`s.
//
// Expected header (any order, extra columns are ignored):
//   firstName,lastName,email,companyName,companyDomain,title,linkedinUrl,notes

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("malformed CSV in {origin} near data row {row}: {source}")]
    Parse {
        origin: String,
        row: usize,
        #[source]
        source: csv::Error,
    },
}

/// One CSV row as it comes off the reader. Blank cells still show up
/// here; `Record::from_row` removes them.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawRow {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub company_name: Option<String>,
    pub company_domain: Option<String>,
    pub title: Option<String>,
    pub linkedin_url: Option<String>,
    pub notes: Option<String>,
}

/// A lead ready to send. Absent fields are never serialized, so the
/// server only sees what the file actually provided.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(skip)]
    row: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    company_domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    linkedin_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Record {
    /// Normalize a raw row. `row` is the 1-based data row number.
    pub fn from_row(row: usize, raw: RawRow) -> Self {
        Record {
            row,
            first_name: non_blank(raw.first_name),
            last_name: non_blank(raw.last_name),
            email: non_blank(raw.email),
            company_name: non_blank(raw.company_name),
            company_domain: non_blank(raw.company_domain),
            title: non_blank(raw.title),
            linkedin_url: non_blank(raw.linkedin_url),
            notes: non_blank(raw.notes),
        }
    }

    pub fn row(&self) -> usize {
        self.row
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    /// How this record is named in reports: its email, or its row.
    pub fn identifier(&self) -> String {
        match &self.email {
            Some(email) => email.clone(),
            None => format!("row {}", self.row),
        }
    }

    /// Number of fields that will be transmitted.
    pub fn field_count(&self) -> usize {
        [
            &self.first_name,
            &self.last_name,
            &self.email,
            &self.company_name,
            &self.company_domain,
            &self.title,
            &self.linkedin_url,
            &self.notes,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

/// Lazy, single-pass reader over CSV input. Stops being useful after the
/// first error; callers treat any error as fatal.
pub struct RecordReader<R: io::Read> {
    rows: csv::DeserializeRecordsIntoIter<R, RawRow>,
    origin: String,
    row: usize,
}

impl<R: io::Read> RecordReader<R> {
    /// `origin` names the input in error messages.
    pub fn new(input: R, origin: impl Into<String>) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);
        RecordReader {
            rows: reader.into_deserialize(),
            origin: origin.into(),
            row: 0,
        }
    }
}

impl RecordReader<File> {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|source| LoadError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(RecordReader::new(file, path.display().to_string()))
    }
}

impl<R: io::Read> Iterator for RecordReader<R> {
    type Item = Result<Record, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.rows.next()?;
        self.row += 1;
        Some(match next {
            Ok(raw) => Ok(Record::from_row(self.row, raw)),
            Err(source) => Err(LoadError::Parse {
                origin: self.origin.clone(),
                row: self.row,
                source,
            }),
        })
    }
}

/// Read the whole file. All or nothing: the first bad row fails the load.
pub fn load_records(path: &Path) -> Result<Vec<Record>, LoadError> {
    let records = RecordReader::open(path)?.collect::<Result<Vec<_>, _>>()?;
    tracing::info!(path = %path.display(), records = records.len(), "Loaded leads");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn read(input: &str) -> Result<Vec<Record>, LoadError> {
        RecordReader::new(input.as_bytes(), "inline").collect()
    }

    #[test]
    fn maps_known_columns_and_drops_blanks() {
        let csv = "firstName,lastName,email,companyName,companyDomain,title,linkedinUrl,notes\n\
                   John,Doe,john@acme.com,Acme Corp,acme.com,VP Sales,,Demo lead\n";
        let records = read(csv).unwrap();
        assert_eq!(records.len(), 1);

        let value = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(
            value,
            json!({
                "firstName": "John",
                "lastName": "Doe",
                "email": "john@acme.com",
                "companyName": "Acme Corp",
                "companyDomain": "acme.com",
                "title": "VP Sales",
                "notes": "Demo lead"
            })
        );
        assert_eq!(records[0].field_count(), 7);
    }

    #[test]
    fn ignores_unknown_columns_and_missing_ones() {
        let csv = "email,favouriteColour,title\nann@x.io,teal,  CTO  \n";
        let records = read(csv).unwrap();
        let value = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(value, json!({"email": "ann@x.io", "title": "CTO"}));
    }

    #[test]
    fn whitespace_only_cells_count_as_blank() {
        let csv = "email,notes\n\"   \",\" \"\n";
        let records = read(csv).unwrap();
        assert_eq!(records[0].field_count(), 0);
        assert_eq!(records[0].identifier(), "row 1");
    }

    #[test]
    fn rows_are_numbered_in_file_order() {
        let csv = "email\na@x.io\nb@x.io\n\"\"\nd@x.io\n";
        let records = read(csv).unwrap();
        let ids: Vec<String> = records.iter().map(Record::identifier).collect();
        assert_eq!(ids, vec!["a@x.io", "b@x.io", "row 3", "d@x.io"]);
        assert_eq!(records[3].row(), 4);
    }

    #[test]
    fn short_and_long_rows_still_load() {
        let records = read("email,title,notes\na@x.io,CEO,hi\nb@x.io\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].email(), Some("b@x.io"));
        assert_eq!(records[1].field_count(), 1);

        let records = read("email,title\na@x.io,CEO\nb@x.io,CTO,extra\n").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].email(), Some("b@x.io"));
        assert_eq!(records[1].field_count(), 2);
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let input: &[u8] = b"email,title\na@x.io,CEO\n\xff\xfe@x.io,CTO\n";
        let result: Result<Vec<Record>, LoadError> =
            RecordReader::new(input, "inline").collect();
        match result {
            Err(LoadError::Parse { row, origin, .. }) => {
                assert_eq!(row, 2);
                assert_eq!(origin, "inline");
            }
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_records(&dir.path().join("nope.csv")).unwrap_err();
        assert!(matches!(err, LoadError::Open { .. }));
        assert!(err.to_string().contains("nope.csv"));
    }

    #[test]
    fn loads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "firstName,email").unwrap();
        writeln!(file, "Ada,ada@x.io").unwrap();
        writeln!(file, "Grace,grace@x.io").unwrap();

        let records = load_records(file.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].email(), Some("grace@x.io"));
    }

    #[test]
    fn header_only_file_has_no_records() {
        assert!(read("firstName,email\n").unwrap().is_empty());
    }
}
