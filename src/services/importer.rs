//! Streaming CSV import of collaborators.
//!
//! The file is parsed on a blocking thread and handed over row by row through a bounded
//! channel, so memory use does not grow with the file. Every valid row is upserted by
//! (owner, cpf) in its own transaction that first locks the matching row.

use std::io::{self, Read};
use std::sync::Arc;

use csv::ByteRecord;
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collaborator::{CollaboratorService, ServiceError};
use super::storage::StorageRegistry;
use super::store::CollaboratorStore;
use crate::types::{CollaboratorFields, Document, ImportResult};

const REQUIRED_COLUMNS: [&str; 5] = ["name", "email", "cpf", "city", "state"];

/// Rows parsed ahead of the database loop
const ROW_BUFFER: usize = 64;

/// Extra attempts for a row whose insert lost a race on the same cpf
const ROW_CONFLICT_RETRIES: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("unknown storage disk: {0}")]
    UnknownDisk(String),

    #[error("cannot open file {path}: {source}")]
    CannotOpen {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("CSV file is empty")]
    EmptyFile,

    #[error("CSV header is missing required columns: {}", missing.join(", "))]
    MissingColumns { missing: Vec<String> },

    #[error("failed to read CSV near line {line}: {source}")]
    Read {
        line: u64,
        #[source]
        source: csv::Error,
    },

    #[error("row on line {line} could not be saved: {source}")]
    Row {
        line: u64,
        #[source]
        source: ServiceError,
    },

    #[error("CSV parser task failed: {0}")]
    Parser(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Created,
    Updated,
}

enum ParsedRow {
    /// One data record; `fields` is `None` when the row is skipped
    Record {
        line: u64,
        fields: Option<CollaboratorFields>,
    },
    /// Empty lines the reader stepped over, each one a skipped row
    Blank(u32),
}

type ParsedItem = Result<ParsedRow, ImportError>;

pub struct CsvImporter {
    store: Arc<dyn CollaboratorStore>,
    disks: StorageRegistry,
}

impl CsvImporter {
    pub fn new(store: Arc<dyn CollaboratorStore>, disks: StorageRegistry) -> Self {
        Self { store, disks }
    }

    /// Import `path` from the named disk into the owner's collaborators
    pub async fn import(
        &self,
        owner_id: Uuid,
        path: &str,
        disk: &str,
    ) -> Result<ImportResult, ImportError> {
        let storage = self
            .disks
            .disk(disk)
            .ok_or_else(|| ImportError::UnknownDisk(disk.to_string()))?;
        let stream = storage
            .open_read(path)
            .await
            .map_err(|source| ImportError::CannotOpen {
                path: path.to_string(),
                source,
            })?;

        let (row_tx, mut row_rx) = mpsc::channel(ROW_BUFFER);
        let reader = SyncIoBridge::new(stream);
        let parser = tokio::task::spawn_blocking(move || parse_rows(reader, row_tx));

        let outcome = self.consume(owner_id, &mut row_rx).await;

        // Closing the receiver stops a parser still blocked on a full channel; the
        // stream is dropped together with the parser.
        drop(row_rx);
        let joined = parser.await;

        let result = outcome?;
        joined?;

        info!(
            user_id = %owner_id,
            path = %path,
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            "CSV import finished"
        );
        Ok(result)
    }

    async fn consume(
        &self,
        owner_id: Uuid,
        rows: &mut mpsc::Receiver<ParsedItem>,
    ) -> Result<ImportResult, ImportError> {
        let mut result = ImportResult::default();

        while let Some(item) = rows.recv().await {
            let (line, fields) = match item? {
                ParsedRow::Record { line, fields } => (line, fields),
                ParsedRow::Blank(count) => {
                    debug!(count, "Skipping blank CSV lines");
                    result.skipped += count;
                    continue;
                }
            };
            let Some(fields) = fields else {
                debug!(line, "Skipping invalid CSV row");
                result.skipped += 1;
                continue;
            };

            let outcome = self
                .upsert_row(owner_id, fields)
                .await
                .map_err(|source| ImportError::Row { line, source })?;
            match outcome {
                RowOutcome::Created => result.created += 1,
                RowOutcome::Updated => result.updated += 1,
            }
        }

        Ok(result)
    }

    /// Create or update the owner's collaborator with this cpf.
    ///
    /// A cpf conflict on the insert path means a concurrent transaction committed the
    /// same key after our locking read; the retry finds and locks that row.
    async fn upsert_row(
        &self,
        owner_id: Uuid,
        fields: CollaboratorFields,
    ) -> Result<RowOutcome, ServiceError> {
        let mut attempt = 0;
        loop {
            match self.upsert_once(owner_id, fields.clone()).await {
                Err(ServiceError::Validation(errors))
                    if errors.contains("cpf") && attempt < ROW_CONFLICT_RETRIES =>
                {
                    attempt += 1;
                    warn!(user_id = %owner_id, cpf = %fields.cpf, "Row lost a cpf race, retrying");
                }
                other => return other,
            }
        }
    }

    async fn upsert_once(
        &self,
        owner_id: Uuid,
        fields: CollaboratorFields,
    ) -> Result<RowOutcome, ServiceError> {
        let mut tx = self.store.begin().await?;

        let outcome = match tx.lock_by_document(owner_id, fields.cpf.value()).await? {
            None => {
                CollaboratorService::create_in(tx.as_mut(), owner_id, fields).await?;
                RowOutcome::Created
            }
            Some(existing) => {
                CollaboratorService::update_in(tx.as_mut(), owner_id, &existing, fields.into())
                    .await?;
                RowOutcome::Updated
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}

// =============================================================================
// Parsing (blocking thread)
// =============================================================================

/// Positions of the required columns in the header
struct ColumnMap {
    width: usize,
    indexes: [usize; 5],
}

impl ColumnMap {
    fn from_header(record: &ByteRecord) -> Result<Self, ImportError> {
        let names: Vec<String> = record
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let text = String::from_utf8_lossy(cell);
                let text: &str = if i == 0 {
                    text.trim_start_matches('\u{feff}')
                } else {
                    text.as_ref()
                };
                text.trim().to_lowercase()
            })
            .collect();

        let missing: Vec<String> = REQUIRED_COLUMNS
            .iter()
            .filter(|column| !names.iter().any(|n| n == *column))
            .map(|column| column.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ImportError::MissingColumns { missing });
        }

        // A repeated column name binds its last occurrence
        let indexes = REQUIRED_COLUMNS.map(|column| {
            names.iter().rposition(|n| n == column).unwrap_or_default()
        });
        Ok(Self {
            width: names.len(),
            indexes,
        })
    }

    /// Required cells of a record, or `None` when the row must be skipped
    fn extract(&self, record: &ByteRecord) -> Option<CollaboratorFields> {
        if record.len() != self.width {
            return None;
        }

        let [name, email, cpf, city, state] = self.indexes.map(|idx| {
            record
                .get(idx)
                .and_then(|cell| std::str::from_utf8(cell).ok())
                .map(str::trim)
                .filter(|cell| !cell.is_empty())
        });

        let cpf = Document::from_raw(cpf?);
        if !cpf.has_valid_length() {
            return None;
        }

        Some(CollaboratorFields {
            name: name?.to_string(),
            email: email?.to_lowercase(),
            cpf,
            city: city?.to_string(),
            state: state?.to_string(),
        })
    }
}

/// Remembers the last byte handed to the CSV reader
struct LastByte<R> {
    inner: R,
    last: Option<u8>,
}

impl<R: Read> Read for LastByte<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        if read > 0 {
            self.last = Some(buf[read - 1]);
        }
        Ok(read)
    }
}

/// Line breaks a record takes up, its own terminator included
fn line_breaks(record: &ByteRecord) -> u64 {
    let inside = record.as_slice().iter().filter(|&&b| b == b'\n').count() as u64;
    inside + 1
}

/// Parse the file and send its rows.
///
/// The reader drops empty lines, so they are recovered at the end of the file from the
/// difference between the line breaks read and the ones the records account for.
fn parse_rows<R: Read>(source: R, rows: mpsc::Sender<ParsedItem>) {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(LastByte {
            inner: source,
            last: None,
        });

    let mut record = ByteRecord::new();
    let columns = match reader.read_byte_record(&mut record) {
        Ok(true) => ColumnMap::from_header(&record),
        Ok(false) => Err(ImportError::EmptyFile),
        Err(source) => Err(ImportError::Read { line: 1, source }),
    };
    let columns = match columns {
        Ok(columns) => columns,
        Err(e) => {
            let _ = rows.blocking_send(Err(e));
            return;
        }
    };
    let mut accounted = line_breaks(&record);

    loop {
        let item = match reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                accounted += line_breaks(&record);
                Ok(ParsedRow::Record {
                    line: record.position().map_or(0, |p| p.line()),
                    fields: columns.extract(&record),
                })
            }
            Err(source) => Err(ImportError::Read {
                line: reader.position().line(),
                source,
            }),
        };

        let fatal = item.is_err();
        if rows.blocking_send(item).is_err() || fatal {
            return;
        }
    }

    // The last record has no terminator when the file does not end with a line break
    if reader.get_ref().last != Some(b'\n') {
        accounted -= 1;
    }
    let read = reader.position().line().saturating_sub(1);
    let blank = read.saturating_sub(accounted);
    if blank > 0 {
        let blank = u32::try_from(blank).unwrap_or(u32::MAX);
        let _ = rows.blocking_send(Ok(ParsedRow::Blank(blank)));
    }
}
