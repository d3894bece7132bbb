use crate::domain::record::Payload;
use crate::error::{Result, TransferError};
use serde::Deserialize;
use std::io::Read;
use std::path::PathBuf;

/// One row of an upload manifest: a file path and an optional MIME type.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    #[serde(default, rename = "type")]
    pub mime_type: Option<String>,
}

impl ManifestEntry {
    /// Reads the file, overriding the guessed MIME type when the row has one.
    pub async fn load(&self) -> Result<Payload> {
        let payload = Payload::from_path(&self.path).await.map_err(|e| {
            TransferError::ValidationError(format!("{}: {e}", self.path.display()))
        })?;
        Ok(match self.mime_type.as_deref().map(str::trim) {
            Some(mime) if !mime.is_empty() => payload.with_mime_type(mime),
            _ => payload,
        })
    }
}

/// Reads manifest rows (`path,type` header) from a CSV source.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// so the `type` column may be left out entirely.
pub struct ManifestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> ManifestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes manifest entries.
    pub fn entries(self) -> impl Iterator<Item = Result<ManifestEntry>> {
        self.reader
            .into_deserialize::<ManifestEntry>()
            .map(|result| result.map_err(TransferError::from))
    }
}
