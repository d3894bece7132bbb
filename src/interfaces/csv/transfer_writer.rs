use crate::domain::record::TransferRecord;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct Row<'a> {
    id: &'a str,
    file: &'a str,
    size: u64,
    status: &'a str,
    progress: u8,
    remote_id: &'a str,
    error: &'a str,
}

impl<'a> From<&'a TransferRecord> for Row<'a> {
    fn from(record: &'a TransferRecord) -> Self {
        Self {
            id: record.id.as_str(),
            file: &record.file.name,
            size: record.file.size,
            status: record.state.as_str(),
            progress: record.progress,
            remote_id: record
                .destination
                .as_ref()
                .map_or("", |d| d.remote_id.as_str()),
            error: record.error.as_deref().unwrap_or(""),
        }
    }
}

/// Writes the transfer table as CSV.
pub struct TransferWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TransferWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_transfers(&mut self, records: &[TransferRecord]) -> Result<()> {
        for record in records {
            self.writer.serialize(Row::from(record))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
