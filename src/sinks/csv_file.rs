use anyhow::{Context, anyhow};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::Sink;
use crate::schema::FieldSchema;

/// Encodes one row as a CSV line, quoting fields only when needed.
fn encode_row(values: &[String]) -> anyhow::Result<Vec<u8>> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(values)?;
    wtr.into_inner()
        .map_err(|e| anyhow!("csv flush failed: {}", e.error()))
}

/// Appends rows to a local CSV file.
///
/// The header row is written once, when the file is new or empty.
pub struct CsvSink {
    id: String,
    file: Mutex<File>,
}

impl CsvSink {
    pub async fn open(id: &str, path: &str, schema: &FieldSchema) -> anyhow::Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("cannot open {path}"))?;

        if file.metadata().await?.len() == 0 {
            file.write_all(&encode_row(&schema.header())?).await?;
            file.flush().await?;
        }

        Ok(Self {
            id: id.to_string(),
            file: Mutex::new(file),
        })
    }
}

#[async_trait::async_trait]
impl Sink for CsvSink {
    fn id(&self) -> &str {
        &self.id
    }

    async fn append_row(&self, row: &[String]) -> anyhow::Result<()> {
        let line = encode_row(row)?;
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}
