use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use abrprint_core::{
    AppConfig, ExtractResult, FingerprintResult, ServiceError, UrlExtractResult,
};

/// One result (or failure) of a top-level operation, headed for its own
/// output file.
pub(crate) struct OutputEntry {
    pub payload: Result<OutputPayload, ServiceError>,
    pub prefix: &'static str,
    pub suffix: String,
}

#[derive(Serialize)]
#[serde(untagged)]
pub(crate) enum OutputPayload {
    Urls(UrlExtractResult),
    Extract(Box<ExtractResult>),
    Fingerprint(FingerprintResult),
}

/// Writes results as timestamped JSON files. The timestamp is fixed at
/// construction so every file of one invocation shares it.
pub(crate) struct JsonWriter {
    out_dir: PathBuf,
    no_indent: bool,
    stamp: String,
}

impl JsonWriter {
    pub fn new(out_dir: &Path, no_indent: bool) -> std::io::Result<Self> {
        std::fs::create_dir_all(out_dir)?;
        Ok(Self {
            out_dir: out_dir.to_path_buf(),
            no_indent,
            stamp: Utc::now().format("%Y%m%d_%H%M%S").to_string(),
        })
    }

    fn file_name(&self, prefix: &str, suffix: &str) -> String {
        format!("{prefix}{}{suffix}.json", self.stamp)
    }

    fn write(&self, payload: &OutputPayload, prefix: &str, suffix: &str) -> std::io::Result<PathBuf> {
        let path = self.out_dir.join(self.file_name(prefix, suffix));
        let body = if self.no_indent {
            serde_json::to_vec(payload)
        } else {
            serde_json::to_vec_pretty(payload)
        }
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

/// Single-writer sink: drains the output channel until every sender is
/// dropped, logging failures and writing successful results to disk.
pub(crate) async fn drain_output(
    writer: JsonWriter,
    mut receiver: mpsc::Receiver<OutputEntry>,
    config: Arc<AppConfig>,
    cancel: CancellationToken,
) {
    while let Some(entry) = receiver.recv().await {
        match entry.payload {
            Err(error) => {
                if !cancel.is_cancelled() {
                    error!("{error}");
                }
            }
            Ok(payload) => {
                if config.verbose {
                    if let OutputPayload::Extract(result) = &payload {
                        for failure in &result.failed_errors {
                            warn!("{failure}");
                        }
                    }
                }
                match writer.write(&payload, entry.prefix, &entry.suffix) {
                    Ok(path) => info!(path = %path.display(), "saved result"),
                    Err(error) => error!(error = %error, "failed to write result"),
                }
            }
        }
    }
}
