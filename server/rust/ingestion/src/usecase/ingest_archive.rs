use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use copilot_document_store::InsertOutcome;
use copilot_messaging::{publish_event, ArchiveIngested, EventPublisher};

use crate::domain::entity::Archive;
use crate::domain::repository::ArchiveRepository;
use crate::infrastructure::config::SourceConfig;

/// IngestOutcome は 1 ファイル分の取り込み結果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// 新規登録して ArchiveIngested を発行した
    Published { archive_id: String },
    /// pending のまま残っていたため再発行した
    Republished { archive_id: String },
    /// 処理済み（processed / failed）のため発行しなかった
    AlreadyIngested { archive_id: String },
}

impl IngestOutcome {
    pub fn archive_id(&self) -> &str {
        match self {
            Self::Published { archive_id }
            | Self::Republished { archive_id }
            | Self::AlreadyIngested { archive_id } => archive_id,
        }
    }
}

/// IngestArchiveUseCase はアーカイブファイルを登録し、ArchiveIngested を発行する。
pub struct IngestArchiveUseCase {
    repo: Arc<dyn ArchiveRepository>,
    publisher: Arc<dyn EventPublisher>,
}

impl IngestArchiveUseCase {
    pub fn new(repo: Arc<dyn ArchiveRepository>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { repo, publisher }
    }

    /// 1 ファイルを取り込む。
    ///
    /// 発行に失敗した場合アーカイブは pending のまま残り、再実行で再発行される。
    pub async fn execute(&self, path: &Path, source_name: &str) -> anyhow::Result<IngestOutcome> {
        let started_at = Utc::now();
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read archive file: {}", path.display()))?;
        let archive = Archive::from_content(source_name, path, &content, started_at);
        let archive_id = archive.archive_id.clone();

        let republish = match self.repo.create(&archive).await? {
            InsertOutcome::Inserted => false,
            InsertOutcome::AlreadyExists => {
                let existing = self.repo.find_by_id(&archive_id).await?;
                match existing {
                    Some(existing) if !existing.is_pending() => {
                        tracing::info!(
                            archive_id = %archive_id,
                            status = %existing.status,
                            "archive already ingested, skipping"
                        );
                        return Ok(IngestOutcome::AlreadyIngested { archive_id });
                    }
                    _ => true,
                }
            }
        };

        let event = ArchiveIngested {
            archive_id: archive_id.clone(),
            source_name: source_name.to_string(),
            file_path: archive.file_path.clone(),
            file_size_bytes: archive.file_size_bytes,
            file_hash_sha256: archive.file_hash_sha256.clone(),
            ingestion_started_at: started_at,
            ingestion_completed_at: Utc::now(),
        };
        publish_event(self.publisher.as_ref(), &event)
            .await
            .with_context(|| format!("failed to publish ArchiveIngested for {archive_id}"))?;

        tracing::info!(
            archive_id = %archive_id,
            source = %source_name,
            file_size_bytes = archive.file_size_bytes,
            republish,
            "archive ingested"
        );
        Ok(if republish {
            IngestOutcome::Republished { archive_id }
        } else {
            IngestOutcome::Published { archive_id }
        })
    }

    /// 設定されたソースをすべて取り込む。1 ファイルの失敗は記録して次へ進む。
    pub async fn ingest_sources(&self, sources: &[SourceConfig]) -> Vec<anyhow::Result<IngestOutcome>> {
        let mut results = Vec::new();
        for source in sources {
            let files = match archive_files(&source.path).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::error!(source = %source.name, error = %e, "failed to list archive files");
                    results.push(Err(e));
                    continue;
                }
            };
            for file in files {
                let result = self.execute(&file, &source.name).await;
                if let Err(ref e) = result {
                    tracing::error!(
                        source = %source.name,
                        file = %file.display(),
                        error = %e,
                        "failed to ingest archive"
                    );
                }
                results.push(result);
            }
        }
        results
    }
}

/// path がディレクトリなら直下の *.mbox を名前順に、ファイルならそれ自体を返す。
async fn archive_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("archive source not found: {}", path.display()))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let file = entry.path();
        if file.extension().is_some_and(|ext| ext == "mbox") && entry.file_type().await?.is_file() {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}
