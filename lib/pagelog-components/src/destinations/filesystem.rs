use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use pagelog_core::{AggregateRecord, AggregationWindow, PartitionKey, StructuredRecord};
use serde::{de::DeserializeOwned, Serialize};
use snafu::ResultExt as _;
use tokio::{fs, io::AsyncWriteExt as _};
use tracing::{debug, warn};

use super::{
    sanitize_batch_id, AnalyticalSink, Decode, Encode, Io, PartitionStore, PartitionedBatch, QuarantineEntry,
    QuarantineSink, StoreError,
};

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".ndjson";

/// A [`PartitionStore`] backed by a directory tree.
///
/// Partitions map to Hive-style directories under the root, such as `year=2024/month=04/day=20/hour=01`. Each
/// committed batch becomes one `part-<batch id>.ndjson` file in every partition it touches. Files are staged under a
/// hidden temporary name and only renamed into place once every partition has been staged, and a failed commit removes
/// whatever it already renamed.
#[derive(Clone, Debug)]
pub struct FilesystemPartitionStore {
    root: PathBuf,
}

impl FilesystemPartitionStore {
    /// Creates a new `FilesystemPartitionStore` rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn stage(&self, dir: &Path, file_name: &str, records: &[StructuredRecord]) -> Result<StagedFile, StoreError> {
        fs::create_dir_all(dir).await.context(Io { path: dir })?;

        let staged = StagedFile {
            temp: dir.join(format!(".{}.tmp", file_name)),
            target: dir.join(file_name),
        };
        write_file(&staged.temp, &encode_lines(records)?).await?;

        Ok(staged)
    }
}

struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
}

#[async_trait]
impl PartitionStore for FilesystemPartitionStore {
    async fn append_batch(&self, batch_id: &str, batch: &PartitionedBatch) -> Result<(), StoreError> {
        let file_name = format!("{}{}{}", PART_PREFIX, sanitize_batch_id(batch_id), PART_SUFFIX);

        let mut staged = Vec::with_capacity(batch.partition_count());
        let partitions = batch.iter().collect::<Vec<_>>();
        for (key, records) in partitions {
            let dir = self.root.join(key.relative_path());
            match self.stage(&dir, &file_name, records).await {
                Ok(file) => staged.push(file),
                Err(e) => {
                    let temps = staged.iter().map(|file| file.temp.clone()).collect::<Vec<_>>();
                    discard(&temps).await;
                    return Err(e);
                }
            }
        }

        for (idx, file) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(&file.temp, &file.target).await {
                warn!(batch_id, path = %file.target.display(), error = %e, "Failed to commit partition file. Rolling back batch.");
                let committed = staged[..idx].iter().map(|file| file.target.clone()).collect::<Vec<_>>();
                let pending = staged[idx..].iter().map(|file| file.temp.clone()).collect::<Vec<_>>();
                discard(&committed).await;
                discard(&pending).await;
                return Err(e).context(Io { path: &file.target });
            }
        }

        debug!(batch_id, partitions = staged.len(), records = batch.record_count(), "Committed batch.");
        Ok(())
    }

    async fn read_partition(&self, key: &PartitionKey) -> Result<Vec<StructuredRecord>, StoreError> {
        let dir = self.root.join(key.relative_path());
        let mut files = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context(Io { path: dir }),
        };

        while let Some(entry) = entries.next_entry().await.context(Io { path: &dir })? {
            if is_part_file(&entry.file_name().to_string_lossy()) {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut records = Vec::new();
        for path in files {
            records.extend(read_lines::<StructuredRecord>(&path).await?);
        }

        Ok(records)
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionKey>, StoreError> {
        let mut partitions = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e).context(Io { path: dir }),
            };

            let mut has_parts = false;
            while let Some(entry) = entries.next_entry().await.context(Io { path: &dir })? {
                let file_type = entry.file_type().await.context(Io { path: entry.path() })?;
                if file_type.is_dir() {
                    pending.push(entry.path());
                } else if is_part_file(&entry.file_name().to_string_lossy()) {
                    has_parts = true;
                }
            }

            if !has_parts {
                continue;
            }

            let Ok(relative) = dir.strip_prefix(&self.root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            match relative.parse::<PartitionKey>() {
                Ok(key) => partitions.push(key),
                Err(e) => debug!(path = %dir.display(), error = %e, "Skipping directory that is not a partition."),
            }
        }

        partitions.sort();
        Ok(partitions)
    }
}

/// An [`AnalyticalSink`] that writes one JSON document per window.
///
/// Documents are named after the window identifier, such as `2024-04-20.json`, and are replaced atomically.
#[derive(Clone, Debug)]
pub struct FilesystemAnalyticalSink {
    root: PathBuf,
}

impl FilesystemAnalyticalSink {
    /// Creates a new `FilesystemAnalyticalSink` rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, window: &AggregationWindow) -> PathBuf {
        self.root.join(format!("{}.json", window.id()))
    }
}

#[async_trait]
impl AnalyticalSink for FilesystemAnalyticalSink {
    async fn replace(&self, window: &AggregationWindow, records: &[AggregateRecord]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(records).context(Encode { what: "aggregates" })?;
        write_atomic(&self.path_for(window), &data).await
    }

    async fn read(&self, window: &AggregationWindow) -> Result<Option<Vec<AggregateRecord>>, StoreError> {
        let path = self.path_for(window);
        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e).context(Io { path }),
        };

        serde_json::from_slice(&data).context(Decode { path, line: 1usize }).map(Some)
    }
}

/// A [`QuarantineSink`] that writes one NDJSON file per batch.
#[derive(Clone, Debug)]
pub struct FilesystemQuarantineSink {
    root: PathBuf,
}

impl FilesystemQuarantineSink {
    /// Creates a new `FilesystemQuarantineSink` rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Reads back the entries stored for a batch.
    ///
    /// # Errors
    ///
    /// If the stored entries cannot be read, an error is returned.
    pub async fn read_batch(&self, batch_id: &str) -> Result<Vec<QuarantineEntry>, StoreError> {
        let path = self.path_for(batch_id);
        match fs::metadata(&path).await {
            Ok(_) => read_lines(&path).await,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).context(Io { path }),
        }
    }

    fn path_for(&self, batch_id: &str) -> PathBuf {
        self.root.join(format!("{}.ndjson", sanitize_batch_id(batch_id)))
    }
}

#[async_trait]
impl QuarantineSink for FilesystemQuarantineSink {
    async fn quarantine(&self, batch_id: &str, entries: &[QuarantineEntry]) -> Result<(), StoreError> {
        write_atomic(&self.path_for(batch_id), &encode_lines(entries)?).await
    }
}

fn is_part_file(name: &str) -> bool {
    name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX)
}

fn encode_lines<T: Serialize>(values: &[T]) -> Result<Vec<u8>, StoreError> {
    let mut data = Vec::new();
    for value in values {
        serde_json::to_writer(&mut data, value).context(Encode { what: "record" })?;
        data.push(b'\n');
    }
    Ok(data)
}

async fn read_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let contents = fs::read_to_string(path).await.context(Io { path })?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| serde_json::from_str(line).context(Decode { path, line: idx + 1 }))
        .collect()
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut file = fs::File::create(path).await.context(Io { path })?;
    file.write_all(data).await.context(Io { path })?;
    file.sync_all().await.context(Io { path })
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return write_file(path, data).await;
    };
    fs::create_dir_all(dir).await.context(Io { path: dir })?;

    let file_name = path.file_name().map(|name| name.to_string_lossy()).unwrap_or_default();
    let temp = dir.join(format!(".{}.tmp", file_name));
    if let Err(e) = write_file(&temp, data).await {
        discard(std::slice::from_ref(&temp)).await;
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp, path).await {
        discard(std::slice::from_ref(&temp)).await;
        return Err(e).context(Io { path });
    }

    Ok(())
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove file during rollback.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone as _, Utc};
    use pagelog_core::{SourceType, ValidationReason};
    use serde_json::json;

    use super::*;

    fn row(session_id: &str, page_url: &str, hour: u32) -> StructuredRecord {
        let event_timestamp = Utc.with_ymd_and_hms(2024, 4, 20, hour, 0, 0).unwrap();
        StructuredRecord {
            session_id: session_id.to_string(),
            page_url: page_url.to_string(),
            tti: 100,
            ttar: 10,
            event_timestamp,
            action_kind: "none".to_string(),
            action_target: "none".to_string(),
            action_offset: None,
            ingest_timestamp: event_timestamp,
            source_type: SourceType::Stream,
        }
    }

    fn key(s: &str) -> PartitionKey {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPartitionStore::new(dir.path());

        let mut batch = PartitionedBatch::default();
        batch.push(key("2024-04-20T01"), vec![row("a", "/p", 1), row("b", "/p", 1)]);
        batch.push(key("2024-04-20T02"), vec![row("c", "/q", 2)]);
        store.append_batch("input-0000000001", &batch).await.unwrap();

        assert!(dir
            .path()
            .join("year=2024/month=04/day=20/hour=01/part-input-0000000001.ndjson")
            .exists());

        similar_asserts::assert_eq!(
            store.list_partitions().await.unwrap(),
            vec![key("2024-04-20T01"), key("2024-04-20T02")]
        );
        assert_eq!(store.read_partition(&key("2024-04-20T01")).await.unwrap().len(), 2);
        assert_eq!(
            store.read_partition(&key("2024-04-20T02")).await.unwrap(),
            vec![row("c", "/q", 2)]
        );
    }

    #[tokio::test]
    async fn rewriting_a_batch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPartitionStore::new(dir.path());

        let mut batch = PartitionedBatch::default();
        batch.push(key("2024-04-20"), vec![row("a", "/p", 1)]);
        store.append_batch("b-1", &batch).await.unwrap();
        store.append_batch("b-1", &batch).await.unwrap();
        store.append_batch("b-2", &batch).await.unwrap();

        assert_eq!(store.read_partition(&key("2024-04-20")).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_partitions_read_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPartitionStore::new(dir.path().join("nothing-here"));

        assert!(store.read_partition(&key("2024-04-20")).await.unwrap().is_empty());
        assert!(store.list_partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPartitionStore::new(dir.path());

        // A regular file where the second partition directory should go makes staging fail part-way through.
        std::fs::create_dir_all(dir.path().join("year=2024/month=04/day=20")).unwrap();
        std::fs::write(dir.path().join("year=2024/month=04/day=20/hour=02"), b"blocker").unwrap();

        let mut batch = PartitionedBatch::default();
        batch.push(key("2024-04-20T01"), vec![row("a", "/p", 1)]);
        batch.push(key("2024-04-20T02"), vec![row("b", "/p", 2)]);

        assert!(store.append_batch("b-1", &batch).await.is_err());
        assert!(store.read_partition(&key("2024-04-20T01")).await.unwrap().is_empty());
        assert!(store.list_partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_rename_rolls_back_committed_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemPartitionStore::new(dir.path());

        // A non-empty directory sitting on the second target name makes the rename fail after the first succeeded.
        let blocker = dir.path().join("year=2024/month=04/day=20/hour=02/part-b-1.ndjson");
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"blocker").unwrap();

        let mut batch = PartitionedBatch::default();
        batch.push(key("2024-04-20T01"), vec![row("a", "/p", 1)]);
        batch.push(key("2024-04-20T02"), vec![row("b", "/p", 2)]);

        assert!(store.append_batch("b-1", &batch).await.is_err());
        assert!(store.read_partition(&key("2024-04-20T01")).await.unwrap().is_empty());
        assert!(!dir
            .path()
            .join("year=2024/month=04/day=20/hour=02/.part-b-1.ndjson.tmp")
            .exists());
        assert!(store.list_partitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn analytical_sink_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemAnalyticalSink::new(dir.path());
        let window = AggregationWindow::single(key("2024-04-20"));

        assert_eq!(sink.read(&window).await.unwrap(), None);

        let first = vec![AggregateRecord {
            page_url: "/p".to_string(),
            avg_tti: 1.0,
            avg_ttar: 2.0,
            count: 1,
        }];
        sink.replace(&window, &first).await.unwrap();
        sink.replace(&window, &first).await.unwrap();
        assert_eq!(sink.read(&window).await.unwrap(), Some(first));
        assert!(dir.path().join("2024-04-20.json").exists());

        sink.replace(&window, &[]).await.unwrap();
        assert_eq!(sink.read(&window).await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn quarantine_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FilesystemQuarantineSink::new(dir.path());

        let raw = json!({ "session_id": "a" });
        let error = pagelog_core::validate(&raw).unwrap_err();
        let entry = QuarantineEntry::new("b-1", raw, &error, Utc::now());

        sink.quarantine("b-1", &[entry.clone()]).await.unwrap();
        sink.quarantine("b-1", &[entry.clone()]).await.unwrap();

        let stored = sink.read_batch("b-1").await.unwrap();
        assert_eq!(stored, vec![entry]);
        assert_eq!(stored[0].field, "page_url");
        assert_eq!(stored[0].reason, ValidationReason::Missing);

        assert!(sink.read_batch("b-2").await.unwrap().is_empty());
    }
}
