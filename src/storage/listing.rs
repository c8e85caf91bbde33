//! Listing engine.
//!
//! There are no container or account databases.  A container listing is a
//! walk of the container directory; an account listing is a read of the
//! account directory.  Object counts and bytes used are cached in the
//! container and account metadata and rewritten whenever a walk disagrees
//! with them.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::fs::ops::{do_listdir, do_stat, do_walk};
use crate::fs::xattr::XattrTarget;
use crate::fs::FsError;
use crate::metadata::keys::*;
use crate::metadata::validate::{validate_account, validate_container};
use crate::metadata::{user_metadata, Metadata};
use crate::timestamp;

use super::backend::{
    AccountInfo, ContainerInfo, ContainerRow, ListParams, ListingEntry, ObjectRow,
};
use super::diskfile::{is_temp_name, DiskFileManager};
use super::dirs::MkdirOutcome;
use super::error::StorageError;

/// Account-level directory names owned by auxiliary daemons.
const RESERVED_ACCOUNT_DIRS: &[&str] = &["tmp", "async_pending"];

/// Apply prefix, delimiter, marker, end_marker, path, and limit to a sorted
/// list of names.
pub fn filter_listing(names: &[String], params: &ListParams) -> Vec<ListingEntry<String>> {
    let (prefix, delimiter, path) = match &params.path {
        Some(path) => {
            let path = if path.is_empty() {
                String::new()
            } else {
                format!("{}/", path.trim_end_matches('/'))
            };
            (path.clone(), Some('/'), Some(path))
        }
        None => (params.prefix.clone().unwrap_or_default(), params.delimiter, None),
    };
    let marker = params
        .marker
        .as_deref()
        .filter(|m| !m.is_empty() && *m >= prefix.as_str());

    let mut out = Vec::new();
    let mut skip: Option<String> = None;
    for name in names {
        if out.len() >= params.limit {
            break;
        }
        if let Some(end) = params.end_marker.as_deref().filter(|e| !e.is_empty()) {
            if name.as_str() >= end {
                break;
            }
        }
        match marker {
            Some(marker) if name.as_str() <= marker => continue,
            _ if name.as_str() < prefix.as_str() => continue,
            _ => {}
        }
        if !name.starts_with(&prefix) {
            continue;
        }
        if let Some(skipped) = &skip {
            if name.starts_with(skipped.as_str()) {
                continue;
            }
        }
        let Some(delimiter) = delimiter else {
            out.push(ListingEntry::Item(name.clone()));
            continue;
        };
        if path.as_deref() == Some(name.as_str()) {
            continue;
        }
        let found = name[prefix.len()..]
            .find(delimiter)
            .map(|i| prefix.len() + i + delimiter.len_utf8());
        match found {
            Some(end) if name.len() > end => {
                let subdir = name[..end].to_string();
                // A subdir equal to the marker was returned on the previous page.
                if path.is_none() && marker != Some(subdir.as_str()) {
                    out.push(ListingEntry::Subdir(subdir.clone()));
                }
                skip = Some(subdir);
            }
            Some(_) => {
                // Ends in the delimiter: its children fold into this row.
                skip = Some(name.clone());
                out.push(ListingEntry::Item(name.clone()));
            }
            None => out.push(ListingEntry::Item(name.clone())),
        }
    }
    out
}

fn parse_count(metadata: &Metadata, key: &str) -> u64 {
    metadata
        .get(key)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0)
}

/// Merge `incoming` into `metadata`; an empty value removes the key.
pub fn merge_metadata(metadata: &mut Metadata, incoming: &Metadata) {
    for (key, value) in incoming {
        if value.is_empty() {
            metadata.remove(key);
        } else {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

/// Container metadata for a fresh container.
fn new_container_metadata(ts: f64) -> Metadata {
    let ts = timestamp::normalize(ts);
    let mut metadata = Metadata::new();
    metadata.insert(X_TYPE.into(), CONTAINER.into());
    metadata.insert(X_TIMESTAMP.into(), ts.clone());
    metadata.insert(X_PUT_TIMESTAMP.into(), ts);
    metadata.insert(X_OBJECT_COUNT.into(), "0".into());
    metadata.insert(X_BYTES_USED.into(), "0".into());
    metadata.insert(X_REPORTED_SYNC_POINT.into(), "-1".into());
    metadata.insert(X_SYNC_POINT.into(), "-1".into());
    metadata
}

fn new_account_metadata(ts: f64) -> Metadata {
    let ts = timestamp::normalize(ts);
    let mut metadata = Metadata::new();
    metadata.insert(X_TYPE.into(), ACCOUNT.into());
    metadata.insert(X_TIMESTAMP.into(), ts.clone());
    metadata.insert(X_PUT_TIMESTAMP.into(), ts);
    metadata.insert(X_CONTAINER_COUNT.into(), "0".into());
    metadata.insert(X_OBJECT_COUNT.into(), "0".into());
    metadata.insert(X_BYTES_USED.into(), "0".into());
    metadata
}

/// Store `key = value` and report whether it changed.
fn set_count(metadata: &mut Metadata, key: &str, value: u64) -> bool {
    let value = value.to_string();
    if metadata.get(key) == Some(&value) {
        return false;
    }
    metadata.insert(key.to_string(), value);
    true
}

fn dir_mtime(path: &Path) -> Result<f64, StorageError> {
    let stat = do_stat(path)?.ok_or(StorageError::NotFound)?;
    Ok(timestamp::mtime_of(&stat))
}

/// Result of walking one container.
#[derive(Debug, Default)]
struct ContainerScan {
    /// Listable object names, sorted.
    names: Vec<String>,
    object_count: u64,
    bytes_used: u64,
}

/// Builds brokers for containers and accounts on top of the object engine.
#[derive(Debug, Clone)]
pub struct ListingEngine {
    files: DiskFileManager,
    accurate_size: bool,
}

impl ListingEngine {
    /// With `accurate_size` every listed file is stat'ed for bytes-used.
    pub fn new(files: DiskFileManager, accurate_size: bool) -> Self {
        Self {
            files,
            accurate_size,
        }
    }

    pub fn files(&self) -> &DiskFileManager {
        &self.files
    }

    pub fn container(&self, device: &str, container: &str) -> ContainerBroker<'_> {
        ContainerBroker {
            engine: self,
            device: device.to_string(),
            name: container.to_string(),
            path: self.files.layout().device_path(device).join(container),
        }
    }

    pub fn account(&self, device: &str) -> AccountBroker<'_> {
        AccountBroker {
            engine: self,
            device: device.to_string(),
            path: self.files.layout().device_path(device),
        }
    }

    fn codec(&self) -> crate::metadata::MetadataCodec {
        self.files.dirs().codec
    }
}

/// A container directory viewed as a container database.
#[derive(Debug)]
pub struct ContainerBroker<'a> {
    engine: &'a ListingEngine,
    device: String,
    name: String,
    path: PathBuf,
}

impl ContainerBroker<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> Result<bool, StorageError> {
        Ok(do_stat(&self.path)?.is_some_and(|s| s.is_dir()))
    }

    fn not_found(&self) -> StorageError {
        StorageError::ContainerNotFound {
            container: self.name.clone(),
        }
    }

    /// Create the container.  Returns `false` when it already existed, in
    /// which case `metadata` is merged into what is there and the put
    /// timestamp is bumped.
    pub fn initialize(&self, ts: f64, metadata: &Metadata) -> Result<bool, StorageError> {
        let dirs = self.engine.files.dirs();
        let created = match dirs.make_directory(&self.path)? {
            MkdirOutcome::Created => true,
            MkdirOutcome::Existed => false,
            MkdirOutcome::ParentMissing => return Err(StorageError::NotFound),
        };
        let mut stored = if created {
            new_container_metadata(ts)
        } else {
            let mut stored = self.metadata()?;
            stored.insert(X_PUT_TIMESTAMP.into(), timestamp::normalize(ts));
            stored
        };
        merge_metadata(&mut stored, metadata);
        self.write(&stored)?;
        Ok(created)
    }

    fn write(&self, metadata: &Metadata) -> Result<(), StorageError> {
        match self
            .engine
            .codec()
            .write(XattrTarget::Path(&self.path), metadata)
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_vanished() => Err(self.not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stored container metadata, rebuilt from a walk when missing or
    /// incomplete.
    pub fn metadata(&self) -> Result<Metadata, StorageError> {
        let stored = match self.engine.codec().read(XattrTarget::Path(&self.path)) {
            Ok(stored) => stored,
            Err(e) if e.is_vanished() || e.errno() == Some(libc::ENOTDIR) => {
                return Err(self.not_found())
            }
            Err(e) => return Err(e.into()),
        };
        if !self.exists()? {
            return Err(self.not_found());
        }
        if validate_container(&stored) {
            return Ok(stored);
        }
        debug!("rebuilding container metadata for {}", self.path.display());
        let mut metadata = new_container_metadata(dir_mtime(&self.path)?);
        // Keep user keys from a partial document.
        for (key, value) in user_metadata(&stored, CONTAINER_META_PREFIX) {
            metadata.insert(key.clone(), value.clone());
        }
        let scan = self.scan()?;
        set_count(&mut metadata, X_OBJECT_COUNT, scan.object_count);
        set_count(&mut metadata, X_BYTES_USED, scan.bytes_used);
        self.write(&metadata)?;
        Ok(metadata)
    }

    fn scan(&self) -> Result<ContainerScan, StorageError> {
        let walk = match do_walk(&self.path, true) {
            Ok(walk) => walk,
            Err(e) if e.is_vanished() => return Err(self.not_found()),
            Err(e) => return Err(e.into()),
        };
        let dirs = self.engine.files.dirs();
        let implicit = self.engine.files.tuning().implicit_dir_objects;
        let mut scan = ContainerScan::default();
        for entry in walk {
            let rel = entry
                .dir
                .strip_prefix(&self.path)
                .ok()
                .and_then(Path::to_str)
                .unwrap_or_default()
                .to_string();
            let full_name = |name: &str| {
                if rel.is_empty() {
                    name.to_string()
                } else {
                    format!("{rel}/{name}")
                }
            };
            for file in &entry.files {
                if is_temp_name(file) {
                    continue;
                }
                if self.engine.accurate_size {
                    match do_stat(&entry.dir.join(file))? {
                        Some(stat) => scan.bytes_used += stat.len(),
                        None => continue,
                    }
                }
                scan.names.push(full_name(file));
                scan.object_count += 1;
            }
            for dir in &entry.dirs {
                if implicit || dirs.is_dir_object(&entry.dir.join(dir))? {
                    scan.names.push(full_name(dir));
                    scan.object_count += 1;
                }
            }
        }
        scan.names.sort();
        Ok(scan)
    }

    /// Walk and write back counts that disagree with the cache.
    fn refresh(&self) -> Result<(Metadata, ContainerScan), StorageError> {
        let mut metadata = self.metadata()?;
        let scan = self.scan()?;
        let changed = set_count(&mut metadata, X_OBJECT_COUNT, scan.object_count)
            | set_count(&mut metadata, X_BYTES_USED, scan.bytes_used);
        if changed {
            debug!(
                "container {} now holds {} objects, {} bytes",
                self.name, scan.object_count, scan.bytes_used
            );
            self.write(&metadata)?;
        }
        Ok((metadata, scan))
    }

    /// Recount objects and bytes from disk.
    pub fn update_object_count(&self) -> Result<(), StorageError> {
        self.refresh().map(|_| ())
    }

    /// Container info, optionally recounting first.
    pub fn get_info(&self, recount: bool) -> Result<ContainerInfo, StorageError> {
        let metadata = if recount {
            self.refresh()?.0
        } else {
            self.metadata()?
        };
        Ok(ContainerInfo {
            name: self.name.clone(),
            object_count: parse_count(&metadata, X_OBJECT_COUNT),
            bytes_used: parse_count(&metadata, X_BYTES_USED),
            put_timestamp: metadata.get(X_PUT_TIMESTAMP).cloned().unwrap_or_default(),
            created_at: metadata.get(X_TIMESTAMP).cloned().unwrap_or_default(),
            metadata: user_metadata(&metadata, CONTAINER_META_PREFIX)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// List objects.  Entries deleted while the listing runs are skipped.
    pub fn list_objects_iter(
        &self,
        params: &ListParams,
    ) -> Result<Vec<ListingEntry<ObjectRow>>, StorageError> {
        let (_, scan) = self.refresh()?;
        let mut rows = Vec::new();
        for entry in filter_listing(&scan.names, params) {
            let name = match entry {
                ListingEntry::Subdir(subdir) => {
                    rows.push(ListingEntry::Subdir(subdir));
                    continue;
                }
                ListingEntry::Item(name) => name,
            };
            let diskfile = self.engine.files.diskfile(&self.device, &self.name, &name)?;
            let metadata = match diskfile.current_metadata() {
                Ok(metadata) => metadata,
                Err(StorageError::NotFound) => continue,
                Err(StorageError::Fs(e)) if e.is_vanished() => continue,
                Err(e) => return Err(e),
            };
            rows.push(ListingEntry::Item(ObjectRow {
                name,
                timestamp: metadata.get(X_TIMESTAMP).cloned().unwrap_or_default(),
                size: parse_count(&metadata, CONTENT_LENGTH),
                content_type: metadata.get(CONTENT_TYPE).cloned().unwrap_or_default(),
                etag: metadata.get(ETAG).cloned().unwrap_or_default(),
            }));
        }
        Ok(rows)
    }

    pub fn update_metadata(&self, incoming: &Metadata) -> Result<(), StorageError> {
        let mut metadata = self.metadata()?;
        merge_metadata(&mut metadata, incoming);
        self.write(&metadata)
    }

    /// No file objects and no directory objects.
    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.scan()?.object_count == 0)
    }

    /// Remove the container and any gratuitous directories left in it.
    pub fn delete(&self) -> Result<(), StorageError> {
        if !self.exists()? {
            return Err(self.not_found());
        }
        if !self.is_empty()? {
            return Err(StorageError::NotEmpty);
        }
        if !self.engine.files.dirs().rmobjdir(&self.path, true)? {
            // Something appeared mid-delete, an in-flight upload for one.
            return Err(StorageError::NotEmpty);
        }
        Ok(())
    }
}

/// The device directory viewed as an account database.
#[derive(Debug)]
pub struct AccountBroker<'a> {
    engine: &'a ListingEngine,
    device: String,
    path: PathBuf,
}

impl AccountBroker<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container names, sorted.  Reserved and dot-prefixed names are not
    /// containers.
    pub fn container_names(&self) -> Result<Vec<String>, StorageError> {
        let entries = match do_listdir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.is_vanished() => return Err(StorageError::NotFound),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for name in entries {
            if name.starts_with('.') || RESERVED_ACCOUNT_DIRS.contains(&name.as_str()) {
                continue;
            }
            if do_stat(&self.path.join(&name))?.is_some_and(|s| s.is_dir()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn read(&self) -> Result<Metadata, StorageError> {
        match self.engine.codec().read(XattrTarget::Path(&self.path)) {
            Ok(metadata) => Ok(metadata),
            Err(e) if e.is_vanished() => Err(StorageError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, metadata: &Metadata) -> Result<(), FsError> {
        self.engine
            .codec()
            .write(XattrTarget::Path(&self.path), metadata)
    }

    /// Per-container rows for `names`, skipping containers that vanish.
    fn container_rows(&self, names: &[String]) -> Result<Vec<ContainerRow>, StorageError> {
        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            let metadata = match self.engine.container(&self.device, name).metadata() {
                Ok(metadata) => metadata,
                Err(StorageError::ContainerNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            rows.push(ContainerRow {
                name: name.clone(),
                object_count: parse_count(&metadata, X_OBJECT_COUNT),
                bytes_used: parse_count(&metadata, X_BYTES_USED),
            });
        }
        Ok(rows)
    }

    /// Account metadata with counts summed over the containers' cached
    /// counts.  Created on first use.
    fn refresh(&self, names: &[String]) -> Result<Metadata, StorageError> {
        let stored = self.read()?;
        let valid = validate_account(&stored);
        let mut metadata = if valid {
            stored
        } else {
            let mut fresh = new_account_metadata(dir_mtime(&self.path)?);
            for (key, value) in user_metadata(&stored, ACCOUNT_META_PREFIX) {
                fresh.insert(key.clone(), value.clone());
            }
            fresh
        };
        let rows = self.container_rows(names)?;
        let changed = set_count(&mut metadata, X_CONTAINER_COUNT, rows.len() as u64)
            | set_count(
                &mut metadata,
                X_OBJECT_COUNT,
                rows.iter().map(|r| r.object_count).sum(),
            )
            | set_count(
                &mut metadata,
                X_BYTES_USED,
                rows.iter().map(|r| r.bytes_used).sum(),
            );
        if changed || !valid {
            self.write(&metadata)?;
        }
        Ok(metadata)
    }

    pub fn get_info(&self) -> Result<AccountInfo, StorageError> {
        let names = self.container_names()?;
        let metadata = self.refresh(&names)?;
        Ok(AccountInfo {
            name: self.device.clone(),
            container_count: parse_count(&metadata, X_CONTAINER_COUNT),
            object_count: parse_count(&metadata, X_OBJECT_COUNT),
            bytes_used: parse_count(&metadata, X_BYTES_USED),
            put_timestamp: metadata.get(X_PUT_TIMESTAMP).cloned().unwrap_or_default(),
            created_at: metadata.get(X_TIMESTAMP).cloned().unwrap_or_default(),
            metadata: user_metadata(&metadata, ACCOUNT_META_PREFIX)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    pub fn list_containers_iter(
        &self,
        params: &ListParams,
    ) -> Result<Vec<ListingEntry<ContainerRow>>, StorageError> {
        let names = self.container_names()?;
        self.refresh(&names)?;
        let mut out = Vec::new();
        for entry in filter_listing(&names, params) {
            match entry {
                ListingEntry::Subdir(subdir) => out.push(ListingEntry::Subdir(subdir)),
                ListingEntry::Item(name) => {
                    let rows = self.container_rows(std::slice::from_ref(&name))?;
                    out.extend(rows.into_iter().map(ListingEntry::Item));
                }
            }
        }
        Ok(out)
    }

    pub fn update_metadata(&self, incoming: &Metadata) -> Result<(), StorageError> {
        let names = self.container_names()?;
        let mut metadata = self.refresh(&names)?;
        merge_metadata(&mut metadata, incoming);
        self.write(&metadata)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::test_support::scratch_dir;
    use std::fs;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = list.iter().map(|s| s.to_string()).collect();
        names.sort();
        names
    }

    fn rendered(entries: Vec<ListingEntry<String>>) -> Vec<String> {
        entries
            .into_iter()
            .map(|e| match e {
                ListingEntry::Item(name) => name,
                ListingEntry::Subdir(name) => format!("subdir:{name}"),
            })
            .collect()
    }

    fn params() -> ListParams {
        ListParams::default()
    }

    #[test]
    fn test_prefix_and_delimiter() {
        let all = names(&["a", "dir1/file2", "dir1/subdir1/file3", "dir2/x"]);
        let p = ListParams {
            prefix: Some("dir1/".into()),
            delimiter: Some('/'),
            ..params()
        };
        assert_eq!(
            rendered(filter_listing(&all, &p)),
            vec!["dir1/file2", "subdir:dir1/subdir1/"]
        );
    }

    #[test]
    fn test_delimiter_at_top_level() {
        let all = names(&["a", "dir1/file2", "dir1/subdir1/file3", "dir2/x"]);
        let p = ListParams {
            delimiter: Some('/'),
            ..params()
        };
        assert_eq!(
            rendered(filter_listing(&all, &p)),
            vec!["a", "subdir:dir1/", "subdir:dir2/"]
        );
    }

    #[test]
    fn test_markers() {
        let all = names(&["a", "b", "c", "d"]);
        let p = ListParams {
            marker: Some("a".into()),
            end_marker: Some("d".into()),
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["b", "c"]);

        // A marker below the prefix is ignored in favour of the prefix.
        let all = names(&["a", "pa", "pb", "q"]);
        let p = ListParams {
            prefix: Some("p".into()),
            marker: Some("b".into()),
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["pa", "pb"]);

        let p = ListParams {
            prefix: Some("p".into()),
            marker: Some("pa".into()),
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["pb"]);
    }

    #[test]
    fn test_limit_counts_subdirs() {
        let all = names(&["a/1", "a/2", "b/1", "c"]);
        let p = ListParams {
            delimiter: Some('/'),
            limit: 2,
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["subdir:a/", "subdir:b/"]);
    }

    #[test]
    fn test_path_lists_direct_children_only() {
        let all = names(&["a", "dir1", "dir1/file2", "dir1/subdir1", "dir1/subdir1/file3"]);
        let p = ListParams {
            path: Some("dir1".into()),
            ..params()
        };
        assert_eq!(
            rendered(filter_listing(&all, &p)),
            vec!["dir1/file2", "dir1/subdir1"]
        );
        let p = ListParams {
            path: Some(String::new()),
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["a", "dir1"]);
    }

    #[test]
    fn test_name_ending_in_delimiter_is_an_item() {
        let all = names(&["x/", "x/y", "x/z/w", "y"]);
        let p = ListParams {
            delimiter: Some('/'),
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["x/", "y"]);
    }

    #[test]
    fn test_subdir_equal_to_marker_is_not_repeated() {
        let all = names(&["a", "dir1/file2", "dir1/subdir1/file3", "dir2/x"]);
        let p = ListParams {
            delimiter: Some('/'),
            marker: Some("dir1/".into()),
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &p)), vec!["subdir:dir2/"]);
    }

    #[test]
    fn test_delimiter_paging_by_last_subdir() {
        let all = names(&["a/1", "a/2", "b/1", "c", "d/1"]);
        let first = ListParams {
            delimiter: Some('/'),
            limit: 2,
            ..params()
        };
        assert_eq!(rendered(filter_listing(&all, &first)), vec!["subdir:a/", "subdir:b/"]);
        let second = ListParams {
            marker: Some("b/".into()),
            ..first
        };
        assert_eq!(rendered(filter_listing(&all, &second)), vec!["c", "subdir:d/"]);
    }

    // -- Brokers ----------------------------------------------------------

    fn engine(dir: &TempDir, accurate: bool, implicit: bool) -> ListingEngine {
        let config = StorageConfig {
            devices: dir.path().to_path_buf(),
            accurate_size_in_listing: accurate,
            implicit_dir_objects: implicit,
            ..StorageConfig::default()
        };
        fs::create_dir_all(dir.path().join("vol")).unwrap();
        ListingEngine::new(DiskFileManager::new(&config, None), accurate)
    }

    fn put(engine: &ListingEngine, obj: &str, body: &[u8], content_type: &str) {
        let df = engine.files.diskfile("vol", "c", obj).unwrap();
        let mut writer = df.create(None).unwrap();
        writer.write(body).unwrap();
        let mut meta = Metadata::new();
        meta.insert(X_TIMESTAMP.into(), timestamp::normalize(timestamp::now()));
        meta.insert(CONTENT_TYPE.into(), content_type.into());
        writer.commit(meta).unwrap();
    }

    fn object_names(rows: &[ListingEntry<ObjectRow>]) -> Vec<&str> {
        rows.iter().map(|r| r.name()).collect()
    }

    #[test]
    fn test_container_lifecycle() {
        let dir = scratch_dir();
        let engine = engine(&dir, true, false);
        let broker = engine.container("vol", "c");

        let mut meta = Metadata::new();
        meta.insert("X-Container-Meta-Owner".into(), "alice".into());
        assert!(broker.initialize(100.0, &meta).unwrap());
        assert!(!broker.initialize(200.0, &Metadata::new()).unwrap());

        let stored = broker.metadata().unwrap();
        assert_eq!(stored.get(X_SYNC_POINT).unwrap(), "-1");
        assert_eq!(stored.get(X_REPORTED_SYNC_POINT).unwrap(), "-1");
        assert_eq!(stored.get(X_TIMESTAMP).unwrap(), &timestamp::normalize(100.0));
        assert_eq!(stored.get(X_PUT_TIMESTAMP).unwrap(), &timestamp::normalize(200.0));

        let info = broker.get_info(false).unwrap();
        assert_eq!(info.object_count, 0);
        assert_eq!(info.metadata.get("X-Container-Meta-Owner").unwrap(), "alice");

        put(&engine, "a/o", b"hello", "text/plain");
        assert!(matches!(broker.delete(), Err(StorageError::NotEmpty)));
        engine
            .files
            .diskfile("vol", "c", "a/o")
            .unwrap()
            .delete(timestamp::now() + 10.0)
            .unwrap();
        broker.delete().unwrap();
        assert!(!broker.exists().unwrap());
        assert!(matches!(
            broker.delete(),
            Err(StorageError::ContainerNotFound { .. })
        ));
    }

    #[test]
    fn test_list_updates_counts() {
        let dir = scratch_dir();
        let engine = engine(&dir, true, false);
        let broker = engine.container("vol", "c");
        broker.initialize(timestamp::now(), &Metadata::new()).unwrap();
        put(&engine, "a", b"1", "text/plain");
        put(&engine, "dir1/file2", b"22", "text/plain");
        put(&engine, "dir1/subdir1/file3", b"333", "text/plain");
        put(&engine, "marker", b"", DIR_TYPE);

        // A stray temp file is never listed.
        fs::write(
            dir.path().join("vol/c/.a.0123456789abcdef0123456789abcdef"),
            b"tmp",
        )
        .unwrap();

        let rows = broker.list_objects_iter(&params()).unwrap();
        assert_eq!(
            object_names(&rows),
            vec!["a", "dir1/file2", "dir1/subdir1/file3", "marker"]
        );
        let ListingEntry::Item(row) = &rows[1] else {
            panic!("expected an object row");
        };
        assert_eq!(row.size, 2);
        assert_eq!(row.content_type, "text/plain");
        assert_eq!(row.etag, hex::encode(<md5::Md5 as md5::Digest>::digest(b"22")));

        let stored = broker.metadata().unwrap();
        assert_eq!(stored.get(X_OBJECT_COUNT).unwrap(), "4");
        assert_eq!(stored.get(X_BYTES_USED).unwrap(), "6");

        let p = ListParams {
            prefix: Some("dir1/".into()),
            delimiter: Some('/'),
            ..params()
        };
        let rows = broker.list_objects_iter(&p).unwrap();
        assert_eq!(
            rows.last(),
            Some(&ListingEntry::Subdir("dir1/subdir1/".into()))
        );
    }

    #[test]
    fn test_inexact_size_mode_reports_zero_bytes() {
        let dir = scratch_dir();
        let engine = engine(&dir, false, false);
        let broker = engine.container("vol", "c");
        broker.initialize(timestamp::now(), &Metadata::new()).unwrap();
        put(&engine, "a", b"12345", "text/plain");
        let info = broker.get_info(true).unwrap();
        assert_eq!(info.object_count, 1);
        assert_eq!(info.bytes_used, 0);
    }

    #[test]
    fn test_implicit_directories_are_listed() {
        let dir = scratch_dir();
        let engine = engine(&dir, false, true);
        let broker = engine.container("vol", "c");
        broker.initialize(timestamp::now(), &Metadata::new()).unwrap();
        put(&engine, "d/o", b"1", "text/plain");
        let rows = broker.list_objects_iter(&params()).unwrap();
        assert_eq!(object_names(&rows), vec!["d", "d/o"]);
    }

    #[test]
    fn test_missing_container_metadata_is_rebuilt() {
        let dir = scratch_dir();
        let engine = engine(&dir, true, false);
        fs::create_dir_all(dir.path().join("vol/c")).unwrap();
        fs::write(dir.path().join("vol/c/o"), b"abc").unwrap();
        let info = engine.container("vol", "c").get_info(false).unwrap();
        assert_eq!(info.object_count, 1);
        assert_eq!(info.bytes_used, 3);
        assert!(!info.created_at.is_empty());
    }

    #[test]
    fn test_update_metadata_removes_empty_values() {
        let dir = scratch_dir();
        let engine = engine(&dir, false, false);
        let broker = engine.container("vol", "c");
        let mut meta = Metadata::new();
        meta.insert("X-Container-Meta-A".into(), "1".into());
        meta.insert("X-Container-Meta-B".into(), "2".into());
        broker.initialize(timestamp::now(), &meta).unwrap();

        let mut update = Metadata::new();
        update.insert("X-Container-Meta-A".into(), String::new());
        broker.update_metadata(&update).unwrap();
        let info = broker.get_info(false).unwrap();
        assert!(!info.metadata.contains_key("X-Container-Meta-A"));
        assert_eq!(info.metadata.get("X-Container-Meta-B").unwrap(), "2");
    }

    #[test]
    fn test_account_listing() {
        let dir = scratch_dir();
        let engine = engine(&dir, true, false);
        for name in ["c", "d"] {
            engine
                .container("vol", name)
                .initialize(timestamp::now(), &Metadata::new())
                .unwrap();
        }
        for reserved in ["tmp", "async_pending", ".trash"] {
            fs::create_dir_all(dir.path().join("vol").join(reserved)).unwrap();
        }
        put(&engine, "o", b"12", "text/plain");
        engine.container("vol", "c").update_object_count().unwrap();

        let account = engine.account("vol");
        let rows = account.list_containers_iter(&params()).unwrap();
        assert_eq!(
            rows,
            vec![
                ListingEntry::Item(ContainerRow {
                    name: "c".into(),
                    object_count: 1,
                    bytes_used: 2,
                }),
                ListingEntry::Item(ContainerRow {
                    name: "d".into(),
                    object_count: 0,
                    bytes_used: 0,
                }),
            ]
        );

        let info = account.get_info().unwrap();
        assert_eq!(info.container_count, 2);
        assert_eq!(info.object_count, 1);
        assert_eq!(info.bytes_used, 2);
        let stored = account.read().unwrap();
        assert!(validate_account(&stored));
    }

    #[test]
    fn test_account_metadata_update() {
        let dir = scratch_dir();
        let engine = engine(&dir, false, false);
        let account = engine.account("vol");
        let mut meta = Metadata::new();
        meta.insert("X-Account-Meta-Quota".into(), "10".into());
        account.update_metadata(&meta).unwrap();
        assert_eq!(
            account.get_info().unwrap().metadata.get("X-Account-Meta-Quota").unwrap(),
            "10"
        );
    }

    #[test]
    fn test_missing_account() {
        let dir = scratch_dir();
        let engine = engine(&dir, false, false);
        assert!(matches!(
            engine.account("ghost").get_info(),
            Err(StorageError::NotFound)
        ));
    }
}
