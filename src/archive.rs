//! Jar/zip backed resolution.
//!
//! In [`ScanMode::Eager`] every registered archive is read end to end at
//! registration time and its entries are cached as strong entries. In
//! [`ScanMode::Lazy`] registration only records the path; each lookup scans the
//! registered archives in order from their first entry and caches the single
//! matching entry. Lazy scans keep no cursor or index between calls, so a
//! repeated miss rescans the archive.

use memmap2::Mmap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use zip::ZipArchive;

use crate::cache::{Blob, BlobCache, RetentionClass};
use crate::error::{LoaderError, Result};
use crate::key::ResourceKey;
use crate::resolver::Resolver;

type MappedArchive<'a> = ZipArchive<Cursor<&'a [u8]>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Lazy,
    Eager,
}

#[derive(Debug)]
pub struct ArchiveSource {
    path: PathBuf,
    fully_indexed: AtomicBool,
}

impl ArchiveSource {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            fully_indexed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_fully_indexed(&self) -> bool {
        self.fully_indexed.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    pub jar_path: String,
    pub indexed: usize,
    pub duplicates: usize,
    pub directories: usize,
    pub truncated: bool,
    pub already_registered: bool,
}

#[derive(Debug)]
pub struct ArchiveResolver {
    cache: Arc<BlobCache>,
    mode: ScanMode,
    sources: RwLock<Vec<Arc<ArchiveSource>>>,
}

impl ArchiveResolver {
    pub fn new(cache: Arc<BlobCache>, mode: ScanMode) -> Self {
        Self {
            cache,
            mode,
            sources: RwLock::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    /// Records an archive. Eager mode indexes it before returning; a failure
    /// partway through keeps what was already read and flags the report as
    /// truncated. Registering the same path twice is a no-op.
    pub fn register_source(&self, path: &Path) -> Result<IndexReport> {
        if path.as_os_str().is_empty() {
            return Err(LoaderError::invalid("jar path is empty"));
        }
        let jar_path = path.to_string_lossy().to_string();

        if self.sources.read().iter().any(|s| s.path() == path) {
            tracing::debug!(jar = %jar_path, "archive already registered; ignoring");
            return Ok(IndexReport {
                jar_path,
                already_registered: true,
                ..IndexReport::default()
            });
        }

        let source = Arc::new(ArchiveSource::new(path.to_path_buf()));
        match self.mode {
            ScanMode::Lazy => {
                self.sources.write().push(source);
                tracing::debug!(jar = %jar_path, "archive registered for lazy scanning");
                Ok(IndexReport {
                    jar_path,
                    ..IndexReport::default()
                })
            }
            ScanMode::Eager => {
                let report = with_archive(path, |archive| {
                    self.sources.write().push(Arc::clone(&source));
                    self.index_all(archive, &source)
                })?;
                tracing::info!(
                    jar = %report.jar_path,
                    indexed = report.indexed,
                    duplicates = report.duplicates,
                    truncated = report.truncated,
                    "archive indexed"
                );
                Ok(report)
            }
        }
    }

    /// `(path, fully_indexed)` for every registered archive, in registration order.
    pub fn sources(&self) -> Vec<(PathBuf, bool)> {
        self.sources
            .read()
            .iter()
            .map(|s| (s.path().to_path_buf(), s.is_fully_indexed()))
            .collect()
    }

    pub fn clear(&self) {
        self.sources.write().clear();
    }

    fn index_all(&self, archive: &mut MappedArchive<'_>, source: &ArchiveSource) -> IndexReport {
        let mut report = IndexReport {
            jar_path: source.path().to_string_lossy().to_string(),
            ..IndexReport::default()
        };

        for i in 0..archive.len() {
            let mut entry = match archive.by_index(i) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(jar = %report.jar_path, index = i, error = %err, "unreadable entry; stopping scan");
                    report.truncated = true;
                    break;
                }
            };
            if is_directory(&entry) {
                tracing::debug!(entry = entry.name(), "ignoring directory");
                report.directories += 1;
                continue;
            }
            let Ok(key) = ResourceKey::parse(entry.name()) else {
                continue;
            };
            if self.cache.contains_key(key.as_str()) {
                tracing::debug!(entry = %key, "already loaded; ignoring entry");
                report.duplicates += 1;
                continue;
            }

            let mut bytes = Vec::with_capacity(read_hint(entry.size()));
            if let Err(err) = entry.read_to_end(&mut bytes) {
                tracing::warn!(jar = %report.jar_path, entry = %key, error = %err, "failed to read entry; stopping scan");
                report.truncated = true;
                break;
            }
            if self
                .cache
                .put_with(key.as_str(), Blob::from(bytes), RetentionClass::Strong)
            {
                report.indexed += 1;
            } else {
                report.duplicates += 1;
            }
        }

        if !report.truncated {
            source.fully_indexed.store(true, Ordering::Release);
        }
        report
    }

    fn scan_for(&self, source: &ArchiveSource, key: &ResourceKey) -> Result<Option<Blob>> {
        with_archive(source.path(), |archive| -> Result<Option<Blob>> {
            for i in 0..archive.len() {
                let mut entry = archive.by_index(i).map_err(|e| LoaderError::Archive {
                    path: source.path().to_path_buf(),
                    source: e,
                })?;
                if is_directory(&entry) {
                    continue;
                }
                if entry.name().trim_start_matches('/') != key.as_str() {
                    continue;
                }
                if let Some(cached) = self.cache.get(key.as_str()) {
                    return Ok(Some(cached));
                }

                let mut bytes = Vec::with_capacity(read_hint(entry.size()));
                entry
                    .read_to_end(&mut bytes)
                    .map_err(|e| LoaderError::io(source.path(), e))?;
                let blob = Blob::from(bytes);
                self.cache.put(key.as_str(), Arc::clone(&blob));
                tracing::debug!(jar = %source.path().display(), entry = %key, "lazily loaded entry");
                return Ok(Some(self.cache.get(key.as_str()).unwrap_or(blob)));
            }
            Ok(None)
        })?
    }
}

impl Resolver for ArchiveResolver {
    fn name(&self) -> &str {
        "archive"
    }

    fn resolve(&self, key: &ResourceKey) -> Option<Blob> {
        if self.mode == ScanMode::Eager {
            return self.cache.get(key.as_str());
        }

        let sources: Vec<Arc<ArchiveSource>> = self.sources.read().clone();
        for source in sources {
            match self.scan_for(&source, key) {
                Ok(Some(blob)) => return Some(blob),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(jar = %source.path().display(), error = %err, "skipping unreadable archive");
                }
            }
        }
        None
    }
}

const S_IFDIR: u32 = 0o040000;

/// Upper bound on the buffer reserved up front from a declared entry size.
const READ_HINT_LIMIT: u64 = 1 << 20;

fn read_hint(declared: u64) -> usize {
    declared.min(READ_HINT_LIMIT) as usize
}

fn is_directory(entry: &zip::read::ZipFile<'_>) -> bool {
    entry.is_dir() || entry.unix_mode().is_some_and(|mode| mode & S_IFDIR != 0)
}

fn with_archive<T>(path: &Path, f: impl FnOnce(&mut MappedArchive<'_>) -> T) -> Result<T> {
    let file = File::open(path).map_err(|e| LoaderError::io(path, e))?;
    // SAFETY: The file is opened read-only and outlives the mapping, which is
    // dropped at the end of this function.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| LoaderError::io(path, e))?;
    let mut archive = ZipArchive::new(Cursor::new(&mmap[..])).map_err(|e| LoaderError::Archive {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(f(&mut archive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use zip::write::FileOptions;

    fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let file = File::create(path)?;
        let mut zip = zip::ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        for (name, content) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, options)?;
                continue;
            }
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }

        zip.finish()?;
        Ok(())
    }

    fn write_stored_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
        let mut zip = zip::ZipWriter::new(File::create(path)?);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, content) in entries {
            zip.start_file(*name, options)?;
            zip.write_all(content)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn find(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .position(|w| w == needle)
            .unwrap()
    }

    fn resolver(mode: ScanMode) -> (Arc<BlobCache>, ArchiveResolver) {
        let cache = Arc::new(BlobCache::strong_only());
        let resolver = ArchiveResolver::new(Arc::clone(&cache), mode);
        (cache, resolver)
    }

    fn key(s: &str) -> ResourceKey {
        ResourceKey::parse(s).unwrap()
    }

    #[test]
    fn lazy_resolve_finds_single_entry() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("acme.jar");
        write_jar(&jar, &[("com/acme/Foo.class", b"0123456789")])?;

        let (cache, resolver) = resolver(ScanMode::Lazy);
        resolver.register_source(&jar)?;
        assert!(cache.is_empty());

        let blob = resolver.resolve(&key("com/acme/Foo.class")).unwrap();
        assert_eq!(&*blob, b"0123456789");
        assert!(resolver.resolve(&key("com/acme/Bar.class")).is_none());
        assert!(!resolver.sources()[0].1);
        Ok(())
    }

    #[test]
    fn lazy_scan_stops_at_match_and_caches_only_it() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("abc.jar");
        write_jar(
            &jar,
            &[("p/A.class", b"a"), ("p/B.class", b"b"), ("p/C.class", b"c")],
        )?;

        let (cache, resolver) = resolver(ScanMode::Lazy);
        resolver.register_source(&jar)?;
        assert_eq!(&*resolver.resolve(&key("p/C.class")).unwrap(), b"c");

        assert!(cache.contains_key("p/C.class"));
        assert!(!cache.contains_key("p/A.class"));
        assert!(!cache.contains_key("p/B.class"));
        Ok(())
    }

    #[test]
    fn eager_indexes_everything_but_directories() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("eager.jar");
        write_jar(
            &jar,
            &[
                ("p/", b""),
                ("p/A.class", b"a"),
                ("p/B.class", b"bb"),
                ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"),
            ],
        )?;

        let (cache, resolver) = resolver(ScanMode::Eager);
        let report = resolver.register_source(&jar)?;
        assert_eq!(report.indexed, 3);
        assert_eq!(report.directories, 1);
        assert!(!report.truncated);
        assert!(resolver.sources()[0].1);

        let mut keys: Vec<String> = cache.entries().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        assert_eq!(keys, vec!["META-INF/MANIFEST.MF", "p/A.class", "p/B.class"]);
        assert_eq!(&*resolver.resolve(&key("p/B.class")).unwrap(), b"bb");
        Ok(())
    }

    #[test]
    fn eager_and_lazy_resolve_identical_bytes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("same.jar");
        let entries: &[(&str, &[u8])] = &[
            ("x/One.class", b"\xca\xfe\xba\xbe1"),
            ("x/Two.class", b"\xca\xfe\xba\xbe22"),
            ("x/y/Three.class", b""),
        ];
        write_jar(&jar, entries)?;

        let (eager_cache, eager) = resolver(ScanMode::Eager);
        eager.register_source(&jar)?;
        let (_, lazy) = resolver(ScanMode::Lazy);
        lazy.register_source(&jar)?;

        assert_eq!(eager_cache.len(), entries.len());
        for (name, bytes) in entries {
            let k = key(name);
            assert_eq!(&*eager.resolve(&k).unwrap(), *bytes);
            assert_eq!(&*lazy.resolve(&k).unwrap(), *bytes);
        }
        Ok(())
    }

    #[test]
    fn first_registered_archive_wins_duplicates() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let first = dir.path().join("first.jar");
        let second = dir.path().join("second.jar");
        write_jar(&first, &[("d/Dup.class", b"first")])?;
        write_jar(&second, &[("d/Dup.class", b"second"), ("d/Only.class", b"only")])?;

        for mode in [ScanMode::Eager, ScanMode::Lazy] {
            let (_, resolver) = resolver(mode);
            resolver.register_source(&first)?;
            let report = resolver.register_source(&second)?;
            if mode == ScanMode::Eager {
                assert_eq!(report.duplicates, 1);
            }
            assert_eq!(&*resolver.resolve(&key("d/Dup.class")).unwrap(), b"first");
            assert_eq!(&*resolver.resolve(&key("d/Only.class")).unwrap(), b"only");
        }
        Ok(())
    }

    #[test]
    fn lazy_skips_unreadable_source() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let broken = dir.path().join("broken.jar");
        let good = dir.path().join("good.jar");
        std::fs::write(&broken, b"definitely not a zip")?;
        write_jar(&good, &[("g/Ok.class", b"ok")])?;

        let (_, resolver) = resolver(ScanMode::Lazy);
        resolver.register_source(&broken)?;
        resolver.register_source(&dir.path().join("missing.jar"))?;
        resolver.register_source(&good)?;
        assert_eq!(&*resolver.resolve(&key("g/Ok.class")).unwrap(), b"ok");
        Ok(())
    }

    #[test]
    fn eager_rejects_unreadable_archive() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let broken = dir.path().join("broken.jar");
        std::fs::write(&broken, b"nope")?;

        let (_, resolver) = resolver(ScanMode::Eager);
        let err = resolver.register_source(&broken).unwrap_err();
        assert!(matches!(err, LoaderError::Archive { .. }));
        assert!(resolver.sources().is_empty());
        assert!(matches!(
            resolver.register_source(Path::new("")),
            Err(LoaderError::InvalidInput(_))
        ));
        Ok(())
    }

    #[test]
    fn duplicate_registration_is_ignored() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("a.jar");
        write_jar(&jar, &[("a/A.class", b"a")])?;

        let (_, resolver) = resolver(ScanMode::Lazy);
        resolver.register_source(&jar)?;
        assert!(resolver.register_source(&jar)?.already_registered);
        assert_eq!(resolver.sources().len(), 1);
        Ok(())
    }

    #[test]
    fn lazy_entries_follow_soft_retention() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("soft.jar");
        write_jar(&jar, &[("s/A.class", b"a"), ("s/B.class", b"b")])?;

        let cache = Arc::new(BlobCache::with_soft_backing(0, NonZeroUsize::new(4).unwrap()));
        let resolver = ArchiveResolver::new(Arc::clone(&cache), ScanMode::Lazy);
        resolver.register_source(&jar)?;
        drop(resolver.resolve(&key("s/A.class")));
        cache.reclaim();
        assert!(!cache.contains_key("s/A.class"));

        // reclaimed entries are found again by rescanning
        assert_eq!(&*resolver.resolve(&key("s/A.class")).unwrap(), b"a");
        Ok(())
    }

    #[test]
    fn concurrent_lazy_resolves_scan_independently() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("many.jar");
        let names: Vec<String> = (0..40).map(|i| format!("m/C{i}.class")).collect();
        let entries: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), n.as_bytes())).collect();
        write_jar(&jar, &entries)?;

        let (cache, resolver) = resolver(ScanMode::Lazy);
        resolver.register_source(&jar)?;
        std::thread::scope(|s| {
            for t in 0..4 {
                let resolver = &resolver;
                let names = &names;
                s.spawn(move || {
                    for name in names.iter().skip(t).step_by(2) {
                        let blob = resolver.resolve(&key(name)).unwrap();
                        assert_eq!(&*blob, name.as_bytes());
                    }
                });
            }
        });
        assert_eq!(cache.len(), names.len());
        Ok(())
    }

    #[test]
    fn eager_read_failure_keeps_earlier_entries_and_marks_truncated() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("half.jar");
        write_stored_jar(
            &jar,
            &[
                ("p/A.class", b"AAAAAAAAAA"),
                ("p/B.class", b"BBBBBBBBBB"),
                ("p/C.class", b"CCCCCCCCCC"),
            ],
        )?;
        let mut bytes = std::fs::read(&jar)?;
        let at = find(&bytes, b"BBBBBBBBBB");
        bytes[at] = b'X';
        std::fs::write(&jar, &bytes)?;

        let (cache, resolver) = resolver(ScanMode::Eager);
        let report = resolver.register_source(&jar)?;
        assert!(report.truncated);
        assert_eq!(report.indexed, 1);
        assert_eq!(cache.get("p/A.class").map(|b| b.len()), Some(10));
        assert!(!cache.contains_key("p/B.class"));
        assert!(!cache.contains_key("p/C.class"));

        let sources = resolver.sources();
        assert_eq!(sources.len(), 1);
        assert!(!sources[0].1);
        Ok(())
    }

    #[test]
    fn read_hint_is_capped() {
        assert_eq!(read_hint(10), 10);
        assert_eq!(read_hint(u64::from(u32::MAX)), READ_HINT_LIMIT as usize);
    }

    #[test]
    fn inflated_declared_size_still_reads_actual_bytes() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("inflated.jar");
        write_stored_jar(&jar, &[("p/A.class", b"0123456789")])?;

        // Central directory uncompressed-size field sits 24 bytes into the header.
        let mut bytes = std::fs::read(&jar)?;
        let header = find(&bytes, b"PK\x01\x02");
        bytes[header + 24..header + 28].copy_from_slice(&0x7fff_fff0u32.to_le_bytes());
        std::fs::write(&jar, &bytes)?;

        let (_, lazy) = resolver(ScanMode::Lazy);
        lazy.register_source(&jar)?;
        assert_eq!(&*lazy.resolve(&key("p/A.class")).unwrap(), b"0123456789");

        let (cache, eager) = resolver(ScanMode::Eager);
        let report = eager.register_source(&jar)?;
        assert!(!report.truncated);
        assert_eq!(cache.get("p/A.class").map(|b| b.len()), Some(10));
        Ok(())
    }
}
