//! The resolution facade.
//!
//! A [`ResourceLoader`] owns one [`BlobCache`] and an ordered list of
//! [`Resolver`]s. The archive resolver is always first; further backends such
//! as [`DatabaseResolver`] are appended in the order they are added. A lookup
//! checks the cache, then asks each resolver in turn and caches the first hit.
//!
//! The check-then-populate sequence is not atomic: two concurrent misses on
//! the same key may both reach a resolver. The first write wins and both
//! callers observe the cached blob.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::{ArchiveResolver, IndexReport, ScanMode};
use crate::cache::{Blob, BlobCache, RetentionClass};
use crate::compile::{SourceCompiler, source_path};
use crate::config::LoaderConfig;
use crate::db::DatabaseResolver;
use crate::error::{LoaderError, Result};
use crate::key::{CLASS_SUFFIX, ResourceKey};
use crate::resolver::Resolver;
use crate::scan;

#[derive(Debug, Clone)]
pub enum Lookup {
    Cached(Blob),
    Resolved { blob: Blob, resolver: String },
}

impl Lookup {
    pub fn blob(&self) -> &Blob {
        match self {
            Lookup::Cached(blob) => blob,
            Lookup::Resolved { blob, .. } => blob,
        }
    }

    pub fn into_blob(self) -> Blob {
        match self {
            Lookup::Cached(blob) => blob,
            Lookup::Resolved { blob, .. } => blob,
        }
    }

    pub fn cache_hit(&self) -> bool {
        matches!(self, Lookup::Cached(_))
    }
}

pub struct ResourceLoader {
    cache: Arc<BlobCache>,
    archives: Arc<ArchiveResolver>,
    resolvers: RwLock<Vec<Arc<dyn Resolver>>>,
}

impl std::fmt::Debug for ResourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .resolvers
            .read()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        f.debug_struct("ResourceLoader")
            .field("mode", &self.archives.mode())
            .field("resolvers", &names)
            .finish()
    }
}

impl ResourceLoader {
    pub fn new(cache: BlobCache, mode: ScanMode) -> Self {
        let cache = Arc::new(cache);
        let archives = Arc::new(ArchiveResolver::new(Arc::clone(&cache), mode));
        let first: Arc<dyn Resolver> = archives.clone();
        Self {
            cache,
            archives,
            resolvers: RwLock::new(vec![first]),
        }
    }

    /// Builds the cache from `config` and connects the database resolver if
    /// one is configured.
    pub fn from_config(config: &LoaderConfig) -> Result<Self> {
        let loader = Self::new(config.build_cache()?, config.mode);
        if let Some(database) = config.database.as_ref() {
            loader.add_resolver(Arc::new(DatabaseResolver::connect(database)?));
        }
        Ok(loader)
    }

    /// Appends a resolver after every existing one.
    pub fn add_resolver(&self, resolver: Arc<dyn Resolver>) {
        tracing::debug!(resolver = resolver.name(), "resolver added");
        self.resolvers.write().push(resolver);
    }

    pub fn cache(&self) -> &BlobCache {
        &self.cache
    }

    pub fn archives(&self) -> &ArchiveResolver {
        &self.archives
    }

    pub fn resolver_names(&self) -> Vec<String> {
        self.resolvers
            .read()
            .iter()
            .map(|r| r.name().to_string())
            .collect()
    }

    pub fn resolve(&self, identifier: &str) -> Result<Blob> {
        self.lookup(identifier).map(Lookup::into_blob)
    }

    /// Like [`ResourceLoader::resolve`] but reports where the blob came from.
    pub fn lookup(&self, identifier: &str) -> Result<Lookup> {
        let key = ResourceKey::parse(identifier)?;
        if let Some(blob) = self.cache.get(key.as_str()) {
            return Ok(Lookup::Cached(blob));
        }

        let resolvers: Vec<Arc<dyn Resolver>> = self.resolvers.read().clone();
        for resolver in resolvers {
            let Some(blob) = resolver.resolve(&key) else {
                continue;
            };
            if !self.cache.put(key.as_str(), Arc::clone(&blob)) {
                tracing::debug!(key = %key, "already cached; keeping existing entry");
            }
            let blob = self.cache.get(key.as_str()).unwrap_or(blob);
            return Ok(Lookup::Resolved {
                blob,
                resolver: resolver.name().to_string(),
            });
        }

        Err(LoaderError::NotFound(key.to_string()))
    }

    pub fn add_jar(&self, jar: &Path) -> Result<IndexReport> {
        self.archives.register_source(jar)
    }

    /// Registers every file found below `directory` as an archive source.
    pub fn add_dir(&self, directory: &Path) -> Result<Vec<IndexReport>> {
        let jars = scan::collect(directory)?;
        self.add_jars(&jars)
    }

    /// Registers every file below each directory of a `delimiter`-joined list.
    pub fn add_dirs(&self, directories: &str, delimiter: &str) -> Result<Vec<IndexReport>> {
        let jars = scan::collect_joined(directories, delimiter)?;
        self.add_jars(&jars)
    }

    fn add_jars(&self, jars: &[PathBuf]) -> Result<Vec<IndexReport>> {
        let mut reports = Vec::with_capacity(jars.len());
        for jar in jars {
            match self.archives.register_source(jar) {
                Ok(report) => reports.push(report),
                Err(err @ LoaderError::InvalidInput(_)) => return Err(err),
                Err(err) => {
                    tracing::warn!(jar = %jar.display(), error = %err, "skipping unreadable archive");
                }
            }
        }
        Ok(reports)
    }

    /// Caches `<directory>/<simple_name>.class` under
    /// `<package as path>/<simple_name>.class`. Loose files have no backing
    /// source to rescan, so they are kept as strong entries.
    pub fn add_class(
        &self,
        directory: &Path,
        package: &str,
        simple_name: &str,
    ) -> Result<ResourceKey> {
        if directory.as_os_str().is_empty() {
            return Err(LoaderError::invalid("class directory is empty"));
        }
        let file = directory.join(format!("{simple_name}{CLASS_SUFFIX}"));
        self.add_class_file(&file, package, simple_name)
    }

    /// Compiles `<directory>/<simple_name>.java`, caches the resulting class and
    /// deletes the compiled file.
    pub fn add_source(
        &self,
        compiler: &dyn SourceCompiler,
        directory: &Path,
        package: &str,
        simple_name: &str,
        extra_libs: &[PathBuf],
    ) -> Result<ResourceKey> {
        if directory.as_os_str().is_empty() {
            return Err(LoaderError::invalid("source directory is empty"));
        }
        if simple_name.is_empty() {
            return Err(LoaderError::invalid("class name is empty"));
        }
        let source = source_path(directory, simple_name);
        let class_file = compiler.compile(&source, extra_libs)?;
        let key = self.add_class_file(&class_file, package, simple_name);
        if let Err(err) = std::fs::remove_file(&class_file) {
            tracing::warn!(file = %class_file.display(), error = %err, "failed to delete compiled class file");
        }
        key
    }

    fn add_class_file(&self, file: &Path, package: &str, simple_name: &str) -> Result<ResourceKey> {
        let key = ResourceKey::from_parts(package, simple_name, CLASS_SUFFIX)?;
        let bytes = std::fs::read(file).map_err(|e| LoaderError::io(file, e))?;
        if !self
            .cache
            .put_with(key.as_str(), Blob::from(bytes), RetentionClass::Strong)
        {
            tracing::debug!(key = %key, "already loaded; ignoring class file");
        }
        Ok(key)
    }

    /// Drops every cached entry and archive registration. Resolvers added
    /// with [`ResourceLoader::add_resolver`] stay attached.
    pub fn close(&self) {
        self.archives.clear();
        self.cache.clear();
        tracing::debug!("loader closed");
    }
}
