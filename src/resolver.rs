use crate::cache::Blob;
use crate::key::ResourceKey;

/// A fallback source consulted by the loader on a cache miss.
///
/// Implementations report failures of their own backend as `None` after
/// logging them, so the next resolver in line still gets a chance.
pub trait Resolver: Send + Sync {
    fn name(&self) -> &str;

    fn resolve(&self, key: &ResourceKey) -> Option<Blob>;
}
