//! Per-method cache of derived analyses.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use tracing::trace;

use crate::{ir::MethodBody, Result};

/// A read-only fact derived from a method body.
///
/// Implementations are computed on demand by [`AnalysisManager::get`] and may request the
/// analyses they build on from the same manager.
pub trait MethodAnalysis: Any + Send + Sync + Sized {
    /// Short name for logging.
    const NAME: &'static str;

    /// Computes the analysis for the current state of `body`.
    ///
    /// `preserve` is the flag the caller passed to [`AnalysisManager::get`]; dependencies
    /// requested from `analyses` should be fetched with the same flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is structurally unfit for the analysis, for example
    /// when it has no entry block.
    fn create(body: &MethodBody, analyses: &mut AnalysisManager, preserve: bool) -> Result<Self>;
}

struct CacheEntry {
    cfg_version: u64,
    value: Arc<dyn Any + Send + Sync>,
}

/// Lazily computes and caches [`MethodAnalysis`] results for one method body.
///
/// Entries are all-or-nothing: [`AnalysisManager::invalidate_all`] drops everything. An
/// entry also records the body's [`MethodBody::cfg_version`] at computation time and is
/// recomputed once the control-flow graph changed, even without an explicit invalidation.
///
/// # Examples
///
/// ```rust
/// use dotssa::{analysis::{AnalysisManager, DominatorTree}, entities::IrType, ir::MethodBody};
///
/// let mut body = MethodBody::new(vec![], IrType::Void);
/// let entry = body.create_block(None);
/// let exit = body.create_block(None);
/// body.set_branch(entry, exit)?;
///
/// let mut analyses = AnalysisManager::new();
/// let doms = analyses.get::<DominatorTree>(&body, true)?;
/// assert_eq!(doms.idom(exit), Some(entry));
/// assert!(analyses.is_cached::<DominatorTree>(&body));
/// # Ok::<(), dotssa::Error>(())
/// ```
#[derive(Default)]
pub struct AnalysisManager {
    cache: HashMap<TypeId, CacheEntry>,
}

impl AnalysisManager {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns analysis `A` for `body`, computing it if no valid entry is cached.
    ///
    /// A freshly computed result is only stored if `preserve` is set.
    ///
    /// # Errors
    ///
    /// Propagates the failure of [`MethodAnalysis::create`].
    pub fn get<A: MethodAnalysis>(&mut self, body: &MethodBody, preserve: bool) -> Result<Arc<A>> {
        let key = TypeId::of::<A>();
        if let Some(entry) = self.cache.get(&key) {
            if entry.cfg_version == body.cfg_version() {
                if let Ok(cached) = Arc::clone(&entry.value).downcast::<A>() {
                    return Ok(cached);
                }
            }
            trace!(analysis = A::NAME, "stale cache entry");
            self.cache.remove(&key);
        }

        trace!(analysis = A::NAME, "computing");
        let value = Arc::new(A::create(body, self, preserve)?);
        if preserve {
            self.cache.insert(
                key,
                CacheEntry {
                    cfg_version: body.cfg_version(),
                    value: Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
                },
            );
        }
        Ok(value)
    }

    /// Returns `true` if a valid entry for `A` is cached.
    #[must_use]
    pub fn is_cached<A: MethodAnalysis>(&self, body: &MethodBody) -> bool {
        self.cache
            .get(&TypeId::of::<A>())
            .is_some_and(|entry| entry.cfg_version == body.cfg_version())
    }

    /// Drops every cached analysis.
    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    /// Number of cached entries, stale ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl std::fmt::Debug for AnalysisManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisManager")
            .field("entries", &self.cache.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::entities::IrType;

    static CREATED: AtomicUsize = AtomicUsize::new(0);

    struct BlockCount(usize);

    impl MethodAnalysis for BlockCount {
        const NAME: &'static str = "block_count";

        fn create(
            body: &MethodBody,
            _analyses: &mut AnalysisManager,
            _preserve: bool,
        ) -> Result<Self> {
            CREATED.fetch_add(1, Ordering::SeqCst);
            Ok(BlockCount(body.num_blocks()))
        }
    }

    #[test]
    fn test_cache_lifecycle() {
        let mut body = MethodBody::new(vec![], IrType::Void);
        body.create_block(None);
        let mut analyses = AnalysisManager::new();
        let before = CREATED.load(Ordering::SeqCst);

        assert_eq!(analyses.get::<BlockCount>(&body, false).unwrap().0, 1);
        assert!(analyses.is_empty());

        analyses.get::<BlockCount>(&body, true).unwrap();
        analyses.get::<BlockCount>(&body, true).unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst) - before, 2);
        assert!(analyses.is_cached::<BlockCount>(&body));

        body.create_block(None);
        assert!(!analyses.is_cached::<BlockCount>(&body));
        assert_eq!(analyses.get::<BlockCount>(&body, true).unwrap().0, 2);
        assert_eq!(CREATED.load(Ordering::SeqCst) - before, 3);

        analyses.invalidate_all();
        assert!(analyses.is_empty());
    }
}
