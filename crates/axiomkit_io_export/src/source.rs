//! Data source seams: bounded page fetch and transactional forward-only cursor.

use std::sync::Mutex;

use crate::spec::SourceError;

/// One page query. Pages are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecPageRequest {
    pub n_page: usize,
    pub size_page: usize,
    /// Only the total count is wanted; records may be left empty.
    pub if_count_only: bool,
}

impl SpecPageRequest {
    pub fn page(n_page: usize, size_page: usize) -> Self {
        Self {
            n_page,
            size_page,
            if_count_only: false,
        }
    }

    pub fn count(size_page: usize) -> Self {
        Self {
            n_page: 1,
            size_page,
            if_count_only: true,
        }
    }

    /// 0-based offset of the first record of this page.
    pub fn offset(&self) -> usize {
        self.n_page.saturating_sub(1) * self.size_page
    }
}

/// Result of one page query.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecPage<T> {
    pub records: Vec<T>,
    /// Total rows of the whole dataset, when the source knows it.
    pub n_total: Option<u64>,
}

/// Bounded page fetch capability.
pub trait PageSource<T>: Send + Sync {
    fn fetch(&self, request: SpecPageRequest) -> Result<SpecPage<T>, SourceError>;
}

impl<T, F> PageSource<T> for F
where
    F: Fn(SpecPageRequest) -> Result<SpecPage<T>, SourceError> + Send + Sync,
{
    fn fetch(&self, request: SpecPageRequest) -> Result<SpecPage<T>, SourceError> {
        self(request)
    }
}

/// Transactional scope a cursor is read under.
///
/// Exactly one of `commit`/`rollback` ends the scope.
pub trait CursorScope<T> {
    /// Forward-only cursor over the scope's rows.
    fn cursor(&mut self) -> Box<dyn Iterator<Item = Result<T, SourceError>> + '_>;

    fn commit(self: Box<Self>) -> Result<(), SourceError>;

    fn rollback(self: Box<Self>);
}

/// Capability to open a cursor under a fresh transactional scope.
pub trait CursorSource<T>: Send + Sync {
    fn begin(&self) -> Result<Box<dyn CursorScope<T> + '_>, SourceError>;
}

/// Per-batch transform applied before the batch is written; may mutate records in place.
pub type BatchHook<T> = Box<dyn FnMut(&mut [T]) + Send>;

////////////////////////////////////////////////////////////////////////////////
// #region MemorySource

/// How an in-memory transaction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumScopeEnd {
    Committed,
    RolledBack,
}

/// In-memory dataset usable both as a page source and a cursor source.
pub struct MemorySource<T> {
    records: Vec<T>,
    l_scope_ends: Mutex<Vec<EnumScopeEnd>>,
}

impl<T> MemorySource<T> {
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            l_scope_ends: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// How each opened scope ended, in order.
    pub fn scope_ends(&self) -> Vec<EnumScopeEnd> {
        self.l_scope_ends
            .lock()
            .map(|l_ends| l_ends.clone())
            .unwrap_or_default()
    }

    fn record_scope_end(&self, end: EnumScopeEnd) {
        if let Ok(mut l_ends) = self.l_scope_ends.lock() {
            l_ends.push(end);
        }
    }
}

impl<T: Clone + Send + Sync> PageSource<T> for MemorySource<T> {
    fn fetch(&self, request: SpecPageRequest) -> Result<SpecPage<T>, SourceError> {
        let n_total = Some(self.records.len() as u64);
        if request.if_count_only {
            return Ok(SpecPage {
                records: Vec::new(),
                n_total,
            });
        }
        let records = self
            .records
            .iter()
            .skip(request.offset())
            .take(request.size_page)
            .cloned()
            .collect();
        Ok(SpecPage { records, n_total })
    }
}

struct MemoryScope<'a, T> {
    source: &'a MemorySource<T>,
}

impl<T: Clone> CursorScope<T> for MemoryScope<'_, T> {
    fn cursor(&mut self) -> Box<dyn Iterator<Item = Result<T, SourceError>> + '_> {
        Box::new(self.source.records.iter().cloned().map(Ok))
    }

    fn commit(self: Box<Self>) -> Result<(), SourceError> {
        self.source.record_scope_end(EnumScopeEnd::Committed);
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        self.source.record_scope_end(EnumScopeEnd::RolledBack);
    }
}

impl<T: Clone + Send + Sync> CursorSource<T> for MemorySource<T> {
    fn begin(&self) -> Result<Box<dyn CursorScope<T> + '_>, SourceError> {
        Ok(Box::new(MemoryScope { source: self }))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_pages() {
        let source = MemorySource::new((1..=5).collect::<Vec<i32>>());
        let page = source.fetch(SpecPageRequest::page(3, 2)).unwrap();
        assert_eq!(page.records, vec![5]);
        assert_eq!(page.n_total, Some(5));

        let page = source.fetch(SpecPageRequest::count(2)).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.n_total, Some(5));
    }

    #[test]
    fn test_memory_source_cursor_and_scope_end() {
        let source = MemorySource::new(vec!["a", "b"]);
        let mut scope = source.begin().unwrap();
        let l_rows: Vec<&str> = scope.cursor().map(|row| row.unwrap()).collect();
        assert_eq!(l_rows, vec!["a", "b"]);
        scope.commit().unwrap();

        source.begin().unwrap().rollback();
        assert_eq!(
            source.scope_ends(),
            vec![EnumScopeEnd::Committed, EnumScopeEnd::RolledBack]
        );
    }

    #[test]
    fn test_closure_page_source() {
        let source = |request: SpecPageRequest| -> Result<SpecPage<usize>, SourceError> {
            Ok(SpecPage {
                records: vec![request.offset()],
                n_total: None,
            })
        };
        assert_eq!(source.fetch(SpecPageRequest::page(4, 10)).unwrap().records, vec![30]);
    }
}
