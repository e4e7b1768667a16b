use thiserror::Error;

/// Error type user hooks may return.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by [`merge`](crate::merge).
///
/// The engine is otherwise exception-transparent: a failing hook aborts the
/// whole merge and no partial result is returned.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Hook '{hook}' failed for key '{key}': {source}")]
    Hook {
        hook: HookKind,
        key: String,
        #[source]
        source: HookError,
    },

    /// Canonical serialization was required for a record that participates
    /// in a reference cycle (e.g. structural array deduplication).
    #[error("Cannot serialize cyclic record graph")]
    CyclicValue,
}

/// Identifies which user hook produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Filter,
    BeforeEach,
    AfterEach,
    OnCircular,
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HookKind::Filter => "filter",
            HookKind::BeforeEach => "before_each",
            HookKind::AfterEach => "after_each",
            HookKind::OnCircular => "on_circular",
        };
        write!(f, "{}", name)
    }
}
