//! Per-site customization points the pipeline consults at well-defined
//! points in the fetch/parse/store cycle. See `SPEC_FULL.md` §6.3.
//!
//! Sites that need none of this implement a unit struct and inherit every
//! default.

use crate::chapter::Chapter;

pub trait DownloaderHooks: Send + Sync {
    /// `true` if `raw_pages` indicates a paywall/login/region-block rather
    /// than real content. Skipped chapters are never retried.
    fn check_restricted(&self, _raw_pages: &[String]) -> bool {
        false
    }

    /// `true` if a `None` parse result is a legitimate empty chapter rather
    /// than a transient failure worth retrying.
    fn check_empty(&self, _raw_pages: &[String]) -> bool {
        false
    }

    /// `true` if `chapter` belongs in the needs-refetch bucket. The common
    /// override checks `chapter.is_encrypted()`.
    fn needs_refetch_hook(&self, _chapter: &Chapter) -> bool {
        false
    }
}

/// The hook set used when a site has no customization: every chapter is
/// treated as unrestricted, non-empty-means-failure, and plain.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl DownloaderHooks for DefaultHooks {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ChapterId;

    #[test]
    fn default_hooks_never_flag_anything() {
        let hooks = DefaultHooks;
        let chapter = Chapter::new(ChapterId::from("c1"), "T", "body");
        assert!(!hooks.check_restricted(&[]));
        assert!(!hooks.check_empty(&[]));
        assert!(!hooks.needs_refetch_hook(&chapter));
    }
}
