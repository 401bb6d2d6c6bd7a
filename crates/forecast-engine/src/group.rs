//! Case link graph resolver.

use std::collections::BTreeSet;

use crate::db::{self, Db};

/// Resolves the link-group of a case: the case itself plus every case joined
/// to it by a non-deleted "same test, different source" link, honoring both
/// link directions. Groups in this domain are single-hop stars, so no
/// recursion happens here; the corpus enumerator's seen-set handles multi-hop
/// chain coverage.
///
/// A missing case yields an empty set so callers can short-circuit instead of
/// treating a deleted-under-us case as fatal.
pub async fn resolve_group(db: &Db, case_id: i64) -> Result<BTreeSet<i64>, String> {
    if !db::case_exists(db, case_id).await? {
        return Ok(BTreeSet::new());
    }
    let mut group = BTreeSet::new();
    group.insert(case_id);
    for linked in db::linked_case_ids(db, case_id).await? {
        group.insert(linked);
    }
    Ok(group)
}
