//! Corpus enumerator: one representative case id per link-group over the
//! entire active case population.

use std::collections::BTreeSet;

use crate::db::{self, Db};
use crate::group;

/// Page size for the batched scan. Bounds both memory and the size of each
/// store query during a full-corpus sweep.
pub const CORPUS_BATCH_SIZE: usize = 200;

/// Scans active (non-deleted, non-archived) cases in keyset-paginated batches
/// and emits the first-seen member of every link-group as its representative,
/// marking all members seen so later occurrences are skipped. Any member can
/// represent a group: after the writer runs, all members carry identical
/// forecasts. Emission follows store iteration order.
pub async fn enumerate_group_representatives(db: &Db) -> Result<Vec<i64>, String> {
    let mut representatives = Vec::new();
    let mut seen: BTreeSet<i64> = BTreeSet::new();
    let mut cursor = 0_i64;
    loop {
        let page = db::active_case_page(db, cursor, CORPUS_BATCH_SIZE).await?;
        let Some(last) = page.last().copied() else {
            break;
        };
        for case_id in page {
            if seen.contains(&case_id) {
                continue;
            }
            let group = group::resolve_group(db, case_id).await?;
            if group.is_empty() {
                // Deleted between the page read and the group lookup.
                seen.insert(case_id);
                continue;
            }
            representatives.push(case_id);
            seen.extend(group);
        }
        cursor = last;
    }
    Ok(representatives)
}
