//! The sync diff: deltas between a source snapshot and the state collection.

use chrono::DateTime;

use crate::error::Result;
use crate::model::{EventKind, OperationDataMap};
use crate::store::Store;

impl Store {
    /// Computes the deltas needed to reconcile the oplog with a full
    /// snapshot of the source data.
    ///
    /// `create_map` enters holding every object present in the source,
    /// keyed by `type/id`; the other two maps start empty. Objects known to
    /// both sides are removed from `create_map` (and added to `update_map`
    /// when the snapshot is newer); objects only known to the oplog are
    /// added to `delete_map`, guarded by the most recent snapshot timestamp
    /// so objects created after the dump was taken are not deleted. After
    /// the scan the three maps are pairwise disjoint.
    pub async fn diff(
        &self,
        create_map: &mut OperationDataMap,
        update_map: &mut OperationDataMap,
        delete_map: &mut OperationDataMap,
    ) -> Result<()> {
        // The dump was taken no earlier than its most recent timestamp.
        let dump_time = create_map
            .values()
            .map(|data| data.timestamp)
            .max()
            .unwrap_or(DateTime::UNIX_EPOCH);

        let mut states = self.scan_all_states().await?;
        while let Some(obs) = states.next().await? {
            if obs.event == EventKind::Delete {
                if let Some(snapshot) = create_map.get(&obs.key) {
                    // The oplog saw a deletion newer than the snapshot row:
                    // the snapshot is stale, there is nothing to create.
                    if snapshot.timestamp < obs.data.timestamp {
                        create_map.remove(&obs.key);
                    }
                }
            } else {
                match create_map.remove(&obs.key) {
                    Some(snapshot) => {
                        // Known on both sides; only update when the
                        // snapshot is newer than the oplog's data.
                        if obs.data.timestamp < snapshot.timestamp {
                            update_map.insert(obs.key, snapshot);
                        }
                    }
                    None => {
                        // Only known to the oplog. Deleted at the source
                        // between dump and sync, unless it was created
                        // after the dump was taken.
                        if obs.data.timestamp < dump_time {
                            delete_map.insert(obs.key.clone(), obs.data);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
