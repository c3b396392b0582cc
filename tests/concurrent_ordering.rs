//! Drives several OS threads (mapped to distinct CPU ids by
//! `StdThreadCpu`) logging concurrently against one `TscLoggedObject`,
//! confirming `synchronize` applies entries in global TSC order
//! regardless of which thread logged them or in what order they happened
//! to be gathered.

use std::sync::Arc;
use std::thread;

use oplog::host::reference::StdHost;
use oplog::tsc_logger::LoggedOp;
use oplog::{PerCpuCache, TscLoggedObject};

/// Records the TSC it was logged with into the target, so the merge
/// order is directly observable.
struct RecordOp(u64);

impl LoggedOp for RecordOp {
    type Target = Vec<u64>;

    fn run(&self, target: &mut Vec<u64>) {
        target.push(self.0);
    }

    fn print(&self) {}
}

static CACHE: PerCpuCache<<StdHost as oplog::host::Host>::Lock, oplog::TscLogger<RecordOp>> =
    PerCpuCache::new();

#[test]
fn merge_preserves_global_tsc_order_across_threads() {
    let obj: &'static TscLoggedObject<'static, StdHost, RecordOp> =
        Box::leak(Box::new(TscLoggedObject::new(&CACHE, Vec::new())));
    let obj = Arc::new(obj);

    let mut handles = Vec::new();
    for _ in 0..6 {
        let obj = Arc::clone(&obj);
        handles.push(thread::spawn(move || {
            for _ in 0..200 {
                let tsc = obj.read_tsc();
                obj.log_at(tsc, RecordOp(tsc));
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let view = obj.synchronize();
    assert_eq!(view.len(), 1200);
    assert!(
        view.windows(2).all(|w| w[0] <= w[1]),
        "entries were applied out of TSC order"
    );
}
