//! `MfsLoggedObject::wait_synchronize` must apply only entries before the
//! requested bound, retain the rest, and still account for every entry
//! once a later call raises (or drops) the bound — across real threads,
//! not just the single-threaded unit tests in the crate itself.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use oplog::host::reference::StdHost;
use oplog::tsc_logger::LoggedOp;
use oplog::{MfsLoggedObject, PerCpuCache};

struct AddOp(i64);

impl LoggedOp for AddOp {
    type Target = i64;

    fn run(&self, target: &mut i64) {
        *target += self.0;
    }

    fn print(&self) {}
}

static CACHE: PerCpuCache<<StdHost as oplog::host::Host>::Lock, oplog::TscLogger<AddOp>> =
    PerCpuCache::new();

#[test]
fn wait_synchronize_is_conservative_about_in_flight_writers() {
    let obj: &'static MfsLoggedObject<StdHost, AddOp> =
        Box::leak(Box::new(MfsLoggedObject::new(&CACHE, 0)));
    let obj = Arc::new(obj);

    let writer = Arc::clone(&obj);
    let handle = thread::spawn(move || {
        writer.log(AddOp(1));
        thread::sleep(Duration::from_millis(50));
        writer.log(AddOp(2));
    });

    // Give the writer a head start so its first `log` call has almost
    // certainly published its in-flight window before we read a bound.
    thread::sleep(Duration::from_millis(10));
    let bound = obj.read_tsc();

    // Whatever wait_synchronize(bound) returns must never count the
    // second write (tsc >= bound by construction, since it is logged
    // strictly after we read `bound`).
    let total_before = *obj.wait_synchronize(bound);
    assert!(total_before == 0 || total_before == 1);

    handle.join().unwrap();

    // Once the writer has finished, a full synchronize must account for
    // both writes no matter how the partial flush above split them.
    assert_eq!(*obj.synchronize(), 3);
}

#[test]
fn repeated_bounded_flushes_eventually_account_for_everything() {
    let obj: &'static MfsLoggedObject<StdHost, AddOp> =
        Box::leak(Box::new(MfsLoggedObject::new(&CACHE, 0)));

    let mut bounds = Vec::new();
    for i in 1..=5 {
        let tsc = obj.read_tsc();
        obj.log(AddOp(i));
        bounds.push(tsc);
    }

    // Flush strictly less than each successive bound: after all of them,
    // every entry but possibly the very last should be applied.
    let mut last = 0i64;
    for &bound in &bounds {
        last = *obj.wait_synchronize(bound);
    }
    let total = *obj.wait_synchronize(u64::MAX);
    assert_eq!(total, 1 + 2 + 3 + 4 + 5);
    assert!(last <= total);
}
