//! Exercises the per-CPU cache eviction path (spec §4.2): far more logged
//! objects than cache ways contend for the same CPU's table, so by the
//! pigeonhole principle many of them must collide and evict one another —
//! yet every entry logged before a `synchronize` must still be counted.

use oplog::host::reference::StdHost;
use oplog::tsc_logger::LoggedOp;
use oplog::{PerCpuCache, TscLoggedObject};

struct AddOp(i64);

impl LoggedOp for AddOp {
    type Target = i64;

    fn run(&self, target: &mut i64) {
        *target += self.0;
    }

    fn print(&self) {}
}

static CACHE: PerCpuCache<
    <StdHost as oplog::host::Host>::Lock,
    oplog::TscLogger<AddOp>,
> = PerCpuCache::new();

#[test]
fn many_objects_sharing_a_cache_survive_eviction() {
    // More than CACHE_SLOTS objects on a single (std-thread-mapped) CPU
    // guarantees at least one way sees more than one live object, forcing
    // eviction for some of them.
    const COUNT: usize = 6000;

    let objects: Vec<&'static TscLoggedObject<'static, StdHost, AddOp>> = (0..COUNT)
        .map(|_| &*Box::leak(Box::new(TscLoggedObject::new(&CACHE, 0i64))))
        .collect();

    for obj in &objects {
        obj.log(AddOp(1));
        obj.log(AddOp(2));
        obj.log(AddOp(3));
    }

    for obj in &objects {
        let view = obj.synchronize();
        assert_eq!(*view, 6, "an evicted object's entries were lost or duplicated");
    }
}
