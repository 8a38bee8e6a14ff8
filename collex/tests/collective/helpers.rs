use collex::{Buffer, GroupConfig, ProcessGroup};
use std::thread;

/// Run `f` on every rank of a fresh local group, one thread per rank.
/// Results come back in rank order; the groups are shut down afterwards.
pub fn run_ranks<T, F>(world_size: u32, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ProcessGroup) -> T + Sync,
{
    run_ranks_with(world_size, GroupConfig::default(), f)
}

pub fn run_ranks_with<T, F>(world_size: u32, config: GroupConfig, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ProcessGroup) -> T + Sync,
{
    let groups = ProcessGroup::local(world_size, config).unwrap();
    let f = &f;
    thread::scope(|s| {
        let handles: Vec<_> = groups.iter().map(|pg| s.spawn(move || f(pg))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

pub fn f32s(buf: &Buffer) -> Vec<f32> {
    buf.to_vec::<f32>().unwrap()
}
