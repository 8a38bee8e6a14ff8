use super::helpers::run_ranks;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_barrier_waits_for_late_rank() {
    for world in [3u32, 6] {
        let delay = Duration::from_millis(100);
        let results = run_ranks(world, |pg| {
            if pg.rank() == 0 {
                thread::sleep(delay);
            }
            let started = Instant::now();
            let work = pg.barrier().unwrap();
            work.wait().unwrap();
            assert!(work.result().unwrap().is_empty());
            (pg.rank(), started.elapsed())
        });
        for (rank, elapsed) in results {
            if rank != 0 {
                assert!(
                    elapsed >= delay / 2,
                    "world={world} rank {rank} left the barrier after {elapsed:?}"
                );
            }
        }
    }
}

#[test]
fn test_repeated_barriers() {
    let results = run_ranks(5, |pg| {
        let works: Vec<_> = (0..20).map(|_| pg.barrier().unwrap()).collect();
        pg.wait_all(&works).map(|out| out.len())
    });
    assert!(results.into_iter().all(|r| r.unwrap() == 20));
}
