use super::helpers::{f32s, run_ranks};
use collex::{Buffer, ReduceOp};

#[test]
fn test_reduce_delivers_to_root_only() {
    let world = 6u32;
    let root = 0;
    let iters = 10;
    let results = run_ranks(world, |pg| {
        let works: Vec<_> = (0..iters)
            .map(|i| {
                pg.reduce(Buffer::full(&[4], i as f32), ReduceOp::Sum, root)
                    .unwrap()
            })
            .collect();
        (pg.rank(), pg.wait_all(&works).unwrap())
    });
    for (rank, outputs) in results {
        if rank != root {
            continue;
        }
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(f32s(&out[0]), vec![(world as usize * i) as f32; 4]);
        }
    }
}

#[test]
fn test_reduce_non_zero_root_max() {
    let results = run_ranks(3, |pg| {
        let work = pg
            .reduce(Buffer::full(&[2], pg.rank() as f32 * 2.5), ReduceOp::Max, 2)
            .unwrap();
        work.wait().unwrap();
        (pg.rank(), f32s(&work.result().unwrap()[0]))
    });
    let (_, at_root) = results.iter().find(|(r, _)| *r == 2).unwrap();
    assert_eq!(at_root, &vec![5.0, 5.0]);
}
