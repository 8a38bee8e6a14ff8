use super::helpers::{f32s, run_ranks};
use collex::{Buffer, CollexError, DataType};

fn zeros() -> Buffer {
    Buffer::zeros(&[4, 4], DataType::F32)
}

#[test]
fn test_allgather_slot_per_rank() {
    let world = 4u32;
    let iters = 10;
    let results = run_ranks(world, |pg| {
        let rank = pg.rank() as f32;
        let works: Vec<_> = (0..iters)
            .map(|i| {
                let outputs = (0..world).map(|_| zeros()).collect();
                pg.allgather(outputs, Buffer::full(&[4, 4], i as f32 * rank))
                    .unwrap()
            })
            .collect();
        pg.wait_all(&works).unwrap()
    });
    for outputs in results {
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(out.len(), world as usize);
            for (j, slot) in out.iter().enumerate() {
                assert_eq!(f32s(slot), vec![(i * j) as f32; 16]);
            }
        }
    }
}

#[test]
fn test_allgather_rejects_wrong_output_count() {
    let results = run_ranks(3, |pg| pg.allgather(vec![zeros()], zeros()).unwrap_err());
    for err in results {
        assert!(matches!(
            err,
            CollexError::BufferCount {
                expected: 3,
                actual: 1,
                ..
            }
        ));
    }
}

#[test]
fn test_gather_to_root() {
    let world = 3u32;
    let iters = 10;
    let results = run_ranks(world, |pg| {
        let rank = pg.rank() as f32;
        let works: Vec<_> = (0..iters)
            .map(|i| {
                let outputs = if pg.rank() == 0 {
                    (0..world).map(|_| zeros()).collect()
                } else {
                    Vec::new()
                };
                pg.gather(outputs, Buffer::full(&[4, 4], i as f32 * rank), 0)
                    .unwrap()
            })
            .collect();
        (pg.rank(), pg.wait_all(&works).unwrap())
    });
    for (rank, outputs) in results {
        for (i, out) in outputs.iter().enumerate() {
            if rank == 0 {
                assert_eq!(out.len(), world as usize);
                for (j, slot) in out.iter().enumerate() {
                    assert_eq!(f32s(slot), vec![(i * j) as f32; 16]);
                }
            } else {
                assert!(out.is_empty());
            }
        }
    }
}

#[test]
fn test_gather_rejects_outputs_on_non_root() {
    let results = run_ranks(2, |pg| {
        if pg.rank() == 1 {
            Some(pg.gather(vec![zeros(), zeros()], zeros(), 0).unwrap_err())
        } else {
            None
        }
    });
    assert!(results[1].as_ref().unwrap().is_usage_error());
}

#[test]
fn test_scatter_from_root() {
    let world = 4u32;
    let iters = 5;
    let results = run_ranks(world, |pg| {
        let works: Vec<_> = (0..iters)
            .map(|i| {
                let inputs = if pg.rank() == 0 {
                    (0..world)
                        .map(|j| Buffer::full(&[4, 4], (i * j as usize) as f32))
                        .collect()
                } else {
                    Vec::new()
                };
                pg.scatter(zeros(), inputs, 0).unwrap()
            })
            .collect();
        (pg.rank(), pg.wait_all(&works).unwrap())
    });
    for (rank, outputs) in results {
        for (i, out) in outputs.iter().enumerate() {
            assert_eq!(f32s(&out[0]), vec![(i * rank as usize) as f32; 16]);
        }
    }
}

#[test]
fn test_scatter_layout_mismatch_on_root() {
    let results = run_ranks(2, |pg| {
        if pg.rank() == 0 {
            let inputs = vec![zeros(), Buffer::zeros(&[4, 4], DataType::F64)];
            Some(pg.scatter(zeros(), inputs, 0).unwrap_err())
        } else {
            None
        }
    });
    assert!(matches!(
        results[0],
        Some(CollexError::LayoutMismatch { .. })
    ));
}
