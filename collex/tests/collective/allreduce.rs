use super::helpers::{f32s, run_ranks};
use collex::{Buffer, ReduceOp};

/// Many queued allreduces: result `i` is `world * i` everywhere.
#[test]
fn test_allreduce_sum_queued() {
    let world = 4u32;
    let iters = 50;
    let results = run_ranks(world, |pg| {
        let works: Vec<_> = (0..iters)
            .map(|i| {
                pg.allreduce(Buffer::full(&[16, 16], i as f32), ReduceOp::Sum)
                    .unwrap()
            })
            .collect();
        pg.wait_all(&works).unwrap()
    });
    for outputs in results {
        assert_eq!(outputs.len(), iters);
        for (i, out) in outputs.iter().enumerate() {
            assert!(f32s(&out[0]).iter().all(|&v| v == (world as usize * i) as f32));
        }
    }
}

#[test]
fn test_allreduce_min_max_i64() {
    let results = run_ranks(3, |pg| {
        let value = i64::from(pg.rank()) * 7 - 5;
        let min = pg.allreduce(Buffer::full(&[5], value), ReduceOp::Min).unwrap();
        let max = pg.allreduce(Buffer::full(&[5], value), ReduceOp::Max).unwrap();
        let out = pg.wait_all(&[min, max]).unwrap();
        (
            out[0][0].to_vec::<i64>().unwrap(),
            out[1][0].to_vec::<i64>().unwrap(),
        )
    });
    for (min, max) in results {
        assert_eq!(min, vec![-5; 5]);
        assert_eq!(max, vec![9; 5]);
    }
}

#[test]
fn test_allreduce_prod_u32() {
    let results = run_ranks(3, |pg| {
        let work = pg
            .allreduce(Buffer::full(&[3], pg.rank() + 2), ReduceOp::Prod)
            .unwrap();
        work.wait().unwrap();
        work.result().unwrap()[0].to_vec::<u32>().unwrap()
    });
    for r in results {
        assert_eq!(r, vec![24; 3]);
    }
}

/// Element count smaller than the world size leaves some ring chunks empty.
#[test]
fn test_allreduce_fewer_elements_than_ranks() {
    let results = run_ranks(5, |pg| {
        let work = pg.allreduce(Buffer::full(&[2], 1.0f64), ReduceOp::Sum).unwrap();
        work.wait().unwrap();
        work.result().unwrap()[0].to_vec::<f64>().unwrap()
    });
    for r in results {
        assert_eq!(r, vec![5.0, 5.0]);
    }
}
