use super::helpers::{f32s, run_ranks};
use collex::{Buffer, CollexError, DataType};

#[test]
fn test_broadcast_overwrites_non_root() {
    let iters = 20;
    for world in [2u32, 5] {
        let root = world - 1;
        let results = run_ranks(world, |pg| {
            let works: Vec<_> = (0..iters)
                .map(|i| {
                    let buf = if pg.rank() == root {
                        Buffer::full(&[8, 2], i as f32)
                    } else {
                        Buffer::full(&[8, 2], -1.0f32)
                    };
                    pg.broadcast(buf, root).unwrap()
                })
                .collect();
            pg.wait_all(&works).unwrap()
        });
        for outputs in results {
            for (i, out) in outputs.iter().enumerate() {
                assert_eq!(f32s(&out[0]), vec![i as f32; 16], "world={world}");
            }
        }
    }
}

#[test]
fn test_broadcast_invalid_root_is_usage_error() {
    let results = run_ranks(2, |pg| {
        let err = pg
            .broadcast(Buffer::zeros(&[1], DataType::F32), 2)
            .unwrap_err();
        (err.is_usage_error(), pg.is_aborted(), err)
    });
    for (usage, aborted, err) in results {
        assert!(usage);
        assert!(!aborted);
        assert!(matches!(err, CollexError::InvalidRank { rank: 2, world_size: 2 }));
    }
}
