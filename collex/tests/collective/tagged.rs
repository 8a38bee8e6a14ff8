use super::helpers::{f32s, run_ranks};
use collex::{Buffer, CollexError, DEFAULT_TAG, DataType};

fn zeros() -> Buffer {
    Buffer::zeros(&[16, 16], DataType::F32)
}

#[test]
fn test_send_recv_in_order() {
    let iters = 100;
    let results = run_ranks(2, |pg| {
        let works: Vec<_> = (0..iters)
            .map(|i| match pg.rank() {
                0 => pg
                    .send(Buffer::full(&[16, 16], i as f32), 1, DEFAULT_TAG)
                    .unwrap(),
                _ => pg.recv(zeros(), 0, DEFAULT_TAG).unwrap(),
            })
            .collect();
        pg.wait_all(&works).unwrap()
    });
    assert!(results[0].iter().all(Vec::is_empty));
    for (i, out) in results[1].iter().enumerate() {
        assert_eq!(f32s(&out[0]), vec![i as f32; 256]);
    }
}

#[test]
fn test_recv_any_source_resolves_sender() {
    let iters = 20;
    let results = run_ranks(2, |pg| {
        let works: Vec<_> = (0..iters)
            .map(|i| match pg.rank() {
                0 => pg
                    .send(Buffer::full(&[16, 16], i as f32), 1, DEFAULT_TAG)
                    .unwrap(),
                _ => pg.recv_any_source(zeros(), DEFAULT_TAG).unwrap(),
            })
            .collect();
        let outputs = pg.wait_all(&works).unwrap();
        let sources: Vec<_> = works.iter().map(|w| w.source_rank().ok()).collect();
        (outputs, sources)
    });
    let (outputs, sources) = &results[1];
    assert!(sources.iter().all(|s| *s == Some(0)));
    for (i, out) in outputs.iter().enumerate() {
        assert_eq!(f32s(&out[0]), vec![i as f32; 256]);
    }
    // The sending side has no source rank to report.
    assert!(results[0].1.iter().all(Option::is_none));
}

#[test]
fn test_recv_any_source_from_several_peers() {
    let results = run_ranks(3, |pg| {
        if pg.rank() == 0 {
            let works: Vec<_> = (0..2)
                .map(|_| pg.recv_any_source(Buffer::zeros(&[1], DataType::U32), 9).unwrap())
                .collect();
            let outputs = pg.wait_all(&works).unwrap();
            let mut pairs: Vec<(u32, u32)> = works
                .iter()
                .zip(&outputs)
                .map(|(w, o)| (w.source_rank().unwrap(), o[0].to_vec::<u32>().unwrap()[0]))
                .collect();
            pairs.sort();
            pairs
        } else {
            let work = pg
                .send(Buffer::full(&[1], pg.rank() * 100), 0, 9)
                .unwrap();
            work.wait().unwrap();
            Vec::new()
        }
    });
    assert_eq!(results[0], vec![(1, 100), (2, 200)]);
}

/// A receive on one tag is not satisfied by a message on another.
#[test]
fn test_tags_keep_streams_apart() {
    let results = run_ranks(2, |pg| {
        if pg.rank() == 0 {
            let a = pg.send(Buffer::full(&[2], 1u8), 1, 1).unwrap();
            let b = pg.send(Buffer::full(&[2], 2u8), 1, 2).unwrap();
            pg.wait_all(&[a, b]).unwrap();
            Vec::new()
        } else {
            let b = pg.recv(Buffer::zeros(&[2], DataType::U8), 0, 2).unwrap();
            let a = pg.recv(Buffer::zeros(&[2], DataType::U8), 0, 1).unwrap();
            let out = pg.wait_all(&[b, a]).unwrap();
            out.into_iter()
                .map(|o| o[0].to_vec::<u8>().unwrap())
                .collect()
        }
    });
    assert_eq!(results[1], vec![vec![2, 2], vec![1, 1]]);
}

#[test]
fn test_recv_into_wrong_size_fails() {
    let results = run_ranks(2, |pg| {
        if pg.rank() == 0 {
            let work = pg.send(Buffer::full(&[8], 0u8), 1, 0).unwrap();
            work.wait().map_err(|e| e.to_string())
        } else {
            let work = pg.recv(Buffer::zeros(&[4], DataType::U8), 0, 0).unwrap();
            let err = work.wait().unwrap_err();
            assert!(matches!(
                err.root_cause(),
                CollexError::BufferSizeMismatch { expected: 4, actual: 8 }
            ));
            assert!(pg.is_aborted());
            Ok(())
        }
    });
    assert!(results[1].is_ok());
}
