use collex::{Buffer, CollexError, DataType, GroupConfig, OpKind, ProcessGroup, ReduceOp};
use std::time::Duration;

/// Issuing never blocks: a receive is handed back pending until the matching
/// send is issued on the peer.
#[test]
fn test_recv_pending_until_send() {
    let groups = ProcessGroup::local(2, GroupConfig::default()).unwrap();
    let recv = groups[1]
        .recv(Buffer::zeros(&[3], DataType::I32), 0, 4)
        .unwrap();
    assert_eq!(recv.kind(), OpKind::Recv);
    assert!(!recv.wait_timeout(Duration::from_millis(30)).unwrap());
    assert!(matches!(
        recv.result(),
        Err(CollexError::WorkPending { .. })
    ));

    let send = groups[0].send(Buffer::full(&[3], -4i32), 1, 4).unwrap();
    send.wait().unwrap();
    recv.wait().unwrap();
    assert!(recv.is_completed());
    assert!(recv.is_success());
    assert_eq!(recv.result().unwrap()[0].to_vec::<i32>().unwrap(), vec![-4; 3]);
}

#[test]
fn test_wait_is_idempotent() {
    let groups = ProcessGroup::local(1, GroupConfig::default()).unwrap();
    let work = groups[0]
        .allreduce(Buffer::full(&[2], 3.0f32), ReduceOp::Sum)
        .unwrap();
    work.wait().unwrap();
    work.wait().unwrap();
    assert!(work.wait_timeout(Duration::ZERO).unwrap());
    assert_eq!(work.result().unwrap(), work.result().unwrap());
    assert!(work.exception().is_none());
}

#[test]
fn test_source_rank_only_for_any_source() {
    let groups = ProcessGroup::local(2, GroupConfig::default()).unwrap();
    groups[0]
        .send(Buffer::full(&[1], 1u8), 1, 0)
        .unwrap()
        .wait()
        .unwrap();
    let recv = groups[1].recv(Buffer::zeros(&[1], DataType::U8), 0, 0).unwrap();
    recv.wait().unwrap();
    assert!(matches!(
        recv.source_rank(),
        Err(CollexError::NoSourceRank { operation: OpKind::Recv, .. })
    ));
}

/// Shutdown lets already-queued operations finish before the worker exits.
#[test]
fn test_shutdown_drains_queue() {
    let groups = ProcessGroup::local(2, GroupConfig::default()).unwrap();
    let sends: Vec<_> = (0..5u8)
        .map(|i| groups[0].send(Buffer::full(&[1], i), 1, 0).unwrap())
        .collect();
    groups[0].shutdown();
    assert!(sends.iter().all(|w| w.is_success()));
    assert!(matches!(groups[0].barrier(), Err(CollexError::ShutDown)));

    let recvs: Vec<_> = (0..5)
        .map(|_| groups[1].recv(Buffer::zeros(&[1], DataType::U8), 0, 0).unwrap())
        .collect();
    let out = groups[1].wait_all(&recvs).unwrap();
    let got: Vec<u8> = out.iter().map(|o| o[0].to_vec::<u8>().unwrap()[0]).collect();
    assert_eq!(got, vec![0, 1, 2, 3, 4]);
}
