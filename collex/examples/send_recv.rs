//! Tagged point-to-point messaging between two in-process ranks.
//!
//! Rank 0 sends two tensors on different tags; rank 1 receives the second
//! tag first, then takes the other from any source.
//!
//! ```bash
//! cargo run --example send_recv
//! ```

use collex::{Buffer, DataType, GroupConfig, ProcessGroup};

fn main() -> collex::Result<()> {
    let groups = ProcessGroup::local(2, GroupConfig::default())?;
    let (sender, receiver) = (&groups[0], &groups[1]);

    let first = sender.send(Buffer::from_vec(&[4], vec![1.0f32, 2.0, 3.0, 4.0])?, 1, 10)?;
    let second = sender.send(Buffer::from_vec(&[3], vec![9i32, 8, 7])?, 1, 20)?;

    let by_tag = receiver.recv(Buffer::zeros(&[3], DataType::I32), 0, 20)?;
    let any = receiver.recv_any_source(Buffer::zeros(&[4], DataType::F32), 10)?;

    receiver.wait_all(&[by_tag.clone(), any.clone()])?;
    sender.wait_all(&[first, second])?;

    println!("tag 20: {:?}", by_tag.result()?[0].to_vec::<i32>()?);
    println!(
        "tag 10 from rank {}: {:?}",
        any.source_rank()?,
        any.result()?[0].to_vec::<f32>()?
    );
    Ok(())
}
