//! Queued allreduce across 4 in-process ranks.
//!
//! Every rank issues three allreduces without waiting, then waits on the
//! handles in reverse. Results still come out in issue order.
//!
//! ```bash
//! cargo run --example allreduce
//! ```

use collex::{Buffer, GroupConfig, ProcessGroup, ReduceOp};
use std::thread;

fn main() -> collex::Result<()> {
    let groups = ProcessGroup::local(4, GroupConfig::default())?;

    thread::scope(|s| {
        let handles: Vec<_> = groups
            .iter()
            .map(|pg| {
                s.spawn(move || -> collex::Result<()> {
                    let works = (1..=3)
                        .map(|k| {
                            let buf = Buffer::full(&[4], (pg.rank() * k) as f32);
                            pg.allreduce(buf, ReduceOp::Sum)
                        })
                        .collect::<collex::Result<Vec<_>>>()?;

                    for work in works.iter().rev() {
                        work.wait()?;
                    }
                    for work in &works {
                        let out = work.result()?[0].to_vec::<f32>()?;
                        // rank-independent: (0+1+2+3) * k
                        println!("rank {} seq {}: {out:?}", pg.rank(), work.seq());
                    }
                    Ok(())
                })
            })
            .collect();
        handles
            .into_iter()
            .try_for_each(|h| h.join().unwrap_or(Err(collex::CollexError::Aborted)))
    })
}
