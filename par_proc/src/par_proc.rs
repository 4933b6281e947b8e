use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{bounded, Receiver};
use crossbeam_utils::thread::ScopedJoinHandle;
use log::debug;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

/// A generic processor trait that accepts items and can return an error
/// if the processing of the item fails.
pub trait Proc {
    /// The type of the items to be processed
    type Item;

    /// The value produced by a successful processing step
    type Output;

    /// The type of the error produced on a processing failure
    type Err;

    /// Process one item
    fn process(&mut self, item: Self::Item) -> Result<Self::Output, Self::Err>;
}

/// Per-item outcome, indexed by the item's position in the input.
///
/// `None` means the item was never handed to a processor because an earlier
/// failure halted dispatch.
pub type Slots<O, E> = Vec<Option<Result<O, E>>>;

type Done<P> = Vec<(usize, Result<<P as Proc>::Output, <P as Proc>::Err>)>;

type Panic = Box<dyn Any + Send + 'static>;

// Run one item, handing back the panic payload instead of unwinding.
fn run_one<P: Proc>(
    processor: &mut P,
    item: P::Item,
) -> Result<Result<P::Output, P::Err>, Panic> {
    panic::catch_unwind(AssertUnwindSafe(|| processor.process(item)))
}

// Given a receiver (`rec`) that yields indexed items and a `processor` that knows
// how to process one of them, process everything the receiver hands out until
// the channel disconnects. Items received after `halt` was raised are dropped.
// A panicking item raises `halt` and ends this worker.
fn process<P: Proc<Item = T>, T>(
    mut processor: P,
    rec: Receiver<(usize, T)>,
    halt: &AtomicBool,
) -> (Done<P>, Option<Panic>) {
    let mut done = Vec::new();
    while let Ok((idx, item)) = rec.recv() {
        if halt.load(Ordering::SeqCst) {
            debug!("dropping item {idx}: dispatch halted");
            continue;
        }
        match run_one(&mut processor, item) {
            Ok(result) => {
                if result.is_err() {
                    halt.store(true, Ordering::SeqCst);
                }
                done.push((idx, result));
            }
            Err(p) => {
                halt.store(true, Ordering::SeqCst);
                debug!("item {idx} panicked, halting dispatch");
                return (done, Some(p));
            }
        }
    }
    (done, None)
}

fn collect_jobs<P: Proc>(
    handles: Vec<ScopedJoinHandle<'_, (Done<P>, Option<Panic>)>>,
    n_items: usize,
) -> Result<Slots<P::Output, P::Err>> {
    let mut slots: Slots<P::Output, P::Err> = (0..n_items).map(|_| None).collect();
    let mut panicked = None;
    // join every thread before reporting, so none outlives the barrier
    for h in handles {
        match h.join() {
            Ok((done, p)) => {
                for (idx, result) in done {
                    slots[idx] = Some(result);
                }
                if let Some(p) = p {
                    panicked.get_or_insert(p);
                }
            }
            Err(e) => {
                panicked.get_or_insert(e);
            }
        }
    }
    match panicked {
        // if a processor panicked, capture the message
        Some(e) => Err(anyhow!(decipher_panic(e))),
        None => Ok(slots),
    }
}

fn process_sequential<P: Proc<Item = T>, T>(
    mut processor: P,
    items: Vec<T>,
) -> Result<Slots<P::Output, P::Err>> {
    let mut slots: Slots<P::Output, P::Err> = (0..items.len()).map(|_| None).collect();
    for (idx, item) in items.into_iter().enumerate() {
        let result = run_one(&mut processor, item).map_err(|p| anyhow!(decipher_panic(p)))?;
        let failed = result.is_err();
        slots[idx] = Some(result);
        if failed {
            break;
        }
    }
    Ok(slots)
}

/// Process `items` with at most `processors.len()` running at once, one thread per
/// processor. Returns one slot per input item, in input order, whatever order the
/// items actually finished in.
///
/// The first failing or panicking item halts dispatch: no further items are handed
/// out, items already in flight run to completion. A panic is returned as `Err`
/// with the panic message. Every spawned thread is joined before this
/// returns. With a single processor the items run on the calling thread.
pub fn process_in_order<P, T>(
    items: Vec<T>,
    processors: Vec<P>,
) -> Result<Slots<P::Output, P::Err>>
where
    T: Send,
    P: Send + Proc<Item = T>,
    P::Output: Send,
    P::Err: Send,
{
    if processors.is_empty() {
        bail!("cannot process {} items without a processor", items.len());
    }

    let n_items = items.len();
    let mut processors = processors;
    if processors.len() == 1 {
        if let Some(processor) = processors.pop() {
            return process_sequential(processor, items);
        }
    }
    // idle threads are pointless
    processors.truncate(n_items.max(1));

    let halt = AtomicBool::new(false);
    let halt = &halt;
    let r = crossbeam_utils::thread::scope(move |s| -> Result<Slots<P::Output, P::Err>> {
        // Rendezvous channel: an item leaves the queue only when a processor
        // is free to run it, so a halt is observed before the next hand-off.
        let (send, recv) = bounded(0);

        let mut handles = Vec::with_capacity(processors.len());
        for processor in processors {
            let recv = recv.clone();
            handles.push(s.spawn(move |_| process(processor, recv, halt)));
        }
        drop(recv);

        for (idx, item) in items.into_iter().enumerate() {
            if halt.load(Ordering::SeqCst) {
                debug!("halting dispatch before item {idx}");
                break;
            }
            // stop sending if all the receivers have hung up
            if send.send((idx, item)).is_err() {
                break;
            }
        }

        // Close the send channel - this will cause the threads to exit
        drop(send);

        collect_jobs::<P>(handles, n_items)
    });

    match r {
        Ok(v) => v,
        Err(e) => Err(anyhow!(decipher_panic(e))),
    }
}

fn decipher_panic(p: Box<dyn Any + 'static + Send>) -> String {
    if let Some(&s) = p.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Ok(s) = p.downcast::<String>() {
        *s
    } else {
        "thread panicked with unrecognized type".to_string()
    }
}
