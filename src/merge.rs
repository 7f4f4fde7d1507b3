//! Merge engine - k-way merge of time-ordered sequences
//!
//! Two interchangeable strategies with identical output order:
//!
//! - [`merge_tree`]: a binary tree of threads. Each leaf drains one input
//!   sequence; each inner node merges its two children. Stages are joined
//!   by bounded channels, so a stage blocks until its parent accepts an
//!   item and nothing is ever dropped.
//! - [`HeapMerge`]: a single-threaded priority-queue merge.
//!
//! Both forward the smaller stamp first and break ties towards the input
//! listed earlier, so equal stamps keep input order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{Result, TraceError};

/// Item carrying the time key it is merged on.
pub trait Stamped {
    fn stamp(&self) -> u64;
}

/// Merge `leaves` through a tree of threads. Every input must already be
/// ordered by stamp. The returned channel closes once all inputs are
/// exhausted; dropping it stops every stage at its next send.
///
/// All threads are spawned before this returns.
pub fn merge_tree<I>(mut leaves: Vec<I>, depth: usize) -> Result<Receiver<I::Item>>
where
    I: IntoIterator + Send + 'static,
    I::Item: Stamped + Send + 'static,
{
    let (tx, rx) = bounded(depth);
    match leaves.len() {
        0 => {}
        1 => {
            let leaf = leaves.remove(0);
            spawn("bittrace:merge-leaf", move || drain(leaf, &tx))?;
        }
        k => {
            let right = leaves.split_off(k.div_ceil(2));
            let left = merge_tree(leaves, depth)?;
            let right = merge_tree(right, depth)?;
            spawn("bittrace:merge", move || merge_pair(&left, &right, &tx))?;
        }
    }
    Ok(rx)
}

fn spawn<F>(name: &str, f: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(f)
        .map(drop)
        .map_err(TraceError::Spawn)
}

fn drain<I: IntoIterator>(leaf: I, tx: &Sender<I::Item>) {
    for item in leaf {
        if tx.send(item).is_err() {
            return;
        }
    }
}

fn merge_pair<T: Stamped>(left: &Receiver<T>, right: &Receiver<T>, tx: &Sender<T>) {
    let mut left = Some(left);
    let mut right = Some(right);
    let mut next_left: Option<T> = None;
    let mut next_right: Option<T> = None;

    loop {
        if next_left.is_none() {
            if let Some(rx) = left {
                next_left = rx.recv().ok();
                if next_left.is_none() {
                    left = None;
                }
            }
        }
        if next_right.is_none() {
            if let Some(rx) = right {
                next_right = rx.recv().ok();
                if next_right.is_none() {
                    right = None;
                }
            }
        }

        let item = match (next_left.take(), next_right.take()) {
            (Some(a), Some(b)) => {
                if a.stamp() <= b.stamp() {
                    next_right = Some(b);
                    a
                } else {
                    next_left = Some(a);
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => return,
        };
        if tx.send(item).is_err() {
            return;
        }
    }
}

struct Head<T> {
    stamp: u64,
    input: usize,
    item: T,
}

// Reversed so the max-heap pops the smallest (stamp, input) first.
impl<T> Ord for Head<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.stamp, other.input).cmp(&(self.stamp, self.input))
    }
}

impl<T> PartialOrd for Head<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> PartialEq for Head<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Head<T> {}

/// Single-threaded k-way merge over already ordered inputs.
pub struct HeapMerge<I: Iterator> {
    inputs: Vec<I>,
    heads: BinaryHeap<Head<I::Item>>,
}

impl<I> HeapMerge<I>
where
    I: Iterator,
    I::Item: Stamped,
{
    pub fn new<L: IntoIterator<IntoIter = I>>(leaves: Vec<L>) -> Self {
        let mut inputs: Vec<I> = leaves.into_iter().map(IntoIterator::into_iter).collect();
        let mut heads = BinaryHeap::with_capacity(inputs.len());
        for (input, it) in inputs.iter_mut().enumerate() {
            if let Some(item) = it.next() {
                heads.push(Head {
                    stamp: item.stamp(),
                    input,
                    item,
                });
            }
        }
        Self { inputs, heads }
    }
}

impl<I> Iterator for HeapMerge<I>
where
    I: Iterator,
    I::Item: Stamped,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        let Head { input, item, .. } = self.heads.pop()?;
        if let Some(next) = self.inputs[input].next() {
            self.heads.push(Head {
                stamp: next.stamp(),
                input,
                item: next,
            });
        }
        Some(item)
    }
}
