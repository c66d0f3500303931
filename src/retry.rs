//! Per-set worker: re-dispatches failed reads and delivers operator
//! events. This is the only place scheduling-context work happens; the
//! completion paths just queue and wake.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{Condvar, Mutex};

use crate::io::Io;
use crate::mirror::{MapInfo, MirrorSet};

pub(crate) enum WorkItem<I: Io> {
    /// A failed read, restored from its scratch snapshot and waiting for
    /// leg reselection.
    Retry {
        info: Box<MapInfo<I>>,
        buf: BytesMut,
    },
    /// A leg-failure notification for the event sink.
    Event { ms: Arc<MirrorSet<I>>, leg: usize },
}

struct State<I: Io> {
    queue: VecDeque<WorkItem<I>>,
    busy: bool,
    shutdown: bool,
}

pub(crate) struct RetryQueue<I: Io> {
    state: Mutex<State<I>>,
    work: Condvar,
    drained: Condvar,
}

impl<I: Io> RetryQueue<I> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                busy: false,
                shutdown: false,
            }),
            work: Condvar::new(),
            drained: Condvar::new(),
        })
    }

    pub(crate) fn spawn(self: &Arc<Self>) -> std::io::Result<()> {
        let queue = self.clone();
        std::thread::Builder::new()
            .name("mirror-syncd".into())
            .spawn(move || worker_loop(queue))?;
        Ok(())
    }

    /// FIFO enqueue; callable from completion context.
    pub(crate) fn push(&self, item: WorkItem<I>) {
        let mut state = self.state.lock();
        state.queue.push_back(item);
        self.work.notify_one();
    }

    /// Block until the queue is empty and the worker idle. Reads re-queued
    /// while draining are waited for as well.
    pub(crate) fn flush(&self) {
        let mut state = self.state.lock();
        while !state.shutdown && (state.busy || !state.queue.is_empty()) {
            self.drained.wait(&mut state);
        }
    }

    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        self.work.notify_all();
        self.drained.notify_all();
    }
}

fn worker_loop<I: Io>(queue: Arc<RetryQueue<I>>) {
    loop {
        let batch = {
            let mut state = queue.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                if !state.queue.is_empty() {
                    break;
                }
                state.busy = false;
                queue.drained.notify_all();
                queue.work.wait(&mut state);
            }
            state.busy = true;
            // grab the whole pending list, process outside the lock
            std::mem::take(&mut state.queue)
        };
        for item in batch {
            match item {
                WorkItem::Retry { info, buf } => MirrorSet::retry_read(info, buf),
                WorkItem::Event { ms, leg } => ms.deliver_leg_event(leg),
            }
        }
    }
}
