//! Sharded disk scheduler.
//!
//! A fan-out of worker threads, each draining its own bounded channel of
//! requests. Requests are dispatched by `page_id mod workers`, so every
//! request against one page lands behind the same worker and writes are
//! never passed by a later read of the same page. Callers block on a
//! per-request completion ticket.

use crate::disk::DiskManager;
use log::debug;
use opal_common::config::SchedulerConfig;
use opal_common::{OpalError, PageBuf, PageId, Result, PAGE_SIZE};
use std::sync::mpsc::{sync_channel, Receiver, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A read or write request bound for one disk worker.
enum DiskRequest {
    Read {
        page_id: PageId,
        completion: Sender<Result<Box<PageBuf>>>,
    },
    Write {
        page_id: PageId,
        data: Box<PageBuf>,
        completion: Sender<Result<()>>,
    },
}

/// Completion ticket for a scheduled read. `wait` blocks until the worker
/// has fulfilled the request and yields the page bytes.
pub struct ReadTicket {
    rx: Receiver<Result<Box<PageBuf>>>,
}

impl ReadTicket {
    /// Blocks until the read completes.
    pub fn wait(self) -> Result<Box<PageBuf>> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(OpalError::Internal("disk worker hung up".into())))
    }
}

/// Completion ticket for a scheduled write.
pub struct WriteTicket {
    rx: Receiver<Result<()>>,
}

impl WriteTicket {
    /// Blocks until the write completes.
    pub fn wait(self) -> Result<()> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(OpalError::Internal("disk worker hung up".into())))
    }
}

/// Schedules disk reads and writes over a pool of worker threads.
///
/// Dropping the scheduler sends a shutdown sentinel to every worker and
/// joins them; queued requests are drained first.
pub struct DiskScheduler {
    disk: Arc<DiskManager>,
    queues: Vec<SyncSender<Option<DiskRequest>>>,
    workers: Vec<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Spawns `config.num_workers` workers, each with its own bounded
    /// request channel.
    pub fn new(disk: Arc<DiskManager>, config: SchedulerConfig) -> Self {
        let num_workers = config.num_workers.max(1);
        let mut queues = Vec::with_capacity(num_workers);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = sync_channel::<Option<DiskRequest>>(config.queue_depth.max(1));
            let disk = Arc::clone(&disk);
            queues.push(tx);
            workers.push(std::thread::spawn(move || {
                Self::worker_loop(worker_id, disk, rx);
            }));
        }

        Self {
            disk,
            queues,
            workers,
        }
    }

    fn worker_loop(worker_id: usize, disk: Arc<DiskManager>, rx: Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = rx.recv() {
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    let mut buf: Box<PageBuf> = Box::new([0u8; PAGE_SIZE]);
                    let result = disk.read_page(page_id, &mut buf).map(|()| buf);
                    // The requester may have given up; that is not the
                    // worker's problem.
                    let _ = completion.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    let _ = completion.send(disk.write_page(page_id, &data));
                }
            }
        }
        debug!("disk worker {worker_id} exiting");
    }

    fn queue_for(&self, page_id: PageId) -> &SyncSender<Option<DiskRequest>> {
        let shard = page_id.0.max(0) as usize % self.queues.len();
        &self.queues[shard]
    }

    /// Schedules a read of `page_id`; the returned ticket blocks until the
    /// page bytes arrive.
    pub fn schedule_read(&self, page_id: PageId) -> ReadTicket {
        let (tx, rx) = std::sync::mpsc::channel();
        let request = DiskRequest::Read {
            page_id,
            completion: tx,
        };
        // Send fails only after shutdown; the ticket then reports the
        // hang-up when waited on.
        let _ = self.queue_for(page_id).send(Some(request));
        ReadTicket { rx }
    }

    /// Schedules a write of `data` to `page_id`.
    pub fn schedule_write(&self, page_id: PageId, data: Box<PageBuf>) -> WriteTicket {
        let (tx, rx) = std::sync::mpsc::channel();
        let request = DiskRequest::Write {
            page_id,
            data,
            completion: tx,
        };
        let _ = self.queue_for(page_id).send(Some(request));
        WriteTicket { rx }
    }

    /// Releases `page_id`'s slot on disk so a later page can reuse it.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.disk.delete_page(page_id);
    }

    /// The disk manager behind this scheduler.
    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        for queue in &self.queues {
            let _ = queue.send(None);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
