//! Фиксированный пул рабочих потоков: общая очередь задач на mpsc.

use log::{debug, error};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..size)
            .map(|i| {
                let rx = Arc::clone(&rx);
                thread::Builder::new()
                    .name(format!("sdb-worker-{}", i))
                    .spawn(move || worker_loop(i, rx))
            })
            .filter_map(|r| match r {
                Ok(h) => Some(h),
                Err(e) => {
                    error!("spawn worker: {}", e);
                    None
                }
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Поставить задачу в очередь. Ложь — пул уже остановлен.
    pub fn execute<F: FnOnce() + Send + 'static>(&self, job: F) -> bool {
        match &self.tx {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => false,
        }
    }
}

fn worker_loop(i: usize, rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let guard = rx.lock().unwrap();
            guard.recv()
        };
        match job {
            Ok(job) => {
                // Паника задачи не должна уменьшать пул; запрос добьёт таймаут.
                if std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)).is_err() {
                    error!("worker {}: job panicked", i);
                }
            }
            Err(_) => {
                debug!("worker {} exits: queue closed", i);
                break;
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.tx.take();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}
