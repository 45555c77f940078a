use tokio::runtime::Handle;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool running request handlers off the I/O thread.
///
/// Tasks block on the shared content buffers, so the pool must allow
/// blocking work and its size bounds the number of requests processed at
/// once.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Runs tasks on the runtime's blocking pool.
impl Executor for Handle {
    fn execute(&self, task: Task) {
        drop(self.spawn_blocking(task));
    }
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) {
        self(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn closure_executor_runs_inline() {
        let runs = Arc::new(AtomicUsize::new(0));
        let executor = |task: Task| task();

        let counter = Arc::clone(&runs);
        executor.execute(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn runtime_handle_runs_blocking_tasks() {
        let runtime = tokio::runtime::Builder::new_multi_thread().worker_threads(1).max_blocking_threads(2).build().unwrap();
        let (tx, rx) = mpsc::channel();

        runtime.handle().execute(Box::new(move || tx.send(std::thread::current().id()).unwrap()));
        let worker = rx.recv().unwrap();
        assert_ne!(worker, std::thread::current().id());
    }
}
