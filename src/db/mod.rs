//! SQLite persistence for applied transformations and evaluation reports.
//!
//! The connection lives on one dedicated thread. [`Database::execute`] ships
//! a closure to it and awaits the reply, so async callers never block on I/O.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod helpers;
mod migrations;
mod repositories;

pub use migrations::CURRENT_SCHEMA_VERSION;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Close,
}

/// Where the connection comes from.
enum Target {
    File(PathBuf),
    Memory,
}

impl Target {
    fn open(&self) -> Result<Connection> {
        let conn = match self {
            Target::File(path) => Connection::open(path)
                .with_context(|| format!("failed to open SQLite database {}", path.display()))?,
            Target::Memory => {
                Connection::open_in_memory().context("failed to open in-memory SQLite database")?
            }
        };
        if let Target::File(_) = self {
            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                log_error!("Failed to enable WAL mode: {err}");
            }
        }
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;
        Ok(conn)
    }
}

struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };
        if self.jobs.send(Message::Close).is_err() {
            log_error!("database thread already gone at shutdown");
        }
        if let Err(err) = handle.join() {
            log_error!("database thread panicked: {err:?}");
        }
    }
}

/// Open the connection on a new thread, migrate, then serve jobs until
/// closed. Returns once the schema is ready or failed.
fn spawn_worker(target: Target) -> Result<Worker> {
    let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

    let thread = thread::Builder::new()
        .name("palimpsest-db".into())
        .spawn(move || {
            let mut conn = match target.open() {
                Ok(conn) => conn,
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            if let Err(err) = migrations::run_migrations(&mut conn) {
                let _ = ready_tx.send(Err(err.context("failed to run database migrations")));
                return;
            }
            if ready_tx.send(Ok(())).is_err() {
                return;
            }

            while let Ok(message) = jobs_rx.recv() {
                match message {
                    Message::Run(job) => job(&mut conn),
                    Message::Close => break,
                }
            }
            log_info!("database thread exiting");
        })
        .context("failed to spawn database thread")?;

    ready_rx
        .recv()
        .context("database thread exited during startup")??;

    Ok(Worker {
        jobs: jobs_tx,
        thread: Mutex::new(Some(thread)),
    })
}

#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Option<Arc<PathBuf>>,
}

impl Database {
    /// Open (creating directories as needed) and migrate a database file.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        let worker = spawn_worker(Target::File(path.clone()))?;
        log_info!("Database ready at {}", path.display());
        Ok(Self {
            worker: Arc::new(worker),
            path: Some(Arc::new(path)),
        })
    }

    /// Throwaway database for a single session.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            worker: Arc::new(spawn_worker(Target::Memory)?),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled; nothing to do then
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("database thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }
}
