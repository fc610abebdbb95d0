use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

type StoreJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(StoreJob),
    Stop,
}

/// Owns the store thread; the last `Database` clone to go stops and joins it.
struct StoreThread {
    requests: mpsc::Sender<Request>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreThread {
    fn drop(&mut self) {
        let handle = match self.handle.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if self.requests.send(Request::Stop).is_err() {
            debug!("Message store thread already gone");
        }
        if handle.join().is_err() {
            error!("Message store thread panicked");
        }
    }
}

/// Open the SQLite file with the durability settings the pipeline relies on
/// and bring its schema up to date.
fn open_store(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open message store {}", path.display()))?;

    // WAL lets readers such as sqlite3 shells inspect the file while the
    // listener is writing; FULL makes every append durable once it returns.
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal")?;
    conn.pragma_update(None, "synchronous", "FULL")
        .context("failed to set synchronous=FULL")?;

    run_migrations(&mut conn).context("failed to migrate message store schema")?;
    Ok(conn)
}

fn serve(mut conn: Connection, requests: mpsc::Receiver<Request>) {
    let mut handled = 0u64;
    while let Ok(request) = requests.recv() {
        match request {
            Request::Run(job) => {
                job(&mut conn);
                handled += 1;
            }
            Request::Stop => break,
        }
    }
    info!("Message store closed after {handled} operation(s)");
}

/// Handle to the telemetry database.
///
/// A single thread owns the SQLite connection; every operation is shipped to
/// it over a channel, so appends from the listener and processed-flag updates
/// from the batch jobs never interleave mid-statement. Clones share that
/// thread.
#[derive(Clone)]
pub struct Database {
    thread: Arc<StoreThread>,
    path: Arc<PathBuf>,
}

impl Database {
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let (requests, inbox) = mpsc::channel::<Request>();
        let (opened_tx, opened_rx) = mpsc::channel::<Result<()>>();
        let store_path = path.clone();

        let handle = thread::Builder::new()
            .name("otac-db".into())
            .spawn(move || match open_store(&store_path) {
                Ok(conn) => {
                    if opened_tx.send(Ok(())).is_ok() {
                        serve(conn, inbox);
                    }
                }
                Err(err) => {
                    let _ = opened_tx.send(Err(err));
                }
            })
            .context("failed to spawn message store thread")?;

        opened_rx
            .recv()
            .context("message store thread exited while opening")??;

        info!("Message store ready at {}", path.display());

        Ok(Self {
            thread: Arc::new(StoreThread {
                requests,
                handle: Mutex::new(Some(handle)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Run `job` on the store thread and wait for its result.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = Request::Run(Box::new(move |conn| {
            // The caller may have been cancelled; its result is simply dropped.
            let _ = reply_tx.send(job(conn));
        }));

        self.thread
            .requests
            .send(request)
            .map_err(|_| anyhow!("message store thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("message store thread stopped before replying"))?
    }
}
