use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Owner side of a cancellation signal.
#[derive(Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side, passed down into the sandbox. The flag is readable from
/// blocking code (SQLite progress callbacks); `cancelled()` serves async code.
#[derive(Clone)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
    rx: watch::Receiver<bool>,
}

pub fn pair() -> (CancelHandle, CancelSignal) {
    let flag = Arc::new(AtomicBool::new(false));
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle {
            flag: flag.clone(),
            tx: Arc::new(tx),
        },
        CancelSignal { flag, rx },
    )
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            flag: self.flag.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    /// Resolves once the handle cancels. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() || self.is_cancelled() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
