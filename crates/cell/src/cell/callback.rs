use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use super::CellApp;

pub type CellCallback = Box<dyn FnOnce(&mut CellApp) + Send>;

/// Handle that worker threads use to run code back on the tick thread.
#[derive(Clone)]
pub struct CallbackSender {
    tx: Sender<CellCallback>,
}

impl CallbackSender {
    /// Returns false once the owning cell is gone.
    pub fn post(&self, callback: impl FnOnce(&mut CellApp) + Send + 'static) -> bool {
        self.tx.send(Box::new(callback)).is_ok()
    }
}

impl fmt::Debug for CallbackSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackSender").finish_non_exhaustive()
    }
}

pub struct CallbackQueue {
    tx: Sender<CellCallback>,
    rx: Receiver<CellCallback>,
}

impl Default for CallbackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn sender(&self) -> CallbackSender {
        CallbackSender {
            tx: self.tx.clone(),
        }
    }

    /// Takes at most `max` queued callbacks; the rest wait for the next tick.
    pub fn drain(&self, max: usize) -> Vec<CellCallback> {
        let mut callbacks = Vec::new();
        while callbacks.len() < max {
            match self.rx.try_recv() {
                Ok(callback) => callbacks.push(callback),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        callbacks
    }
}

impl fmt::Debug for CallbackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackQueue").finish_non_exhaustive()
    }
}
