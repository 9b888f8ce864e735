//! Small piece of state shared between [`crate::router::Router`] and
//! [`crate::transport::Transport`] without either holding a reference back
//! to the other or to [`crate::bus::Bus`].

use crate::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct ConnState {
    pub connected: AtomicBool,
    pub unix_fds_enabled: AtomicBool,
    pub unique_name: Mutex<Option<String>>,
    pub guid: Mutex<Option<String>>,
    pub error: Mutex<Option<Error>>,
}

impl ConnState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, value: bool) {
        self.connected.store(value, Ordering::Release);
    }

    pub fn set_error(&self, error: Error) {
        *self.error.lock().expect("conn state lock poisoned") = Some(error);
    }

    pub fn error(&self) -> Option<Error> {
        self.error.lock().expect("conn state lock poisoned").clone()
    }
}
