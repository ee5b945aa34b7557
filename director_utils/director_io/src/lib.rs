//! Background draining of child process pipes.

use std::{
    sync::{Arc, Mutex},
    thread::JoinHandle,
};

pub mod thread;

#[derive(Debug)]
pub struct BackgroundIoHandle {
    buf: Arc<Mutex<Vec<u8>>>,
    reader: JoinHandle<()>,
}

impl BackgroundIoHandle {
    fn new(buf: Arc<Mutex<Vec<u8>>>, reader: JoinHandle<()>) -> Self {
        Self { buf, reader }
    }

    /// Block until the pipe hits EOF, then take everything read.
    pub fn wait_finish(self) -> Vec<u8> {
        if self.reader.join().is_err() {
            log::warn!("background reader panicked");
        }
        let mut buf = self.buf.lock().unwrap();
        buf.split_off(0)
    }
}
