//! Shared output for the walkthrough and the service delegates, so lines
//! printed from inside a task completion land in the same transcript.

use std::fmt::Display;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct Console<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for Console<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(out)),
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, W>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "console lock poisoned"))
    }

    /// Write one line and flush it.
    pub fn line(&self, text: impl Display) -> io::Result<()> {
        let mut out = self.lock()?;
        writeln!(out, "{text}")?;
        out.flush()
    }
}

impl<W: Write> Write for Console<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

#[cfg(test)]
impl Console<Vec<u8>> {
    pub fn text(&self) -> String {
        String::from_utf8(self.inner.lock().unwrap().clone()).unwrap()
    }
}
