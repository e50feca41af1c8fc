//! Test doubles for the UART and the tick timer.
//!
//! `MockSerial` plays a scripted modem: every flush releases the next queued
//! reply into the receive line. Lag is modelled as empty polls, each of which
//! costs the reader one timer tick.
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::string::String;
use std::vec::Vec;

use embedded_hal::serial;
use embedded_hal::timer::{CountDown, Periodic};
use void::Void;

#[derive(Default)]
struct Wire {
    /// `None` is a poll with nothing on the line
    rx: VecDeque<Option<u8>>,
    replies: VecDeque<Vec<Option<u8>>>,
    tx: Vec<u8>,
    flushes: usize,
}

fn lagged(lag: usize, bytes: &[u8]) -> impl Iterator<Item = Option<u8>> + '_ {
    std::iter::repeat(None)
        .take(lag)
        .chain(bytes.iter().copied().map(Some))
}

#[derive(Clone, Default)]
pub struct MockSerial {
    wire: Rc<RefCell<Wire>>,
}

impl MockSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer to the next flushed write, after `lag` empty polls.
    pub fn reply(&self, lag: usize, bytes: &[u8]) {
        let reply = lagged(lag, bytes).collect();
        self.wire.borrow_mut().replies.push_back(reply);
    }

    /// Puts bytes on the line right away (unsolicited output).
    pub fn inject(&self, lag: usize, bytes: &[u8]) {
        self.wire.borrow_mut().rx.extend(lagged(lag, bytes));
    }

    /// Continues the last queued reply; goes straight to the line when no
    /// reply is pending.
    pub fn inject_later(&self, lag: usize, bytes: &[u8]) {
        let wire = &mut *self.wire.borrow_mut();
        match wire.replies.back_mut() {
            Some(last) => last.extend(lagged(lag, bytes)),
            None => wire.rx.extend(lagged(lag, bytes)),
        }
    }

    pub fn written(&self) -> String {
        String::from_utf8_lossy(&self.wire.borrow().tx).into_owned()
    }

    pub fn flushes(&self) -> usize {
        self.wire.borrow().flushes
    }
}

impl serial::Read<u8> for MockSerial {
    type Error = ();

    fn read(&mut self) -> nb::Result<u8, ()> {
        match self.wire.borrow_mut().rx.pop_front() {
            Some(Some(byte)) => Ok(byte),
            _ => Err(nb::Error::WouldBlock),
        }
    }
}

impl serial::Write<u8> for MockSerial {
    type Error = ();

    fn write(&mut self, word: u8) -> nb::Result<(), ()> {
        self.wire.borrow_mut().tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), ()> {
        let mut wire = self.wire.borrow_mut();
        wire.flushes += 1;
        if let Some(reply) = wire.replies.pop_front() {
            wire.rx.extend(reply);
        }
        Ok(())
    }
}

/// Every `wait` is one elapsed tick.
#[derive(Clone, Default)]
pub struct MockTimer {
    ticks: Rc<Cell<u32>>,
}

impl MockTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticks(&self) -> u32 {
        self.ticks.get()
    }
}

impl CountDown for MockTimer {
    type Time = u32;

    fn start<T>(&mut self, _count: T)
    where
        T: Into<u32>,
    {
    }

    fn wait(&mut self) -> nb::Result<(), Void> {
        self.ticks.set(self.ticks.get() + 1);
        Ok(())
    }
}

impl Periodic for MockTimer {}
