//! Обмен AT командами с модулем по последовательному порту
//!
//! `AtPort` owns the UART and the periodic tick timer. It writes command
//! lines, gathers whatever the modem sends back within a window and sorts
//! the snapshot into [`Outcome`].
use embedded_hal::serial::{Read, Write};
use embedded_hal::timer::{CountDown, Periodic};
use heapless::Vec;
use log::{debug, error, warn};
use nb::block;

use crate::config::{ms_to_ticks, Sim800Config};
use crate::errors::Error;

/// длина буфера приёма данных от SIM800
pub const SIM800_RCV_BUF_LEN: usize = 1600;
/// длина буфера для сборки AT команды
pub const CMD_LEN: usize = 96;

const CRLF: &[u8] = b"\r\n";
/// замена байтов вне ASCII
const NOISE: u8 = b'?';

/// Result of one command/response exchange.
///
/// Classification is total: an empty window is `Timeout`, any window
/// containing `ER` (ERROR, +CME ERROR, ERR) is `Error`, everything else is
/// `Ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<'a> {
    Ok(&'a str),
    Error(&'a str),
    Timeout,
}

impl<'a> Outcome<'a> {
    pub fn classify(text: &'a str) -> Self {
        if text.is_empty() {
            Outcome::Timeout
        } else if text.contains("ER") {
            Outcome::Error(text)
        } else {
            Outcome::Ok(text)
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// raw reply, empty for `Timeout`
    pub fn text(&self) -> &'a str {
        match self {
            Outcome::Ok(text) | Outcome::Error(text) => text,
            Outcome::Timeout => "",
        }
    }

    pub fn into_result(self) -> Result<&'a str, Error> {
        match self {
            Outcome::Ok(text) => Ok(text),
            Outcome::Error(_) => Err(Error::Protocol),
            Outcome::Timeout => Err(Error::Timeout),
        }
    }
}

pub struct AtPort<S, T> {
    serial: S,
    timer: T,
    rcv_buf: Vec<u8, SIM800_RCV_BUF_LEN>,
    tick_ms: u32,
    idle_ticks: u32,
}

impl<S, T, E> AtPort<S, T>
where
    S: Read<u8, Error = E> + Write<u8, Error = E>,
    E: core::fmt::Debug,
    T: CountDown + Periodic,
{
    /// `timer` must already be running with period `config.tick_ms`
    pub fn new(serial: S, timer: T, config: &Sim800Config) -> Self {
        AtPort {
            serial,
            timer,
            rcv_buf: Vec::new(),
            tick_ms: config.tick_ms.max(1),
            idle_ticks: config.idle_ticks.max(1),
        }
    }

    pub fn release(self) -> (S, T) {
        (self.serial, self.timer)
    }

    fn ticks(&self, ms: u32) -> u32 {
        ms_to_ticks(ms, self.tick_ms)
    }

    /// Текст последнего собранного ответа.
    ///
    /// Bytes outside ASCII were stored as `?`, so the view covers every byte
    /// received.
    pub fn text(&self) -> &str {
        match core::str::from_utf8(&self.rcv_buf) {
            Ok(text) => text,
            Err(e) => core::str::from_utf8(&self.rcv_buf[..e.valid_up_to()]).unwrap_or(""),
        }
    }

    /// Drains everything the modem sends within `timeout_ms` into a fresh
    /// snapshot. Empty means nothing arrived before the deadline.
    pub fn collect(&mut self, timeout_ms: u32) -> &str {
        self.rcv_buf.clear();
        self.fill(timeout_ms);
        self.text()
    }

    /// Like [`collect`](Self::collect) but appends to the current snapshot.
    pub fn collect_more(&mut self, timeout_ms: u32) -> &str {
        self.fill(timeout_ms);
        self.text()
    }

    fn fill(&mut self, timeout_ms: u32) -> usize {
        let deadline = self.ticks(timeout_ms);
        let start = self.rcv_buf.len();
        let mut got_first_char = false; // признак, что получили что-то из порта
        let mut w1_cycles = 0; // тиков ожидания первого символа
        let mut w2_cycles = 0; // тиков тишины после последнего символа
        loop {
            match self.serial.read() {
                Ok(x) => {
                    // помехи на линии (0xFF после включения) заменяем, текст остаётся ASCII
                    let x = if x.is_ascii() { x } else { NOISE };
                    if self.rcv_buf.push(x).is_err() {
                        // остаток заберёт следующее чтение
                        warn!("SIM800 rx buffer full, {} bytes kept", SIM800_RCV_BUF_LEN);
                        break;
                    }
                    got_first_char = true;
                    w2_cycles = 0;
                }
                Err(nb::Error::Other(e)) => {
                    error!("SIM800 read error: {:?}", e);
                    break;
                }
                Err(nb::Error::WouldBlock) => {
                    // символ не пришёл ещё
                    if self.timer.wait().is_err() {
                        continue;
                    }
                    if got_first_char {
                        w2_cycles += 1;
                        if w2_cycles >= self.idle_ticks {
                            break;
                        }
                    } else {
                        w1_cycles += 1;
                        if w1_cycles >= deadline {
                            break; // вылет по таймауту
                        }
                    }
                }
            }
        }
        let received = self.rcv_buf.len() - start;
        if received == 0 {
            debug!("SIM800 no response in {} ms", timeout_ms);
        } else {
            debug!("RX: {:?}", self.text().get(start..).unwrap_or(""));
        }
        received
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Error> {
        for byte in bytes {
            block!(self.serial.write(*byte)).map_err(|e| {
                error!("SIM800 write error: {:?}", e);
                Error::SerialError
            })?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        block!(self.serial.flush()).map_err(|e| {
            error!("SIM800 flush error: {:?}", e);
            Error::SerialError
        })
    }

    /// Command line terminated with CRLF.
    pub fn write_line(&mut self, cmd: &str) -> Result<(), Error> {
        debug!("TX: {}", cmd);
        self.write_all(cmd.as_bytes())?;
        self.write_all(CRLF)?;
        self.flush()
    }

    /// Bytes with no terminator: PDU payload, message body, Ctrl+Z.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.write_all(bytes)?;
        self.flush()
    }

    /// Отправка AT команды и получение ответа.
    ///
    /// A failed write is logged and reported as `Timeout`: nothing was
    /// exchanged with the modem.
    pub fn execute(&mut self, cmd: &str, timeout_ms: u32) -> Outcome<'_> {
        if self.write_line(cmd).is_err() {
            self.rcv_buf.clear();
            return Outcome::Timeout;
        }
        Outcome::classify(self.collect(timeout_ms))
    }

    /// Keeps reading until a final `OK` or `ER` marker shows up, at most
    /// `attempts` windows of `timeout_ms` each. Windows accumulate into one
    /// snapshot. Running out of windows is `Timeout` even if some text
    /// arrived.
    pub fn wait_final(&mut self, timeout_ms: u32, attempts: u8) -> Outcome<'_> {
        self.rcv_buf.clear();
        for _ in 0..attempts.max(1) {
            let done = {
                let text = self.collect_more(timeout_ms);
                text.contains("OK") || text.contains("ER")
            };
            if done {
                return Outcome::classify(self.text());
            }
        }
        warn!("SIM800 no final result after {} windows", attempts);
        Outcome::Timeout
    }

    /// задержка на `ms`, отсчитанная тиками таймера
    pub fn pause(&mut self, ms: u32) {
        for _ in 0..self.ticks(ms) {
            block!(self.timer.wait()).ok();
        }
    }
}
