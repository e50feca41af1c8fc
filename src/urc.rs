//! Незапрошенные сообщения модуля (URC)
//!
//! With `AT+CNMI=2,2,0,1,0` the modem pushes incoming messages and delivery
//! reports straight to the UART:
//!
//! ```text
//! +CMT: "",135
//! 07913366003000F0240B913356108867F8...
//! +CDS: 33
//! 07913366003000F006090B913356108867F8...
//! ```
//!
//! The header line carries metadata, the payload is the whole next line.
use core::iter::FusedIterator;

const NEW_MESSAGE: &str = "+CMT:";
const STATUS_REPORT: &str = "+CDS:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urc<'a> {
    NewMessage(&'a str),
    StatusReport(&'a str),
}

#[derive(Clone, Copy)]
enum Kind {
    NewMessage,
    StatusReport,
}

/// Ordered scan over every `+CMT:`/`+CDS:` record in `buffer`.
///
/// A header whose payload line has not fully arrived yet, or whose payload
/// line is empty, is skipped.
pub fn scan(buffer: &str) -> Scan<'_> {
    Scan { buffer, pos: 0 }
}

pub struct Scan<'a> {
    buffer: &'a str,
    pos: usize,
}

impl<'a> Scan<'a> {
    fn earliest(&self) -> Option<(usize, Kind)> {
        let rest = self.buffer.get(self.pos..)?;
        let cmt = rest.find(NEW_MESSAGE).map(|i| (i, Kind::NewMessage));
        let cds = rest.find(STATUS_REPORT).map(|i| (i, Kind::StatusReport));
        match (cmt, cds) {
            (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
            (a, b) => a.or(b),
        }
    }

    fn line_end(&self, from: usize) -> Option<usize> {
        self.buffer.get(from..)?.find('\n').map(|i| from + i)
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = Urc<'a>;

    fn next(&mut self) -> Option<Urc<'a>> {
        loop {
            let (offset, kind) = match self.earliest() {
                Some(found) => found,
                None => {
                    self.pos = self.buffer.len();
                    return None;
                }
            };
            let header = self.pos + offset;
            // пропускаем строку заголовка, payload - вся следующая строка
            let payload_start = match self.line_end(header) {
                Some(end) => end + 1,
                None => {
                    self.pos = self.buffer.len();
                    return None;
                }
            };
            let payload_end = match self.line_end(payload_start) {
                Some(end) => end,
                None => {
                    self.pos = self.buffer.len();
                    return None;
                }
            };
            self.pos = payload_end + 1;
            let payload = self.buffer[payload_start..payload_end].trim_end_matches('\r');
            if payload.is_empty() {
                continue;
            }
            return Some(match kind {
                Kind::NewMessage => Urc::NewMessage(payload),
                Kind::StatusReport => Urc::StatusReport(payload),
            });
        }
    }
}

impl<'a> FusedIterator for Scan<'a> {}
