//! Извлечение полей из ответов SIM800
//!
//! Stateless, one function per reply template. Nothing here panics on
//! short or garbled input: missing fields give `None` or the documented
//! sentinel.
use crate::tokens::{self, Token};

/// Reply to `AT+COPS?`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator<'a> {
    /// no `+COPS:` in the reply
    Unknown,
    Name(&'a str),
    /// header present but the name was not quoted yet
    Unquoted,
}

pub fn operator(text: &str) -> Operator<'_> {
    if !text.contains("+COPS:") {
        return Operator::Unknown;
    }
    match (text.find('"'), text.rfind('"')) {
        (Some(first), Some(last)) if first < last => Operator::Name(&text[first + 1..last]),
        _ => Operator::Unquoted,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    NotRegisteredNotSearching,
    RegisteredHome,
    NotRegisteredSearching,
    RegistrationDenied,
    Unknown,
    RegisteredRoaming,
    RegisteredSmsOnlyHome,
    RegisteredSmsOnlyRoaming,
    RegisteredEmergencyOnly,
    RegisteredCsfbHome,
    RegisteredCsfbRoaming,
}

/// Checked in order, first hit wins.
const CREG_TABLE: [(&str, RegistrationStatus); 11] = [
    ("CREG: 0,1", RegistrationStatus::NotRegisteredNotSearching),
    ("CREG: 1,1", RegistrationStatus::RegisteredHome),
    ("CREG: 2,1", RegistrationStatus::NotRegisteredSearching),
    ("CREG: 3,1", RegistrationStatus::RegistrationDenied),
    ("CREG: 4,1", RegistrationStatus::Unknown),
    ("CREG: 5,1", RegistrationStatus::RegisteredRoaming),
    ("CREG: 6,1", RegistrationStatus::RegisteredSmsOnlyHome),
    ("CREG: 7,1", RegistrationStatus::RegisteredSmsOnlyRoaming),
    ("CREG: 8,1", RegistrationStatus::RegisteredEmergencyOnly),
    ("CREG: 9,1", RegistrationStatus::RegisteredCsfbHome),
    // Same key as the row above, so this row never matches. Kept as is until
    // the code meant for CSFB roaming is confirmed against the modem manual.
    ("CREG: 9,1", RegistrationStatus::RegisteredCsfbRoaming),
];

pub fn registration_status(text: &str) -> RegistrationStatus {
    CREG_TABLE
        .iter()
        .find(|(key, _)| text.contains(key))
        .map(|(_, status)| *status)
        .unwrap_or(RegistrationStatus::Unknown)
}

/// Ответ AT+CIPGSMLOC=1,1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location<'a> {
    /// 0 success, 404 not found, 408 timeout, 601 network error, ...
    pub code: &'a str,
    pub longitude: &'a str,
    pub latitude: &'a str,
}

pub fn location(text: &str) -> Option<Location<'_>> {
    if text.contains("ER") {
        return None;
    }
    let mut fields = tokens::header(text, "+CIPGSMLOC")?;
    Some(Location {
        code: fields.next()?,
        longitude: fields.next()?,
        latitude: fields.next()?,
    })
}

/// Состояние вызова из AT+CPAS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Ready,
    Unknown,
    Ringing,
    InProgress,
}

impl CallStatus {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(CallStatus::Ready),
            2 => Some(CallStatus::Unknown),
            3 => Some(CallStatus::Ringing),
            4 => Some(CallStatus::InProgress),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            CallStatus::Ready => 0,
            CallStatus::Unknown => 2,
            CallStatus::Ringing => 3,
            CallStatus::InProgress => 4,
        }
    }
}

/// Missing header or an unlisted code reads as `Unknown`.
pub fn call_status(text: &str) -> CallStatus {
    tokens::header(text, "+CPAS")
        .and_then(|fields| fields.get(0))
        .and_then(|code| code.parse::<u8>().ok())
        .and_then(CallStatus::from_code)
        .unwrap_or(CallStatus::Unknown)
}

/// Часы модуля, год двумя цифрами
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleClock {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

fn two_digits(s: &str, at: usize) -> Option<u8> {
    s.get(at..at + 2)?.parse().ok()
}

/// `+CCLK: "yy/MM/dd,hh:mm:ss±zz"`
pub fn module_clock(text: &str) -> Option<ModuleClock> {
    let start = text.find('"')? + 1;
    let stamp = text.get(start..)?;
    Some(ModuleClock {
        year: two_digits(stamp, 0)?,
        month: two_digits(stamp, 3)?,
        day: two_digits(stamp, 6)?,
        hour: two_digits(stamp, 9)?,
        minute: two_digits(stamp, 12)?,
        second: two_digits(stamp, 15)?,
    })
}

/// UTC time reported by the network with AT+CIPGSMLOC=2,1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

impl NetworkTime {
    fn next_day(&mut self) {
        if self.day < days_in_month(self.year, self.month) {
            self.day += 1;
        } else if self.month < 12 {
            self.day = 1;
            self.month += 1;
        } else {
            self.day = 1;
            self.month = 1;
            self.year += 1;
        }
    }

    fn previous_day(&mut self) {
        if self.day > 1 {
            self.day -= 1;
        } else if self.month > 1 {
            self.month -= 1;
            self.day = days_in_month(self.year, self.month);
        } else {
            self.year -= 1;
            self.month = 12;
            self.day = 31;
        }
    }

    /// Shifts the time by whole hours, rolling day, month and year over.
    pub fn shifted(mut self, hours: i8) -> Self {
        let mut hour = i16::from(self.hour) + i16::from(hours);
        while hour < 0 {
            hour += 24;
            self.previous_day();
        }
        while hour >= 24 {
            hour -= 24;
            self.next_day();
        }
        self.hour = hour as u8;
        self
    }
}

/// `+CIPGSMLOC: 0,2024/01/15,10:20:30`; a non-zero code is a failure.
pub fn network_time(text: &str) -> Option<NetworkTime> {
    let mut fields = tokens::header(text, "+CIPGSMLOC")?;
    if fields.next()? != "0" {
        return None;
    }
    let date = fields.next()?;
    let time = fields.next()?;
    Some(NetworkTime {
        year: date.get(0..4)?.parse().ok()?,
        month: two_digits(date, 5)?,
        day: two_digits(date, 8)?,
        hour: two_digits(time, 0)?,
        minute: two_digits(time, 3)?,
        second: two_digits(time, 6)?,
    })
}

/// Ответ AT+CSQ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalQuality {
    /// 0..=31, 99 unknown
    pub rssi: u8,
    /// RXQUAL 0..=7, 99 unknown
    pub ber: u8,
}

impl SignalQuality {
    pub fn dbm(&self) -> Option<i16> {
        match self.rssi {
            0..=31 => Some(-113 + 2 * i16::from(self.rssi)),
            _ => None,
        }
    }
}

pub fn signal_quality(text: &str) -> Option<SignalQuality> {
    let fields = tokens::header(text, "+CSQ")?;
    Some(SignalQuality {
        rssi: fields.get(0)?.parse().ok()?,
        ber: fields.get(1)?.parse().ok()?,
    })
}

/// Message reference from `+CMGS: <mr>`
pub fn message_reference(text: &str) -> Option<u8> {
    tokens::header(text, "+CMGS")?.get(0)?.parse().ok()
}

/// Storage index from `+CMTI: "SM",<index>`
pub fn stored_index(text: &str) -> Option<u8> {
    tokens::header(text, "+CMTI")?.get(1)?.parse().ok()
}

/// Sender number from `+CMGR: "<stat>","<oa>",...` (text mode)
pub fn sms_sender(text: &str) -> Option<&str> {
    tokens::header(text, "+CMGR")?
        .get(1)
        .filter(|number| !number.is_empty())
}

/// Body of a stored message: the line after the `+CMGR:` line, CR stripped.
///
/// The search for the first line boundary starts at offset 2 so a leading
/// CRLF does not count. Anything shorter degrades to an empty string.
pub fn sms_body(text: &str) -> &str {
    let first = match text.get(2..).and_then(|t| t.find('\n')) {
        Some(i) => i + 3,
        None => return "",
    };
    match text[first..].find('\n') {
        Some(len) => text[first..first + len].trim_end_matches('\r'),
        None => "",
    }
}

/// `+CPIN: READY`
pub fn pin_ready(text: &str) -> bool {
    tokens::tokenize(text).any(|token| match token {
        Token::Header { name: "+CPIN", fields } => fields.get(0) == Some("READY"),
        _ => false,
    })
}
