//! Отправка и приём SMS
//!
//! PDU submission goes through the busy guard held in [`SessionState`]:
//! a second submission while one is in flight fails fast with
//! [`Error::Busy`] and never touches the wire. Text-mode submission does not
//! take the guard; callers that mix both modes must serialize them
//! themselves.
use embedded_hal::serial;
use embedded_hal::timer::{CountDown, Periodic};
use log::{debug, info, warn};

use crate::errors::Error;
use crate::parse;
use crate::port::Outcome;
use crate::sim800l::{format_cmd, Sim800};
use crate::tokens::{self, Final, Token};
use crate::urc::{self, Urc};

/// Ctrl+Z, end of message body
const CTRL_Z: u8 = 0x1a;
/// минимальная длина PDU в hex символах (5 октетов)
const MIN_PDU_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    Reading,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

fn pdu_is_valid(pdu: &str) -> bool {
    pdu.len() >= MIN_PDU_LEN && pdu.len() % 2 == 0 && pdu.bytes().all(|b| b.is_ascii_hexdigit())
}

impl<S, T, E> Sim800<S, T>
where
    S: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
    E: core::fmt::Debug,
    T: CountDown + Periodic,
{
    /// Submits a hex PDU (SMSC octet included) and returns the message
    /// reference.
    ///
    /// The session goes back to `Idle` on every exit path.
    pub fn send_pdu(&mut self, pdu: &str) -> Result<u8, Error> {
        if self.state != SessionState::Idle {
            warn!("SMS rejected, session {:?}", self.state);
            return Err(Error::Busy);
        }
        if !pdu_is_valid(pdu) {
            return Err(Error::BadInput);
        }
        self.state = SessionState::Sending;
        let result = self.submit_pdu(pdu);
        self.state = SessionState::Idle;
        match result {
            Ok(mr) => info!("SMS sent, reference {}", mr),
            Err(e) => warn!("SMS failed: {:?}", e),
        }
        result
    }

    fn submit_pdu(&mut self, pdu: &str) -> Result<u8, Error> {
        // длина TPDU без октета SMSC
        let cmd = format_cmd(format_args!("AT+CMGS={}", pdu.len() / 2 - 1))?;
        let step = self.config.timeouts.sms_step_ms;
        self.port.write_line(&cmd)?;
        let prompt = tokens::tokenize(self.port.collect(step)).any(|t| t == Token::Prompt);
        if !prompt {
            debug!("SMS no prompt yet, sending payload anyway");
        }
        self.port.write_raw(pdu.as_bytes())?;
        self.port.collect(step);
        self.port.write_raw(&[CTRL_Z])?;
        let t = self.config.timeouts.sms_final_ms;
        match Outcome::classify(self.port.collect(t)) {
            Outcome::Error(_) => Err(Error::Protocol),
            Outcome::Timeout => Err(Error::NoConfirmation),
            Outcome::Ok(text) if !text.contains("CMGS") => Err(Error::NoConfirmation),
            Outcome::Ok(text) => parse::message_reference(text).ok_or(Error::Malformed),
        }
    }

    /// Text-mode submission. Does not raise the busy guard.
    pub fn send_text(&mut self, number: &str, text: &str) -> Result<(), Error> {
        let t = self.config.timeouts.default_ms;
        self.port.execute("AT+CMGF=1", t);
        let cmd = format_cmd(format_args!("AT+CMGS=\"{}\"", number))?;
        self.port.execute(&cmd, t);
        self.port.write_raw(text.as_bytes())?;
        self.port.collect(t);
        self.port.write_raw(&[CTRL_Z])?;
        let final_t = self.config.timeouts.sms_final_ms;
        match Outcome::classify(self.port.collect(final_t)) {
            Outcome::Error(_) => Err(Error::Protocol),
            Outcome::Ok(reply) if reply.contains("CMGS") => {
                info!("SMS sent to {}", number);
                Ok(())
            }
            _ => Err(Error::NoConfirmation),
        }
    }

    pub fn set_pdu_mode(&mut self) -> Result<(), Error> {
        self.command_ok("AT+CMGF=0")
    }

    pub fn set_text_mode(&mut self) -> Result<(), Error> {
        self.command_ok("AT+CMGF=1")
    }

    /// Route new messages and delivery reports straight to the UART as
    /// `+CMT:`/`+CDS:`.
    pub fn prepare_receive(&mut self) -> Result<(), Error> {
        self.command_ok("AT+CNMI=2,2,0,1,0")
    }

    /// Drains pending unsolicited output and hands every `+CMT:`/`+CDS:`
    /// record to `on_event`, in arrival order. Returns how many were
    /// delivered.
    ///
    /// The callback runs on the caller's thread before this returns. It
    /// cannot reach the driver (it is mutably borrowed here), so it should
    /// only record the event; a slow callback holds up the protocol.
    pub fn poll_unsolicited<F>(&mut self, mut on_event: F) -> usize
    where
        F: FnMut(Urc<'_>),
    {
        if self.port.collect(self.config.timeouts.urc_probe_ms).is_empty() {
            return 0;
        }
        let settle = self.config.timeouts.urc_settle_ms;
        let mut delivered = 0;
        for event in urc::scan(self.port.collect_more(settle)) {
            on_event(event);
            delivered += 1;
        }
        delivered
    }

    /// Index from a pending `+CMTI: "SM",<index>` notification, if any.
    pub fn check_for_stored_sms(&mut self) -> Option<u8> {
        if self.port.collect(self.config.timeouts.urc_probe_ms).is_empty() {
            return None;
        }
        let t = self.config.timeouts.default_ms;
        parse::stored_index(self.port.collect_more(t))
    }

    /// Reads the whole `AT+CMGR` reply into the receive buffer. `false` when
    /// the modem refused or stayed silent.
    fn fetch_stored(&mut self, index: u8) -> Result<bool, Error> {
        // хвост прошлого ответа с ошибкой - модуль ещё не готов
        if self.port.collect(self.config.timeouts.urc_probe_ms).contains("ER") {
            debug!("SMS read skipped, pending error on the line");
            return Ok(false);
        }
        let cmd = format_cmd(format_args!("AT+CMGR={}", index))?;
        self.port.write_line(&cmd)?;
        // текст сообщения может содержать "ER", смотрим только код результата
        let step = self.config.timeouts.default_ms;
        let mut result = tokens::final_result(self.port.collect(step));
        if result.is_none() {
            let t = self.config.timeouts.sms_read_ms;
            result = tokens::final_result(self.port.collect_more(t));
        }
        if result == Some(Final::Error) {
            debug!("SMS read {} refused", index);
            return Ok(false);
        }
        Ok(!self.port.text().is_empty())
    }

    fn fetch_guarded(&mut self, index: u8) -> bool {
        if self.state != SessionState::Idle {
            warn!("SMS read rejected, session {:?}", self.state);
            return false;
        }
        self.state = SessionState::Reading;
        let fetched = self.fetch_stored(index);
        self.state = SessionState::Idle;
        matches!(fetched, Ok(true))
    }

    /// Body of stored message `index`; empty when there is none.
    pub fn read_sms(&mut self, index: u8) -> &str {
        if !self.fetch_guarded(index) {
            return "";
        }
        parse::sms_body(self.port.text())
    }

    /// Sender of stored message `index` (text mode); empty when unknown.
    pub fn sms_sender(&mut self, index: u8) -> &str {
        if !self.fetch_guarded(index) {
            return "";
        }
        parse::sms_sender(self.port.text()).unwrap_or("")
    }

    /// Clears all stored messages, up to 25 seconds.
    pub fn delete_all_sms(&mut self) -> Result<(), Error> {
        self.command("AT+CMGD=1,4", self.config.timeouts.delete_all_ms)
    }
}
