//! Драйвер GSM модуля SIM800 поверх embedded-hal
//!
//! The driver owns a UART implementing `embedded_hal::serial::{Read, Write}`
//! and a periodic timer implementing `embedded_hal::timer::CountDown`. Every
//! exchange is blocking and bounded by the timer: the driver never waits
//! forever for the modem.
//!
//! ```ignore
//! let mut sim = Sim800::new(serial, timer, Sim800Config::default());
//! sim.initialize()?;
//! sim.set_pdu_mode()?;
//! let reference = sim.send_pdu("0011000B919785000000F00000AA05E8329BFD06")?;
//! ```
#![cfg_attr(not(test), no_std)]

pub mod config;
mod errors;
pub mod parse;
pub mod port;
mod sim800l;
mod sms;
pub mod tokens;
pub mod urc;

#[cfg(test)]
mod mock;

pub use crate::config::{Baud, Sim800Config, Timeouts};
pub use crate::errors::Error;
pub use crate::parse::{
    CallStatus, Location, ModuleClock, NetworkTime, Operator, RegistrationStatus, SignalQuality,
};
pub use crate::port::{AtPort, Outcome};
pub use crate::sim800l::{FunctionalityMode, Sim800};
pub use crate::sms::SessionState;
pub use crate::urc::Urc;
