///--------------------------------------------------------------
/// Функции работы с SIM800L
///--------------------------------------------------------------
use core::fmt::Write as _;
use embedded_hal::serial;
use embedded_hal::timer::{CountDown, Periodic};
use heapless::String;
use log::{info, warn};

use crate::config::Sim800Config;
use crate::errors::Error;
use crate::parse::{self, CallStatus, ModuleClock, NetworkTime, Operator, RegistrationStatus, SignalQuality};
use crate::port::{AtPort, Outcome, CMD_LEN};
use crate::sms::SessionState;
use crate::tokens::{self, Final};

/// длина полей координат
const LOCATION_FIELD_LEN: usize = 16;
/// пауза между попытками команды
const RETRY_PAUSE_MS: u32 = 500;

const UNKNOWN_OPERATOR: &str = "Unknown";

/// Режим работы радиочасти, AT+CFUN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionalityMode {
    Minimum,
    Full,
    /// RF off
    Flight,
}

impl FunctionalityMode {
    pub fn code(self) -> u8 {
        match self {
            FunctionalityMode::Minimum => 0,
            FunctionalityMode::Full => 1,
            FunctionalityMode::Flight => 4,
        }
    }
}

/// последний результат AT+CIPGSMLOC
#[derive(Debug, Default)]
struct LocationFix {
    code: String<LOCATION_FIELD_LEN>,
    longitude: String<LOCATION_FIELD_LEN>,
    latitude: String<LOCATION_FIELD_LEN>,
}

impl LocationFix {
    fn store(&mut self, fix: &parse::Location<'_>) -> Result<(), Error> {
        self.code.clear();
        self.longitude.clear();
        self.latitude.clear();
        self.code.push_str(fix.code).map_err(|_| Error::Overflow)?;
        self.longitude.push_str(fix.longitude).map_err(|_| Error::Overflow)?;
        self.latitude.push_str(fix.latitude).map_err(|_| Error::Overflow)
    }
}

pub struct Sim800<S, T> {
    pub(crate) port: AtPort<S, T>,
    pub(crate) config: Sim800Config,
    pub(crate) state: SessionState,
    sleep_mode: bool,
    functionality: FunctionalityMode,
    location: LocationFix,
}

pub(crate) fn format_cmd(args: core::fmt::Arguments<'_>) -> Result<String<CMD_LEN>, Error> {
    let mut cmd = String::new();
    cmd.write_fmt(args)?;
    Ok(cmd)
}

impl<S, T, E> Sim800<S, T>
where
    S: serial::Read<u8, Error = E> + serial::Write<u8, Error = E>,
    E: core::fmt::Debug,
    T: CountDown + Periodic,
{
    /// `timer` must already be running with period `config.tick_ms`; the
    /// UART must already be clocked at `config.baud`.
    pub fn new(serial: S, timer: T, config: Sim800Config) -> Self {
        Sim800 {
            port: AtPort::new(serial, timer, &config),
            config,
            state: SessionState::Idle,
            sleep_mode: false,
            functionality: FunctionalityMode::Full,
            location: LocationFix::default(),
        }
    }

    /// Gives back the UART and the timer.
    pub fn release(self) -> (S, T) {
        self.port.release()
    }

    pub fn config(&self) -> &Sim800Config {
        &self.config
    }

    pub fn session_state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn command(&mut self, cmd: &str, timeout_ms: u32) -> Result<(), Error> {
        self.port.execute(cmd, timeout_ms).into_result().map(|_| ())
    }

    /// Like `command` but the reply must carry a final `OK` line.
    pub(crate) fn command_ok(&mut self, cmd: &str) -> Result<(), Error> {
        let timeout = self.config.timeouts.default_ms;
        let text = self.port.execute(cmd, timeout).into_result()?;
        match tokens::final_result(text) {
            Some(Final::Ok) => Ok(()),
            _ => Err(Error::Malformed),
        }
    }

    /// отправка команды за несколько попыток
    fn command_n(&mut self, cmd: &str, ans: &str, tries: u8) -> Result<(), Error> {
        let timeout = self.config.timeouts.default_ms;
        let mut last = Error::Timeout;
        for _ in 0..tries.max(1) {
            match self.port.execute(cmd, timeout) {
                Outcome::Ok(text) if text.contains(ans) => return Ok(()),
                Outcome::Ok(_) => last = Error::Malformed,
                Outcome::Error(_) => last = Error::Protocol,
                Outcome::Timeout => last = Error::Timeout,
            }
            self.port.pause(RETRY_PAUSE_MS); // delay between attempts
        }
        Err(last)
    }

    /// проверка/инициализация связи с модулем
    ///
    /// Handshakes with `AT`, switches echo off and pins the modem to the
    /// configured baud rate. Driver state goes back to its power-on values.
    pub fn initialize(&mut self) -> Result<(), Error> {
        self.state = SessionState::Idle;
        self.sleep_mode = false;
        self.functionality = FunctionalityMode::Full;
        self.command_n("AT", "OK", self.config.handshake_attempts)?;
        // switch off echo
        self.command_n("ATE0", "OK", 3)?;
        // setup fixed baud rate
        let cmd = format_cmd(format_args!("AT+IPR={}", self.config.baud.bps()))?;
        self.command_n(&cmd, "OK", 3)?;
        info!("SIM800 connected at {} bps", self.config.baud.bps());
        Ok(())
    }

    /// AT+CSCLK: with slow clock on, the modem sleeps while DTR is high.
    pub fn set_sleep_mode(&mut self, state: bool) -> Result<(), Error> {
        let cmd = if state { "AT+CSCLK=1" } else { "AT+CSCLK=0" };
        self.command(cmd, self.config.timeouts.default_ms)?;
        self.sleep_mode = state;
        Ok(())
    }

    pub fn sleep_mode(&self) -> bool {
        self.sleep_mode
    }

    pub fn set_functionality_mode(&mut self, mode: FunctionalityMode) -> Result<(), Error> {
        let cmd = format_cmd(format_args!("AT+CFUN={}", mode.code()))?;
        self.command(&cmd, self.config.timeouts.default_ms)?;
        self.functionality = mode;
        Ok(())
    }

    pub fn functionality_mode(&self) -> FunctionalityMode {
        self.functionality
    }

    /// Enters the SIM PIN. The answer can take several seconds, the wait is
    /// bounded by `final_attempts` windows.
    pub fn set_pin(&mut self, pin: &str) -> Result<(), Error> {
        let cmd = format_cmd(format_args!("AT+CPIN={}", pin))?;
        self.port.write_line(&cmd)?;
        let t = self.config.timeouts.pin_ms;
        self.port
            .wait_final(t, self.config.final_attempts)
            .into_result()
            .map(|_| ())
    }

    /// Unlocks the SIM and removes the PIN lock.
    pub fn disable_pin(&mut self, pin: &str) -> Result<(), Error> {
        self.set_pin(pin)?;
        let cmd = format_cmd(format_args!("AT+CLCK=\"SC\",0,\"{}\"", pin))?;
        let t = self.config.timeouts.pin_ms;
        let text = self.port.execute(&cmd, t).into_result()?;
        if text.contains("OK") {
            Ok(())
        } else {
            Err(Error::Malformed)
        }
    }

    pub fn pin_is_ready(&mut self) -> bool {
        if self.port.write_line("AT+CPIN?").is_err() {
            return false;
        }
        let t = self.config.timeouts.pin_ms;
        match self.port.wait_final(t, self.config.final_attempts) {
            Outcome::Ok(text) => parse::pin_ready(text),
            _ => false,
        }
    }

    /// ATI, raw reply
    pub fn product_info(&mut self) -> &str {
        let t = self.config.timeouts.default_ms;
        self.port.execute("ATI", t).text()
    }

    /// Operator name, `"Unknown"` without a `+COPS:` reply.
    ///
    /// When the header came without a quoted name yet, the next collected
    /// window is returned as is.
    pub fn operator(&mut self) -> &str {
        let t = self.config.timeouts.default_ms;
        let found = match parse::operator(self.port.execute("AT+COPS?", t).text()) {
            Operator::Unquoted => false,
            Operator::Unknown | Operator::Name(_) => true,
        };
        if found {
            return match parse::operator(self.port.text()) {
                Operator::Name(name) => name,
                _ => UNKNOWN_OPERATOR,
            };
        }
        self.port.collect(t)
    }

    /// AT+COPS=?, raw list; the scan takes up to 45 seconds.
    pub fn operators_list(&mut self) -> &str {
        let t = self.config.timeouts.operators_list_ms;
        self.port.execute("AT+COPS=?", t).text()
    }

    /// Enables registration URCs and waits, bounded, for the final result.
    pub fn register_to_network(&mut self) -> Result<(), Error> {
        self.port.write_line("AT+CREG=1")?;
        let t = self.config.timeouts.registration_ms;
        self.port
            .wait_final(t, self.config.final_attempts)
            .into_result()?;
        info!("SIM800 registration reporting on");
        Ok(())
    }

    pub fn registration_status(&mut self) -> RegistrationStatus {
        let t = self.config.timeouts.default_ms;
        parse::registration_status(self.port.execute("AT+CREG?", t).text())
    }

    /// GSM location fix through AT+CIPGSMLOC=1,1. Needs an open bearer
    /// profile. Results are kept for the coordinate getters.
    pub fn calculate_location(&mut self) -> Result<(), Error> {
        let t = self.config.timeouts.location_ms;
        let text = self.port.execute("AT+CIPGSMLOC=1,1", t).text();
        if text.is_empty() {
            return Err(Error::Timeout);
        }
        if text.contains("ER") {
            return Err(Error::Protocol);
        }
        match parse::location(text) {
            Some(fix) => self.location.store(&fix),
            None => Err(Error::Malformed),
        }
    }

    /// 0 success, 404 not found, 408 timeout, 601 network error, 602 no
    /// memory, 603 DNS error, 604 stack busy, 65535 other
    pub fn location_code(&self) -> &str {
        &self.location.code
    }

    pub fn longitude(&self) -> &str {
        &self.location.longitude
    }

    pub fn latitude(&self) -> &str {
        &self.location.latitude
    }

    /// Программный перезапуск модуля.
    ///
    /// The reset pin is the application's business; this restarts the MT
    /// with AT+CFUN=1,1 and waits, bounded, until it answers `AT` again and
    /// reports `SMS Ready`.
    pub fn reset(&mut self) -> Result<(), Error> {
        self.state = SessionState::Idle;
        self.port.write_line("AT+CFUN=1,1")?;
        self.command_n("AT", "OK", self.config.handshake_attempts)?;
        let t = self.config.timeouts.default_ms;
        for _ in 0..self.config.handshake_attempts.max(1) {
            if self.port.collect(t).contains("SMS") {
                self.functionality = FunctionalityMode::Full;
                info!("SIM800 ready after reset");
                return Ok(());
            }
        }
        warn!("SIM800 no SMS Ready after reset");
        Err(Error::Timeout)
    }

    /// AT+CSQ, raw reply
    pub fn signal_quality(&mut self) -> &str {
        let t = self.config.timeouts.default_ms;
        self.port.execute("AT+CSQ", t).text()
    }

    pub fn signal_quality_values(&mut self) -> Option<SignalQuality> {
        parse::signal_quality(self.signal_quality())
    }

    pub fn answer(&mut self) -> Result<(), Error> {
        self.command("ATA", self.config.timeouts.default_ms)
    }

    /// Voice call. No reply within the window is not a failure: the modem
    /// may answer only once the call is set up.
    pub fn dial(&mut self, number: &str) -> Result<(), Error> {
        let cmd = format_cmd(format_args!("ATD{};", number))?;
        match self.port.execute(&cmd, self.config.timeouts.default_ms) {
            Outcome::Error(_) => Err(Error::Protocol),
            _ => Ok(()),
        }
    }

    pub fn hang_up(&mut self) -> Result<(), Error> {
        self.command("ATH", self.config.timeouts.default_ms)
    }

    pub fn call_status(&mut self) -> CallStatus {
        let t = self.config.timeouts.default_ms;
        parse::call_status(self.port.execute("AT+CPAS", t).text())
    }

    /// Часы модуля. An error answer is retried once.
    pub fn read_module_clock(&mut self) -> Result<ModuleClock, Error> {
        let t = self.config.timeouts.default_ms;
        let mut failed = !self.port.execute("AT+CCLK?", t).is_ok();
        if failed {
            self.port.pause(50);
            failed = !self.port.execute("AT+CCLK?", t).is_ok();
        }
        if failed {
            return Err(Error::Protocol);
        }
        parse::module_clock(self.port.text()).ok_or(Error::Malformed)
    }

    /// Opens GPRS bearer 1 with the configured APN.
    pub fn activate_bearer_profile(&mut self) -> Result<(), Error> {
        let t = self.config.timeouts.default_ms;
        self.command("AT+SAPBR=3,1,\"CONTYPE\",\"GPRS\"", t)?;
        let cmd = format_cmd(format_args!("AT+SAPBR=3,1,\"APN\",\"{}\"", self.config.apn))?;
        self.command(&cmd, t)?;
        let bt = self.config.timeouts.bearer_ms;
        if let Err(e) = self.command("AT+SAPBR=1,1", bt) {
            // ERROR here usually means the bearer is already open
            warn!("SIM800 bearer open: {:?}", e);
        }
        self.command("AT+SAPBR=2,1", bt)
    }

    pub fn deactivate_bearer_profile(&mut self) -> Result<(), Error> {
        let bt = self.config.timeouts.bearer_ms;
        self.command("AT+SAPBR=0,1", bt)
    }

    /// UTC date and time from the network, bearer must be open.
    pub fn network_time(&mut self) -> Result<NetworkTime, Error> {
        let t = self.config.timeouts.location_ms;
        let text = self.port.execute("AT+CIPGSMLOC=2,1", t).into_result()?;
        parse::network_time(text).ok_or(Error::Malformed)
    }

    /// Sets the module clock from network time shifted by `utc_offset`
    /// hours. The bearer is opened for the query and closed afterwards.
    pub fn sync_module_clock_from_network(&mut self, utc_offset: i8) -> Result<(), Error> {
        self.activate_bearer_profile()?;
        let time = self.network_time();
        if let Err(e) = self.deactivate_bearer_profile() {
            warn!("SIM800 bearer close: {:?}", e);
        }
        let local = time?.shifted(utc_offset);
        // часовой пояс в четвертях часа
        let quarters = i16::from(utc_offset) * 4;
        let sign = if quarters < 0 { '-' } else { '+' };
        let cmd = format_cmd(format_args!(
            "AT+CCLK=\"{:02}/{:02}/{:02},{:02}:{:02}:{:02}{}{:02}\"",
            local.year % 100,
            local.month,
            local.day,
            local.hour,
            local.minute,
            local.second,
            sign,
            quarters.abs()
        ))?;
        self.command(&cmd, self.config.timeouts.default_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSerial, MockTimer};

    fn sim() -> (Sim800<MockSerial, MockTimer>, MockSerial) {
        let serial = MockSerial::new();
        let sim = Sim800::new(serial.clone(), MockTimer::new(), Sim800Config::default());
        (sim, serial)
    }

    #[test]
    fn initialize_handshakes_and_pins_baud() {
        let (mut sim, serial) = sim();
        serial.reply(3, b"\r\nOK\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.initialize(), Ok(()));
        assert_eq!(serial.written(), "AT\r\nATE0\r\nAT+IPR=9600\r\n");
    }

    #[test]
    fn initialize_retries_silent_modem() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"");
        serial.reply(0, b"\r\nOK\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.initialize(), Ok(()));
        assert!(serial.written().starts_with("AT\r\nAT\r\nATE0"));
    }

    #[test]
    fn initialize_gives_up() {
        let serial = MockSerial::new();
        let config = Sim800Config {
            handshake_attempts: 2,
            ..Default::default()
        };
        let mut sim = Sim800::new(serial.clone(), MockTimer::new(), config);
        assert_eq!(sim.initialize(), Err(Error::Timeout));
        assert_eq!(serial.written(), "AT\r\nAT\r\n");
    }

    #[test]
    fn sleep_mode_only_changes_on_success() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\nERROR\r\n");
        assert_eq!(sim.set_sleep_mode(true), Err(Error::Protocol));
        assert!(!sim.sleep_mode());
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.set_sleep_mode(true), Ok(()));
        assert!(sim.sleep_mode());
        assert!(serial.written().ends_with("AT+CSCLK=1\r\n"));
    }

    #[test]
    fn functionality_mode_codes() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.set_functionality_mode(FunctionalityMode::Flight), Ok(()));
        assert_eq!(sim.functionality_mode(), FunctionalityMode::Flight);
        assert_eq!(serial.written(), "AT+CFUN=4\r\n");
    }

    #[test]
    fn pin_wait_spans_windows() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+CPIN: READY\r\n");
        serial.inject_later(30, b"\r\nOK\r\n");
        assert!(sim.pin_is_ready());
    }

    #[test]
    fn pin_rejected() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+CME ERROR: 16\r\n");
        assert_eq!(sim.set_pin("0000"), Err(Error::Protocol));
        assert_eq!(serial.written(), "AT+CPIN=0000\r\n");
    }

    #[test]
    fn pin_wait_is_bounded() {
        let (mut sim, _serial) = sim();
        assert_eq!(sim.set_pin("1234"), Err(Error::Timeout));
        assert!(!sim.pin_is_ready());
    }

    #[test]
    fn operator_name() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+COPS: 0,0,\"AT&T\"\r\n\r\nOK\r\n");
        assert_eq!(sim.operator(), "AT&T");
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.operator(), "Unknown");
    }

    #[test]
    fn operator_falls_back_to_next_window() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+COPS: 0\r\n");
        serial.inject_later(10, b"\r\nOK\r\n");
        assert_eq!(sim.operator(), "\r\nOK\r\n");
    }

    #[test]
    fn registration() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+CREG: 1,1\r\n\r\nOK\r\n");
        assert_eq!(sim.registration_status(), RegistrationStatus::RegisteredHome);
        assert_eq!(sim.registration_status(), RegistrationStatus::Unknown);
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.register_to_network(), Ok(()));
    }

    #[test]
    fn location_is_stored() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+CIPGSMLOC: 0,-58.123,-34.456,2024/01/15,10:20:30\r\n\r\nOK\r\n");
        assert_eq!(sim.calculate_location(), Ok(()));
        assert_eq!(sim.location_code(), "0");
        assert_eq!(sim.longitude(), "-58.123");
        assert_eq!(sim.latitude(), "-34.456");

        serial.reply(0, b"\r\nERROR\r\n");
        assert_eq!(sim.calculate_location(), Err(Error::Protocol));
        // прежние координаты остаются
        assert_eq!(sim.longitude(), "-58.123");
    }

    #[test]
    fn call_control() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+CPAS: 3\r\n\r\nOK\r\n");
        assert_eq!(sim.call_status(), CallStatus::Ringing);
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.answer(), Ok(()));
        assert_eq!(sim.dial("+79850000000"), Ok(()));
        serial.reply(0, b"\r\nOK\r\n");
        serial.reply(0, b"\r\nERROR\r\n");
        assert_eq!(sim.hang_up(), Ok(()));
        assert_eq!(sim.hang_up(), Err(Error::Protocol));
        assert_eq!(
            serial.written(),
            "AT+CPAS\r\nATA\r\nATD+79850000000;\r\nATH\r\nATH\r\n"
        );
    }

    #[test]
    fn signal_values() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\n+CSQ: 14,0\r\n\r\nOK\r\n");
        let q = sim.signal_quality_values().unwrap();
        assert_eq!(q.rssi, 14);
    }

    #[test]
    fn clock_retries_once() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"\r\nERROR\r\n");
        serial.reply(0, b"\r\n+CCLK: \"24/03/07,21:05:09+12\"\r\n\r\nOK\r\n");
        let clock = sim.read_module_clock().unwrap();
        assert_eq!((clock.year, clock.month, clock.day), (24, 3, 7));
        assert_eq!(serial.written(), "AT+CCLK?\r\nAT+CCLK?\r\n");
    }

    #[test]
    fn clock_sync_from_network() {
        let (mut sim, serial) = sim();
        // SAPBR x4, CIPGSMLOC, SAPBR=0, CCLK
        for _ in 0..4 {
            serial.reply(0, b"\r\nOK\r\n");
        }
        serial.reply(0, b"\r\n+CIPGSMLOC: 0,2024/01/15,22:20:30\r\n\r\nOK\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.sync_module_clock_from_network(3), Ok(()));
        assert!(serial
            .written()
            .ends_with("AT+SAPBR=0,1\r\nAT+CCLK=\"24/01/16,01:20:30+12\"\r\n"));
        assert!(serial.written().contains("AT+SAPBR=3,1,\"APN\",\"internet\"\r\n"));
    }

    #[test]
    fn clock_sync_closes_bearer_on_failure() {
        let (mut sim, serial) = sim();
        for _ in 0..4 {
            serial.reply(0, b"\r\nOK\r\n");
        }
        serial.reply(0, b"\r\nERROR\r\n");
        serial.reply(0, b"\r\nOK\r\n");
        assert_eq!(sim.sync_module_clock_from_network(-2), Err(Error::Protocol));
        assert!(serial.written().ends_with("AT+SAPBR=0,1\r\n"));
    }

    #[test]
    fn soft_reset_waits_for_sms_ready() {
        let (mut sim, serial) = sim();
        serial.reply(0, b"");
        serial.reply(0, b"\r\nOK\r\n");
        serial.inject_later(20, b"\r\nCall Ready\r\n\r\nSMS Ready\r\n");
        assert_eq!(sim.reset(), Ok(()));
        assert!(serial.written().starts_with("AT+CFUN=1,1\r\nAT\r\n"));
    }
}
