//! Настройки драйвера SIM800
//!
//! Everything here is plain data: the serial port itself is opened and
//! clocked by the application, the driver only needs to know the rate it
//! should pin the modem to and how long a timer tick is.

/// короткий таймаут ответа по умолчанию
pub const DEFAULT_TIMEOUT_MS: u32 = 1_500;

/// Скорости, которые понимает AT+IPR
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baud {
    B300,
    B600,
    B1200,
    B2400,
    B4800,
    B9600,
    B14400,
    B19200,
    B28800,
    B31250,
    B38400,
    B57600,
    B115200,
}

impl Baud {
    pub const ALL: [Baud; 13] = [
        Baud::B300,
        Baud::B600,
        Baud::B1200,
        Baud::B2400,
        Baud::B4800,
        Baud::B9600,
        Baud::B14400,
        Baud::B19200,
        Baud::B28800,
        Baud::B31250,
        Baud::B38400,
        Baud::B57600,
        Baud::B115200,
    ];

    pub fn bps(self) -> u32 {
        match self {
            Baud::B300 => 300,
            Baud::B600 => 600,
            Baud::B1200 => 1_200,
            Baud::B2400 => 2_400,
            Baud::B4800 => 4_800,
            Baud::B9600 => 9_600,
            Baud::B14400 => 14_400,
            Baud::B19200 => 19_200,
            Baud::B28800 => 28_800,
            Baud::B31250 => 31_250,
            Baud::B38400 => 38_400,
            Baud::B57600 => 57_600,
            Baud::B115200 => 115_200,
        }
    }

    /// `None` for rates outside the supported set
    pub fn from_bps(bps: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.bps() == bps)
    }
}

impl Default for Baud {
    fn default() -> Self {
        Baud::B9600
    }
}

/// Таймауты отдельных операций, мс
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub default_ms: u32,
    /// AT+CPIN, can take up to 5 seconds
    pub pin_ms: u32,
    pub registration_ms: u32,
    /// AT+COPS=? scans the air, up to 45 seconds
    pub operators_list_ms: u32,
    pub location_ms: u32,
    /// prompt and payload steps of AT+CMGS
    pub sms_step_ms: u32,
    /// final +CMGS after Ctrl+Z, up to 60 seconds
    pub sms_final_ms: u32,
    pub sms_read_ms: u32,
    pub delete_all_ms: u32,
    /// first look for pending URCs
    pub urc_probe_ms: u32,
    /// extra window once something arrived
    pub urc_settle_ms: u32,
    pub bearer_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            default_ms: DEFAULT_TIMEOUT_MS,
            pin_ms: 10_000,
            registration_ms: 5_000,
            operators_list_ms: 45_000,
            location_ms: 20_000,
            sms_step_ms: 100,
            sms_final_ms: 60_000,
            sms_read_ms: 10_000,
            delete_all_ms: 25_000,
            urc_probe_ms: 100,
            urc_settle_ms: DEFAULT_TIMEOUT_MS,
            bearer_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sim800Config {
    pub baud: Baud,
    /// период таймера, переданного драйверу
    pub tick_ms: u32,
    /// ticks of silence that end a read window once data started flowing
    pub idle_ticks: u32,
    pub timeouts: Timeouts,
    /// windows spent waiting for OK/ERROR before giving up
    pub final_attempts: u8,
    /// attempts for the AT handshake
    pub handshake_attempts: u8,
    /// APN for the GPRS bearer profile
    pub apn: &'static str,
}

/// Переводит миллисекунды в тики таймера с округлением вверх, не меньше одного
pub fn ms_to_ticks(ms: u32, tick_ms: u32) -> u32 {
    let tick = tick_ms.max(1);
    (ms / tick + u32::from(ms % tick != 0)).max(1)
}

impl Sim800Config {
    pub fn ticks(&self, ms: u32) -> u32 {
        ms_to_ticks(ms, self.tick_ms)
    }
}

impl Default for Sim800Config {
    fn default() -> Self {
        Sim800Config {
            baud: Baud::default(),
            tick_ms: 10,
            idle_ticks: 2,
            timeouts: Timeouts::default(),
            final_attempts: 3,
            handshake_attempts: 10,
            apn: "internet",
        }
    }
}
