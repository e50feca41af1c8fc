use core::str::Utf8Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // invalid UTF-8.
    EncodingError,
    FmtError,
    /// ничего не пришло до истечения таймаута
    Timeout,
    /// модуль ответил маркером ошибки (ERROR, +CMS ERROR, ...)
    Protocol,
    /// в ответе нет ожидаемого заголовка или поля
    Malformed,
    /// SMS is already being submitted
    Busy,
    /// PDU is too short, odd-sized or not hex
    BadInput,
    /// final window after Ctrl+Z carried no +CMGS
    NoConfirmation,
    SerialError,
    /// value does not fit its fixed-size buffer
    Overflow,
}

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Error::EncodingError
    }
}

impl From<core::fmt::Error> for Error {
    fn from(_: core::fmt::Error) -> Self {
        Error::FmtError
    }
}
