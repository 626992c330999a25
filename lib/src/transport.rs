// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Blocking transport abstractions for hiding underlying transport types
//!
//! Transports are driven from dedicated blocking workers, see [crate::device].

use log::trace;

use hw_signer_apdu::{
    framing::{frame, to_report, Reassembler, CHUNK_SIZE},
    trezor::wire::{encode_reports, MessageReader, REPORT_SIZE},
};

use crate::Error;

/// Raw APDU response, payload and status word
#[derive(Clone, PartialEq, Debug)]
pub struct Response {
    pub data: Vec<u8>,
    pub status: u16,
}

/// Blocking APDU exchange, implemented by Ledger transports
pub trait Exchange {
    /// Send an encoded APDU command and await the response
    fn exchange(&mut self, command: &[u8]) -> Result<Response, Error>;
}

impl<E: Exchange + ?Sized> Exchange for Box<E> {
    fn exchange(&mut self, command: &[u8]) -> Result<Response, Error> {
        (**self).exchange(command)
    }
}

/// Blocking message exchange, implemented by Trezor transports
pub trait TrezorLink {
    /// Write a message with the provided type and protobuf payload
    fn write_message(&mut self, msg_type: u16, payload: &[u8]) -> Result<(), Error>;

    /// Read the next message from the device
    fn read_message(&mut self) -> Result<(u16, Vec<u8>), Error>;
}

impl<L: TrezorLink + ?Sized> TrezorLink for Box<L> {
    fn write_message(&mut self, msg_type: u16, payload: &[u8]) -> Result<(), Error> {
        (**self).write_message(msg_type, payload)
    }

    fn read_message(&mut self) -> Result<(u16, Vec<u8>), Error> {
        (**self).read_message()
    }
}

/// Raw HID report interface
pub trait ReportIo {
    /// Write a report (including the report ID prefix)
    fn write_report(&mut self, report: &[u8]) -> Result<(), Error>;

    /// Read a report, returning zero bytes on timeout
    fn read_report(&mut self, buff: &mut [u8], timeout_ms: i32) -> Result<usize, Error>;
}

#[cfg(feature = "transport_hid")]
impl ReportIo for hidapi::HidDevice {
    fn write_report(&mut self, report: &[u8]) -> Result<(), Error> {
        let n = self.write(report)?;
        if n < report.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "incomplete HID write",
            )));
        }
        Ok(())
    }

    fn read_report(&mut self, buff: &mut [u8], timeout_ms: i32) -> Result<usize, Error> {
        let n = self.read_timeout(buff, timeout_ms)?;
        Ok(n)
    }
}

/// Ledger HID transport, framing APDUs over a [ReportIo] implementation
pub struct LedgerHid<R: ReportIo> {
    io: R,
    timeout_ms: i32,
}

impl<R: ReportIo> LedgerHid<R> {
    /// Create a new transport with the provided per-report read timeout
    pub fn new(io: R, timeout_ms: u64) -> Self {
        Self {
            io,
            timeout_ms: timeout_ms.min(i32::MAX as u64) as i32,
        }
    }

    /// Fetch the underlying report interface
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: ReportIo> Exchange for LedgerHid<R> {
    fn exchange(&mut self, command: &[u8]) -> Result<Response, Error> {
        // Write framed command
        for c in frame(command)? {
            self.io.write_report(&to_report(&c))?;
        }

        // Read chunks until the response is complete
        let mut r = Reassembler::new();
        loop {
            let mut buff = [0u8; CHUNK_SIZE];

            let n = self.io.read_report(&mut buff, self.timeout_ms)?;
            if n == 0 {
                return Err(Error::Timeout);
            }

            trace!("hid read: {:02x?}", &buff[..n]);

            if r.push(&buff[..n])? {
                break;
            }
        }

        let (data, status) = r.finish()?;

        Ok(Response { data, status })
    }
}

/// Trezor HID transport, framing messages over a [ReportIo] implementation
pub struct TrezorHid<R: ReportIo> {
    io: R,
    timeout_ms: i32,
}

impl<R: ReportIo> TrezorHid<R> {
    pub fn new(io: R, timeout_ms: u64) -> Self {
        Self {
            io,
            timeout_ms: timeout_ms.min(i32::MAX as u64) as i32,
        }
    }
}

impl<R: ReportIo> TrezorLink for TrezorHid<R> {
    fn write_message(&mut self, msg_type: u16, payload: &[u8]) -> Result<(), Error> {
        for r in encode_reports(msg_type, payload)? {
            let mut report = [0u8; REPORT_SIZE + 1];
            report[1..].copy_from_slice(&r);

            self.io.write_report(&report)?;
        }
        Ok(())
    }

    fn read_message(&mut self) -> Result<(u16, Vec<u8>), Error> {
        let mut reader = MessageReader::new();

        loop {
            let mut buff = [0u8; REPORT_SIZE];

            let n = self.io.read_report(&mut buff, self.timeout_ms)?;
            if n == 0 {
                return Err(Error::Timeout);
            }

            if reader.push(&buff[..n])? {
                break;
            }
        }

        let m = reader.finish()?;
        Ok(m)
    }
}
