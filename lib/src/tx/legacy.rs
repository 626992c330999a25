// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Legacy (trusted input) transaction hashing

use log::debug;

use hw_signer_apdu::tx::{HashInputStartReq, InputRef, StartMode};

use super::{SignRequest, TrustedInput};
use crate::{handle::DeviceHandle, transport::Exchange, Error};

/// Hash the untrusted transaction for signing input `index`
///
/// All inputs are provided with only input `index` exposing its spend script,
/// hashing starts a new transaction for the first input and continues otherwise.
pub(crate) fn start_input<T: Exchange>(
    h: &mut DeviceHandle<T>,
    req: &SignRequest,
    trusted: &[TrustedInput],
    index: usize,
) -> Result<(), Error> {
    let mode = match index {
        0 => StartMode::NewLegacy,
        _ => StartMode::Continue,
    };

    debug!("Starting untrusted tx for input {} ({})", index, mode);

    h.request(&HashInputStartReq::init(
        mode,
        req.version as u32,
        req.inputs.len(),
    ))?;

    for (i, (input, t)) in req.inputs.iter().zip(trusted).enumerate() {
        let script = match i == index {
            true => input.script_pubkey.as_bytes(),
            false => &[][..],
        };

        h.request(&HashInputStartReq::input(
            InputRef::Trusted(t.as_bytes().to_vec()),
            script,
            req.sequence(),
        ))?;
    }

    Ok(())
}
