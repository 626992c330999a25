// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Output finalisation

use bitcoin::consensus::encode::{serialize, VarInt};
use log::debug;

use hw_signer_apdu::tx::HashInputFinalizeReq;

use super::SignRequest;
use crate::{handle::DeviceHandle, key::path_indices, transport::Exchange, Error};

/// Serialise transaction outputs (`VARINT(count) | TX_OUT..`)
pub fn serialize_outputs(req: &SignRequest) -> Vec<u8> {
    let outputs = req.outputs();

    let mut d = serialize(&VarInt(outputs.len() as u64));
    for o in &outputs {
        d.extend_from_slice(&serialize(o));
    }

    d
}

/// Provide outputs to the device, uploading the change path first where `with_change` is set
pub(crate) fn finalize<T: Exchange>(
    h: &mut DeviceHandle<T>,
    req: &SignRequest,
    with_change: bool,
) -> Result<(), Error> {
    if let (true, Some(c)) = (with_change, &req.change) {
        debug!("Providing change path: {}", c.path);

        h.request(&HashInputFinalizeReq::ChangePath(path_indices(&c.path)))?;
    }

    let d = serialize_outputs(req);

    debug!("Finalizing {} bytes of outputs", d.len());

    for c in HashInputFinalizeReq::output_chunks(&d) {
        h.request(&c)?;
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use bitcoin::{ScriptBuf, TxOut};

    use super::*;

    #[test]
    fn output_serialisation() {
        let req = SignRequest {
            recipients: vec![TxOut {
                value: 0x0102,
                script_pubkey: ScriptBuf::from(vec![0xaa; 3]),
            }],
            ..Default::default()
        };

        assert_eq!(
            serialize_outputs(&req),
            vec![0x01, 0x02, 0x01, 0, 0, 0, 0, 0, 0, 0x03, 0xaa, 0xaa, 0xaa]
        );
    }
}
