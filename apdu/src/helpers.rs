// Copyright (c) 2022-2023 The MobileCoin Foundation

//! Encoding helpers shared between request types

use byteorder::{ByteOrder, BigEndian, LittleEndian};

use crate::ApduError;

/// Maximum BIP32 path depth accepted by the device
pub(crate) const MAX_PATH_DEPTH: usize = 10;

/// encdec helper module for BIP32 paths (`count | index_0 BE | .. | index_n BE`)
pub(crate) mod path {
    use super::*;

    pub fn enc(p: &[u32], buff: &mut [u8]) -> Result<usize, ApduError> {
        let n = enc_len(p)?;
        if buff.len() < n {
            return Err(ApduError::InvalidLength);
        }

        buff[0] = p.len() as u8;
        for (i, v) in p.iter().enumerate() {
            BigEndian::write_u32(&mut buff[1 + i * 4..], *v);
        }

        Ok(n)
    }

    pub fn enc_len(p: &[u32]) -> Result<usize, ApduError> {
        if p.is_empty() || p.len() > MAX_PATH_DEPTH {
            return Err(ApduError::InvalidPath(p.len()));
        }
        Ok(1 + p.len() * 4)
    }
}

/// Compute the encoded length of a bitcoin compact size integer
pub(crate) fn varint_len(v: u64) -> usize {
    match v {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Write a bitcoin compact size integer
pub(crate) fn write_varint(v: u64, buff: &mut [u8]) -> Result<usize, ApduError> {
    let n = varint_len(v);
    if buff.len() < n {
        return Err(ApduError::InvalidLength);
    }

    match n {
        1 => buff[0] = v as u8,
        3 => {
            buff[0] = 0xfd;
            LittleEndian::write_u16(&mut buff[1..], v as u16);
        }
        5 => {
            buff[0] = 0xfe;
            LittleEndian::write_u32(&mut buff[1..], v as u32);
        }
        _ => {
            buff[0] = 0xff;
            LittleEndian::write_u64(&mut buff[1..], v);
        }
    }

    Ok(n)
}

/// Write a byte slice, checking available space
pub(crate) fn write_slice(d: &[u8], buff: &mut [u8]) -> Result<usize, ApduError> {
    if buff.len() < d.len() {
        return Err(ApduError::InvalidLength);
    }
    buff[..d.len()].copy_from_slice(d);
    Ok(d.len())
}

/// Write a little-endian u32
pub(crate) fn write_u32_le(v: u32, buff: &mut [u8]) -> Result<usize, ApduError> {
    if buff.len() < 4 {
        return Err(ApduError::InvalidLength);
    }
    LittleEndian::write_u32(buff, v);
    Ok(4)
}

/// Write a big-endian u32
pub(crate) fn write_u32_be(v: u32, buff: &mut [u8]) -> Result<usize, ApduError> {
    if buff.len() < 4 {
        return Err(ApduError::InvalidLength);
    }
    BigEndian::write_u32(buff, v);
    Ok(4)
}

#[cfg(test)]
mod test {
    use bitcoin::consensus::encode::VarInt;

    use super::*;

    #[test]
    fn varint_encoding() {
        let tests: &[(u64, &[u8])] = &[
            (0, &[0x00]),
            (0xfc, &[0xfc]),
            (0xfd, &[0xfd, 0xfd, 0x00]),
            (0x1234, &[0xfd, 0x34, 0x12]),
            (0x0001_0000, &[0xfe, 0x00, 0x00, 0x01, 0x00]),
        ];

        for (v, expected) in tests {
            let mut buff = [0u8; 9];
            let n = write_varint(*v, &mut buff).unwrap();
            assert_eq!(&buff[..n], *expected, "varint {v}");

            // Must match the consensus encoding
            assert_eq!(
                &buff[..n],
                &bitcoin::consensus::encode::serialize(&VarInt(*v))[..]
            );
        }
    }

    #[test]
    fn path_encoding() {
        let p = [0x8000_002c, 0x8000_0000, 0x8000_0000, 0, 5];
        let mut buff = [0u8; 64];

        let n = path::enc(&p, &mut buff).unwrap();
        assert_eq!(n, 21);
        assert_eq!(buff[0], 5);
        assert_eq!(&buff[1..5], &[0x80, 0x00, 0x00, 0x2c]);
        assert_eq!(&buff[17..21], &[0x00, 0x00, 0x00, 0x05]);

        assert_eq!(path::enc(&[], &mut buff), Err(ApduError::InvalidPath(0)));
    }
}
