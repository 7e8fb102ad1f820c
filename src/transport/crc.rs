use crate::error::{Result, SensorError};
use crc::{Crc, CRC_16_MODBUS};

/// CRC16 with polynomial 0xA001 (reflected 0x8005) and init 0xFFFF
pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// CRC16 over the concatenation of `parts`
pub fn crc16(parts: &[&[u8]]) -> u16 {
    let mut digest = CRC16.digest();
    for part in parts {
        digest.update(part);
    }
    digest.finalize()
}

/// Checks a received CRC against one computed over `header` then `payload`
pub fn crc_check(header: &[u8], payload: &[u8], expected: u16) -> Result<()> {
    if crc16(&[header, payload]) != expected {
        return Err(SensorError::Crc { context: None });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16(&[b"123456789"]), 0x4B37);
    }

    #[test]
    fn split_input_matches_contiguous() {
        assert_eq!(crc16(&[b"1234", b"56789"]), crc16(&[b"123456789"]));
    }

    #[test]
    fn computed_crc_passes_check() {
        let header = [0x0B, 0x00, 0x01, 0x00, 0x00, 0x02];
        let payload = [0xAA, 0xBB];
        let crc = crc16(&[&header, &payload]);
        assert!(crc_check(&header, &payload, crc).is_ok());
    }

    #[test]
    fn any_single_bit_flip_fails() {
        let header = [0x02, 0x00, 0x01, 0x00, 0x00, 0x03];
        let payload = [0x10, 0x20, 0x30];
        let crc = crc16(&[&header, &payload]);

        for byte in 0..header.len() + payload.len() {
            for bit in 0..8 {
                let mut header = header;
                let mut payload = payload;
                if byte < header.len() {
                    header[byte] ^= 1 << bit;
                } else {
                    payload[byte - header.len()] ^= 1 << bit;
                }
                assert!(
                    crc_check(&header, &payload, crc).is_err(),
                    "flip of bit {bit} in byte {byte} went unnoticed"
                );
            }
        }
    }
}
