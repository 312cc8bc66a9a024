//! Hex string helpers for seeds and digests.

/// Converts a hex string to its bytes. Invalid input yields an empty vector.
pub fn string_to_u8_array(hex: &str) -> Vec<u8> {
    hex::decode(hex).unwrap_or_default()
}

/// Converts bytes to a lowercase hex string.
pub fn u8_array_to_string(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        let bytes = vec![0x8a, 0x48, 0xe5, 0xf9, 0x00, 0xff];
        assert_eq!(string_to_u8_array(&u8_array_to_string(&bytes)), bytes);
    }

    #[test]
    fn invalid_hex_is_empty() {
        assert!(string_to_u8_array("zz").is_empty());
        assert!(string_to_u8_array("abc").is_empty());
    }
}
