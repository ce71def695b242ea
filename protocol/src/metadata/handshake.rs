//! BitTorrent handshake and BEP-10 extended handshake payloads.

use super::error::FetchError;
use crate::bencode::{self, Value};
use crate::primitives::{
    handshake_preamble, InfoHash, EXTENSION_BIT, EXTENSION_BYTE, ID_LEN, PREAMBLE_LEN,
    PROTOCOL_NAME,
};

/// Length of the full handshake: preamble, info-hash, peer id.
pub const HANDSHAKE_LEN: usize = PREAMBLE_LEN + ID_LEN + ID_LEN;
/// Extended message sub-id we advertise for `ut_metadata`, and so the sub-id
/// peers use when sending metadata to us.
pub const LOCAL_UT_METADATA_ID: u8 = 1;

/// Builds the 68-byte handshake for `info_hash`.
pub fn build_handshake(info_hash: &InfoHash, peer_id: &[u8; ID_LEN]) -> [u8; HANDSHAKE_LEN] {
    let mut handshake = [0u8; HANDSHAKE_LEN];
    handshake[..PREAMBLE_LEN].copy_from_slice(&handshake_preamble());
    handshake[PREAMBLE_LEN..PREAMBLE_LEN + ID_LEN].copy_from_slice(info_hash.as_bytes());
    handshake[PREAMBLE_LEN + ID_LEN..].copy_from_slice(peer_id);
    handshake
}

/// Validates the peer's handshake against the one we sent.
///
/// # Errors
///
/// * [`FetchError::NotBitTorrent`] - Protocol name prefix differs.
/// * [`FetchError::ExtensionsUnsupported`] - Extension bit is clear.
/// * [`FetchError::InfoHashMismatch`] - Echoed info-hash differs.
pub fn verify_handshake(
    response: &[u8; HANDSHAKE_LEN],
    info_hash: &InfoHash,
) -> Result<(), FetchError> {
    let name_end = 1 + PROTOCOL_NAME.len();
    if response[..name_end] != handshake_preamble()[..name_end] {
        return Err(FetchError::NotBitTorrent);
    }
    if response[name_end + EXTENSION_BYTE] & EXTENSION_BIT == 0 {
        return Err(FetchError::ExtensionsUnsupported);
    }
    if &response[PREAMBLE_LEN..PREAMBLE_LEN + ID_LEN] != info_hash.as_bytes() {
        return Err(FetchError::InfoHashMismatch);
    }
    Ok(())
}

/// Our extended handshake payload: `{"m": {"ut_metadata": 1}}`.
pub fn extended_handshake() -> Vec<u8> {
    bencode::encode(&Value::dict([(
        "m",
        Value::dict([("ut_metadata", Value::Integer(LOCAL_UT_METADATA_ID.into()))]),
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_hash() -> InfoHash {
        InfoHash::from([0x11; ID_LEN])
    }

    #[test]
    fn test_handshake_layout() {
        let handshake = build_handshake(&info_hash(), &[0x22; ID_LEN]);
        assert_eq!(handshake.len(), 68);
        assert_eq!(handshake[0], 19);
        assert_eq!(&handshake[1..20], b"BitTorrent protocol");
        assert_eq!(handshake[25], 0x10);
        assert_eq!(&handshake[28..48], &[0x11; 20]);
        assert_eq!(&handshake[48..], &[0x22; 20]);
    }

    #[test]
    fn test_verify_handshake() {
        let ok = build_handshake(&info_hash(), &[0x33; ID_LEN]);
        assert!(verify_handshake(&ok, &info_hash()).is_ok());

        let mut wrong_name = ok;
        wrong_name[1] = b'b';
        assert!(matches!(
            verify_handshake(&wrong_name, &info_hash()),
            Err(FetchError::NotBitTorrent)
        ));

        let mut no_extensions = ok;
        no_extensions[25] = 0;
        assert!(matches!(
            verify_handshake(&no_extensions, &info_hash()),
            Err(FetchError::ExtensionsUnsupported)
        ));

        let other = build_handshake(&InfoHash::from([0x44; ID_LEN]), &[0x33; ID_LEN]);
        assert!(matches!(
            verify_handshake(&other, &info_hash()),
            Err(FetchError::InfoHashMismatch)
        ));
    }

    #[test]
    fn test_extended_handshake_payload() {
        assert_eq!(extended_handshake(), b"d1:md11:ut_metadatai1eee".to_vec());
    }
}
