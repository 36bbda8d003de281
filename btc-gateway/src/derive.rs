//! Deterministic receiving-address derivation
//!
//! Pure BIP84-style derivation from an account extended public key:
//! external chain `0`, then the supplied receive index, emitted as a
//! P2WPKH address. No private-key material is ever involved, so the
//! same (key, index) always yields the same address and the function
//! can be checked against published test vectors.
//!
//! SLIP-132 SegWit prefixes (`zpub`/`vpub`, `ypub`/`upub`) are
//! normalized to the standard `xpub`/`tpub` encoding by swapping the
//! base58check version bytes before BIP32 parsing. Any other prefix is
//! a fatal [`Error::UnsupportedKeyFormat`].

use crate::error::{Error, Result};
use bitcoin::base58;
use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::Secp256k1;
use bitcoin::{Address, Network, PublicKey};
use std::str::FromStr;

/// Version bytes of the standard mainnet extended public key encoding
const VERSION_XPUB: [u8; 4] = [0x04, 0x88, 0xB2, 0x1E];

/// Version bytes of the standard testnet extended public key encoding
const VERSION_TPUB: [u8; 4] = [0x04, 0x35, 0x87, 0xCF];

/// Rewrite a SegWit-prefixed extended key to the standard encoding
///
/// `xpub`/`tpub` pass through unchanged.
pub fn normalize_extended_key(key: &str) -> Result<String> {
    let prefix = key
        .get(..4)
        .ok_or_else(|| Error::UnsupportedKeyFormat(key.to_string()))?;

    let target = match prefix {
        "xpub" | "tpub" => return Ok(key.to_string()),
        "zpub" | "ypub" => VERSION_XPUB,
        "vpub" | "upub" => VERSION_TPUB,
        _ => return Err(Error::UnsupportedKeyFormat(prefix.to_string())),
    };

    let mut data = base58::decode_check(key).map_err(|e| Error::Derivation(e.to_string()))?;
    if data.len() < 4 {
        return Err(Error::UnsupportedKeyFormat(key.to_string()));
    }
    data[..4].copy_from_slice(&target);
    Ok(base58::encode_check(&data))
}

/// Derive the P2WPKH receiving address at `index`
pub fn derive_address(extended_key: &str, index: u32, network: Network) -> Result<Address> {
    let normalized = normalize_extended_key(extended_key)?;
    let xpub = Xpub::from_str(&normalized).map_err(|e| Error::Derivation(e.to_string()))?;

    let secp = Secp256k1::new();
    let external_chain =
        ChildNumber::from_normal_idx(0).map_err(|e| Error::Derivation(e.to_string()))?;
    let receive_index =
        ChildNumber::from_normal_idx(index).map_err(|e| Error::Derivation(e.to_string()))?;

    let derived = xpub
        .derive_pub(&secp, &[external_chain, receive_index])
        .map_err(|e| Error::Derivation(e.to_string()))?;

    let compressed = CompressedPublicKey::try_from(PublicKey::new(derived.public_key))
        .map_err(|e| Error::Derivation(e.to_string()))?;

    Ok(Address::p2wpkh(&compressed, network))
}
