use std::{fmt, str::FromStr};

use bitcoin::{
    Address, PubkeyHash, Script, ScriptHash, address::NetworkUnchecked, hashes::Hash,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use wallet_symphony_macros::{Decode, Encode};

use crate::{
    DecodingError, DecodingResult,
    error::ValidationError,
    storage::encdec::{Decode, Encode, decode::malformed_input},
};

pub type TxHash = [u8; 32];
pub type Hash160 = [u8; 20];

/// Opaque 32 byte wallet handle, written as 64 hex characters at the edges
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletId(pub [u8; 32]);

impl WalletId {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for WalletId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];

        hex::decode_to_slice(s, &mut bytes)
            .map_err(|_| ValidationError::InvalidWalletId(s.to_string()))?;

        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for WalletId {
    type Error = ValidationError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| ValidationError::InvalidWalletId(hex::encode(bytes)))
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletId({self})")
    }
}

impl Serialize for WalletId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WalletId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Closed set of address kinds the index understands
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressType {
    PubKeyHash,
    ScriptHash,
}

impl AddressType {
    pub fn tag(&self) -> u8 {
        match self {
            Self::PubKeyHash => 0,
            Self::ScriptHash => 1,
        }
    }
}

impl TryFrom<u8> for AddressType {
    type Error = DecodingError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Self::PubKeyHash),
            1 => Ok(Self::ScriptHash),
            other => Err(DecodingError::UnknownAddressType(other)),
        }
    }
}

impl Encode for AddressType {
    fn encode(&self) -> Vec<u8> {
        vec![self.tag()]
    }
}

impl Decode for AddressType {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        let (tag, rest) = u8::decode(bytes)?;

        Ok((AddressType::try_from(tag)?, rest))
    }
}

/// An address reduced to what the index stores: type tag and hash160
#[derive(Encode, Decode, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct AddressKey {
    pub kind: AddressType,
    pub hash160: Hash160,
}

impl AddressKey {
    /// Recognise a P2PKH or P2SH output script, other scripts are not indexed
    pub fn from_script(script: &Script) -> Option<Self> {
        let bytes = script.as_bytes();

        if script.is_p2pkh() {
            // OP_DUP OP_HASH160 <20> ... OP_EQUALVERIFY OP_CHECKSIG
            Some(Self {
                kind: AddressType::PubKeyHash,
                hash160: bytes[3..23].try_into().ok()?,
            })
        } else if script.is_p2sh() {
            // OP_HASH160 <20> ... OP_EQUAL
            Some(Self {
                kind: AddressType::ScriptHash,
                hash160: bytes[2..22].try_into().ok()?,
            })
        } else {
            None
        }
    }

    pub fn from_address(address: &Address) -> Result<Self, ValidationError> {
        Self::from_script(&address.script_pubkey())
            .ok_or_else(|| ValidationError::UnsupportedAddress(address.to_string()))
    }

    /// Parse an address string, requiring it to belong to `network`
    pub fn parse(address: &str, network: bitcoin::Network) -> Result<Self, ValidationError> {
        let unchecked = Address::<NetworkUnchecked>::from_str(address)
            .map_err(|_| ValidationError::InvalidAddress(address.to_string()))?;

        let checked = unchecked
            .require_network(network)
            .map_err(|_| ValidationError::NetworkMismatch(address.to_string()))?;

        Self::from_address(&checked)
    }

    pub fn to_address(&self, network: bitcoin::Network) -> Address {
        match self.kind {
            AddressType::PubKeyHash => {
                Address::p2pkh(PubkeyHash::from_byte_array(self.hash160), network)
            }
            AddressType::ScriptHash => {
                Address::p2sh_from_hash(ScriptHash::from_byte_array(self.hash160), network)
            }
        }
    }

    /// Bytes fed to address membership filters
    pub fn filter_bytes(&self) -> [u8; 21] {
        let mut out = [0u8; 21];
        out[0] = self.kind.tag();
        out[1..].copy_from_slice(&self.hash160);
        out
    }
}

/// Set of wallet ids stored as a bare concatenation of 32 byte ids, in insertion order
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct WalletIds(pub Vec<WalletId>);

impl WalletIds {
    /// Append `id` unless already present, returning whether it was added
    pub fn insert(&mut self, id: WalletId) -> bool {
        if self.0.contains(&id) {
            false
        } else {
            self.0.push(id);
            true
        }
    }

    pub fn remove(&mut self, id: &WalletId) {
        self.0.retain(|x| x != id)
    }

    pub fn contains(&self, id: &WalletId) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WalletId> {
        self.0.iter()
    }
}

impl Encode for WalletIds {
    fn encode(&self) -> Vec<u8> {
        self.0.iter().flat_map(|id| id.0).collect()
    }
}

impl Decode for WalletIds {
    fn decode(bytes: &[u8]) -> DecodingResult<'_, Self> {
        if bytes.len() % 32 != 0 {
            return Err(malformed_input("wallet id list not a multiple of 32", bytes));
        }

        let ids = bytes
            .chunks_exact(32)
            .filter_map(|chunk| chunk.try_into().ok().map(WalletId))
            .collect();

        Ok((WalletIds(ids), &[]))
    }
}
