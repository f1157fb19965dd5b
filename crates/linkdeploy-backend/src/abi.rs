//! Minimal Solidity ABI encoding for address-only calls.
//!
//! Every argument the orchestrator passes is a component address, so the
//! encoder only handles static `address` words: 12 zero bytes followed by
//! the 20 address bytes.

use alloy_primitives::{keccak256, Address as EvmAddress};

use crate::backend_traits::{Address, BackendResult, Bundle};
use crate::error::BackendError;

const WORD: usize = 32;

/// Parse a 20-byte hex address.
pub fn parse_address(address: &Address) -> BackendResult<EvmAddress> {
    let raw = address.as_str();
    raw.parse::<EvmAddress>()
        .map_err(|e| BackendError::Rejected(format!("invalid address {raw}: {e}")))
}

/// ABI-encode a list of addresses as consecutive 32-byte words.
pub fn encode_addresses(args: &[Address]) -> BackendResult<Vec<u8>> {
    let mut out = Vec::with_capacity(args.len() * WORD);
    for arg in args {
        out.extend_from_slice(parse_address(arg)?.into_word().as_slice());
    }
    Ok(out)
}

/// Canonical signature for a method taking `arity` addresses,
/// e.g. `updateEventManager(address)`.
pub fn signature(method: &str, arity: usize) -> String {
    let params = vec!["address"; arity].join(",");
    format!("{method}({params})")
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(method: &str, arity: usize) -> [u8; 4] {
    let hash = keccak256(signature(method, arity).as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash[..4]);
    out
}

/// Creation payload: bytecode followed by encoded constructor arguments.
pub fn deploy_data(bundle: &Bundle, args: &[Address]) -> BackendResult<Vec<u8>> {
    let mut data = bundle.0.clone();
    data.extend(encode_addresses(args)?);
    Ok(data)
}

/// Call payload: selector followed by encoded arguments.
pub fn call_data(method: &str, args: &[Address]) -> BackendResult<Vec<u8>> {
    let mut data = selector(method, args.len()).to_vec();
    data.extend(encode_addresses(args)?);
    Ok(data)
}
