use crate::error::{Error, Result};
use crate::model::{Address, TxHash, TxReceipt};

/// Parse a `0x`-prefixed (or bare) 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<Address> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(digits)
        .map_err(|e| Error::BadRequest(format!("'{raw}' is not a hex address: {e}")))?;
    if bytes.len() != Address::len_bytes() {
        return Err(Error::BadRequest(format!(
            "'{raw}' is {} bytes long, expected {}",
            bytes.len(),
            Address::len_bytes()
        )));
    }
    Ok(Address::from_slice(&bytes))
}

pub fn receipt(tx_hash: TxHash) -> TxReceipt {
    TxReceipt { tx_hash }
}
