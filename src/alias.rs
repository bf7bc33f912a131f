//! Operator supplied sensor names.
//!
//! `--alias a4:c1:38:00:11:22=Kitchen` is the command-line equivalent of
//! editing the name store by hand: aliases are written to the store at
//! startup and then resolved like any other entry.

use crate::mac_address::MacAddress;

/// A parsed alias mapping a MAC address to a human-readable name.
#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// The sensor address
    pub address: MacAddress,
    /// The human-readable name (e.g., "Sauna")
    pub name: String,
}

/// Parse an alias from a string in the format "MAC=NAME".
///
/// # Example
/// ```
/// use atc_listener::alias::parse_alias;
///
/// let alias = parse_alias("A4:C1:38:00:11:22=Kitchen").unwrap();
/// assert_eq!(alias.address.to_string(), "a4-c1-38-00-11-22");
/// assert_eq!(alias.name, "Kitchen");
/// ```
pub fn parse_alias(src: &str) -> Result<Alias, String> {
    let (address, name) = src
        .split_once('=')
        .ok_or_else(|| "invalid alias: expected format MAC=NAME".to_string())?;

    let address = address
        .parse::<MacAddress>()
        .map_err(|err| format!("invalid alias: {err}"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("invalid alias: name is empty".to_string());
    }

    Ok(Alias {
        address,
        name: name.to_string(),
    })
}
