//! Typed Glyph token descriptor, decoded from v1 or v2 CBOR metadata.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TokenType {
    Fungible,
    NonFungible,
    DMint,
    Container,
    Dat,
}

impl TokenType {
    /// v2 token type derived from the protocol-ID set per the table in
    /// §4.3: 1→FT, 2→NFT, 4→dMint, 7→Container. When more than one
    /// recognised id is present, resolution follows priority order
    /// (dMint > Container > NFT > FT), not numeric or input order, since a
    /// dMint descriptor also declares the FT protocol it mints into.
    pub fn from_protocols(protocols: &[u64]) -> Option<TokenType> {
        const PRIORITY: [(u64, TokenType); 4] = [
            (4, TokenType::DMint),
            (7, TokenType::Container),
            (2, TokenType::NonFungible),
            (1, TokenType::Fungible),
        ];
        PRIORITY
            .iter()
            .find(|(id, _)| protocols.contains(id))
            .map(|(_, t)| *t)
    }
}

#[derive(Debug, Clone)]
pub struct TokenDescriptor {
    pub token_type: TokenType,
    pub ref_: Option<String>,
    pub name: Option<String>,
    pub ticker: Option<String>,
    pub decimals: Option<u32>,
    pub supply: Option<u64>,
    pub protocols: Vec<u64>,
    pub token_id: Option<String>,
    pub contract_ref: Option<String>,
    pub algorithm: Option<u64>,
    pub difficulty: Option<u64>,
    pub reward: Option<u64>,
    pub icon_ref: Option<String>,
    /// Unrecognized map entries, preserved opaque rather than discarded.
    pub extra: BTreeMap<String, Vec<u8>>,
}
