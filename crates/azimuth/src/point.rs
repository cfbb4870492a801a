//! Points: the derived per-identity state.

use serde::{Serialize, Serializer};
use std::fmt;

/// 32-bit Azimuth identity number.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct AzimuthNumber(pub u32);

/// Tier of a point, fixed by the magnitude of its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Galaxy,
    Star,
    Planet,
}

impl AzimuthNumber {
    pub fn tier(self) -> Tier {
        match self.0 {
            n if n < 0x100 => Tier::Galaxy,
            n if n < 0x10000 => Tier::Star,
            _ => Tier::Planet,
        }
    }

    /// Sponsor assigned on first activation: a star's parent galaxy, a planet's parent star.
    /// Galaxies sponsor themselves.
    pub fn original_sponsor(self) -> AzimuthNumber {
        match self.tier() {
            Tier::Galaxy | Tier::Star => AzimuthNumber(self.0 % 0x100),
            Tier::Planet => AzimuthNumber(self.0 % 0x10000),
        }
    }
}

impl fmt::Display for AzimuthNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// One row of the `points` table. Fields never written read back as zero/false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Point {
    pub azimuth_number: AzimuthNumber,
    #[serde(serialize_with = "as_hex")]
    pub owner_address: [u8; 20],
    #[serde(serialize_with = "as_hex")]
    pub spawn_address: [u8; 20],
    #[serde(serialize_with = "as_hex")]
    pub transfer_address: [u8; 20],
    #[serde(serialize_with = "as_hex")]
    pub management_address: [u8; 20],
    #[serde(serialize_with = "as_hex")]
    pub voting_address: [u8; 20],

    pub is_active: bool,
    pub has_sponsor: bool,
    pub sponsor: AzimuthNumber,
    pub is_escape_requested: bool,
    pub escape_requested_to: AzimuthNumber,

    pub rift: u32,

    #[serde(serialize_with = "as_hex")]
    pub encryption_key: [u8; 32],
    #[serde(serialize_with = "as_hex")]
    pub auth_key: [u8; 32],
    pub crypto_suite_version: u32,
    pub life: u32,
}

impl Point {
    /// A freshly created point: every field at its default.
    pub fn new(azimuth_number: AzimuthNumber) -> Self {
        Self {
            azimuth_number,
            ..Default::default()
        }
    }

    pub fn tier(&self) -> Tier {
        self.azimuth_number.tier()
    }
}

fn as_hex<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format!("0x{}", hex::encode(bytes)))
}
