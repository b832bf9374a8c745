use crate::amounts::UnpaddedBytesAmount;

pub type SectorNumber = u64;

/// On-chain actor id of the storage provider owning a sector.
pub type StorageProviderId = u64;

/// Stable identity of a sector for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Deserialize, ::serde::Serialize)]
pub struct SectorId {
    pub provider: StorageProviderId,
    pub number: SectorNumber,
}

impl core::fmt::Display for SectorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{{{}, {}}}", self.provider, self.number)
    }
}

/// SectorSize indicates one of a set of possible sizes in the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub enum SectorSize {
    _2KiB,
    _8MiB,
    _512MiB,
    _32GiB,
    _64GiB,
}

impl SectorSize {
    /// Returns the size of a sector in padded bytes.
    pub fn bytes(&self) -> u64 {
        match self {
            SectorSize::_2KiB => 2 << 10,
            SectorSize::_8MiB => 8 << 20,
            SectorSize::_512MiB => 512 << 20,
            SectorSize::_32GiB => 32 << 30,
            SectorSize::_64GiB => 2 * (32 << 30),
        }
    }

    /// Usable capacity of a sector, before Fr32 padding.
    pub fn unpadded_bytes(&self) -> UnpaddedBytesAmount {
        let padded = self.bytes();
        UnpaddedBytesAmount(padded - (padded / 128))
    }
}

impl core::fmt::Display for SectorSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SectorSize::_2KiB => write!(f, "2KiB"),
            SectorSize::_8MiB => write!(f, "8MiB"),
            SectorSize::_512MiB => write!(f, "512MiB"),
            SectorSize::_32GiB => write!(f, "32GiB"),
            SectorSize::_64GiB => write!(f, "64GiB"),
        }
    }
}

/// Identifies the registered sealing proof for a sector, which in turn fixes
/// the sector's capacity and per-sector deal limit.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub enum SealProof {
    #[serde(alias = "2KiB")]
    StackedDRG2KiBV1P1,
    #[serde(alias = "8MiB")]
    StackedDRG8MiBV1P1,
    #[serde(alias = "512MiB")]
    StackedDRG512MiBV1P1,
    #[serde(alias = "32GiB")]
    StackedDRG32GiBV1P1,
    #[serde(alias = "64GiB")]
    StackedDRG64GiBV1P1,
}

impl SealProof {
    pub fn sector_size(&self) -> SectorSize {
        match self {
            SealProof::StackedDRG2KiBV1P1 => SectorSize::_2KiB,
            SealProof::StackedDRG8MiBV1P1 => SectorSize::_8MiB,
            SealProof::StackedDRG512MiBV1P1 => SectorSize::_512MiB,
            SealProof::StackedDRG32GiBV1P1 => SectorSize::_32GiB,
            SealProof::StackedDRG64GiBV1P1 => SectorSize::_64GiB,
        }
    }
}

/// Maximum number of deals a single sector may hold.
pub fn max_deals(sector_size: SectorSize) -> u64 {
    match sector_size {
        SectorSize::_64GiB => 512,
        _ => 256,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(SectorSize::_2KiB, 2048)]
    #[case(SectorSize::_8MiB, 8 << 20)]
    #[case(SectorSize::_512MiB, 512 << 20)]
    #[case(SectorSize::_32GiB, 32 << 30)]
    #[case(SectorSize::_64GiB, 64 << 30)]
    fn sector_sizes(#[case] size: SectorSize, #[case] bytes: u64) {
        assert_eq!(size.bytes(), bytes);
        assert_eq!(*size.unpadded_bytes(), bytes - bytes / 128);
    }

    #[test]
    fn deal_limits() {
        assert_eq!(max_deals(SectorSize::_2KiB), 256);
        assert_eq!(max_deals(SectorSize::_32GiB), 256);
        assert_eq!(max_deals(SectorSize::_64GiB), 512);
    }

    #[test]
    fn proof_to_size() {
        assert_eq!(
            SealProof::StackedDRG2KiBV1P1.sector_size(),
            SectorSize::_2KiB
        );
        assert_eq!(
            SealProof::StackedDRG64GiBV1P1.sector_size(),
            SectorSize::_64GiB
        );
    }
}
