use cid::Cid;

pub type DealId = u64;

/// Block range over which a deal is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct DealSchedule {
    pub start_block: u64,
    pub end_block: u64,
}

/// Metadata of a published deal, as handed to the packing core.
///
/// `publish_cid` is the CID of the message that published the deal on chain.
/// It is unique per deal and serves as the fingerprint keying the pending
/// piece table.
#[derive(Debug, Clone, PartialEq, Eq, ::serde::Deserialize, ::serde::Serialize)]
pub struct DealInfo {
    pub deal_id: DealId,
    pub publish_cid: Cid,
    pub piece_cid: Cid,
    pub schedule: DealSchedule,
}
