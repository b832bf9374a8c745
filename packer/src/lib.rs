//! Deal-to-sector packing core of a storage-provider sealing pipeline.
//!
//! Client deals are submitted through [`Packer::add_piece_to_any_sector`];
//! the core routes each piece into an open sector under the Filecoin
//! piece-alignment rule, decides per sector when to stop waiting for more
//! deals, and hands filled sectors over to the sealing pipeline as
//! [`PackedSector`]s. Piece bytes are written through the opaque [`Sealer`]
//! interface; sealing itself, chain interaction and sector-metadata
//! persistence are outside this crate.

mod config;
mod error;
mod input;
mod registry;
mod sealer;
mod sectors;

pub use config::{SealingConfig, SealingConfigSource};
pub use error::PackerError;
pub use input::{Packer, SectorOffset};
pub use sealer::{
    PieceData, SealPriority, Sealer, SealerError, ZeroReader, DEAL_SECTOR_PRIORITY,
};
pub use sectors::types::{PackedSector, SectorPiece, SectorState};
