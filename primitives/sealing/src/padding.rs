use crate::{
    amounts::PaddedBytesAmount,
    piece::{PaddedPieceSize, PieceSizeError},
};

/// Computes the zero-pieces needed before a piece of padded size `piece` may
/// be written at padded offset `offset`.
///
/// A piece must start at an offset that is a multiple of its own padded size,
/// so the sector's merkle tree keeps one clean subtree per piece. The gap up
/// to the next such multiple is filled with zero-pieces; every set bit of the
/// gap's binary representation yields one pad, emitted smallest first so each
/// pad is itself aligned at its own size.
///
/// Returns the pads in write order together with their total padded length.
pub fn required_padding(
    offset: PaddedBytesAmount,
    piece: PaddedPieceSize,
) -> Result<(Vec<PaddedPieceSize>, PaddedBytesAmount), PieceSizeError> {
    let mut to_fill = (*piece - (*offset % *piece)) % *piece;

    let mut pads = Vec::with_capacity(to_fill.count_ones() as usize);
    let mut total = PaddedBytesAmount(0);
    while to_fill > 0 {
        let next = to_fill.trailing_zeros();
        let pad_size = 1u64 << next;
        to_fill ^= pad_size;

        let pad = PaddedPieceSize::new(pad_size)?;
        total += pad.into();
        pads.push(pad);
    }

    Ok((pads, total))
}
