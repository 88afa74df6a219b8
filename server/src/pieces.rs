//! Piece catalog: the seven falling-block shapes and their spawn positions.
//!
//! Templates are defined in spawn coordinates, horizontally centered with
//! every cell at y 0 or 1 so a fresh piece never starts below the top of the
//! playable area. The first cell of each template is the rotation pivot.

use rand::Rng;
use shared::{Cell, PieceView};

/// Number of distinct piece shapes.
pub const PIECE_KINDS: u8 = 7;

/// Kind id of the 2x2 square, the one shape rotation must skip.
pub const SQUARE_KIND: u8 = 1;

/// Spawn cells per kind, pivot first: I, O, T, S, Z, J, L.
const TEMPLATES: [[(i32, i32); 4]; PIECE_KINDS as usize] = [
    [(5, 0), (4, 0), (6, 0), (7, 0)],
    [(5, 0), (6, 0), (5, 1), (6, 1)],
    [(5, 0), (4, 0), (6, 0), (5, 1)],
    [(5, 0), (6, 0), (4, 1), (5, 1)],
    [(5, 0), (4, 0), (5, 1), (6, 1)],
    [(5, 0), (4, 0), (6, 0), (6, 1)],
    [(5, 0), (4, 0), (6, 0), (4, 1)],
];

/// A falling piece instance: four cells plus its shape kind.
///
/// Instances are always fresh copies of a template so mutating one piece can
/// never alias another or the catalog itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub kind: u8,
    pub cells: [Cell; 4],
}

impl Piece {
    /// Builds a fresh piece of the given kind at its spawn position.
    pub fn spawn(kind: u8) -> Self {
        let template = &TEMPLATES[kind as usize % TEMPLATES.len()];
        let mut cells = [Cell::new(0, 0); 4];
        for (cell, &(x, y)) in cells.iter_mut().zip(template.iter()) {
            *cell = Cell::new(x, y);
        }
        Self { kind, cells }
    }

    /// Draws a uniformly random piece kind and spawns it.
    pub fn random(rng: &mut impl Rng) -> Self {
        Self::spawn(rng.gen_range(0..PIECE_KINDS))
    }

    /// Rotation pivot: the template's first cell.
    pub fn pivot(&self) -> Cell {
        self.cells[0]
    }

    /// Wire representation for snapshots.
    pub fn view(&self) -> PieceView {
        PieceView {
            kind: self.kind,
            cells: self.cells.to_vec(),
        }
    }
}

/// Draws a uniformly random piece kind without building the piece.
pub fn random_kind(rng: &mut impl Rng) -> u8 {
    rng.gen_range(0..PIECE_KINDS)
}
