//! Board engine: collision testing, piece kinematics, line clears and
//! garbage injection.
//!
//! The board is a sparse set of occupied cells rather than a row/column
//! grid. Shifting rows after a clear is a cheap filter-and-remap over the
//! set; the price is a linear membership scan during collision checks,
//! which is fine at four cells per piece and at most `W * H` settled cells.
//!
//! Every operation here is a pure function over a board + piece snapshot.
//! Illegal transitions are not errors: a blocked move returns the piece
//! unchanged and a blocked rotation falls back through the kick table.

use rand::Rng;
use shared::{Cell, BOARD_HEIGHT, BOARD_WIDTH, TOP_ROW};

use crate::pieces::{Piece, SQUARE_KIND};

/// Holes punched into each injected garbage row. Holes are drawn
/// independently per row; within one row they are always column-distinct.
const GARBAGE_HOLES_PER_ROW: usize = 1;

/// Offsets tried, in order, when a naive rotation collides.
const WALL_KICKS: [(i32, i32); 8] = [
    (0, 0),
    (1, 0),
    (-1, 0),
    (0, -1),
    (1, -1),
    (-1, -1),
    (2, 0),
    (-2, 0),
];

/// The settled cells of one player's board.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Board {
    cells: Vec<Cell>,
}

impl Board {
    pub fn new() -> Self {
        Self { cells: Vec::new() }
    }

    pub fn from_cells(cells: Vec<Cell>) -> Self {
        Self { cells }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn occupied(&self, cell: Cell) -> bool {
        self.cells.contains(&cell)
    }

    /// Absorbs a settled piece. The caller guarantees the piece position is
    /// collision-free, so no cell can be duplicated.
    pub fn merge(&mut self, piece: &Piece) {
        self.cells.extend_from_slice(&piece.cells);
    }

    /// True once any settled cell has reached the topmost playable row.
    /// Garbage can push cells past the ceiling (y < 1); those count too.
    pub fn overflowed(&self) -> bool {
        self.cells.iter().any(|c| c.y <= TOP_ROW)
    }
}

/// True if any cell is outside the side walls, below the floor, or on a
/// settled cell. Cells at y <= 0 are in the spawn buffer above the board:
/// they collide with walls and settled cells only, never with the floor.
pub fn collides(cells: &[Cell], board: &Board) -> bool {
    cells.iter().any(|c| {
        c.x < 1 || c.x > BOARD_WIDTH || c.y > BOARD_HEIGHT || (c.y >= 1 && board.occupied(*c))
    })
}

fn shifted(piece: &Piece, dx: i32, dy: i32) -> Piece {
    let mut moved = piece.clone();
    for cell in &mut moved.cells {
        cell.x += dx;
        cell.y += dy;
    }
    moved
}

/// One cell left, or unchanged if the wall or a settled cell blocks it.
pub fn move_left(piece: &Piece, board: &Board) -> Piece {
    let moved = shifted(piece, -1, 0);
    if collides(&moved.cells, board) {
        piece.clone()
    } else {
        moved
    }
}

/// One cell right, or unchanged if blocked.
pub fn move_right(piece: &Piece, board: &Board) -> Piece {
    let moved = shifted(piece, 1, 0);
    if collides(&moved.cells, board) {
        piece.clone()
    } else {
        moved
    }
}

/// One cell down, or `None` when the piece would collide and must settle.
pub fn move_down(piece: &Piece, board: &Board) -> Option<Piece> {
    let moved = shifted(piece, 0, 1);
    if collides(&moved.cells, board) {
        None
    } else {
        Some(moved)
    }
}

/// Rotates 90 degrees about the piece's first cell, trying each wall-kick
/// offset in order; an unresolvable rotation leaves the piece unchanged.
/// The square is rotation-invariant and returned as-is.
pub fn rotate(piece: &Piece, board: &Board) -> Piece {
    if piece.kind == SQUARE_KIND {
        return piece.clone();
    }

    let pivot = piece.pivot();
    let mut rotated = piece.clone();
    for cell in &mut rotated.cells {
        let (x, y) = (cell.x, cell.y);
        cell.x = pivot.x - (y - pivot.y);
        cell.y = pivot.y + (x - pivot.x);
    }

    for (dx, dy) in WALL_KICKS {
        let kicked = shifted(&rotated, dx, dy);
        if !collides(&kicked.cells, board) {
            return kicked;
        }
    }
    piece.clone()
}

/// Drops the piece one step at a time until it would collide, returning the
/// last free position. Bounded by the board height.
pub fn hard_drop(piece: &Piece, board: &Board) -> Piece {
    let mut current = piece.clone();
    while let Some(next) = move_down(&current, board) {
        current = next;
    }
    current
}

/// Removes every full row and shifts the remainder down.
///
/// A row is full when all `BOARD_WIDTH` columns at that y are occupied.
/// Each surviving cell drops by the number of cleared rows strictly below
/// it, computed against the original set of full rows in one pass rather
/// than re-deriving fullness row by row. Cleared row numbers come back
/// floor-first for animation and attack accounting.
pub fn clear_lines(board: &Board) -> (Board, Vec<i32>) {
    let mut full_rows: Vec<i32> = (TOP_ROW..=BOARD_HEIGHT)
        .filter(|&y| {
            board.cells().iter().filter(|c| c.y == y).count() == BOARD_WIDTH as usize
        })
        .collect();
    full_rows.sort_unstable_by(|a, b| b.cmp(a));

    if full_rows.is_empty() {
        return (board.clone(), full_rows);
    }

    let remapped = board
        .cells()
        .iter()
        .filter(|c| !full_rows.contains(&c.y))
        .map(|c| {
            let drop = full_rows.iter().filter(|&&row| row > c.y).count() as i32;
            Cell::new(c.x, c.y + drop)
        })
        .collect();

    (Board::from_cells(remapped), full_rows)
}

/// Pushes `lines` garbage rows in from the floor: every existing cell moves
/// up by `lines`, then near-full rows are appended at the bottom, each with
/// randomly placed holes. Cells pushed past the ceiling are kept so the
/// overflow check can observe them.
pub fn inject_garbage(board: &Board, lines: usize, rng: &mut impl Rng) -> Board {
    if lines == 0 {
        return board.clone();
    }

    let mut cells: Vec<Cell> = board
        .cells()
        .iter()
        .map(|c| Cell::new(c.x, c.y - lines as i32))
        .collect();

    for i in 0..lines {
        let y = BOARD_HEIGHT - i as i32;
        cells.extend(garbage_row(y, rng));
    }

    Board::from_cells(cells)
}

fn garbage_row(y: i32, rng: &mut impl Rng) -> Vec<Cell> {
    let mut holes: Vec<i32> = Vec::with_capacity(GARBAGE_HOLES_PER_ROW);
    while holes.len() < GARBAGE_HOLES_PER_ROW {
        let col = rng.gen_range(1..=BOARD_WIDTH);
        if !holes.contains(&col) {
            holes.push(col);
        }
    }

    (1..=BOARD_WIDTH)
        .filter(|x| !holes.contains(x))
        .map(|x| Cell::new(x, y))
        .collect()
}
