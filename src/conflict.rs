//! Movements through a four-way junction and the static table of which movements
//! cannot use the junction at the same time.

use itertools::iproduct;
use once_cell::sync::Lazy;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// The number of distinct movements through a four-way junction.
pub const MOVEMENT_COUNT: usize = 12;

/// The arm of a four-way junction a vehicle arrives from or leaves by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Approach {
    North,
    East,
    South,
    West,
}

/// The pair of opposing approaches served by one signal phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Axis {
    NorthSouth,
    EastWest,
}

/// How a vehicle passes through the junction. Traffic drives on the right.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Turn {
    Right,
    Through,
    Left,
}

/// A movement, keyed by its origin approach and turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MovementId {
    pub from: Approach,
    pub turn: Turn,
}

impl Approach {
    pub const ALL: [Approach; 4] = [
        Approach::North,
        Approach::East,
        Approach::South,
        Approach::West,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn opposite(self) -> Approach {
        Self::ALL[(self.index() + 2) % 4]
    }

    pub fn axis(self) -> Axis {
        match self {
            Approach::North | Approach::South => Axis::NorthSouth,
            Approach::East | Approach::West => Axis::EastWest,
        }
    }

    /// The position of the approach going anticlockwise from east, in quarter turns.
    fn quarter_turns(self) -> usize {
        match self {
            Approach::East => 0,
            Approach::North => 1,
            Approach::West => 2,
            Approach::South => 3,
        }
    }

    /// Heading of the approach's arm from the junction centre, in radians
    /// anticlockwise from east.
    pub fn angle(self) -> f64 {
        self.quarter_turns() as f64 * std::f64::consts::FRAC_PI_2
    }

    /// Where the inbound lane of the arm touches the junction boundary: slot `2k` of eight
    /// anticlockwise slots. The outbound lane sits one slot clockwise.
    fn inbound_slot(self) -> usize {
        2 * self.quarter_turns()
    }

    fn outbound_slot(self) -> usize {
        (2 * self.quarter_turns() + 7) % 8
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Approach::North => "N",
            Approach::East => "E",
            Approach::South => "S",
            Approach::West => "W",
        };
        f.write_str(name)
    }
}

impl Turn {
    pub const ALL: [Turn; 3] = [Turn::Right, Turn::Through, Turn::Left];

    pub fn index(self) -> usize {
        self as usize
    }

    /// The approach a vehicle from `from` leaves by.
    pub fn destination(self, from: Approach) -> Approach {
        // Approach::ALL runs clockwise.
        let offset = match self {
            Turn::Right => 3,
            Turn::Through => 2,
            Turn::Left => 1,
        };
        Approach::ALL[(from.index() + offset) % 4]
    }
}

impl MovementId {
    pub fn new(from: Approach, turn: Turn) -> Self {
        Self { from, turn }
    }

    /// All movements in index order.
    pub fn all() -> impl Iterator<Item = MovementId> + Clone {
        iproduct!(Approach::ALL, Turn::ALL).map(|(from, turn)| MovementId { from, turn })
    }

    pub fn index(self) -> usize {
        3 * self.from.index() + self.turn.index()
    }

    pub fn to(self) -> Approach {
        self.turn.destination(self.from)
    }
}

impl fmt::Display for MovementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.from, self.to())
    }
}

/// Which pairs of movements are mutually exclusive.
pub struct ConflictTable([[bool; MOVEMENT_COUNT]; MOVEMENT_COUNT]);

static CONFLICTS: Lazy<ConflictTable> = Lazy::new(ConflictTable::derive);

impl ConflictTable {
    /// The conflict table of a four-way junction.
    pub fn get() -> &'static ConflictTable {
        &CONFLICTS
    }

    /// Whether the two movements may not occupy the junction at the same time.
    pub fn conflicts(&self, a: MovementId, b: MovementId) -> bool {
        self.0[a.index()][b.index()]
    }

    /// The movements that conflict with `movement`.
    pub fn conflicting(&self, movement: MovementId) -> impl Iterator<Item = MovementId> + '_ {
        MovementId::all().filter(move |other| self.conflicts(movement, *other))
    }

    /// Each movement is a chord between its inbound and outbound slot on the junction
    /// boundary. Movements from the same approach queue behind each other and never
    /// conflict; otherwise they conflict when their chords cross or share an end.
    /// Opposing left turns pass nose to nose in the middle of the junction and are
    /// treated as conflicting too.
    fn derive() -> Self {
        let mut table = [[false; MOVEMENT_COUNT]; MOVEMENT_COUNT];
        for (a, b) in iproduct!(MovementId::all(), MovementId::all()) {
            if a.from == b.from {
                continue;
            }
            let chord_a = (a.from.inbound_slot(), a.to().outbound_slot());
            let chord_b = (b.from.inbound_slot(), b.to().outbound_slot());
            let opposing_lefts =
                a.turn == Turn::Left && b.turn == Turn::Left && a.from.opposite() == b.from;
            table[a.index()][b.index()] = opposing_lefts || chords_meet(chord_a, chord_b);
        }
        Self(table)
    }
}

/// Whether two chords between slots on a circle of eight slots cross or share an end.
fn chords_meet(a: (usize, usize), b: (usize, usize)) -> bool {
    if a.0 == b.0 || a.0 == b.1 || a.1 == b.0 || a.1 == b.1 {
        return true;
    }
    let inside = |slot: usize| {
        let span = (a.1 + 8 - a.0) % 8;
        let offset = (slot + 8 - a.0) % 8;
        offset > 0 && offset < span
    };
    inside(b.0) != inside(b.1)
}

#[cfg(test)]
mod test {
    use super::*;
    use Approach::*;
    use Turn::*;

    fn m(from: Approach, turn: Turn) -> MovementId {
        MovementId::new(from, turn)
    }

    #[test]
    fn turn_destinations() {
        assert_eq!(Right.destination(North), West);
        assert_eq!(Right.destination(West), South);
        assert_eq!(Right.destination(South), East);
        assert_eq!(Right.destination(East), North);
        assert_eq!(Left.destination(North), East);
        assert_eq!(Left.destination(East), South);
        assert_eq!(Left.destination(South), West);
        assert_eq!(Left.destination(West), North);
        assert_eq!(Through.destination(North), South);
    }

    #[test]
    fn indices_are_dense() {
        let indices: Vec<usize> = MovementId::all().map(MovementId::index).collect();
        assert_eq!(indices, (0..MOVEMENT_COUNT).collect::<Vec<_>>());
    }

    #[test]
    fn table_is_symmetric() {
        let table = ConflictTable::get();
        for (a, b) in iproduct!(MovementId::all(), MovementId::all()) {
            assert_eq!(table.conflicts(a, b), table.conflicts(b, a), "{a} vs {b}");
        }
        for a in MovementId::all() {
            assert!(!table.conflicts(a, a));
        }
    }

    #[test]
    fn opposing_movements() {
        let table = ConflictTable::get();
        for (a, b) in [(North, South), (East, West)] {
            assert!(table.conflicts(m(a, Left), m(b, Through)));
            assert!(table.conflicts(m(b, Left), m(a, Through)));
            assert!(table.conflicts(m(a, Left), m(b, Left)));
            assert!(table.conflicts(m(a, Left), m(b, Right)));
            assert!(table.conflicts(m(b, Left), m(a, Right)));
            assert!(!table.conflicts(m(a, Through), m(b, Through)));
            assert!(!table.conflicts(m(a, Right), m(b, Right)));
            assert!(!table.conflicts(m(a, Through), m(b, Right)));
        }
    }

    #[test]
    fn crossing_movements() {
        let table = ConflictTable::get();
        assert!(table.conflicts(m(North, Through), m(East, Through)));
        assert!(table.conflicts(m(North, Right), m(East, Through)));
        assert!(!table.conflicts(m(North, Right), m(West, Through)));
        assert!(!table.conflicts(m(North, Right), m(East, Left)));
        assert_eq!(table.conflicting(m(North, Right)).count(), 2);
    }
}
