//! Seat layouts and seat selection.
//!
//! A [`SeatMap`] is a `rows × columns` grid of slots addressed as
//! `row * columns + col`. Only [`SeatClass::Available`] slots can ever enter a
//! [`SeatSelection`]; [`toggle_seat`] and [`prune_stale_selections`] are the
//! only ways a selection changes.

use crate::types::SeatNo;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Write as _;
use thiserror::Error;

/// Functional category of a slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatClass {
    /// Free seat
    Available,
    /// Taken by another traveller
    Booked,
    /// Driver's seat
    Driver,
    /// Door
    Door,
    /// Toilet
    Wc,
    /// Aisle or empty floor
    Space,
}

impl SeatClass {
    /// Only available seats are selectable
    #[must_use]
    pub const fn is_selectable(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Display symbol for a slot class
#[must_use]
pub const fn seat_image(class: SeatClass) -> &'static str {
    match class {
        SeatClass::Available => "o",
        SeatClass::Booked => "x",
        SeatClass::Driver => "D",
        SeatClass::Door => "=",
        SeatClass::Wc => "W",
        SeatClass::Space => " ",
    }
}

/// One slot of the layout
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    /// Seat number; placeholders (door, wc, space) have none
    #[serde(default)]
    pub seat_no: Option<SeatNo>,
    /// Slot class
    pub class: SeatClass,
}

impl Seat {
    /// Numbered seat
    #[must_use]
    pub fn numbered(seat_no: impl Into<SeatNo>, class: SeatClass) -> Self {
        Self {
            seat_no: Some(seat_no.into()),
            class,
        }
    }

    /// Placeholder slot without a number
    #[must_use]
    pub const fn placeholder(class: SeatClass) -> Self {
        Self {
            seat_no: None,
            class,
        }
    }
}

/// Grid dimensions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatLayout {
    /// Rows
    pub rows: usize,
    /// Columns
    pub columns: usize,
}

impl SeatLayout {
    /// Slot count, `None` if `rows * columns` overflows
    #[must_use]
    pub const fn slots(self) -> Option<usize> {
        self.rows.checked_mul(self.columns)
    }
}

/// Malformed seat map
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// Slot count does not match `rows * columns`
    #[error("Layout {rows}x{columns} needs {expected} slots, got {actual}")]
    SlotCount {
        /// Rows
        rows: usize,
        /// Columns
        columns: usize,
        /// `rows * columns`
        expected: usize,
        /// Slots received
        actual: usize,
    },

    /// `rows * columns` does not fit in memory
    #[error("Layout {rows}x{columns} is too large")]
    TooLarge {
        /// Rows
        rows: usize,
        /// Columns
        columns: usize,
    },

    /// Seat number used twice
    #[error("Seat {0} appears more than once")]
    DuplicateSeat(SeatNo),
}

/// Refused seat toggle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SeatError {
    /// No slot carries this number
    #[error("Seat {0} is not on this vehicle")]
    UnknownSeat(SeatNo),

    /// The seat exists but cannot be selected
    #[error("Seat {seat_no} is {class:?} and cannot be selected")]
    NotSelectable {
        /// Seat
        seat_no: SeatNo,
        /// Its current class
        class: SeatClass,
    },
}

#[derive(Deserialize)]
struct WireSeatMap {
    layout: SeatLayout,
    seats: Vec<Seat>,
}

/// A validated vehicle layout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireSeatMap")]
pub struct SeatMap {
    layout: SeatLayout,
    seats: Vec<Seat>,
}

impl TryFrom<WireSeatMap> for SeatMap {
    type Error = LayoutError;

    fn try_from(wire: WireSeatMap) -> Result<Self, Self::Error> {
        Self::new(wire.layout, wire.seats)
    }
}

impl SeatMap {
    /// Build a map, checking the slot count and seat number uniqueness.
    ///
    /// # Errors
    ///
    /// [`LayoutError::TooLarge`], [`LayoutError::SlotCount`] or
    /// [`LayoutError::DuplicateSeat`].
    pub fn new(layout: SeatLayout, seats: Vec<Seat>) -> Result<Self, LayoutError> {
        let expected = layout.slots().ok_or(LayoutError::TooLarge {
            rows: layout.rows,
            columns: layout.columns,
        })?;
        if seats.len() != expected {
            return Err(LayoutError::SlotCount {
                rows: layout.rows,
                columns: layout.columns,
                expected,
                actual: seats.len(),
            });
        }

        let mut seen = HashSet::new();
        for seat_no in seats.iter().filter_map(|s| s.seat_no.as_ref()) {
            if !seen.insert(seat_no) {
                return Err(LayoutError::DuplicateSeat(seat_no.clone()));
            }
        }

        Ok(Self { layout, seats })
    }

    /// Grid dimensions
    #[must_use]
    pub const fn layout(&self) -> SeatLayout {
        self.layout
    }

    /// Every slot in row-major order
    #[must_use]
    pub fn slots(&self) -> &[Seat] {
        &self.seats
    }

    /// Slot at `(row, col)`
    #[must_use]
    pub fn slot(&self, row: usize, col: usize) -> Option<&Seat> {
        if row >= self.layout.rows || col >= self.layout.columns {
            return None;
        }
        self.seats.get(row * self.layout.columns + col)
    }

    /// Slot carrying `seat_no`
    #[must_use]
    pub fn seat(&self, seat_no: &SeatNo) -> Option<&Seat> {
        self.seats
            .iter()
            .find(|s| s.seat_no.as_ref() == Some(seat_no))
    }

    /// `true` if `seat_no` exists and is available
    #[must_use]
    pub fn is_available(&self, seat_no: &SeatNo) -> bool {
        self.seat(seat_no).is_some_and(|s| s.class.is_selectable())
    }

    /// Numbers of every available seat
    pub fn available_seats(&self) -> impl Iterator<Item = &SeatNo> {
        self.seats
            .iter()
            .filter(|s| s.class.is_selectable())
            .filter_map(|s| s.seat_no.as_ref())
    }

    /// Text rendering, one line per row; selected seats show as `*`.
    #[must_use]
    pub fn render(&self, selection: &SeatSelection) -> String {
        let mut out = String::new();
        for row in self.seats.chunks(self.layout.columns.max(1)) {
            for slot in row {
                let cell = match &slot.seat_no {
                    Some(no) if selection.contains(no) => format!("*{no}"),
                    Some(no) if slot.class.is_selectable() => no.to_string(),
                    _ => seat_image(slot.class).to_string(),
                };
                let _ = write!(out, "[{cell:>3}]");
            }
            out.push('\n');
        }
        out
    }
}

/// Seats chosen on one leg, in the order they were picked.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatSelection(Vec<SeatNo>);

impl SeatSelection {
    /// Empty selection
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Membership test
    #[must_use]
    pub fn contains(&self, seat_no: &SeatNo) -> bool {
        self.0.contains(seat_no)
    }

    /// Number of seats
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when nothing is selected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Seats in pick order
    pub fn iter(&self) -> impl Iterator<Item = &SeatNo> {
        self.0.iter()
    }

    /// Seats in pick order
    #[must_use]
    pub fn to_vec(&self) -> Vec<SeatNo> {
        self.0.clone()
    }

    /// This selection minus `seats`
    #[must_use]
    pub fn without(&self, seats: &[SeatNo]) -> Self {
        Self(self.0.iter().filter(|s| !seats.contains(s)).cloned().collect())
    }
}

impl<'a> IntoIterator for &'a SeatSelection {
    type Item = &'a SeatNo;
    type IntoIter = std::slice::Iter<'a, SeatNo>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Flip `seat_no` in `selection`.
///
/// A selected seat is always removable. Adding requires the seat to be
/// available in `map`.
///
/// # Errors
///
/// [`SeatError::UnknownSeat`] or [`SeatError::NotSelectable`]; the caller's
/// selection is untouched in both cases.
pub fn toggle_seat(
    map: &SeatMap,
    selection: &SeatSelection,
    seat_no: &SeatNo,
) -> Result<SeatSelection, SeatError> {
    if selection.contains(seat_no) {
        return Ok(SeatSelection(
            selection.0.iter().filter(|s| *s != seat_no).cloned().collect(),
        ));
    }

    let seat = map
        .seat(seat_no)
        .ok_or_else(|| SeatError::UnknownSeat(seat_no.clone()))?;
    if !seat.class.is_selectable() {
        return Err(SeatError::NotSelectable {
            seat_no: seat_no.clone(),
            class: seat.class,
        });
    }

    let mut next = selection.0.clone();
    next.push(seat_no.clone());
    Ok(SeatSelection(next))
}

/// Drop every selected seat that is no longer available in `map`.
///
/// Returns the pruned selection and the seats removed.
#[must_use]
pub fn prune_stale_selections(
    map: &SeatMap,
    selection: &SeatSelection,
) -> (SeatSelection, Vec<SeatNo>) {
    let (kept, dropped): (Vec<SeatNo>, Vec<SeatNo>) = selection
        .0
        .iter()
        .cloned()
        .partition(|seat_no| map.is_available(seat_no));
    (SeatSelection(kept), dropped)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    /// 2x3 minibus: driver, space, door / "1" available, "2" booked, wc
    fn minibus() -> SeatMap {
        SeatMap::new(
            SeatLayout {
                rows: 2,
                columns: 3,
            },
            vec![
                Seat::placeholder(SeatClass::Driver),
                Seat::placeholder(SeatClass::Space),
                Seat::placeholder(SeatClass::Door),
                Seat::numbered("1", SeatClass::Available),
                Seat::numbered("2", SeatClass::Booked),
                Seat::placeholder(SeatClass::Wc),
            ],
        )
        .unwrap()
    }

    #[test]
    fn slots_are_row_major() {
        let map = minibus();
        assert_eq!(map.slot(1, 0).and_then(|s| s.seat_no.clone()), Some("1".into()));
        assert_eq!(map.slot(0, 2).map(|s| s.class), Some(SeatClass::Door));
        assert!(map.slot(2, 0).is_none());
        assert!(map.slot(0, 3).is_none());
    }

    #[test]
    fn slot_count_must_match_layout() {
        let err = SeatMap::new(
            SeatLayout {
                rows: 2,
                columns: 2,
            },
            vec![Seat::numbered("1", SeatClass::Available)],
        )
        .unwrap_err();
        assert!(matches!(err, LayoutError::SlotCount { expected: 4, actual: 1, .. }));
    }

    #[test]
    fn duplicate_seat_numbers_are_rejected() {
        let err = SeatMap::new(
            SeatLayout {
                rows: 1,
                columns: 2,
            },
            vec![
                Seat::numbered("1", SeatClass::Available),
                Seat::numbered("1", SeatClass::Booked),
            ],
        )
        .unwrap_err();
        assert_eq!(err, LayoutError::DuplicateSeat("1".into()));
    }

    #[test]
    fn toggle_adds_then_removes() {
        let map = minibus();
        let picked = toggle_seat(&map, &SeatSelection::new(), &"1".into()).unwrap();
        assert!(picked.contains(&"1".into()));

        let cleared = toggle_seat(&map, &picked, &"1".into()).unwrap();
        assert!(cleared.is_empty());
    }

    #[test]
    fn booked_seat_never_enters_selection() {
        let map = minibus();
        let err = toggle_seat(&map, &SeatSelection::new(), &"2".into()).unwrap_err();
        assert_eq!(
            err,
            SeatError::NotSelectable {
                seat_no: "2".into(),
                class: SeatClass::Booked,
            }
        );
        assert!(matches!(
            toggle_seat(&map, &SeatSelection::new(), &"99".into()),
            Err(SeatError::UnknownSeat(_))
        ));
    }

    #[test]
    fn prune_drops_seats_booked_since_selection() {
        let map = minibus();
        let selection = toggle_seat(&map, &SeatSelection::new(), &"1".into()).unwrap();

        let mut slots = map.slots().to_vec();
        slots[3].class = SeatClass::Booked;
        let refreshed = SeatMap::new(map.layout(), slots).unwrap();

        let (pruned, dropped) = prune_stale_selections(&refreshed, &selection);
        assert!(pruned.is_empty());
        assert_eq!(dropped, vec![SeatNo::from("1")]);
    }

    #[test]
    fn wire_shape_is_validated() {
        let json = r#"{
            "layout": {"rows": 1, "columns": 2},
            "seats": [
                {"seat_no": "1", "class": "available"},
                {"class": "space"}
            ]
        }"#;
        let map: SeatMap = serde_json::from_str(json).unwrap();
        assert_eq!(map.available_seats().count(), 1);

        let short = r#"{"layout": {"rows": 2, "columns": 2}, "seats": []}"#;
        assert!(serde_json::from_str::<SeatMap>(short).is_err());
    }

    #[test]
    fn oversized_layout_is_rejected_without_overflow() {
        let layout = SeatLayout {
            rows: usize::MAX / 2,
            columns: 4,
        };
        assert_eq!(layout.slots(), None);
        assert_eq!(
            SeatMap::new(layout, Vec::new()).unwrap_err(),
            LayoutError::TooLarge {
                rows: usize::MAX / 2,
                columns: 4,
            }
        );

        let json = format!(
            r#"{{"layout": {{"rows": {}, "columns": 4}}, "seats": []}}"#,
            usize::MAX / 2
        );
        let err = serde_json::from_str::<SeatMap>(&json).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn render_marks_selected_seats() {
        let map = minibus();
        let selection = toggle_seat(&map, &SeatSelection::new(), &"1".into()).unwrap();
        let text = map.render(&selection);
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("[ *1]"));
        assert!(text.contains("[  x]"));
    }
}
