//! Property tests for seat toggling.

#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use tripdesk_booking::seat_map::{
    Seat, SeatClass, SeatLayout, SeatMap, SeatSelection, prune_stale_selections, toggle_seat,
};
use tripdesk_booking::types::SeatNo;

const SEATS: usize = 12;

fn class() -> impl Strategy<Value = SeatClass> {
    prop_oneof![
        3 => Just(SeatClass::Available),
        2 => Just(SeatClass::Booked),
        1 => Just(SeatClass::Driver),
        1 => Just(SeatClass::Door),
        1 => Just(SeatClass::Wc),
        1 => Just(SeatClass::Space),
    ]
}

/// 3x4 layout numbered "1" to "12" with random classes
fn seat_map() -> impl Strategy<Value = SeatMap> {
    prop::collection::vec(class(), SEATS).prop_map(|classes| {
        let seats = classes
            .into_iter()
            .enumerate()
            .map(|(i, class)| Seat::numbered((i + 1).to_string(), class))
            .collect();
        SeatMap::new(SeatLayout { rows: 3, columns: 4 }, seats).unwrap()
    })
}

/// Seat numbers including a few that are not on the vehicle
fn seat_no() -> impl Strategy<Value = SeatNo> {
    (1..=SEATS + 3).prop_map(|n| SeatNo::new(n.to_string()))
}

fn apply_all(map: &SeatMap, toggles: &[SeatNo]) -> SeatSelection {
    toggles.iter().fold(SeatSelection::new(), |selection, seat_no| {
        toggle_seat(map, &selection, seat_no).unwrap_or(selection)
    })
}

proptest! {
    #[test]
    fn only_available_seats_are_ever_selected(
        map in seat_map(),
        toggles in prop::collection::vec(seat_no(), 0..40),
    ) {
        let selection = apply_all(&map, &toggles);

        for seat_no in &selection {
            prop_assert!(map.is_available(seat_no), "seat {seat_no} is not available");
        }
        let mut unique = selection.to_vec();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), selection.len());
    }

    #[test]
    fn toggling_twice_restores_membership(
        map in seat_map(),
        toggles in prop::collection::vec(seat_no(), 0..20),
        seat_no in seat_no(),
    ) {
        let before = apply_all(&map, &toggles);

        let once = toggle_seat(&map, &before, &seat_no).unwrap_or_else(|_| before.clone());
        let twice = toggle_seat(&map, &once, &seat_no).unwrap_or_else(|_| once.clone());

        prop_assert_eq!(twice.contains(&seat_no), before.contains(&seat_no));
        prop_assert_eq!(twice.len(), before.len());
    }

    #[test]
    fn pruning_keeps_exactly_the_seats_still_available(
        map in seat_map(),
        refreshed in seat_map(),
        toggles in prop::collection::vec(seat_no(), 0..30),
    ) {
        let selection = apply_all(&map, &toggles);

        let (kept, dropped) = prune_stale_selections(&refreshed, &selection);

        prop_assert_eq!(kept.len() + dropped.len(), selection.len());
        prop_assert!(kept.iter().all(|s| refreshed.is_available(s)));
        prop_assert!(dropped.iter().all(|s| !refreshed.is_available(s)));
    }
}
