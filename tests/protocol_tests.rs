#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the push protocol types.
//!
//! Verifies the `{"type": ..., "data": ...}` envelope, camelCase naming,
//! fixtures matching real server output, and the lot-scoping helper.

use auction_session_client::error_codes::BidErrorCode;
use auction_session_client::protocol::{
    Bid, BidKind, BidStats, ClientCommand, ConnectionState, Lot, ServerEvent,
};

mod common;

// ════════════════════════════════════════════════════════════════════
// ClientCommand wire format
// ════════════════════════════════════════════════════════════════════

#[test]
fn place_bid_uses_tagged_envelope_with_camel_case() {
    let cmd = ClientCommand::PlaceBid {
        lot_id: "L17".into(),
        kind: BidKind::Live,
        amount: 5250,
    };
    let json: serde_json::Value = serde_json::to_value(&cmd).expect("serialize");

    assert_eq!(json["type"], "placeBid");
    assert_eq!(json["data"]["lotId"], "L17");
    assert_eq!(json["data"]["kind"], "live");
    assert_eq!(json["data"]["amount"], 5250);
}

#[test]
fn join_and_leave_commands_carry_their_ids() {
    let join_auction = serde_json::to_value(&ClientCommand::JoinAuction {
        auction_id: "A-2024-0131".into(),
    })
    .expect("serialize");
    assert_eq!(join_auction["type"], "joinAuction");
    assert_eq!(join_auction["data"]["auctionId"], "A-2024-0131");

    let join_lot =
        serde_json::to_value(&ClientCommand::JoinLot { lot_id: "L2".into() }).expect("serialize");
    assert_eq!(join_lot["type"], "joinLot");
    assert_eq!(join_lot["data"]["lotId"], "L2");

    let leave_lot =
        serde_json::to_value(&ClientCommand::LeaveLot { lot_id: "L2".into() }).expect("serialize");
    assert_eq!(leave_lot["type"], "leaveLot");
}

#[test]
fn bid_kinds_serialize_camel_case() {
    assert_eq!(
        serde_json::to_string(&BidKind::PreBid).expect("serialize"),
        "\"preBid\""
    );
    assert_eq!(
        serde_json::to_string(&BidKind::Proxy).expect("serialize"),
        "\"proxy\""
    );
}

// ════════════════════════════════════════════════════════════════════
// ServerEvent fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn new_bid_fixture_deserializes() {
    let json = r#"{
        "type": "newBid",
        "data": {
            "bid": {
                "id": "c65b2fd6-3b44-4d0f-9f5b-1a2b3c4d5e6f",
                "lotId": "L17",
                "bidderId": "00000000-0000-0000-0000-000000000042",
                "bidderName": "dealer-204",
                "amount": 5250,
                "placedAt": "2026-01-15T14:30:05Z"
            }
        }
    }"#;

    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    let ServerEvent::NewBid { bid } = event else {
        panic!("expected NewBid variant");
    };
    assert_eq!(bid.lot_id, "L17");
    assert_eq!(bid.bidder_name, "dealer-204");
    assert_eq!(bid.amount, 5250);
    // Absent on the wire; computed locally.
    assert!(!bid.is_highest);
}

#[test]
fn timer_reset_fixture_deserializes() {
    let json = r#"{"type":"timerReset","data":{"lotId":"L17","newSeconds":60}}"#;
    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    assert!(matches!(
        event,
        ServerEvent::TimerReset { ref lot_id, new_seconds: 60 } if lot_id == "L17"
    ));
}

#[test]
fn move_to_next_lot_fixture_deserializes() {
    let json = r#"{
        "type": "moveToNextLot",
        "data": {"previousLotId": "L17", "nextLotId": "L18", "nextLotNumber": 18}
    }"#;
    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    let ServerEvent::MoveToNextLot {
        previous_lot_id,
        next_lot_id,
        next_lot_number,
    } = event
    else {
        panic!("expected MoveToNextLot variant");
    };
    assert_eq!(previous_lot_id, "L17");
    assert_eq!(next_lot_id, "L18");
    assert_eq!(next_lot_number, 18);
}

#[test]
fn bid_error_fixture_maps_error_code() {
    let json = r#"{
        "type": "bidError",
        "data": {"lotId": "L17", "message": "bid too low", "code": "BID_TOO_LOW"}
    }"#;
    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    let ServerEvent::BidError { code, .. } = event else {
        panic!("expected BidError variant");
    };
    assert_eq!(code, Some(BidErrorCode::BidTooLow));
}

#[test]
fn unknown_error_code_degrades_gracefully() {
    let json = r#"{
        "type": "bidError",
        "data": {"lotId": "L17", "message": "??", "code": "SOME_FUTURE_CODE"}
    }"#;
    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    let ServerEvent::BidError { code, .. } = event else {
        panic!("expected BidError variant");
    };
    assert_eq!(code, Some(BidErrorCode::Unknown));
}

#[test]
fn bid_stats_optional_fields_default_to_none() {
    let json = r#"{"type":"bidStatsUpdated","data":{"lotId":"L3","stats":{"bidCount":12}}}"#;
    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    let ServerEvent::BidStatsUpdated { stats, .. } = event else {
        panic!("expected BidStatsUpdated variant");
    };
    assert_eq!(
        stats.bid_count,
        BidStats {
            bid_count: 12,
            highest_amount: None,
            is_reserve_met: None
        }
        .bid_count
    );
    assert_eq!(stats.highest_amount, None);
    assert_eq!(stats.is_reserve_met, None);
}

#[test]
fn connection_state_changed_uses_snake_case_states() {
    let json = r#"{"type":"connectionStateChanged","data":{"state":"reconnecting"}}"#;
    let event: ServerEvent = serde_json::from_str(json).expect("deserialize");
    assert!(matches!(
        event,
        ServerEvent::ConnectionStateChanged {
            state: ConnectionState::Reconnecting,
            error: None
        }
    ));
}

// ════════════════════════════════════════════════════════════════════
// Snapshot payloads
// ════════════════════════════════════════════════════════════════════

#[test]
fn lot_round_trips_with_reserve() {
    let lot = Lot {
        lot_id: "L9".into(),
        lot_number: 9,
        current_price: 18_500,
        bid_count: 31,
        reserve_price: Some(20_000),
        is_reserve_met: false,
        min_pre_bid: 500,
    };
    let json = serde_json::to_string(&lot).expect("serialize");
    assert!(json.contains("\"reservePrice\":20000"));
    assert!(json.contains("\"minPreBid\":500"));

    let back: Lot = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back.reserve_price, Some(20_000));
    assert_eq!(back.bid_count, 31);
}

#[test]
fn auction_snapshot_tolerates_missing_history() {
    let json = r#"{
        "auction": {"auctionId": "A1", "title": "Wed Sale", "currentLotId": "L1", "lotCount": 140},
        "currentLot": {
            "lotId": "L1", "lotNumber": 1, "currentPrice": 1000,
            "bidCount": 0, "isReserveMet": false, "minPreBid": 0
        },
        "timerSeconds": 90
    }"#;
    let snapshot: auction_session_client::protocol::AuctionSnapshot =
        serde_json::from_str(json).expect("deserialize");
    assert!(snapshot.bid_history.is_empty());
    assert_eq!(snapshot.timer_seconds, 90);
    assert_eq!(snapshot.current_lot.reserve_price, None);
}

#[test]
fn bid_timestamps_are_iso8601() {
    let bid: Bid = serde_json::from_value(serde_json::json!({
        "id": "00000000-0000-0000-0000-000000000001",
        "lotId": "L1",
        "bidderId": "00000000-0000-0000-0000-000000000002",
        "bidderName": "b",
        "amount": 100,
        "placedAt": "2026-01-15T14:30:05.250Z"
    }))
    .expect("deserialize");
    assert_eq!(bid.placed_at, common::ts(1_768_487_405) + chrono::Duration::milliseconds(250));
}

// ════════════════════════════════════════════════════════════════════
// lot_id scoping helper
// ════════════════════════════════════════════════════════════════════

#[test]
fn lot_id_helper_scopes_every_variant() {
    assert_eq!(common::new_bid_event("L1", 100, 0).lot_id(), Some("L1"));
    assert_eq!(common::timer_reset_event("L2", 30).lot_id(), Some("L2"));
    assert_eq!(common::bid_stats_event("L3", 1, None).lot_id(), Some("L3"));
    assert_eq!(
        common::highest_bid_updated_event("L4", 900).lot_id(),
        Some("L4")
    );
    assert_eq!(common::bid_error_event("L5", "x", None).lot_id(), Some("L5"));
    // Rotation is scoped to the lot being left.
    assert_eq!(
        common::move_to_next_lot_event("L6", "L7", 7).lot_id(),
        Some("L6")
    );
    let session_wide = ServerEvent::ConnectionStateChanged {
        state: ConnectionState::Connected,
        error: None,
    };
    assert_eq!(session_wide.lot_id(), None);
}
