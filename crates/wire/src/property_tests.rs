// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Round-trip property tests for the wire protocol (spec §8).

use crate::messages::{ConnectRequest, ErrorNotification};
use crate::{decode, encode, AgentMessage};
use proptest::prelude::*;

fn arb_connect() -> impl Strategy<Value = ConnectRequest> {
    ("[a-z0-9-]{1,16}", "[a-z0-9-]{1,16}", "[a-z0-9-]{1,16}", "[0-9.]{1,8}").prop_map(
        |(vm_id, pool_id, org_id, version)| ConnectRequest {
            vm_id,
            pool_id,
            org_id,
            version,
        },
    )
}

proptest! {
    #[test]
    fn connect_request_survives_json_round_trip(req in arb_connect()) {
        let msg = AgentMessage::Connect(req.clone());
        let json = serde_json::to_string(&msg).unwrap();
        let back: AgentMessage = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(back, AgentMessage::Connect(req));
    }

    #[test]
    fn length_prefixed_framing_survives_round_trip(code in "[a-z_]{1,10}", message in ".{0,64}") {
        let note = AgentMessage::ErrorNotification(ErrorNotification { code, message });
        let bytes = encode(&note).unwrap();
        let back: AgentMessage = decode(&bytes[4..]).unwrap();
        prop_assert_eq!(back, note);
    }
}
