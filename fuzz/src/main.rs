//! AFL harness for the agency input and winners parsers.
//!
//! Every input line that parses as a bet must survive a trip through the
//! wire encoding unchanged, and the winners parser must split a line without
//! dropping or altering any of its documents.

use betwire::{batch::encode_batch, bet::Bet, protocol::parse_winners};

fn check_line(line: &str, line_no: usize) {
    let Ok(bet) = Bet::from_input_line("1", line, line_no) else {
        return;
    };
    let Ok(payload) = encode_batch(std::slice::from_ref(&bet)) else {
        return;
    };
    let Ok(wire) = std::str::from_utf8(&payload) else {
        panic!("wire encoding is not UTF-8");
    };
    let decoded = Bet::from_wire_line(wire, line_no);
    assert!(matches!(decoded, Ok(ref d) if *d == bet), "round trip changed {bet:?}");
}

fn main() {
    afl::fuzz!(|data: &[u8]| {
        let Ok(text) = std::str::from_utf8(data) else {
            return;
        };
        for (idx, line) in text.lines().enumerate() {
            check_line(line, idx + 1);
        }
        assert_eq!(parse_winners(text).join(","), text.trim_end());
    });
}
