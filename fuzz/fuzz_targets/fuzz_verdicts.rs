// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use curator::classifier::parse_verdicts;

#[derive(Arbitrary, Debug)]
struct Input {
    response: String,
    expected: u8,
}

fuzz_target!(|input: Input| {
    let expected = usize::from(input.expected);
    if let Ok(verdicts) = parse_verdicts(&input.response, expected) {
        assert_eq!(verdicts.len(), expected);
        for verdict in &verdicts {
            assert!((0.0..=1.0).contains(&verdict.confidence));
        }
    }
});
