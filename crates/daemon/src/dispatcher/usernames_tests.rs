// SPDX-License-Identifier: MIT

use super::*;

#[yare::parameterized(
    simple    = { "alice", "user-alice" },
    uppercase = { "Alice", "user-alice" },
    spaces    = { "Alice Smith", "user-alice-smith" },
    symbols   = { "alice.smith!", "user-alice-smith" },
    collapse  = { "a---b", "user-a-b" },
    unicode   = { "ålice", "user-lice" },
    empty     = { "", "user-" },
)]
fn normalization(input: &str, expected: &str) {
    assert_eq!(normalize_username(input), expected);
}

#[test]
fn cache_returns_first_resolution() {
    let cache = UsernameCache::new();
    let first = cache.resolve("U01", "Alice Smith");
    // Display name changed; cached mapping stays stable
    let second = cache.resolve("U01", "Alice Jones");
    assert_eq!(first, "user-alice-smith");
    assert_eq!(second, "user-alice-smith");
}

#[test]
fn different_users_resolve_independently() {
    let cache = UsernameCache::new();
    assert_eq!(cache.resolve("U01", "alice"), "user-alice");
    assert_eq!(cache.resolve("U02", "bob"), "user-bob");
}
