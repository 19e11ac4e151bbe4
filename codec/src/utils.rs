// Copyright (c) 2023 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate a random alphanumeric string of `len` chars.
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a random client id.
///
/// Kept within the 23 characters every conforming server accepts
/// [MQTT-3.1.3-5].
#[must_use]
pub fn random_client_id() -> String {
    format!("rill-{}", random_string(12))
}
