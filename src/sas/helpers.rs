// Copyright 2020 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The bits of the SAS calculation that are specific to this protocol and
//! that `vodozemac` doesn't know about: the HKDF `info` strings and the
//! emoji name table.

/// Build the `info` string used to derive the 6 SAS bytes.
///
/// `we_started` decides whether our own identity or the peer's goes first;
/// the info string is otherwise symmetric, which is what lets both sides
/// derive the same bytes independently.
pub fn sas_info(
    own_user_id: &str,
    own_device_id: &str,
    own_public_key: &str,
    their_user_id: &str,
    their_device_id: &str,
    their_public_key: &str,
    transaction_id: &str,
    we_started: bool,
) -> String {
    let our_info = format!("{}|{}|{}", own_user_id, own_device_id, own_public_key);
    let their_info = format!("{}|{}|{}", their_user_id, their_device_id, their_public_key);

    let (first, second) = if we_started { (our_info, their_info) } else { (their_info, our_info) };

    format!("MATRIX_KEY_VERIFICATION_SAS|{}|{}|{}", first, second, transaction_id)
}

/// The `key_id` used when MAC-ing the sorted, comma-joined list of key ids
/// carried in a `mac` payload's `keys` field, rather than an individual key.
pub const KEY_IDS_INFO_TAG: &str = "KEY_IDS";

/// Build the `info` string used to derive a MAC, from the sender's point of
/// view: sender's identity comes first regardless of who started the flow.
///
/// `key_id` is either a real `ed25519:<device_id>` key id, or
/// [`KEY_IDS_INFO_TAG`] when MAC-ing the `keys` field itself.
pub fn mac_info(
    sender_user_id: &str,
    sender_device_id: &str,
    receiver_user_id: &str,
    receiver_device_id: &str,
    transaction_id: &str,
    key_id: &str,
) -> String {
    format!(
        "MATRIX_KEY_VERIFICATION_MAC|{}|{}|{}|{}|{}|{}",
        sender_user_id, sender_device_id, receiver_user_id, receiver_device_id, transaction_id, key_id
    )
}

/// Get a tuple of an emoji and its English name from a 6-bit SAS index.
///
/// This table is fixed by the network standard: all compliant
/// implementations must agree on it bit for bit.
///
/// # Panics
///
/// Panics if `index` is not in `0..64`; the SAS derivation never produces
/// such an index.
pub fn emoji_from_index(index: u8) -> (&'static str, &'static str) {
    match index {
        0 => ("🐶", "Dog"),
        1 => ("🐱", "Cat"),
        2 => ("🦁", "Lion"),
        3 => ("🐎", "Horse"),
        4 => ("🦄", "Unicorn"),
        5 => ("🐷", "Pig"),
        6 => ("🐘", "Elephant"),
        7 => ("🐰", "Rabbit"),
        8 => ("🐼", "Panda"),
        9 => ("🐓", "Rooster"),
        10 => ("🐧", "Penguin"),
        11 => ("🐢", "Turtle"),
        12 => ("🐟", "Fish"),
        13 => ("🐙", "Octopus"),
        14 => ("🦋", "Butterfly"),
        15 => ("🌷", "Flower"),
        16 => ("🌳", "Tree"),
        17 => ("🌵", "Cactus"),
        18 => ("🍄", "Mushroom"),
        19 => ("🌏", "Globe"),
        20 => ("🌙", "Moon"),
        21 => ("☁️", "Cloud"),
        22 => ("🔥", "Fire"),
        23 => ("🍌", "Banana"),
        24 => ("🍎", "Apple"),
        25 => ("🍓", "Strawberry"),
        26 => ("🌽", "Corn"),
        27 => ("🍕", "Pizza"),
        28 => ("🎂", "Cake"),
        29 => ("❤️", "Heart"),
        30 => ("😀", "Smiley"),
        31 => ("🤖", "Robot"),
        32 => ("🎩", "Hat"),
        33 => ("👓", "Glasses"),
        34 => ("🔧", "Spanner"),
        35 => ("🎅", "Santa"),
        36 => ("👍", "Thumbs up"),
        37 => ("☂️", "Umbrella"),
        38 => ("⌛", "Hourglass"),
        39 => ("⏰", "Clock"),
        40 => ("🎁", "Gift"),
        41 => ("💡", "Light Bulb"),
        42 => ("📕", "Book"),
        43 => ("✏️", "Pencil"),
        44 => ("📎", "Paperclip"),
        45 => ("✂️", "Scissors"),
        46 => ("🔒", "Lock"),
        47 => ("🔑", "Key"),
        48 => ("🔨", "Hammer"),
        49 => ("☎️", "Telephone"),
        50 => ("🏁", "Flag"),
        51 => ("🚂", "Train"),
        52 => ("🚲", "Bicycle"),
        53 => ("✈️", "Airplane"),
        54 => ("🚀", "Rocket"),
        55 => ("🏆", "Trophy"),
        56 => ("⚽", "Ball"),
        57 => ("🎸", "Guitar"),
        58 => ("🎺", "Trumpet"),
        59 => ("🔔", "Bell"),
        60 => ("⚓", "Anchor"),
        61 => ("🎧", "Headphones"),
        62 => ("📁", "Folder"),
        63 => ("📌", "Pin"),
        _ => panic!("Trying to fetch an emoji outside the allowed range"),
    }
}
