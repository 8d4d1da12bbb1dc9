//! Relay-level identity assignment: random client ids and the fixed
//! nickname pool devices are labeled from.

use rand::Rng;
use rand::distr::Alphanumeric;
use rand::seq::IndexedRandom;

pub const CLIENT_ID_LEN: usize = 8;

/// Nicknames shown next to connected devices.
const NICKNAMES: &[&str] = &[
    "Falcon", "Otter", "Lynx", "Heron", "Badger", "Orca", "Puffin", "Marten", "Ibex", "Raven",
    "Gecko", "Bison", "Osprey", "Stoat", "Narwhal", "Kestrel", "Walrus", "Magpie", "Fennec",
    "Tern", "Quokka", "Viper", "Wombat", "Egret",
];

/// Random fixed-length alphanumeric client id. Collision-resistant for
/// the lifetime of a beam, not globally unique.
pub fn random_client_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CLIENT_ID_LEN)
        .map(char::from)
        .collect()
}

pub fn pick_nickname() -> &'static str {
    NICKNAMES
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or("Device")
}
