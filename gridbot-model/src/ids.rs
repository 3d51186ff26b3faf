//! Opaque string identifiers (spec.md §3: "identifiers are opaque strings").

use derive_more::{Display, From};
use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};

const ALPHANUMERIC: [char; 62] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
    'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
    'V', 'W', 'X', 'Y', 'Z',
];

fn random_alphanumeric(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| *ALPHANUMERIC.choose(&mut rng).expect("ALPHANUMERIC is not empty"))
        .collect()
}

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display, From,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new<S: Into<String>>(id: S) -> Self {
                Self(id.into())
            }

            pub fn random() -> Self {
                Self(random_alphanumeric(16))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(ExchangeAccountId);
opaque_id!(BotId);
opaque_id!(OrderId);
opaque_id!(TradeId);
opaque_id!(RunId);

impl RunId {
    /// A fresh run id, minted every time a Bot leaves DRAFT for WAITING_TRIGGER.
    pub fn fresh() -> Self {
        Self::random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(BotId::random(), BotId::random());
    }
}
