// LNP/BP Core Library implementing LNPBP specifications & standards
// Written in 2020-2024 by
//     Dr. Maxim Orlovsky <orlovsky@pandoracore.com>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License
// along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! The "shachain" compact storage scheme for per-commitment secrets: rather
//! than keeping one secret per revoked commitment, at most 49 secrets are
//! kept (one per bit position), each usable to derive every secret beneath
//! it in the implied binary tree.

use bitcoin::hashes::{sha256, Hash};

const SEED_BITS: u8 = 48;

fn flip_bit(mut value: [u8; 32], bit: u8) -> [u8; 32] {
    let byte = (bit / 8) as usize;
    value[byte] ^= 1 << (bit % 8);
    value
}

/// Derives the secret at `index` from a secret known to be valid at
/// `from_index`, provided `from_index` is an ancestor of `index` in the
/// shachain tree (every bit set in `from_index` is also set in `index`, at
/// or above the lowest bit at which they first differ).
fn derive_from(
    from_secret: [u8; 32],
    from_index: u64,
    index: u64,
) -> Option<[u8; 32]> {
    if (from_index & index) != from_index {
        return None;
    }

    let mut secret = from_secret;
    for bit in (0..SEED_BITS).rev() {
        if (index >> bit) & 1 != (from_index >> bit) & 1 {
            secret = flip_bit(secret, bit);
            secret = sha256::Hash::hash(&secret).into_inner();
        }
    }
    Some(secret)
}

/// Owns our own per-commitment secrets: a pure function from a seed and an
/// index to the secret at that index, with nothing to store.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ShachainProducer {
    seed: [u8; 32],
}

impl ShachainProducer {
    pub fn new(seed: [u8; 32]) -> Self {
        ShachainProducer { seed }
    }

    /// Derives the per-commitment secret for commitment `index`, counting
    /// down from `0xFFFFFFFFFFFF` per BOLT-3's producer algorithm.
    pub fn derive(&self, index: u64) -> [u8; 32] {
        derive_from(self.seed, 0, index)
            .expect("a full 48-bit seed is an ancestor of every index")
    }
}

/// Error returned when a counterparty reveals a secret for an index whose
/// derivation cannot be verified against secrets we already hold, i.e.
/// either it is not a descendant of a previously stored secret, or it
/// re-reveals an index we hold but hashes to a different value.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Display, Error)]
#[display(doc_comments)]
pub enum InsertSecretError {
    /// revealed secret for index {index} is inconsistent with previously
    /// stored secret at index {known_index}
    InconsistentSecret { index: u64, known_index: u64 },
}

/// Compact storage of the counterparty's revealed per-commitment secrets:
/// each newly inserted secret replaces every stored secret it can itself
/// derive, so at most 49 entries are ever held regardless of channel
/// lifetime.
#[derive(Clone, Default, Debug)]
pub struct ShachainConsumer {
    known: Vec<(u64, [u8; 32])>,
}

impl ShachainConsumer {
    pub fn new() -> Self {
        ShachainConsumer { known: Vec::new() }
    }

    /// Inserts a secret revealed for `index`, verifying it is consistent
    /// with everything already known, then compacting storage by dropping
    /// any entries the new secret can itself derive.
    pub fn insert(
        &mut self,
        index: u64,
        secret: [u8; 32],
    ) -> Result<(), InsertSecretError> {
        for &(known_index, known_secret) in &self.known {
            if let Some(derived) = derive_from(secret, index, known_index) {
                if derived != known_secret {
                    return Err(InsertSecretError::InconsistentSecret {
                        index,
                        known_index,
                    });
                }
            }
        }

        self.known.retain(|&(known_index, _)| {
            derive_from(secret, index, known_index).is_none()
        });
        self.known.push((index, secret));
        Ok(())
    }

    /// Retrieves (deriving if necessary) the secret for `index`, if it is
    /// reachable from some secret already stored.
    pub fn get(&self, index: u64) -> Option<[u8; 32]> {
        self.known.iter().find_map(|&(known_index, known_secret)| {
            derive_from(known_secret, known_index, index)
        })
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn producer_is_deterministic() {
        let producer = ShachainProducer::new([9u8; 32]);
        assert_eq!(producer.derive(42), producer.derive(42));
        assert_ne!(producer.derive(42), producer.derive(43));
    }

    #[test]
    fn consumer_stores_and_derives_descendants() {
        let producer = ShachainProducer::new([3u8; 32]);
        let mut consumer = ShachainConsumer::new();

        consumer.insert(0xFFFFFFFFFFFF, producer.derive(0xFFFFFFFFFFFF)).unwrap();
        consumer.insert(0xFFFFFFFFFFFE, producer.derive(0xFFFFFFFFFFFE)).unwrap();

        assert_eq!(
            consumer.get(0xFFFFFFFFFFFF),
            Some(producer.derive(0xFFFFFFFFFFFF))
        );
        assert_eq!(
            consumer.get(0xFFFFFFFFFFFE),
            Some(producer.derive(0xFFFFFFFFFFFE))
        );
        assert_eq!(consumer.len(), 2);
    }

    #[test]
    fn consumer_compacts_ancestor_into_single_entry() {
        let producer = ShachainProducer::new([5u8; 32]);
        let mut consumer = ShachainConsumer::new();

        // index 0 is an ancestor of every index, so storing its secret
        // should let us derive all others from one entry.
        consumer.insert(0, producer.derive(0)).unwrap();
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer.get(12345), Some(producer.derive(12345)));
    }

    #[test]
    fn consumer_rejects_inconsistent_secret() {
        let mut consumer = ShachainConsumer::new();
        consumer.insert(0, [1u8; 32]).unwrap();
        // Index 1 is a descendant of 0, so its secret is fully determined;
        // supplying an unrelated value must be rejected.
        let err = consumer.insert(1, [2u8; 32]).unwrap_err();
        assert_eq!(
            err,
            InsertSecretError::InconsistentSecret {
                index: 1,
                known_index: 0,
            }
        );
    }
}
