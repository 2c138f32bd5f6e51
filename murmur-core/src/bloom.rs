// SPDX-License-Identifier: MIT OR Apache-2.0

//! Topic bloom filters for mailservers which can't match exact topics.
//!
//! Every topic sets up to three bits in a 512-bit filter. A mailserver delivers an envelope when
//! all bits of the envelope's topic bloom are also set in the requested bloom, which may yield
//! false positives but never false negatives.
use crate::Topic;

/// Size of topic bloom filters in bytes.
pub const BLOOM_FILTER_SIZE: usize = 64;

/// 512-bit topic bloom filter.
pub type Bloom = [u8; BLOOM_FILTER_SIZE];

/// Projects a topic into its bloom filter.
///
/// The first three topic bytes select a bit each, the lowest three bits of the last byte extend
/// the index range to 512. Bits landing in the same byte overwrite each other.
pub fn topic_to_bloom(topic: &Topic) -> Bloom {
    let bytes = topic.as_bytes();
    let mut bloom = [0; BLOOM_FILTER_SIZE];

    for j in 0..3 {
        let mut index = usize::from(bytes[j]);
        if bytes[3] & (1 << j) != 0 {
            index += 256;
        }
        bloom[index / 8] = 1 << (index % 8);
    }

    bloom
}

/// Combines the blooms of all given topics with a bitwise OR.
pub fn topics_to_bloom<'a>(topics: impl IntoIterator<Item = &'a Topic>) -> Bloom {
    topics
        .into_iter()
        .fold([0; BLOOM_FILTER_SIZE], |acc, topic| {
            combine_bloom(&acc, &topic_to_bloom(topic))
        })
}

/// Bitwise OR of two blooms.
pub fn combine_bloom(a: &Bloom, b: &Bloom) -> Bloom {
    let mut result = [0; BLOOM_FILTER_SIZE];
    for (i, byte) in result.iter_mut().enumerate() {
        *byte = a[i] | b[i];
    }
    result
}

/// Returns `true` if every bit set in `sample` is also set in `filter`.
pub fn bloom_match(filter: &Bloom, sample: &Bloom) -> bool {
    filter
        .iter()
        .zip(sample.iter())
        .all(|(f, s)| (f | s) == *f)
}
