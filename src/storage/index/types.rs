use crate::common::rid::Rid;
use std::cmp::Ordering;
use std::fmt::Debug;

/// Fixed-width byte codec for B+Tree keys. Index pages live inside raw page
/// buffers, so every key type must encode to a known number of bytes.
pub trait IndexKey: Clone + Debug + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    /// Writes the key into `buf`, which is exactly `ENCODED_SIZE` bytes.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a key back out of `buf`.
    fn decode(buf: &[u8]) -> Self;
}

/// Fixed-width byte codec for B+Tree leaf values.
pub trait IndexValue: Clone + Debug + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

/// Total order over keys. Any `Fn(&K, &K) -> Ordering` closure or function
/// pointer qualifies.
pub trait KeyComparator<K>: Fn(&K, &K) -> Ordering + Clone + Send + Sync + 'static {}

impl<K, F> KeyComparator<K> for F where F: Fn(&K, &K) -> Ordering + Clone + Send + Sync + 'static {}

macro_rules! impl_int_codec {
    ($($t:ty),*) => {
        $(
            impl IndexKey for $t {
                const ENCODED_SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    <$t>::from_le_bytes(buf.try_into().unwrap())
                }
            }

            impl IndexValue for $t {
                const ENCODED_SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    <$t>::from_le_bytes(buf.try_into().unwrap())
                }
            }
        )*
    };
}

impl_int_codec!(i32, i64, u32, u64);

impl IndexValue for Rid {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.page_id().to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot_num().to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        let page_id = i32::from_le_bytes(buf[0..4].try_into().unwrap());
        let slot_num = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        Rid::new(page_id, slot_num)
    }
}
