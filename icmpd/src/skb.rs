//! Host packet buffer with shared, copy-on-write storage.

use icmpd_common::PacketBuffer;
use std::sync::Arc;

/// Packet bytes starting at the network header.
///
/// Clones share storage. [`PacketBuffer::make_writable`] gives this handle a
/// private copy first if anyone else still holds the bytes, so a rewrite
/// through one handle is never visible through another.
#[derive(Debug, Clone)]
pub struct SkBuff {
    data: Arc<Vec<u8>>,
}

impl SkBuff {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    /// A second handle onto the same bytes.
    pub fn clone_shared(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }

    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.data) > 1
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        Arc::try_unwrap(self.data).unwrap_or_else(|shared| shared.as_ref().clone())
    }
}

impl PacketBuffer for SkBuff {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn make_writable(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.data.len() {
            return None;
        }
        if Arc::get_mut(&mut self.data).is_none() {
            let mut private = Vec::new();
            private.try_reserve_exact(self.data.len()).ok()?;
            private.extend_from_slice(&self.data);
            self.data = Arc::new(private);
        }
        Arc::get_mut(&mut self.data).map(Vec::as_mut_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_buffer_is_written_in_place() {
        let mut skb = SkBuff::new(vec![1, 2, 3, 4]);
        let ptr = skb.as_bytes().as_ptr();
        skb.make_writable(4).unwrap()[0] = 9;
        assert_eq!(skb.as_bytes(), &[9, 2, 3, 4]);
        assert_eq!(skb.as_bytes().as_ptr(), ptr);
    }

    #[test]
    fn test_shared_buffer_is_copied_before_write() {
        let original = SkBuff::new(vec![1, 2, 3, 4]);
        let mut copy = original.clone_shared();
        assert!(original.is_shared());

        copy.make_writable(4).unwrap()[0] = 9;
        assert_eq!(copy.as_bytes(), &[9, 2, 3, 4]);
        assert_eq!(original.as_bytes(), &[1, 2, 3, 4]);
        assert!(!original.is_shared());
    }

    #[test]
    fn test_oversized_request_is_refused() {
        let mut skb = SkBuff::new(vec![0; 8]);
        assert!(skb.make_writable(9).is_none());
    }
}
