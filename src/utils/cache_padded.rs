//! Cache-line alignment helpers

/// Cache line size assumed for padding decisions
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache-line padded wrapper for avoiding false sharing.
#[repr(C, align(64))]
#[derive(Debug, Default)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    pub fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T> std::ops::Deref for CachePadded<T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> std::ops::DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.value
    }
}

const _: () = assert!(std::mem::align_of::<CachePadded<u8>>() == CACHE_LINE_SIZE);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_padded_array_elements_do_not_share_lines() {
        let slots: Vec<CachePadded<AtomicU64>> =
            (0..4).map(|_| CachePadded::new(AtomicU64::new(0))).collect();

        let a = &slots[0] as *const _ as usize;
        let b = &slots[1] as *const _ as usize;
        assert_eq!(a % CACHE_LINE_SIZE, 0);
        assert_eq!(b - a, CACHE_LINE_SIZE);
    }
}
