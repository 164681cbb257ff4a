//! Tracking color palette and the pool that hands colors out to controllers

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FusionError, Result};

/// Optical identification color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrackingColorId {
    Magenta,
    Cyan,
    Yellow,
    Red,
    Green,
    Blue,
    Custom0,
    Custom1,
    Custom2,
    Custom3,
    Custom4,
    Custom5,
    Custom6,
    Custom7,
    Custom8,
    Custom9,
}

impl TrackingColorId {
    /// Colors handed out by [`TrackingColorAllocator::allocate`], in preference order
    pub const PALETTE: [TrackingColorId; 6] = [
        TrackingColorId::Magenta,
        TrackingColorId::Cyan,
        TrackingColorId::Yellow,
        TrackingColorId::Red,
        TrackingColorId::Green,
        TrackingColorId::Blue,
    ];

    /// LED color for the fixed palette entries; custom slots have no fixed RGB
    pub fn led_rgb(self) -> Option<[u8; 3]> {
        match self {
            TrackingColorId::Magenta => Some([0xFF, 0x00, 0xFF]),
            TrackingColorId::Cyan => Some([0x00, 0xFF, 0xFF]),
            TrackingColorId::Yellow => Some([0xFF, 0xFF, 0x00]),
            TrackingColorId::Red => Some([0xFF, 0x00, 0x00]),
            TrackingColorId::Green => Some([0x00, 0xFF, 0x00]),
            TrackingColorId::Blue => Some([0x00, 0x00, 0xFF]),
            _ => None,
        }
    }
}

/// Pool of tracking colors shared by all controllers.
///
/// A color has at most one owner. Ownership changes only through [`allocate`],
/// [`claim`] and [`free`], all serialized by one lock.
///
/// [`allocate`]: TrackingColorAllocator::allocate
/// [`claim`]: TrackingColorAllocator::claim
/// [`free`]: TrackingColorAllocator::free
#[derive(Debug, Default)]
pub struct TrackingColorAllocator {
    owners: Mutex<HashMap<TrackingColorId, usize>>,
}

impl TrackingColorAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand the first unowned palette color to `controller_id`
    pub fn allocate(&self, controller_id: usize) -> Result<TrackingColorId> {
        let mut owners = self.owners.lock();
        let color = TrackingColorId::PALETTE
            .into_iter()
            .find(|color| !owners.contains_key(color))
            .ok_or_else(|| {
                warn!(controller_id, "tracking color pool exhausted");
                FusionError::TrackingColorsExhausted(controller_id)
            })?;
        owners.insert(color, controller_id);
        debug!(controller_id, ?color, "allocated tracking color");
        Ok(color)
    }

    /// Take `color` for `controller_id`, revoking any previous owner.
    ///
    /// Returns the controller that lost the color, if another one held it.
    pub fn claim(&self, controller_id: usize, color: TrackingColorId) -> Option<usize> {
        let previous = self.owners.lock().insert(color, controller_id);
        match previous {
            Some(owner) if owner != controller_id => {
                warn!(controller_id, previous_owner = owner, ?color, "tracking color taken from another controller");
                Some(owner)
            }
            _ => None,
        }
    }

    /// Return `color` to the pool if `controller_id` owns it
    pub fn free(&self, controller_id: usize, color: TrackingColorId) -> bool {
        let mut owners = self.owners.lock();
        if owners.get(&color) == Some(&controller_id) {
            owners.remove(&color);
            debug!(controller_id, ?color, "freed tracking color");
            true
        } else {
            false
        }
    }

    pub fn owner_of(&self, color: TrackingColorId) -> Option<usize> {
        self.owners.lock().get(&color).copied()
    }

    /// Palette colors nobody owns
    pub fn available(&self) -> Vec<TrackingColorId> {
        let owners = self.owners.lock();
        TrackingColorId::PALETTE
            .into_iter()
            .filter(|color| !owners.contains_key(color))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_allocate_in_palette_order_until_exhausted() {
        let allocator = TrackingColorAllocator::new();
        for (controller, expected) in TrackingColorId::PALETTE.into_iter().enumerate() {
            assert_eq!(allocator.allocate(controller).unwrap(), expected);
        }
        assert_eq!(allocator.allocate(99), Err(FusionError::TrackingColorsExhausted(99)));
    }

    #[test]
    fn test_free_requires_ownership() {
        let allocator = TrackingColorAllocator::new();
        let color = allocator.allocate(0).unwrap();

        assert!(!allocator.free(1, color));
        assert_eq!(allocator.owner_of(color), Some(0));
        assert!(allocator.free(0, color));
        assert_eq!(allocator.owner_of(color), None);
        assert_eq!(allocator.allocate(1).unwrap(), color);
    }

    #[test]
    fn test_claim_transfers_ownership() {
        let allocator = TrackingColorAllocator::new();
        assert_eq!(allocator.claim(0, TrackingColorId::Custom3), None);
        assert_eq!(allocator.claim(0, TrackingColorId::Custom3), None);
        assert_eq!(allocator.claim(1, TrackingColorId::Custom3), Some(0));
        assert_eq!(allocator.owner_of(TrackingColorId::Custom3), Some(1));
    }

    #[test]
    fn test_concurrent_allocations_never_share_a_color() {
        let allocator = Arc::new(TrackingColorAllocator::new());
        let handles: Vec<_> = (0..6)
            .map(|controller| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || allocator.allocate(controller).unwrap())
            })
            .collect();

        let mut colors: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        colors.sort();
        colors.dedup();
        assert_eq!(colors.len(), 6);
        assert!(allocator.available().is_empty());
    }

    #[test]
    fn test_custom_slots_have_no_led_color() {
        assert_eq!(TrackingColorId::Red.led_rgb(), Some([0xFF, 0, 0]));
        assert_eq!(TrackingColorId::Custom0.led_rgb(), None);
    }
}
