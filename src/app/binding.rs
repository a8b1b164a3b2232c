//! Device Address Binding Cache
//!
//! Maps device instances to the addresses learned from I-Am announcements.
//! The cache is owned by the core loop and mutated only from it; services
//! that need a peer address (ReadProperty clients, You-Are commissioning)
//! consult it instead of broadcasting.
//!
//! Entries age out so a re-addressed device does not keep answering under
//! a stale binding.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use log::debug;

use crate::network::BacnetAddress;

/// Default entry lifetime; refreshed whenever the device announces itself
pub const BINDING_TTL_S: u32 = 900;

#[derive(Debug, Clone)]
struct Binding {
    device_instance: u32,
    address: BacnetAddress,
    max_apdu: u32,
    age_s: u32,
}

/// Bounded cache of device-instance → address bindings
#[derive(Debug)]
pub struct AddressBindingCache {
    bindings: Vec<Binding>,
    capacity: usize,
    ttl_s: u32,
}

impl AddressBindingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            bindings: Vec::new(),
            capacity: capacity.max(1),
            ttl_s: BINDING_TTL_S,
        }
    }

    pub fn set_ttl(&mut self, ttl_s: u32) {
        self.ttl_s = ttl_s.max(1);
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Record or refresh a binding, typically from a received I-Am
    pub fn bind(&mut self, device_instance: u32, address: BacnetAddress, max_apdu: u32) {
        if let Some(binding) = self
            .bindings
            .iter_mut()
            .find(|binding| binding.device_instance == device_instance)
        {
            binding.address = address;
            binding.max_apdu = max_apdu;
            binding.age_s = 0;
            return;
        }
        if self.bindings.len() >= self.capacity {
            // Evict the stalest entry.
            if let Some(oldest) = self
                .bindings
                .iter()
                .enumerate()
                .max_by_key(|(_, binding)| binding.age_s)
                .map(|(index, _)| index)
            {
                let evicted = self.bindings.swap_remove(oldest);
                debug!("evicting binding for device {}", evicted.device_instance);
            }
        }
        self.bindings.push(Binding {
            device_instance,
            address,
            max_apdu,
            age_s: 0,
        });
    }

    /// Drop a binding, e.g. after repeated timeouts toward the device
    pub fn unbind(&mut self, device_instance: u32) {
        self.bindings
            .retain(|binding| binding.device_instance != device_instance);
    }

    /// Look up the address and max-APDU of a device
    pub fn lookup(&self, device_instance: u32) -> Option<(BacnetAddress, u32)> {
        self.bindings
            .iter()
            .find(|binding| binding.device_instance == device_instance)
            .map(|binding| (binding.address, binding.max_apdu))
    }

    /// Reverse lookup: which device answered from this address
    pub fn device_for(&self, address: &BacnetAddress) -> Option<u32> {
        self.bindings
            .iter()
            .find(|binding| binding.address.matches(address))
            .map(|binding| binding.device_instance)
    }

    /// Age all entries; expired bindings are removed
    pub fn tick(&mut self, elapsed_s: u32) {
        let ttl = self.ttl_s;
        self.bindings.retain_mut(|binding| {
            binding.age_s = binding.age_s.saturating_add(elapsed_s);
            binding.age_s < ttl
        });
    }
}

impl Default for AddressBindingCache {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(mac: u8) -> BacnetAddress {
        BacnetAddress::local(&[mac])
    }

    #[test]
    fn test_bind_and_lookup() {
        let mut cache = AddressBindingCache::default();
        cache.bind(1234, address(10), 1476);

        let (bound, max_apdu) = cache.lookup(1234).unwrap();
        assert!(bound.matches(&address(10)));
        assert_eq!(max_apdu, 1476);
        assert_eq!(cache.device_for(&address(10)), Some(1234));
        assert_eq!(cache.lookup(99), None);
    }

    #[test]
    fn test_rebind_refreshes() {
        let mut cache = AddressBindingCache::default();
        cache.bind(1234, address(10), 480);
        cache.tick(800);
        cache.bind(1234, address(11), 1476);
        cache.tick(800);

        // Refreshed at 800 s, so still alive at 1600 s total.
        let (bound, max_apdu) = cache.lookup(1234).unwrap();
        assert!(bound.matches(&address(11)));
        assert_eq!(max_apdu, 1476);
    }

    #[test]
    fn test_expiry() {
        let mut cache = AddressBindingCache::default();
        cache.bind(1, address(1), 1476);
        cache.tick(BINDING_TTL_S);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_stalest() {
        let mut cache = AddressBindingCache::new(2);
        cache.bind(1, address(1), 1476);
        cache.tick(100);
        cache.bind(2, address(2), 1476);
        cache.bind(3, address(3), 1476);

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(1).is_none());
        assert!(cache.lookup(2).is_some());
        assert!(cache.lookup(3).is_some());
    }

    #[test]
    fn test_unbind() {
        let mut cache = AddressBindingCache::default();
        cache.bind(7, address(7), 1476);
        cache.unbind(7);
        assert!(cache.lookup(7).is_none());
    }
}
