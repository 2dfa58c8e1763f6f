//! Client id to service id translation.
//!
//! Clients name every object with ids they pick themselves; the driver hands
//! out its own. A mapping is a bijection per category: neither side may be
//! bound twice.

use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct IdMap {
    client_to_service: HashMap<u32, u32>,
    service_to_client: HashMap<u32, u32>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails, leaving the table untouched, if either id is already bound.
    pub fn add_mapping(&mut self, client_id: u32, service_id: u32) -> bool {
        if self.client_to_service.contains_key(&client_id)
            || self.service_to_client.contains_key(&service_id)
        {
            return false;
        }
        self.client_to_service.insert(client_id, service_id);
        self.service_to_client.insert(service_id, client_id);
        true
    }

    /// Removes the pair only if `client_id` is bound to exactly `service_id`.
    pub fn remove_mapping(&mut self, client_id: u32, service_id: u32) -> bool {
        if self.client_to_service.get(&client_id) != Some(&service_id) {
            return false;
        }
        self.client_to_service.remove(&client_id);
        self.service_to_client.remove(&service_id);
        true
    }

    pub fn get_service_id(&self, client_id: u32) -> Option<u32> {
        self.client_to_service.get(&client_id).copied()
    }

    pub fn get_client_id(&self, service_id: u32) -> Option<u32> {
        self.service_to_client.get(&service_id).copied()
    }

    pub fn contains_client_id(&self, client_id: u32) -> bool {
        self.client_to_service.contains_key(&client_id)
    }

    pub fn len(&self) -> usize {
        self.client_to_service.len()
    }

    pub fn is_empty(&self) -> bool {
        self.client_to_service.is_empty()
    }

    /// Every `(client, service)` pair, in no particular order.
    pub fn pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.client_to_service.iter().map(|(&c, &s)| (c, s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
    Program,
    Shader,
    Framebuffer,
    Renderbuffer,
}

/// One [`IdMap`] per object category of a share group.
#[derive(Debug, Default)]
pub struct ResourceIds {
    pub buffers: IdMap,
    pub textures: IdMap,
    pub programs: IdMap,
    pub shaders: IdMap,
    pub framebuffers: IdMap,
    pub renderbuffers: IdMap,
}

impl ResourceIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map(&self, kind: ResourceKind) -> &IdMap {
        match kind {
            ResourceKind::Buffer => &self.buffers,
            ResourceKind::Texture => &self.textures,
            ResourceKind::Program => &self.programs,
            ResourceKind::Shader => &self.shaders,
            ResourceKind::Framebuffer => &self.framebuffers,
            ResourceKind::Renderbuffer => &self.renderbuffers,
        }
    }

    pub fn map_mut(&mut self, kind: ResourceKind) -> &mut IdMap {
        match kind {
            ResourceKind::Buffer => &mut self.buffers,
            ResourceKind::Texture => &mut self.textures,
            ResourceKind::Program => &mut self.programs,
            ResourceKind::Shader => &mut self.shaders,
            ResourceKind::Framebuffer => &mut self.framebuffers,
            ResourceKind::Renderbuffer => &mut self.renderbuffers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn second_mapping_for_a_client_id_fails() {
        let mut map = IdMap::new();
        assert!(map.add_mapping(1, 100));
        assert!(!map.add_mapping(1, 200));
        assert_eq!(map.get_service_id(1), Some(100));
        assert_eq!(map.get_client_id(200), None);
        assert!(!map.add_mapping(2, 100));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn remove_requires_the_exact_pair() {
        let mut map = IdMap::new();
        map.add_mapping(3, 30);
        assert!(!map.remove_mapping(3, 31));
        assert!(map.remove_mapping(3, 30));
        assert!(map.is_empty());
        assert!(map.add_mapping(3, 31));
    }

    #[test]
    fn categories_are_independent() {
        let mut ids = ResourceIds::new();
        assert!(ids.map_mut(ResourceKind::Buffer).add_mapping(1, 1));
        assert!(ids.map_mut(ResourceKind::Texture).add_mapping(1, 1));
        assert_eq!(ids.map(ResourceKind::Shader).get_service_id(1), None);
    }

    proptest! {
        #[test]
        fn mappings_stay_one_to_one(ops in proptest::collection::vec((any::<bool>(), 0u32..8, 0u32..8), 0..64)) {
            let mut map = IdMap::new();
            for (add, client_id, service_id) in ops {
                if add {
                    map.add_mapping(client_id, service_id);
                } else {
                    map.remove_mapping(client_id, service_id);
                }
                let mut bound = 0;
                for c in 0..8 {
                    if let Some(s) = map.get_service_id(c) {
                        prop_assert_eq!(map.get_client_id(s), Some(c));
                        bound += 1;
                    }
                }
                prop_assert_eq!(map.len(), bound);
            }
        }
    }
}
