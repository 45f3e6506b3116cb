//! Bundles the range allocator (§4.B) with the seven per-class pools
//! (§4.C) behind one small facade that insert/delete/optimise share.
//! Leaves are variable-sized and always go straight to the range allocator.

use crate::allocator::{RangeAllocator, Span};
use crate::node::{Constants, NodeClass};
use crate::pool::Pool;

pub struct Store {
    pub range: RangeAllocator,
    pools: [Pool; 7],
}

const INNER_CLASSES: [NodeClass; 7] = [
    NodeClass::N4,
    NodeClass::N8,
    NodeClass::N16,
    NodeClass::N32,
    NodeClass::N64,
    NodeClass::N128,
    NodeClass::N256,
];

fn pool_index(class: NodeClass) -> usize {
    INNER_CLASSES
        .iter()
        .position(|&c| c == class)
        .expect("leaf class has no pool")
}

impl Store {
    pub fn new(capacity: u64, c: &Constants) -> Self {
        Store {
            range: RangeAllocator::new(capacity),
            pools: INNER_CLASSES.map(|class| Pool::new(class.node_size(c))),
        }
    }

    pub fn load(used: &[Span], capacity: u64, c: &Constants) -> Self {
        Store {
            range: RangeAllocator::load(used, capacity),
            pools: INNER_CLASSES.map(|class| Pool::new(class.node_size(c))),
        }
    }

    pub fn alloc_inner(&mut self, class: NodeClass) -> u64 {
        self.pools[pool_index(class)].alloc(&mut self.range)
    }

    pub fn free_inner(&mut self, class: NodeClass, addr: u64) {
        self.pools[pool_index(class)].free(addr, &mut self.range);
    }

    pub fn alloc_leaf(&mut self, size: u64) -> u64 {
        self.range.alloc(size)
    }

    pub fn free_leaf(&mut self, addr: u64, size: u64) {
        self.range.free(addr, size);
    }

    pub fn shrink(&mut self) -> Option<u64> {
        self.range.shrink()
    }
}
