use crate::{PageAccess, PageRemovalStrategy, RemovalResult};

/// Never evicts: pages stay resident until the store is reset or disposed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hoarding;

impl PageRemovalStrategy for Hoarding {
    fn on_access(&mut self, _access: PageAccess) -> RemovalResult {
        Ok(None)
    }
}
