//! Assignment of dense block numbers to data locators.

use solidfs_storage::{encode_block_table, BlockNumber, DataLocator};
use std::collections::HashMap;

/// Block number → locator table built during encoding.
#[derive(Debug, Default)]
pub struct BlockTable {
    locators: Vec<DataLocator>,
    by_locator: HashMap<DataLocator, BlockNumber>,
}

impl BlockTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number for `locator`: the existing one if it was registered before,
    /// otherwise the next dense number.
    pub fn register(&mut self, locator: DataLocator) -> BlockNumber {
        if let Some(&block) = self.by_locator.get(&locator) {
            return block;
        }
        let block = BlockNumber(self.locators.len() as u64);
        self.locators.push(locator);
        self.by_locator.insert(locator, block);
        block
    }

    /// Locator of a registered block.
    pub fn get(&self, block: BlockNumber) -> Option<DataLocator> {
        self.locators.get(block.0 as usize).copied()
    }

    /// Number of blocks.
    pub fn len(&self) -> u64 {
        self.locators.len() as u64
    }

    /// True before the first registration.
    pub fn is_empty(&self) -> bool {
        self.locators.is_empty()
    }

    /// Locators in block-number order.
    pub fn locators(&self) -> &[DataLocator] {
        &self.locators
    }

    /// Uncompressed on-disk form.
    pub fn encode(&self) -> Vec<u8> {
        encode_block_table(&self.locators)
    }
}
