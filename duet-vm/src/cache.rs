//! Translation-block cache.
//!
//! The front-end hands every optimized block over exactly once per
//! translation; the cache parses it then and serves the parsed form to every
//! later execution. The cache is append-only during a run and never evicts:
//! re-parsing on eviction would be possible, but losing and re-learning
//! blocks would silently distort coverage, so hitting capacity is fatal
//! instead.

use duet_ir::{parse_block, BlockId, IrBlock};
use hashbrown::HashMap;

use crate::{
    consts::BLOCK_CACHE_CAPACITY,
    error::{EngineError, EngineResult},
};

/// Cache of parsed translation blocks, keyed by the emulator's opaque block
/// identity.
#[derive(Debug, Default)]
pub struct BlockCache {
    blocks: HashMap<BlockId, IrBlock>,
}

impl BlockCache {
    /// Empty cache.
    pub fn new() -> Self {
        BlockCache {
            blocks: HashMap::new(),
        }
    }

    /// Parse and insert a block, replacing any earlier parse of the same
    /// identity (the front-end re-optimizes blocks in place).
    pub fn insert(&mut self, id: BlockId, ops: &[duet_ir::raw::RawOp]) -> EngineResult<&IrBlock> {
        if !self.blocks.contains_key(&id) && self.blocks.len() >= BLOCK_CACHE_CAPACITY {
            return Err(EngineError::CacheCapacity);
        }
        let block = parse_block(id, ops)?;
        Ok(self.blocks.entry(id).insert(block).into_mut())
    }

    /// Fetch a previously parsed block.
    pub fn get(&self, id: BlockId) -> EngineResult<&IrBlock> {
        self.blocks.get(&id).ok_or(EngineError::UnknownBlock(id))
    }

    /// Number of cached blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_ir::raw::{RawArg, RawOp, RawOpcode};

    fn exit_block() -> Vec<RawOp> {
        vec![RawOp::Op {
            opc: RawOpcode::ExitTb,
            args: vec![RawArg::Imm(0)],
        }]
    }

    #[test]
    fn insert_then_get() {
        let mut cache = BlockCache::new();
        let ops = exit_block();
        cache.insert(0x1000, &ops).unwrap();
        assert_eq!(cache.get(0x1000).unwrap().id(), 0x1000);
        assert!(matches!(
            cache.get(0x2000),
            Err(EngineError::UnknownBlock(0x2000))
        ));
    }

    #[test]
    fn reinsert_replaces_instructions() {
        let mut cache = BlockCache::new();
        let ops = exit_block();
        cache.insert(0x1000, &ops).unwrap();

        let ops = vec![
            RawOp::Op {
                opc: RawOpcode::InsnStart,
                args: vec![RawArg::Imm(0x40_0000)],
            },
            RawOp::Op {
                opc: RawOpcode::ExitTb,
                args: vec![RawArg::Imm(0)],
            },
        ];
        cache.insert(0x1000, &ops).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(0x1000).unwrap().insts().len(), 2);
    }
}
