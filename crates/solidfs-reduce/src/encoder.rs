//! Image assembly.
//!
//! Layout: a superblock placeholder, the fblock region streamed as the
//! compression pool delivers fblocks, the compressed block table and the
//! compressed bootstrap record. The real superblock is written last, once
//! every offset is known.

use crate::compress_pool::CompressedFblock;
use crate::compression::compress;
use crate::config::BuildOptions;
use crate::context::{BuildContext, FblockSink, FinishedBuild};
use crate::error::ReduceError;
use crate::inode_builder::{InodeBuilder, InodeList};
use crate::source::SourceTree;
use solidfs_storage::{
    blocks_for_size, encode_inode_table, inode_table_len, BlockNumWidth, InodeKind, InodeRecord,
    Section, Superblock, SUPERBLOCK_SIZE,
};
use std::io::{Seek, SeekFrom, Write};
use tracing::debug;

/// Writes length-prefixed fblocks back to back, checking their order.
pub struct RegionWriter<W> {
    out: W,
    start: u64,
    len: u64,
    count: u32,
}

impl<W: Write> RegionWriter<W> {
    /// Starts a region at absolute offset `start`; `out` must be positioned there.
    pub fn new(out: W, start: u64) -> Self {
        Self {
            out,
            start,
            len: 0,
            count: 0,
        }
    }

    /// The writer and the region it produced.
    pub fn into_parts(self) -> (W, Section, u32) {
        let section = Section {
            offset: self.start,
            length: self.len,
        };
        (self.out, section, self.count)
    }
}

impl<W: Write> FblockSink for RegionWriter<W> {
    fn write_fblock(&mut self, fblock: CompressedFblock) -> Result<(), ReduceError> {
        if fblock.id.0 != self.count {
            return Err(ReduceError::CompressionFailed(format!(
                "{} delivered out of order, expected fblock {}",
                fblock.id, self.count
            )));
        }
        let len = u32::try_from(fblock.payload.len()).map_err(|_| {
            ReduceError::CompressionFailed(format!(
                "{} compressed to {} bytes",
                fblock.id,
                fblock.payload.len()
            ))
        })?;
        self.out.write_all(&len.to_le_bytes())?;
        self.out.write_all(&fblock.payload)?;
        self.len += 4 + fblock.payload.len() as u64;
        self.count += 1;
        Ok(())
    }
}

/// Picks the block-number width for the inode table.
///
/// The inode table is itself stored as blocks, so its own blocks count
/// towards the width it needs. The estimate assumes none of them dedupe.
pub fn select_width(
    blocks_before: u64,
    records: &[InodeRecord],
    block_size: u32,
    forced: Option<BlockNumWidth>,
) -> Result<BlockNumWidth, ReduceError> {
    let estimate = |width: BlockNumWidth| {
        blocks_before + blocks_for_size(inode_table_len(records, width) as u64, block_size)
    };
    if let Some(width) = forced {
        if !width.fits(estimate(width)) {
            return Err(ReduceError::InvalidConfig(format!(
                "{} blocks do not fit {}-byte block numbers",
                estimate(width),
                width.bytes()
            )));
        }
        return Ok(width);
    }
    let mut width = BlockNumWidth::smallest_for(blocks_before);
    loop {
        let needed = BlockNumWidth::smallest_for(estimate(width));
        if needed <= width {
            return Ok(width);
        }
        width = needed;
    }
}

/// Everything the encoder learned while writing an image.
pub struct EncodedImage<W> {
    /// The output, positioned at the end of the image.
    pub out: W,
    /// The final superblock.
    pub superblock: Superblock,
    /// Tree walk results.
    pub inodes: InodeList,
    /// Context results, minus the sink.
    pub finished: FinishedBuild<()>,
}

/// Writes a complete image for `source` into `out`, which must be empty
/// and positioned at offset 0.
pub fn encode_image<W: Write + Seek>(
    source: &dyn SourceTree,
    options: &BuildOptions,
    mut out: W,
) -> Result<EncodedImage<W>, ReduceError> {
    options.validate()?;
    out.write_all(&[0u8; SUPERBLOCK_SIZE])?;
    let region = RegionWriter::new(out, SUPERBLOCK_SIZE as u64);
    let mut ctx = BuildContext::new(options, region)?;

    let inodes = InodeBuilder::new().build(&mut ctx, source)?;
    let width = select_width(
        ctx.block_count(),
        &inodes.records,
        options.block_size,
        options.blocknum_width,
    )?;
    let inode_table = encode_inode_table(&inodes.records, width)?;
    let table_blocks = ctx.blockify_bytes(&inode_table)?;
    let finished = ctx.finish()?;

    let FinishedBuild {
        table,
        sink,
        fblock_count,
        placement,
        index,
        store,
    } = finished;
    let (mut out, fblock_region, written) = sink.into_parts();
    if written != fblock_count {
        return Err(ReduceError::CompressionFailed(format!(
            "{} of {} fblocks written",
            written, fblock_count
        )));
    }

    let mut sb = Superblock::new(options.block_size, options.fblock_cap, options.compression.code());
    sb.blocknum_width = width;
    sb.block_count = table.len();
    sb.inode_count = inodes.records.len() as u64;
    sb.fblock_count = fblock_count;
    sb.fblock_region = fblock_region;
    sb.bytes_of_files = inodes.stats.bytes_of_files;

    let table_payload = compress(&table.encode(), options.compression)?;
    out.write_all(&table_payload)?;
    sb.block_table = Section {
        offset: fblock_region.end(),
        length: table_payload.len() as u64,
    };

    let bootstrap = InodeRecord {
        kind: InodeKind::File,
        perm: 0,
        nlink: 1,
        rdev: 0,
        uid: 0,
        gid: 0,
        mtime: 0,
        size: inode_table.len() as u64,
        blocks: table_blocks,
    };
    let mut bootstrap_raw = Vec::with_capacity(bootstrap.encoded_len(width));
    bootstrap.encode_into(&mut bootstrap_raw, width)?;
    if bootstrap_raw.len() > sb.bootstrap_limit() {
        return Err(ReduceError::InvalidConfig(format!(
            "inode table needs a {}-byte root record, limit is {}; raise the block size or fblock cap",
            bootstrap_raw.len(),
            sb.bootstrap_limit()
        )));
    }
    let bootstrap_payload = compress(&bootstrap_raw, options.compression)?;
    out.write_all(&bootstrap_payload)?;
    sb.bootstrap = Section {
        offset: sb.block_table.end(),
        length: bootstrap_payload.len() as u64,
    };
    sb.image_len = sb.bootstrap.end();
    sb.validate_layout()?;

    out.seek(SeekFrom::Start(0))?;
    out.write_all(&sb.to_bytes())?;
    out.seek(SeekFrom::Start(sb.image_len))?;
    out.flush()?;
    debug!(
        image_len = sb.image_len,
        blocks = sb.block_count,
        fblocks = sb.fblock_count,
        width = width.bytes(),
        "image encoded"
    );

    Ok(EncodedImage {
        out,
        superblock: sb,
        inodes,
        finished: FinishedBuild {
            table,
            sink: (),
            fblock_count,
            placement,
            index,
            store,
        },
    })
}
