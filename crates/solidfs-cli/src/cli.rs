use crate::config::CliConfig;
use crate::extract::{extract, ExtractOptions};
use crate::source_tree::FsSourceTree;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use solidfs_mount::{FileAttr, SolidFs};
use solidfs_reduce::{build, BuildOptions, BuildReport, CompressionAlgorithm, DEFAULT_ZSTD_LEVEL};
use solidfs_storage::{BlockNumWidth, InodeId};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "solidfs")]
#[command(about = "Build and inspect deduplicating compressed filesystem images", long_about = None)]
pub struct Cli {
    /// TOML or JSON settings file.
    #[arg(short, long, global = true, env = "SOLIDFS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Build an image from a directory.
    Build {
        source: PathBuf,
        image: PathBuf,
        #[command(flatten)]
        tuning: BuildFlags,
        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show superblock summary of an image.
    Info {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List a directory inside an image.
    Ls {
        image: PathBuf,
        #[arg(default_value = "/")]
        path: PathBuf,
        #[arg(short, long)]
        long: bool,
        #[arg(short = 'R', long)]
        recursive: bool,
    },
    /// Write a file from an image to stdout.
    Cat { image: PathBuf, path: PathBuf },
    /// Unpack an image, or the given paths inside it, into a directory.
    Extract {
        image: PathBuf,
        dest: PathBuf,
        /// Paths inside the image; each is extracted with everything below it.
        paths: Vec<PathBuf>,
        #[arg(long)]
        preserve_owner: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CompressionArg {
    None,
    Lz4,
    Zstd,
}

/// Build settings that override the config file.
#[derive(Debug, Default, Clone, clap::Args)]
pub struct BuildFlags {
    #[arg(short = 'b', long)]
    pub block_size: Option<u32>,
    #[arg(short = 'f', long)]
    pub fblock_cap: Option<u32>,
    /// Closed fblocks searched for overlapping data.
    #[arg(long)]
    pub search_depth: Option<usize>,
    #[arg(long)]
    pub index_period: Option<u32>,
    /// Bytes per block number (2, 3, 4 or 8).
    #[arg(long)]
    pub width: Option<u8>,
    #[arg(long, value_enum)]
    pub compression: Option<CompressionArg>,
    /// Zstd level.
    #[arg(long)]
    pub level: Option<i32>,
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,
    /// Memory limit for raw fblocks, in MiB.
    #[arg(long)]
    pub memory_mb: Option<u64>,
}

impl BuildFlags {
    pub fn apply(&self, options: &mut BuildOptions) -> Result<()> {
        if let Some(v) = self.block_size {
            options.block_size = v;
        }
        if let Some(v) = self.fblock_cap {
            options.fblock_cap = v;
        }
        if let Some(v) = self.search_depth {
            options.search_depth = v;
        }
        if let Some(v) = self.index_period {
            options.index_period = v;
        }
        if let Some(bytes) = self.width {
            let width = BlockNumWidth::from_bytes(bytes)
                .with_context(|| format!("invalid block number width {}", bytes))?;
            options.blocknum_width = Some(width);
        }
        let current_level = match options.compression {
            CompressionAlgorithm::Zstd { level } => level,
            _ => DEFAULT_ZSTD_LEVEL,
        };
        match self.compression {
            Some(CompressionArg::None) => options.compression = CompressionAlgorithm::None,
            Some(CompressionArg::Lz4) => options.compression = CompressionAlgorithm::Lz4,
            Some(CompressionArg::Zstd) => {
                options.compression = CompressionAlgorithm::Zstd {
                    level: current_level,
                }
            }
            None => {}
        }
        if let Some(level) = self.level {
            match &mut options.compression {
                CompressionAlgorithm::Zstd { level: l } => *l = level,
                other => anyhow::bail!("--level only applies to zstd, not {}", other),
            }
        }
        if let Some(v) = self.workers {
            options.workers = v;
        }
        if let Some(mb) = self.memory_mb {
            options.memory_limit = mb
                .checked_mul(1024 * 1024)
                .with_context(|| format!("--memory-mb {} is too large", mb))?;
        }
        Ok(())
    }
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let config = CliConfig::load(self.config.as_deref())?;
        let mut stdout = std::io::stdout().lock();
        match self.command {
            Command::Build {
                ref source,
                ref image,
                ref tuning,
                json,
            } => {
                let mut options = config.build.clone();
                tuning.apply(&mut options)?;
                let report = build_image(source, image, &options)?;
                if json {
                    writeln!(stdout, "{}", serde_json::to_string_pretty(&report)?)?;
                } else {
                    print_report(&mut stdout, &report)?;
                }
            }
            Command::Info { ref image, json } => {
                let fs = SolidFs::open(image, config.mount.clone())?;
                let info = fs.info();
                if json {
                    writeln!(stdout, "{}", serde_json::to_string_pretty(&info)?)?;
                } else {
                    writeln!(stdout, "Image size:        {}", info.image_len)?;
                    writeln!(stdout, "Format version:    {}", info.version)?;
                    writeln!(stdout, "Block size:        {}", info.block_size)?;
                    writeln!(stdout, "Fblock cap:        {}", info.fblock_cap)?;
                    writeln!(stdout, "Compression:       {}", info.compression)?;
                    writeln!(stdout, "Block number size: {} bytes", info.blocknum_width)?;
                    writeln!(stdout, "Inodes:            {}", info.inode_count)?;
                    writeln!(stdout, "Blocks:            {}", info.block_count)?;
                    writeln!(stdout, "Fblocks:           {}", info.fblock_count)?;
                    writeln!(stdout, "Bytes of files:    {}", info.bytes_of_files)?;
                    writeln!(stdout, "Inode table:       {} bytes", info.inode_table_len)?;
                    writeln!(stdout, "Ratio:             {:.2}", info.ratio())?;
                }
            }
            Command::Ls {
                ref image,
                ref path,
                long,
                recursive,
            } => {
                let fs = SolidFs::open(image, config.mount.clone())?;
                let ino = fs.lookup(path)?;
                let prefix = if fs.getattr(ino)?.is_dir() {
                    PathBuf::new()
                } else {
                    path.clone()
                };
                list(&fs, &mut stdout, ino, &prefix, long, recursive)?;
            }
            Command::Cat {
                ref image,
                ref path,
            } => {
                let fs = SolidFs::open(image, config.mount.clone())?;
                let ino = fs.lookup(path)?;
                cat(&fs, &mut stdout, ino)?;
            }
            Command::Extract {
                ref image,
                ref dest,
                ref paths,
                preserve_owner,
            } => {
                let fs = SolidFs::open(image, config.mount.clone())?;
                let options = ExtractOptions {
                    preserve_owner,
                    paths: paths.clone(),
                };
                let stats = extract(&fs, dest, &options)?;
                tracing::info!(
                    files = stats.files,
                    directories = stats.directories,
                    bytes = stats.bytes,
                    skipped = stats.skipped,
                    "extraction complete"
                );
            }
        }
        stdout.flush()?;
        Ok(())
    }
}

pub fn build_image(source: &Path, image: &Path, options: &BuildOptions) -> Result<BuildReport> {
    let tree = FsSourceTree::new(source)?;
    let report = build(&tree, options, image)
        .with_context(|| format!("building {} from {}", image.display(), source.display()))?;
    Ok(report)
}

fn print_report(out: &mut impl Write, report: &BuildReport) -> Result<()> {
    writeln!(out, "Image:          {} bytes", report.image_len)?;
    writeln!(out, "Files:          {} ({} bytes)", report.tree.files, report.bytes_of_files)?;
    writeln!(out, "Directories:    {}", report.tree.directories)?;
    writeln!(out, "Inodes:         {} ({} shared)", report.inode_count, report.tree.inodes_shared)?;
    writeln!(out, "Blocks:         {}", report.block_count)?;
    writeln!(out, "Fblocks:        {}", report.fblock_count)?;
    writeln!(
        out,
        "Placement:      {} reused, {} overlapped, {} appended",
        report.placement.reused, report.placement.overlapped, report.placement.appended
    )?;
    writeln!(out, "Raw bytes:      {}", report.raw_bytes)?;
    writeln!(out, "Ratio:          {:.2}", report.ratio())?;
    Ok(())
}

/// `ls -l` style line for one entry.
pub fn format_entry(attr: &FileAttr, name: &str, long: bool) -> String {
    if !long {
        return name.to_string();
    }
    let mut perms = String::with_capacity(10);
    perms.push(attr.kind.indicator());
    for shift in [6u32, 3, 0] {
        let bits = (attr.perm as u32 >> shift) & 7;
        perms.push(if bits & 4 != 0 { 'r' } else { '-' });
        perms.push(if bits & 2 != 0 { 'w' } else { '-' });
        perms.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    format!(
        "{} {:>3} {:>5} {:>5} {:>10} {}",
        perms, attr.nlink, attr.uid, attr.gid, attr.size, name
    )
}

fn list(
    fs: &SolidFs,
    out: &mut impl Write,
    ino: InodeId,
    prefix: &Path,
    long: bool,
    recursive: bool,
) -> Result<()> {
    let attr = fs.getattr(ino)?;
    if !attr.is_dir() {
        writeln!(out, "{}", format_entry(&attr, &prefix.display().to_string(), long))?;
        return Ok(());
    }
    let mut subdirs = Vec::new();
    for entry in fs.readdir(ino)? {
        let attr = fs.getattr(entry.ino)?;
        let name = prefix.join(entry.name_lossy());
        let mut line = format_entry(&attr, &name.display().to_string(), long);
        if long && attr.kind == solidfs_mount::FileType::Symlink {
            let target = fs.readlink(entry.ino)?;
            line.push_str(" -> ");
            line.push_str(&String::from_utf8_lossy(&target));
        }
        writeln!(out, "{}", line)?;
        if recursive && attr.is_dir() {
            subdirs.push((entry.ino, name));
        }
    }
    for (child, name) in subdirs {
        list(fs, out, child, &name, long, recursive)?;
    }
    Ok(())
}

pub fn cat(fs: &SolidFs, out: &mut impl Write, ino: InodeId) -> Result<u64> {
    let size = fs.getattr(ino)?.size;
    let mut offset = 0;
    while offset < size {
        let chunk = fs.read(ino, offset, 1024 * 1024)?;
        if chunk.is_empty() {
            break;
        }
        out.write_all(&chunk)?;
        offset += chunk.len() as u64;
    }
    Ok(offset)
}
