use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use cabfdi::{
    Cabinet, CompressionType, Extractor, FileEntry, Handler, Notification,
    Reply, VolumeError,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Lists or extracts the files of a cabinet, following its set into later
/// cabinets when a file spans them.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// The cabinet to read.
    cabinet: PathBuf,

    /// Directory to extract into.
    #[arg(short, long, default_value = ".")]
    dest: PathBuf,

    /// List the files instead of extracting them.
    #[arg(short, long)]
    list: bool,

    /// Log progress (or set RUST_LOG for finer control).
    #[arg(short, long)]
    verbose: bool,
}

struct ToDirectory {
    dest: PathBuf,
    retried: bool,
}

impl Handler for ToDirectory {
    type Volume = File;
    type Output = File;

    fn open_volume(&mut self, path: &Path) -> io::Result<File> {
        File::open(path)
    }

    fn notify(&mut self, notification: Notification<'_, File>) -> Reply<File> {
        match notification {
            Notification::CabinetInfo { path, info, .. } => {
                println!(
                    "cabinet {} (set {:#06x}, #{})",
                    path.display(),
                    info.set_id,
                    info.set_index
                );
                Reply::Continue
            }
            Notification::PartialFile { file, previous } => {
                let from = previous.map(|name| name.cabinet.as_str());
                println!("  skipping {} (starts in {})", file.name(), from.unwrap_or("?"));
                Reply::Continue
            }
            Notification::CopyFile { file } => match self.create(file) {
                Ok(output) => Reply::Extract(output),
                Err(error) => {
                    eprintln!("cannot create {}: {:#}", file.name(), error);
                    Reply::Abort
                }
            },
            Notification::CloseFile { file, execute, .. } => {
                println!(
                    "  extracted {}{}",
                    file.name(),
                    if execute { " (run after extraction)" } else { "" }
                );
                Reply::Continue
            }
            Notification::NextCabinet { next, path, error } => {
                if error == VolumeError::None {
                    return Reply::Continue;
                }
                eprintln!(
                    "cannot use {} from {} ({:?})",
                    next.cabinet,
                    path.display(),
                    error
                );
                // Try the destination directory once before giving up.
                if self.retried {
                    Reply::Abort
                } else {
                    self.retried = true;
                    *path = self.dest.clone();
                    Reply::Continue
                }
            }
            Notification::Enumerate { .. } => Reply::Continue,
        }
    }
}

impl ToDirectory {
    fn create(&self, file: &FileEntry) -> anyhow::Result<File> {
        let path = self.dest.join(relative_path(file.name()));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        File::create(&path).with_context(|| format!("creating {}", path.display()))
    }
}

/// Turns a stored name into a path that stays inside the destination:
/// only plain components are kept, so ".." and absolute names cannot
/// escape it.
fn relative_path(name: &str) -> PathBuf {
    name.split('\\')
        .flat_map(|part| Path::new(part).components())
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn list(path: &Path) -> anyhow::Result<()> {
    let cabinet = Cabinet::new(File::open(path)?).context("Failed to open cabinet file")?;
    for (index, folder) in cabinet.folder_entries().enumerate() {
        let ctype = match folder.compression_type() {
            CompressionType::None => "None".to_string(),
            CompressionType::MsZip => "MsZip".to_string(),
            CompressionType::Quantum(v, m) => format!("Q{}/{}", v, m),
            CompressionType::Lzx(w) => format!("Lzx{}", w),
        };
        for file in folder.file_entries() {
            println!(
                "{}{}{}{}{} {:>2} {:<5} {:>10} {} {}",
                if file.is_read_only() { 'R' } else { '-' },
                if file.is_hidden() { 'H' } else { '-' },
                if file.is_system() { 'S' } else { '-' },
                if file.is_archive() { 'A' } else { '-' },
                if file.is_exec() { 'E' } else { '-' },
                index,
                ctype,
                file.uncompressed_size(),
                file.datetime()
                    .map(|dt| dt.to_string())
                    .unwrap_or_else(|| "invalid datetime".to_string()),
                file.name()
            );
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    let filter = if args.verbose {
        EnvFilter::new("cabfdi=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.list {
        return list(&args.cabinet);
    }
    let handler = ToDirectory { dest: args.dest, retried: false };
    let mut extractor = Extractor::new(handler);
    extractor
        .extract(&args.cabinet)
        .with_context(|| format!("extracting {}", args.cabinet.display()))?;
    Ok(())
}
