//! CLI entry point: mounts a DISA save container as a read/write FUSE
//! filesystem. The container is read directly off disk unless a movable.sed
//! and keyset are supplied, in which case it's wrapped in the AES-CTR layer
//! first — the on-disk container under `sdmc/.../<title id>/` is stored
//! encrypted under a key derived from the console's device key.

use std::fs::File;
use std::path::PathBuf;

use clap::Parser;

use disafs::aes_ctr::AesCtrFile;
use disafs::byte_file::ByteFileRef;
use disafs::disa::Disa;
use disafs::disk_file::DiskByteFile;
use disafs::error::MountError;
use disafs::key::{load_movable_key, Keyset};
use disafs::mount::DisaFilesystem;

#[derive(Parser, Debug)]
#[command(author, version, about = "Mount a 3DS DISA save container over FUSE")]
struct Args {
    /// Path to the DISA container file.
    container: PathBuf,

    /// Mountpoint to expose the container's filesystem at.
    mountpoint: PathBuf,

    /// Path to a movable.sed file; if given along with --keyset, the
    /// container is treated as AES-CTR encrypted under the derived key.
    #[arg(long)]
    movable_sed: Option<PathBuf>,

    /// Path to a `key=value` hex keyset file (see `Keyset::from_reader`).
    #[arg(long)]
    keyset: Option<PathBuf>,

    /// Run in the foreground instead of daemonizing.
    #[arg(long, default_value_t = true)]
    foreground: bool,
}

fn open_container(args: &Args) -> Result<ByteFileRef, MountError> {
    let file = File::options().read(true).write(true).open(&args.container)?;
    let disk = DiskByteFile::new(file)?;

    match (&args.movable_sed, &args.keyset) {
        (Some(movable_path), Some(keyset_path)) => {
            let device_key = load_movable_key(File::open(movable_path)?)?;
            let keyset = Keyset::from_reader(File::open(keyset_path)?)?;
            log::info!("derived device key from {}", movable_path.display());
            // The header key doubles as the per-save AES-CTR key in this
            // format; a real per-title key would additionally scramble it
            // with the title's key-y, which is out of scope for this CLI.
            let key: [u8; 16] = keyset.header_key[..16].try_into().expect("header_key is at least 16 bytes");
            let mut iv = [0u8; 16];
            iv[..16].copy_from_slice(&device_key);
            Ok(AesCtrFile::new(disk, key, iv))
        }
        (None, None) => Ok(disk),
        _ => {
            log::warn!("both --movable-sed and --keyset are required to decrypt; mounting as plaintext");
            Ok(disk)
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let container = match open_container(&args) {
        Ok(container) => container,
        Err(e) => {
            eprintln!("failed to open container: {e}");
            std::process::exit(1);
        }
    };

    let disa = match Disa::open(container) {
        Ok(disa) => disa,
        Err(e) => {
            eprintln!("failed to parse DISA container: {e}");
            std::process::exit(1);
        }
    };

    log::info!(
        "mounted {} blocks of {} bytes each at {}",
        disa.total_blocks(),
        disa.block_size(),
        args.mountpoint.display()
    );

    let options = vec![fuser::MountOption::RW, fuser::MountOption::FSName("disafs".to_string())];
    if let Err(e) = fuser::mount2(DisaFilesystem::new(disa), &args.mountpoint, &options) {
        eprintln!("mount failed: {e}");
        std::process::exit(1);
    }
}
