use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use crate::backup::archive::ArchiveStore;
use crate::backup::engine;
use crate::config;
use crate::garmin::GARMIN_VENDOR_ID;
use crate::garmin::discovery::LinuxVolumeSource;
use crate::logging;

/// Backup activities from Garmin devices.
#[derive(Debug, Parser)]
#[command(name = "garminbak", version, about = "Backup activities from Garmin devices")]
pub struct Cli {
    /// Output archive for backup
    #[arg(short = 'f', value_name = "PATH")]
    pub archive: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Automatically unmount Garmin devices when done
    #[arg(long = "auto-umount")]
    pub auto_umount: bool,

    /// Automatically eject Garmin devices when done
    #[arg(long = "auto-eject")]
    pub auto_eject: bool,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::resolve(&cli)?;
    logging::init(settings.verbose);

    let mut store = ArchiveStore::open(&settings.archive).with_context(|| {
        format!(
            "impossible to open backup file {}",
            settings.archive.display()
        )
    })?;

    let source = LinuxVolumeSource::new(GARMIN_VENDOR_ID);
    let scan = source.scan()?;

    let outcome = engine::run_backup(&mut store, scan, settings.post_action())?;
    store.close().context("failed to finalize backup archive")?;

    if outcome.devices == 0 {
        log::error!("Couldn't find any Garmin device");
    } else if outcome.backed_up == 0 {
        log::info!("All files already backed up!");
    } else {
        log::info!("Backup complete! ({} new files)", outcome.backed_up);
    }

    Ok(())
}
