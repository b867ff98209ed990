use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::Path;
use tar::{Builder, EntryType, Header};

use crate::util::now_epoch_secs;

const TAR_BLOCK: u64 = 512;

/// The backup tar archive plus the membership view the engine checks before
/// every add.
///
/// The regular-file member snapshot is built once at open time. Paths
/// appended during the run are inserted into it so a file is never written
/// twice, but the archive itself is never re-listed mid-run. Container
/// names are likewise tracked in memory and reflect containers added
/// earlier in the same run; this process is the archive's only writer.
pub struct ArchiveStore {
    builder: Builder<File>,
    index: BTreeSet<String>,
    containers: BTreeSet<String>,
}

impl ArchiveStore {
    /// Open `path` for appending when it exists, create it otherwise.
    ///
    /// An existing archive with unreadable member headers is a fatal error:
    /// appending to it could bury valid members behind garbage.
    pub fn open(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::open_existing(path)
        } else {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self {
                builder: Builder::new(file),
                index: BTreeSet::new(),
                containers: BTreeSet::new(),
            })
        }
    }

    fn open_existing(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let mut index = BTreeSet::new();
        let mut containers = BTreeSet::new();
        // Offset just past the last member's padded data, where the next
        // append must land (overwriting the old end-of-archive trailer).
        let mut data_end = 0u64;

        {
            let mut archive = tar::Archive::new(&mut file);
            let entries = archive
                .entries()
                .with_context(|| format!("failed to list members of {}", path.display()))?;
            for entry in entries {
                let entry =
                    entry.with_context(|| format!("unreadable member in {}", path.display()))?;
                let name = entry
                    .path()
                    .with_context(|| {
                        format!("member with undecodable name in {}", path.display())
                    })?
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string();
                match entry.header().entry_type() {
                    EntryType::Regular => {
                        index.insert(name);
                    }
                    EntryType::Directory => {
                        containers.insert(name);
                    }
                    _ => {}
                }
                let end = entry.raw_file_position() + entry.size();
                data_end = end + (TAR_BLOCK - end % TAR_BLOCK) % TAR_BLOCK;
            }
        }

        file.seek(SeekFrom::Start(data_end))
            .with_context(|| format!("failed to seek in {}", path.display()))?;

        Ok(Self {
            builder: Builder::new(file),
            index,
            containers,
        })
    }

    /// Whether `rel` was present at open time or appended during this run.
    pub fn contains(&self, rel: &str) -> bool {
        self.index.contains(rel)
    }

    pub fn has_container(&self, key: &str) -> bool {
        self.containers.contains(key)
    }

    /// Append the directory-type member grouping one device's files,
    /// stamped with the current time.
    pub fn add_container(&mut self, key: &str) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        header.set_mode(0o755);
        header.set_mtime(now_epoch_secs()?);
        self.builder
            .append_data(&mut header, key, io::empty())
            .with_context(|| format!("failed to add container {key}"))?;
        self.containers.insert(key.to_string());
        Ok(())
    }

    /// Append one activity file at `rel`, preserving its metadata, and
    /// record it in the membership view.
    pub fn append_file(&mut self, src: &Path, rel: &str) -> Result<()> {
        self.builder
            .append_path_with_name(src, rel)
            .with_context(|| format!("failed to add {rel}"))?;
        self.index.insert(rel.to_string());
        Ok(())
    }

    /// Write the end-of-archive trailer and flush.
    pub fn close(mut self) -> Result<()> {
        self.builder.finish().context("failed to finalize archive")?;
        Ok(())
    }
}
