use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};

use crate::backup::archive::ArchiveStore;
use crate::garmin::DeviceRecord;

/// What to do with a device once its files are archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostAction {
    None,
    Unmount,
    Eject,
}

/// Totals for one run, used for end-of-run reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub devices: usize,
    pub backed_up: usize,
}

/// Back up every discovered device in yield order, one device and one file
/// at a time. Device-side failures are logged and that device contributes
/// nothing further; archive write failures abort the run since the
/// archive's integrity is in doubt.
pub fn run_backup(
    store: &mut ArchiveStore,
    devices: impl IntoIterator<Item = DeviceRecord>,
    post: PostAction,
) -> Result<RunOutcome> {
    let mut outcome = RunOutcome::default();

    for device in devices {
        outcome.devices += 1;
        let key = device.container_key();

        if !store.has_container(&key) {
            store.add_container(&key)?;
        }

        match list_activities(&device.activities_dir) {
            Ok(files) => {
                for (file_name, path) in files {
                    let rel = format!("{key}/{file_name}");
                    if store.contains(&rel) {
                        continue;
                    }
                    log::info!("Backing up {}/{}", device.name, file_name);
                    store.append_file(&path, &rel)?;
                    outcome.backed_up += 1;
                }
            }
            Err(err) => {
                log::error!("couldn't list activities for {}: {err}", device.name);
            }
        }

        dispatch_post_action(&device, post);
    }

    Ok(outcome)
}

/// Regular files in `dir`, sorted by name so archive member order is stable
/// across runs.
fn list_activities(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        files.push((name, path));
    }
    files.sort();
    Ok(files)
}

fn dispatch_post_action(device: &DeviceRecord, post: PostAction) {
    let result = match post {
        PostAction::None => return,
        PostAction::Eject => device.volume.eject(),
        PostAction::Unmount => device.volume.unmount(),
    };
    if let Err(err) = result {
        log::error!("{}: {err}", device.name);
    }
}

#[cfg(test)]
mod tests {
    use super::{PostAction, RunOutcome, run_backup};
    use crate::backup::archive::ArchiveStore;
    use crate::error::DeviceError;
    use crate::garmin::{DeviceRecord, VolumeControl};
    use std::cell::RefCell;
    use std::fs::{self, File};
    use std::path::Path;
    use std::rc::Rc;
    use tempfile::tempdir;

    #[derive(Debug, Default)]
    struct ActionLog {
        unmounts: usize,
        ejects: usize,
    }

    struct FakeVolume {
        log: Rc<RefCell<ActionLog>>,
        fail_eject: bool,
    }

    impl VolumeControl for FakeVolume {
        fn unmount(&self) -> Result<(), DeviceError> {
            self.log.borrow_mut().unmounts += 1;
            Ok(())
        }

        fn eject(&self) -> Result<(), DeviceError> {
            if self.fail_eject {
                return Err(DeviceError::Eject {
                    device: "/dev/fake".to_string(),
                    reason: "device reports it cannot be ejected".to_string(),
                });
            }
            self.log.borrow_mut().ejects += 1;
            Ok(())
        }
    }

    fn device(
        name: &str,
        id: u64,
        activities_dir: &Path,
        log: &Rc<RefCell<ActionLog>>,
    ) -> DeviceRecord {
        DeviceRecord {
            name: name.to_string(),
            id,
            mount_root: activities_dir.to_path_buf(),
            activities_dir: activities_dir.to_path_buf(),
            volume: Box::new(FakeVolume {
                log: Rc::clone(log),
                fail_eject: false,
            }),
        }
    }

    fn member_names(path: &Path) -> Vec<(String, bool)> {
        let mut archive = tar::Archive::new(File::open(path).expect("open archive"));
        archive
            .entries()
            .expect("entries")
            .map(|entry| {
                let entry = entry.expect("entry");
                let name = entry
                    .path()
                    .expect("path")
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_string();
                (name, entry.header().entry_type().is_dir())
            })
            .collect()
    }

    #[test]
    fn first_run_backs_up_every_activity() {
        let tmp = tempdir().expect("tempdir");
        let activities = tmp.path().join("Activities");
        fs::create_dir_all(&activities).expect("mkdir");
        fs::write(activities.join("B.FIT"), b"ride b").expect("write");
        fs::write(activities.join("A.FIT"), b"ride a").expect("write");

        let archive_path = tmp.path().join("backup.tar");
        let mut store = ArchiveStore::open(&archive_path).expect("open");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let outcome = run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &activities, &log)],
            PostAction::None,
        )
        .expect("run");
        store.close().expect("close");

        assert_eq!(
            outcome,
            RunOutcome {
                devices: 1,
                backed_up: 2,
            }
        );
        assert_eq!(
            member_names(&archive_path),
            vec![
                ("edge 530 - 3863238".to_string(), true),
                ("edge 530 - 3863238/A.FIT".to_string(), false),
                ("edge 530 - 3863238/B.FIT".to_string(), false),
            ]
        );
    }

    #[test]
    fn second_run_only_picks_up_new_files() {
        let tmp = tempdir().expect("tempdir");
        let activities = tmp.path().join("Activities");
        fs::create_dir_all(&activities).expect("mkdir");
        fs::write(activities.join("A.FIT"), b"ride a").expect("write");
        fs::write(activities.join("B.FIT"), b"ride b").expect("write");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &activities, &log)],
            PostAction::None,
        )
        .expect("first run");
        store.close().expect("close");

        fs::write(activities.join("C.FIT"), b"ride c").expect("write");

        let mut store = ArchiveStore::open(&archive_path).expect("reopen");
        let outcome = run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &activities, &log)],
            PostAction::None,
        )
        .expect("second run");
        store.close().expect("close");

        assert_eq!(
            outcome,
            RunOutcome {
                devices: 1,
                backed_up: 1,
            }
        );
        // One container, three files, nothing duplicated.
        assert_eq!(
            member_names(&archive_path),
            vec![
                ("edge 530 - 3863238".to_string(), true),
                ("edge 530 - 3863238/A.FIT".to_string(), false),
                ("edge 530 - 3863238/B.FIT".to_string(), false),
                ("edge 530 - 3863238/C.FIT".to_string(), false),
            ]
        );
    }

    #[test]
    fn unchanged_device_set_is_idempotent() {
        let tmp = tempdir().expect("tempdir");
        let activities = tmp.path().join("Activities");
        fs::create_dir_all(&activities).expect("mkdir");
        fs::write(activities.join("A.FIT"), b"ride a").expect("write");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &activities, &log)],
            PostAction::None,
        )
        .expect("first run");
        store.close().expect("close");
        let after_first = member_names(&archive_path);

        let mut store = ArchiveStore::open(&archive_path).expect("reopen");
        let outcome = run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &activities, &log)],
            PostAction::None,
        )
        .expect("second run");
        store.close().expect("close");

        assert_eq!(outcome.backed_up, 0);
        assert_eq!(member_names(&archive_path), after_first);
    }

    #[test]
    fn same_name_different_id_gets_its_own_container() {
        let tmp = tempdir().expect("tempdir");
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        fs::create_dir_all(&first).expect("mkdir");
        fs::create_dir_all(&second).expect("mkdir");
        fs::write(first.join("A.FIT"), b"unit one").expect("write");
        fs::write(second.join("A.FIT"), b"unit two").expect("write");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        let outcome = run_backup(
            &mut store,
            vec![
                device("edge 530", 111, &first, &log),
                device("edge 530", 222, &second, &log),
            ],
            PostAction::None,
        )
        .expect("run");
        store.close().expect("close");

        assert_eq!(
            outcome,
            RunOutcome {
                devices: 2,
                backed_up: 2,
            }
        );
        assert_eq!(
            member_names(&archive_path),
            vec![
                ("edge 530 - 111".to_string(), true),
                ("edge 530 - 111/A.FIT".to_string(), false),
                ("edge 530 - 222".to_string(), true),
                ("edge 530 - 222/A.FIT".to_string(), false),
            ]
        );
    }

    #[test]
    fn configured_post_action_runs_once_per_device() {
        let tmp = tempdir().expect("tempdir");
        let activities = tmp.path().join("Activities");
        fs::create_dir_all(&activities).expect("mkdir");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        run_backup(
            &mut store,
            vec![
                device("edge 530", 111, &activities, &log),
                device("forerunner 235", 222, &activities, &log),
            ],
            PostAction::Unmount,
        )
        .expect("run");
        store.close().expect("close");

        assert_eq!(log.borrow().unmounts, 2);
        assert_eq!(log.borrow().ejects, 0);
    }

    #[test]
    fn failed_eject_is_not_fatal() {
        let tmp = tempdir().expect("tempdir");
        let activities = tmp.path().join("Activities");
        fs::create_dir_all(&activities).expect("mkdir");
        fs::write(activities.join("A.FIT"), b"ride a").expect("write");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));
        let stubborn = DeviceRecord {
            name: "edge 530".to_string(),
            id: 3863238,
            mount_root: activities.clone(),
            activities_dir: activities.clone(),
            volume: Box::new(FakeVolume {
                log: Rc::clone(&log),
                fail_eject: true,
            }),
        };

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        let outcome =
            run_backup(&mut store, vec![stubborn], PostAction::Eject).expect("run survives");
        store.close().expect("close");

        assert_eq!(outcome.backed_up, 1);
        assert_eq!(log.borrow().ejects, 0);
    }

    #[test]
    fn unreadable_activities_dir_skips_files_but_still_dispatches() {
        let tmp = tempdir().expect("tempdir");
        let missing = tmp.path().join("gone");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        let outcome = run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &missing, &log)],
            PostAction::Unmount,
        )
        .expect("run survives");
        store.close().expect("close");

        assert_eq!(
            outcome,
            RunOutcome {
                devices: 1,
                backed_up: 0,
            }
        );
        assert_eq!(log.borrow().unmounts, 1);
    }

    #[test]
    fn subdirectories_in_activities_are_ignored() {
        let tmp = tempdir().expect("tempdir");
        let activities = tmp.path().join("Activities");
        fs::create_dir_all(activities.join("nested")).expect("mkdir");
        fs::write(activities.join("A.FIT"), b"ride a").expect("write");

        let archive_path = tmp.path().join("backup.tar");
        let log = Rc::new(RefCell::new(ActionLog::default()));

        let mut store = ArchiveStore::open(&archive_path).expect("open");
        let outcome = run_backup(
            &mut store,
            vec![device("edge 530", 3863238, &activities, &log)],
            PostAction::None,
        )
        .expect("run");
        store.close().expect("close");

        assert_eq!(outcome.backed_up, 1);
    }
}
