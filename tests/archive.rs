mod common;

use std::fs;

use assert_matches::assert_matches;

use metagoflow_crate::archive::{ArchiveOpener, ArchiveState};
use metagoflow_crate::error::CrateError;
use metagoflow_crate::workspace::Workspace;

use common::{FakeCodec, RUN_ID, tree_has_temp_residue, write_run_tree};

fn workspace(root: &std::path::Path) -> Workspace {
    Workspace::from_std(root, &root.join("out")).unwrap()
}

#[test]
fn nested_archive_is_promoted() {
    let work = tempfile::tempdir().unwrap();
    let fixture = tempfile::tempdir().unwrap();
    write_run_tree(&fixture.path().join(RUN_ID), &[]);
    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"bz").unwrap();

    let workspace = workspace(work.path());
    let codec = FakeCodec::default().with_fixture(&archive, fixture.path());
    let opener = ArchiveOpener::new(&workspace, &codec);

    let open = opener.open(&archive).unwrap();
    assert_eq!(open.state, ArchiveState::ExtractedNested);
    assert!(open.results_dir().join("fastp.html").as_std_path().is_file());
    assert!(!tree_has_temp_residue(work.path()));
    assert_eq!(opener.repair(&open).unwrap(), None);
}

#[test]
fn flat_archive_is_renamed_and_repaired() {
    let work = tempfile::tempdir().unwrap();
    let fixture = tempfile::tempdir().unwrap();
    write_run_tree(fixture.path(), &[]);
    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"bz").unwrap();

    let workspace = workspace(work.path());
    let codec = FakeCodec::default().with_fixture(&archive, fixture.path());
    let opener = ArchiveOpener::new(&workspace, &codec);

    let open = opener.open(&archive).unwrap();
    assert_eq!(open.state, ArchiveState::ExtractedFlat);
    assert!(open.lacked_top_level_dir);
    assert!(work.path().join(RUN_ID).join("green.yml").is_file());

    let fixed = opener.repair(&open).unwrap().unwrap();
    assert!(fixed.ends_with(format!("fixed-archives/{RUN_ID}.tar.bz2")));
    assert!(fixed.as_std_path().is_file());
    assert_eq!(codec.packed.lock().unwrap()[0].1, RUN_ID);
    assert!(!workspace.repair_marker_path(&open.run_id).as_std_path().exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(fixed.as_std_path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
        let mode = fs::metadata(work.path().join(RUN_ID))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    // second repair finds the fixed archive and does not repack
    opener.repair(&open).unwrap();
    assert_eq!(codec.packed.lock().unwrap().len(), 1);
}

#[test]
fn reopening_is_a_no_op() {
    let work = tempfile::tempdir().unwrap();
    let fixture = tempfile::tempdir().unwrap();
    write_run_tree(&fixture.path().join(RUN_ID), &[]);
    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"bz").unwrap();

    let workspace = workspace(work.path());
    let codec = FakeCodec::default().with_fixture(&archive, fixture.path());
    let opener = ArchiveOpener::new(&workspace, &codec);
    opener.open(&archive).unwrap();
    fs::write(work.path().join(RUN_ID).join("marker"), b"kept").unwrap();

    let reopened = opener.open(&archive).unwrap();
    assert_eq!(reopened.state, ArchiveState::Existing);
    assert!(!reopened.lacked_top_level_dir);
    assert!(work.path().join(RUN_ID).join("marker").is_file());

    // the archive itself is not needed once open
    fs::remove_file(&archive).unwrap();
    assert_eq!(opener.open(&archive).unwrap().state, ArchiveState::Existing);
}

#[test]
fn interrupted_repair_resumes_on_reopen() {
    let work = tempfile::tempdir().unwrap();
    let fixture = tempfile::tempdir().unwrap();
    write_run_tree(fixture.path(), &[]);
    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"bz").unwrap();

    let workspace = workspace(work.path());
    let codec = FakeCodec::default().with_fixture(&archive, fixture.path());
    let opener = ArchiveOpener::new(&workspace, &codec);
    opener.open(&archive).unwrap();

    let reopened = opener.open(&archive).unwrap();
    assert_eq!(reopened.state, ArchiveState::Existing);
    assert!(reopened.lacked_top_level_dir);
    assert!(opener.repair(&reopened).unwrap().is_some());
    assert_eq!(codec.packed.lock().unwrap().len(), 1);

    let settled = opener.open(&archive).unwrap();
    assert!(!settled.lacked_top_level_dir);
    assert_eq!(opener.repair(&settled).unwrap(), None);
}

#[test]
fn corrupt_archive_is_marked_broken() {
    let work = tempfile::tempdir().unwrap();
    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"not a tarball").unwrap();

    let workspace = workspace(work.path());
    let codec = FakeCodec::default();
    let err = ArchiveOpener::new(&workspace, &codec)
        .open(&archive)
        .unwrap_err();

    assert_matches!(err, CrateError::BrokenArchive { .. });
    assert!(err.is_broken_archive());
    assert!(!archive.exists());
    assert!(work.path().join(format!("{RUN_ID}.tar.bz2-broken")).is_file());
    assert!(!work.path().join(RUN_ID).exists());
    assert!(!tree_has_temp_residue(work.path()));
}

#[test]
fn unrecognised_layout_is_broken() {
    let work = tempfile::tempdir().unwrap();
    let fixture = tempfile::tempdir().unwrap();
    fs::create_dir_all(fixture.path().join("something-else")).unwrap();
    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"bz").unwrap();

    let workspace = workspace(work.path());
    let codec = FakeCodec::default().with_fixture(&archive, fixture.path());
    assert_matches!(
        ArchiveOpener::new(&workspace, &codec)
            .open(&archive)
            .unwrap_err(),
        CrateError::BrokenArchive { .. }
    );
    assert!(!tree_has_temp_residue(work.path()));
}
