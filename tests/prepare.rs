mod common;

use std::fs;

use metagoflow_crate::app::{App, ProgressEvent, ProgressSink};
use metagoflow_crate::graph::{GraphAssembler, MetadataTemplate};
use metagoflow_crate::workspace::Workspace;

use common::{FakeCodec, RUN_ID, lookup, write_run_tree};

struct Quiet;

impl ProgressSink for Quiet {
    fn event(&self, _event: ProgressEvent) {}
}

#[test]
fn bulky_top_level_results_are_compressed_and_moved() {
    let work = tempfile::tempdir().unwrap();
    let tree = tempfile::tempdir().unwrap();
    let run_tree = tree.path().join(RUN_ID);
    write_run_tree(&run_tree, &[]);
    let results = run_tree.join("results");
    fs::write(results.join("final.contigs.fa"), ">c1\nACGT\n").unwrap();
    fs::write(results.join("DBH.merged.fasta"), ">r1\nACGT\n").unwrap();
    fs::write(
        results.join("functional-annotation/DBH.merged_CDS.faa"),
        ">p1\nMK\n",
    )
    .unwrap();

    let archive = work.path().join(format!("{RUN_ID}.tar.bz2"));
    fs::write(&archive, b"bz").unwrap();
    let codec = FakeCodec::default().with_fixture(&archive, tree.path());
    let workspace = Workspace::from_std(work.path(), work.path()).unwrap();
    let app = App::new(
        workspace,
        lookup(),
        codec,
        GraphAssembler::new(MetadataTemplate::builtin().unwrap()),
    );

    let prepared = app.prepare(&archive, &Quiet).unwrap();
    assert!(!prepared.skipped);
    assert_eq!(
        prepared.compressed,
        ["results/DBH.merged.fasta.bz2", "results/final.contigs.fa.bz2"]
    );

    let moved = work.path().join("prepared_archives").join(RUN_ID);
    assert!(prepared.path.as_std_path().ends_with(format!("prepared_archives/{RUN_ID}")));
    assert!(!work.path().join(RUN_ID).exists());
    assert!(moved.join("results/final.contigs.fa.bz2").is_file());
    assert!(!moved.join("results/final.contigs.fa").exists());
    // only the top of results/ is considered
    assert!(
        moved
            .join("results/functional-annotation/DBH.merged_CDS.faa")
            .is_file()
    );

    let again = app.prepare(&archive, &Quiet).unwrap();
    assert!(again.skipped);
    assert!(again.compressed.is_empty());
}
