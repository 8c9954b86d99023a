use anyhow::Result;
use replay_runner::{
    collect_configured_scores, run_grid, InterruptFlag, InvocationOutcome, Invoker, LabConfig,
    Preset, ResultLayout, RunPair,
};
use std::fs;
use std::io;

/// Stands in for the external player: writes `generation * 10 + trial` as the score.
struct FakePlayer {
    layout: ResultLayout,
}

impl Invoker for FakePlayer {
    fn invoke(&mut self, pair: &RunPair, label: &str) -> Result<InvocationOutcome> {
        let score = pair.generation * 10 + pair.trial;
        fs::write(
            self.layout.path_for(label),
            format!("{}\n..........\n", score),
        )?;
        Ok(InvocationOutcome::Success)
    }
}

fn config_in(dir: &std::path::Path) -> LabConfig {
    let mut config = LabConfig::preset(Preset::W10);
    config.generations = 0..4;
    config.trials = 3;
    config.layout.dir = dir.join("replay");
    config.checkpoint = Some(dir.join("replay").join("progress.json"));
    config
}

#[test]
fn interrupted_run_resumes_and_feeds_plotter() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_in(dir.path());

    let flag = InterruptFlag::new();
    let mut player = FakePlayer {
        layout: config.layout.clone(),
    };
    flag.trigger();
    let summary = run_grid(&config, &mut player, &flag, &mut io::sink()).expect("first run");
    assert_eq!(summary.resume_offset, 0);
    assert!(collect_configured_scores(&config).is_err());

    let summary = run_grid(&config, &mut player, &InterruptFlag::new(), &mut io::sink())
        .expect("second run");
    assert!(summary.is_finished());
    assert_eq!(summary.succeeded, 12);

    let table = collect_configured_scores(&config).expect("scores");
    assert_eq!(table.points.len(), 12);
    assert_eq!(table.points[4], (1, 11));
    assert_eq!(
        table.means,
        vec![(0, 1.0), (1, 11.0), (2, 21.0), (3, 31.0)]
    );
    assert_eq!(table.best(), Some((3, 32)));

    let again = collect_configured_scores(&config).expect("scores again");
    assert_eq!(table, again);
}
