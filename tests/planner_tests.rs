use cpfind::optimizer::{RotationOptimizer, SharedOptimizer};
use cpfind::planner::{CheckedPairs, MatchTask, StackLayout};
use cpfind::{ControlPoint, Project};
use std::collections::BTreeSet;
use std::path::Path;

/// Three stacks of two bracketed shots, one row.
const BRACKETED_ROW: &str = r#"p f2 w3000 h1500 v360
i w400 h300 f0 v50 y0 p0 r0 Eev8 j0 n"a0.jpg"
i w400 h300 f0 v50 y0 p0 r0 Eev10 j0 n"a1.jpg"
i w400 h300 f0 v50 y30 p0 r0 Eev8 j1 n"b0.jpg"
i w400 h300 f0 v50 y30 p0 r0 Eev10 j1 n"b1.jpg"
i w400 h300 f0 v50 y60 p0 r0 Eev8 j2 n"c0.jpg"
i w400 h300 f0 v50 y60 p0 r0 Eev10 j2 n"c1.jpg"
"#;

fn link(a: usize, b: usize) -> ControlPoint {
    ControlPoint {
        image1: a,
        x1: 300.0,
        y1: 150.0,
        image2: b,
        x2: 100.0,
        y2: 150.0,
    }
}

fn task_set(tasks: &[MatchTask]) -> BTreeSet<(usize, usize)> {
    tasks.iter().map(|t| (t.i1.min(t.i2), t.i1.max(t.i2))).collect()
}

#[test]
fn test_bracketed_row_plan() {
    let project = Project::parse(BRACKETED_ROW, Path::new("/tmp")).unwrap();
    let layout = StackLayout::build(&project.images);
    assert_eq!(layout.stacks, vec![vec![0, 1], vec![2, 3], vec![4, 5]]);
    assert_eq!(layout.layer, BTreeSet::from([1, 3, 5]));
    assert_eq!(layout.analysis_set().len(), 6);

    let mut checked = CheckedPairs::new();
    let stack_tasks = layout.stack_tasks(&mut checked);
    assert_eq!(task_set(&stack_tasks), BTreeSet::from([(0, 1), (2, 3), (4, 5)]));
    let chain = layout.layer_chain(&mut checked);
    assert_eq!(task_set(&chain), BTreeSet::from([(1, 3), (3, 5)]));

    let found = vec![link(0, 1), link(2, 3), link(4, 5), link(1, 3), link(3, 5)];
    assert_eq!(layout.layer_components(&found).len(), 1);
    assert!(layout.bridge_tasks(&found, &mut checked).is_empty());
}

#[test]
fn test_broken_chain_is_bridged() {
    let project = Project::parse(BRACKETED_ROW, Path::new("/tmp")).unwrap();
    let layout = StackLayout::build(&project.images);
    let mut checked = CheckedPairs::new();
    layout.stack_tasks(&mut checked);
    layout.layer_chain(&mut checked);

    // 3-5 failed to match
    let found = vec![link(1, 3)];
    assert_eq!(layout.layer_components(&found), vec![vec![1, 3], vec![5]]);
    let bridges = layout.bridge_tasks(&found, &mut checked);
    // 1-3 and 3-5 were already tried
    assert_eq!(task_set(&bridges), BTreeSet::from([(1, 5)]));
}

#[test]
fn test_final_phase_schedules_overlapping_layer_pairs() {
    let project = Project::parse(BRACKETED_ROW, Path::new("/tmp")).unwrap();
    let layout = StackLayout::build(&project.images);
    let mut checked = CheckedPairs::new();
    layout.stack_tasks(&mut checked);
    layout.layer_chain(&mut checked);

    let found = vec![link(1, 3), link(3, 5)];
    let optimizer = SharedOptimizer::new(RotationOptimizer);
    let tasks = layout.final_tasks(&project.images, &found, &optimizer, &mut checked);
    assert!(tasks.iter().all(|t| layout.layer.contains(&t.i1) && layout.layer.contains(&t.i2)));
    assert!(tasks.iter().all(|t| !matches!((t.i1.min(t.i2), t.i1.max(t.i2)), (1, 3) | (3, 5))));
}

#[test]
fn test_disconnected_layer_falls_back_to_all_pairs() {
    let project = Project::parse(BRACKETED_ROW, Path::new("/tmp")).unwrap();
    let layout = StackLayout::build(&project.images);
    let mut checked = CheckedPairs::new();
    let first = layout.stack_tasks(&mut checked).len() + layout.layer_chain(&mut checked).len();

    let optimizer = SharedOptimizer::new(RotationOptimizer);
    let rest = layout.final_tasks(&project.images, &[], &optimizer, &mut checked);
    assert_eq!(first + rest.len(), 15);
}
