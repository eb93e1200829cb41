//! Progress notification
//!
//! Long stages announce how much work they are about to do and then report increments. The
//! sink is purely observational and cannot interrupt a stage.
use std::fmt;

use log::debug;

/// Stages of model construction that report progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    GroupData,
    AddModels,
    SimplifyGroups,
    FormRules,
    IndexInstances,
    SetNeighbors,
    AssessComposite,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::GroupData => "grouping data",
            Stage::AddModels => "adding linear models",
            Stage::SimplifyGroups => "simplifying groups",
            Stage::FormRules => "forming rules",
            Stage::IndexInstances => "indexing instances",
            Stage::SetNeighbors => "setting neighbours",
            Stage::AssessComposite => "assessing composite model",
        };
        write!(f, "{}", name)
    }
}

pub trait Progress {
    /// A stage is starting and will report `total` units of work
    fn start(&mut self, stage: Stage, total: usize);

    /// `count` more units of work of the current stage are done
    fn advance(&mut self, count: usize);
}

/// Discards all progress events
#[derive(Clone, Copy, Debug, Default)]
pub struct Silent;

impl Progress for Silent {
    fn start(&mut self, _stage: Stage, _total: usize) {}
    fn advance(&mut self, _count: usize) {}
}

/// Forwards progress events to the `log` facade
#[derive(Clone, Debug, Default)]
pub struct LogProgress {
    stage: Option<Stage>,
    total: usize,
    done: usize,
}

impl Progress for LogProgress {
    fn start(&mut self, stage: Stage, total: usize) {
        self.stage = Some(stage);
        self.total = total;
        self.done = 0;
        debug!("{} ({} steps)", stage, total);
    }

    fn advance(&mut self, count: usize) {
        self.done += count;
        if let Some(stage) = self.stage {
            debug!("{}: {}/{}", stage, self.done, self.total);
        }
    }
}

/// Records every event
#[derive(Clone, Debug, Default)]
pub struct Counter {
    pub stages: Vec<(Stage, usize)>,
    pub advanced: usize,
}

impl Progress for Counter {
    fn start(&mut self, stage: Stage, total: usize) {
        self.stages.push((stage, total));
    }

    fn advance(&mut self, count: usize) {
        self.advanced += count;
    }
}
