pub mod commands;
pub mod context;

use clap::ValueEnum;
use loadout_pipeline::GcMode;

#[derive(ValueEnum, Clone, Debug, Copy)]
pub enum CliGcMode {
    Off,
    Sync,
    Background,
}

impl From<CliGcMode> for GcMode {
    fn from(m: CliGcMode) -> Self {
        match m {
            CliGcMode::Off => GcMode::DoNotRun,
            CliGcMode::Sync => GcMode::RunSynchronously,
            CliGcMode::Background => GcMode::RunInBackground,
        }
    }
}
