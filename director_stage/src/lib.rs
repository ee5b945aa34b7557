//! Director: drives litmus tests through fuzzing, lifting, compilation and
//! execution on a set of machines.

#[macro_use]
pub mod machine_log;
pub mod campaign;
pub mod config;
pub mod obs;
pub mod pathset;
pub mod process;
pub mod remote;
pub mod services;
pub mod stage;
pub mod stats;
pub mod util;

use crate::{config::Config, pathset::Pathset};
use director_core::plan::Plan;

/// Output location for stages working on `plan`: a single-machine plan gets
/// the directory of its machine, the same one a campaign would use.
pub fn stage_paths(config: &Config, plan: &Plan) -> Pathset {
    match plan.machine() {
        Ok(m) => Pathset::new(config.out_dir.join(m.id.to_string())),
        Err(_) => Pathset::new(&config.out_dir),
    }
}
