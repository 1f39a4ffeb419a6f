//! Fleet lifecycle: launching voyages, bootstrapping ships, and the
//! operator-facing operations over a running fleet.

mod ops;
mod sail;
mod ship;

pub use ops::{DoctorCheck, DoctorReport, Fleet, LogOptions, parse_ship_index};
pub use sail::{LaunchReport, Launcher};
pub use ship::{
    BootstrapContext, LaunchOutcome, ShipFailure, bootstrap_ship, launch_many, render_ship_prompt,
};
