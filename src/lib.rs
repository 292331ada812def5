pub mod clock;
pub mod driver;
pub mod model;
pub mod normalize;
pub mod patrol;
pub mod project_config;
pub mod publish;
pub mod runner;
pub mod scan;

pub use clock::{Clock, SystemClock};
pub use model::{Platform, Report, Repository, SeverityKind, Target, Vulnerability};
pub use patrol::{Patrol, PatrolOutcome};
pub use project_config::ProjectConfig;
