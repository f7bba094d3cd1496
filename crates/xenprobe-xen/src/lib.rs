//! # xenprobe-xen
//!
//! Domain lifecycle control for unikernel verification under Xen.
//! Wraps the `xl` toolstack: create a domain paused, unpause it, attach its
//! console, poll its state and destroy it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use xenprobe_xen::{BootSpec, DomainController, DomainState, Xl};
//!
//! # async fn example() -> xenprobe_xen::Result<()> {
//! let xl = Xl::new();
//! let spec = BootSpec::new("/tmp/hello.xen", "hello_world").memory_mib(256);
//!
//! let domain = xl.create_paused(&spec).await?;
//! let current = xl.update(&domain).await?.expect("domain still exists");
//! assert!(current.state.check(DomainState::PAUSED));
//!
//! xl.unpause(&domain).await?;
//! xl.destroy(&domain).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Domain values are snapshots. The hypervisor owns the truth; refresh a
//! snapshot with [`DomainController::update`], which yields `None` once the
//! domain is gone.

mod boot;
mod console;
mod controller;
mod domain;
mod error;
mod state;

pub use boot::{BootSpec, OnCrash};
pub use console::Console;
pub use controller::{DomainController, Xl};
pub use domain::{parse_listing, Domain};
pub use error::{Result, XenError};
pub use state::{DomainState, InvalidStateCode};
