//! Outer-approximation solver for equilibrium problems with equilibrium
//! constraints (EPECs).
//!
//! An EPEC is a finite game in which every player's decision problem is a
//! mathematical program with complementarity constraints. This crate
//! implements the algorithmic engine:
//!
//! - [`param`]: parameterized quadratic programs ([`MpParam`]) with dummy
//!   extension, fixed-parameter instantiation, and KKT assembly;
//! - [`hull`]: the Balas extended formulation for convex hulls of
//!   polyhedral unions;
//! - [`lcp`]: complementarity systems ([`Lcp`]) with cut pools and MIP
//!   reformulations, and their disjunctive outer approximations
//!   ([`PolyLcp`]);
//! - [`nash`]: the stacked master game ([`NashGame`]) whose KKT system
//!   certifies equilibria of the convex approximation;
//! - [`outer`]: the branch-and-cut driver with value cuts, a separation
//!   oracle, and four branching rules;
//! - [`epec`]: the [`Epec`] façade orchestrating finalize, equilibrium
//!   computation, feasibility checking, and branching.
//!
//! The optimizer backend lives in the `epec-opt` crate; the engine talks
//! to it exclusively through `epec_opt::{Env, Model, Solution}`.
//!
//! # Example
//!
//! ```ignore
//! use epec_core::{Epec, EpecOptions, MpParam, QpObjective, QpConstraints};
//!
//! let mut epec = Epec::new(EpecOptions::default());
//! epec.add_player(lower_level, num_leader_vars, leader_objective)?;
//! epec.finalize()?;
//! epec.find_nash_eq()?;
//! let stats = epec.get_statistics();
//! ```

#![warn(clippy::all)]

pub mod epec;
pub mod error;
pub mod hull;
pub mod lcp;
pub mod nash;
pub mod numeric;
pub mod options;
pub mod outer;
pub mod param;

pub use epec::Epec;
pub use error::{EpecError, EpecResult};
pub use lcp::{Lcp, PolyLcp};
pub use nash::NashGame;
pub use options::{Algorithm, EpecOptions, EpecStatistics, EpecStatus};
pub use outer::OuterTree;
pub use param::{MpParam, QpConstraints, QpObjective};
