//! Optimizer backend for the EPEC engine.
//!
//! This crate provides the full capability set the engine requires of its
//! optimizer: continuous LP (with duals and unbounded rays), convex QP,
//! MILP/MIQP over binary variables, indicator constraints, a feasibility
//! relaxation, a solution pool, and per-model time limit / thread / output /
//! dual-reduction parameters.
//!
//! # Structure
//!
//! - [`model`]: the model-building API ([`Env`], [`Model`], [`Solution`]).
//! - `simplex`: dense two-phase primal simplex.
//! - `lemke`: complementary pivoting for convex QP KKT systems.
//! - `branch`: branch-and-bound over binaries with node-level indicator
//!   enforcement.
//!
//! The environment is a scoped resource created once per engine; models are
//! created from it, solved, and dropped within a single function.

#![warn(clippy::all)]

pub mod error;
pub mod model;

mod branch;
mod lemke;
mod simplex;

pub use error::{OptError, OptResult};
pub use model::{
    Env, Indicator, LinConstr, Model, ObjSense, PoolEntry, Sense, Solution, SolveParams, Status,
    Var, VarType,
};
