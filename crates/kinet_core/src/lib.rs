//! The `kinet_core` crate is the numerical heart of Kinet: a fixed-step
//! hybrid simulator for biochemical reaction-network models. One
//! sequential pipeline per cycle combines explicit multistep and
//! Runge-Kutta integration, LU-based resolution of algebraic
//! constraints, closed-form settling of fast reactions, discrete events
//! and delayed terms.
//!
//! Key components:
//! - **Expr**: a stack machine for kinetic laws and rule expressions,
//!   evaluated through an explicit context (value views, freeze record,
//!   reverse-time slot).
//! - **State**: per-variable simulation records with staged values and
//!   derivative history, classified once into all-variable and pure-ODE
//!   groups.
//! - **Stepper**: Adams-Bashforth orders 0-3 and classic four-stage
//!   Runge-Kutta.
//! - **Simulate**: the driver sequencing fast reactions, events, delay
//!   recording, sampling, integration and the algebraic solve.

pub mod algebraic;
pub mod delay;
pub mod events;
pub mod expr;
pub mod fast;
pub mod model;
pub mod output;
pub mod simulate;
pub mod state;
pub mod stepper;
