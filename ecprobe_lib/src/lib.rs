//! A library to query the identity and state of a discrete embedded controller
//! (EC) over its host command protocol, and building tools to do so.

#[macro_use]
extern crate log;

pub mod commandline;
pub mod config;
pub mod embedded_ec;
mod os_specific;
mod util;
