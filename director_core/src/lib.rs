//! Core data structures and coordination primitives of director.
//!
//! A [`plan::Plan`] carries a [`corpus::Corpus`] of litmus subjects through the
//! stage pipeline. Within one stage, many producer threads report their work
//! as [`builder::Request`]s and a single [`builder::Builder`] applies them to
//! the output corpus; [`par::par_build`] wires the two halves together.

pub mod builder;
pub mod collate;
pub mod corpus;
pub mod ctx;
pub mod fanin;
pub mod forward;
pub mod id;
pub mod machine_log;
pub mod par;
pub mod plan;
pub mod status;
pub mod subject;

pub type RngType = rand::rngs::SmallRng;
