// sfe — Stream Float Engine
//
// Library root. Address generation and slicing, the element lifecycle, and
// the PUM data-move compiler.

pub mod addr_gen;
pub mod affine;
pub mod data_move;
pub mod dep_graph;
pub mod diag;
pub mod element;
pub mod error;
pub mod id;
pub mod lifecycle;
pub mod mem_access;
pub mod options;
pub mod pum_command;
pub mod slicer;
pub mod strand;
pub mod topology;
pub mod value;
