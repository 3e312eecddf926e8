#![allow(clippy::too_many_arguments, clippy::float_cmp, clippy::needless_range_loop,
         clippy::manual_range_contains, clippy::unnecessary_map_or)]

pub mod q_shared;
pub mod qfiles;
pub mod error;
pub mod common;
pub mod cvar;
pub mod tnode;
pub mod trace;
pub mod tile;
pub mod dtile;
pub mod cmodel;

#[cfg(test)]
mod testmap;
