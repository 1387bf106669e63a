//! Top-level facade crate for mural.
//!
//! Re-exports the core, hub, and node libraries so users can depend on a
//! single crate; also hosts the operator client used by the CLI.

pub mod client;

pub mod core {
    pub use mural_core::*;
}

pub mod hub {
    pub use mural_hub::*;
}

pub mod node {
    pub use mural_node::*;
}
